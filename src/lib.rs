//! A general-purpose network-analog solver (spec §1): nodes and links assemble an admittance
//! system `[A]{x}={b}` once per minor step, partitioned into independently-decomposed islands,
//! iterated until every non-linear link confirms its solution.

pub mod backend;
pub mod error;
pub mod filters;
pub mod island;
pub mod link;
pub mod log;
pub mod minor_step;
pub mod node;
pub mod solver;
pub mod system;

pub mod prelude {
    pub use crate::backend::{BackendKind, DecomposeOutcome, MatrixBackend};
    pub use crate::error::{GunnsError, GunnsResult};
    pub use crate::filters::{DemandConductanceFilter, DemandFilterConfig};
    pub use crate::island::{Island, IslandMode};
    pub use crate::link::{AdmittanceStamp, ConvergenceOutcome, Link, PortMap, SourceStamp};
    pub use crate::log::{BitSet, MajorStepRecord, MinorStepLog, MinorStepRecord, StepOutcome};
    pub use crate::node::{CapacitanceResponse, Node};
    pub use crate::solver::{GpuMode, Solver, SolverConfig};
}
