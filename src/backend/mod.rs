//! Pluggable matrix decomposition/solve strategies (spec §4.3).
//!
//! Mirrors the teacher's `Solve` trait (`examples/chengts95-rustpower/src/basic/solver.rs`) —
//! own scratch state across calls, `decompose`-then-`solve`, a small capability surface — but
//! generalized from "one complex sparse LU trait with three impls" to the five real-valued
//! variants spec §4.3 names.

mod cholesky;
mod cg;
mod lu;
mod sparse;

pub use cholesky::CholeskyBackend;
pub use lu::LuBackend;
pub use sparse::SparseBackend;

#[cfg(feature = "gpu")]
mod gpu_common;
#[cfg(feature = "gpu")]
mod gpu_dense;
#[cfg(feature = "gpu")]
mod gpu_sparse;

#[cfg(feature = "gpu")]
pub use gpu_dense::GpuDenseBackend;
#[cfg(feature = "gpu")]
pub use gpu_sparse::GpuSparseBackend;

use nalgebra::{DMatrix, DVector};

/// Which backend variant solved a given island this step (spec §4.3 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    CpuCholesky,
    CpuLu,
    CpuSparse,
    GpuDense,
    GpuSparse,
}

/// The outcome of a decomposition attempt (spec §4.3, §7 `Singular`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecomposeOutcome {
    Ok,
    Singular,
}

/// A matrix decomposition/solve strategy, polymorphic over {decompose, solve, is_singular}
/// (spec §4.3).
pub trait MatrixBackend {
    fn kind(&self) -> BackendKind;

    /// Factors `a` in place (or into internal scratch). Must be deterministic for a given `a`.
    fn decompose(&mut self, a: &DMatrix<f64>) -> DecomposeOutcome;

    /// Solves using the most recent decomposition. `b` may be any vector of the correct size,
    /// supporting both the main solve and the capacitance probe's unit right-hand sides.
    fn solve(&mut self, b: &DVector<f64>) -> Option<DVector<f64>>;

    fn is_singular(&self) -> bool;

    /// Only [`BackendKind::CpuCholesky`] supports the network-capacitance probe (spec §4.3,
    /// "the chosen backend must be consistent with the capacitance probe requirement").
    fn supports_capacitance_probe(&self) -> bool {
        false
    }
}
