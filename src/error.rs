//! Error taxonomy for the solver core (spec §7).
//!
//! Initialization failures propagate synchronously as `Err(GunnsError)`. Runtime numerical
//! failures (`Singular`, `NotConverged`, `NumericOverflow`, `CapacitanceUnsupported`) are never
//! returned as errors from `Solver::step` — they are recovered locally, logged via `tracing`,
//! and recorded in the `MinorStepLog` so the simulation tick is never lost.

use thiserror::Error;

/// Fatal errors that can only occur during construction/initialization, or during a runtime
/// `setPort` rebind that is reverted on failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GunnsError {
    /// A link or the solver was configured with non-sensical values (e.g. `dt <= 0`,
    /// a negative tolerance, a limit of zero).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A port was mapped to a node index that violates a link's port rules (e.g. "port 0 must
    /// be ground") or is out of range of the node list.
    #[error("bad port assignment: {0}")]
    BadPortAssignment(String),
}

pub type GunnsResult<T> = Result<T, GunnsError>;
