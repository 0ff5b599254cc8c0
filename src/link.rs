//! The polymorphic link contract (spec §4.2): every physical model implements [`Link`].
//!
//! Collapsed from the C++ `GunnsBasicLink` inheritance hierarchy into a single capability
//! trait (spec §9 redesign flag). A link borrows node indices, not node references — the
//! `Solver` owns the node arena and passes potentials in at the points the contract requires
//! them (`minor_step`, `compute_flows`).

use crate::error::GunnsError;

/// The outcome a link reports from [`Link::confirm_solution_acceptable`] (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    /// The link is satisfied with the current solution.
    Confirmed,
    /// The link demands another minor step with its newly computed stamps.
    Rejected,
    /// The link is not ready to decide; ask again without re-decomposing.
    Delayed,
}

/// A symmetric 2x2 admittance contribution a link stamps onto `[A]` for its port pair
/// (spec §3). Diagonal entries must be non-negative; `g01 == g10` is the symmetry invariant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdmittanceStamp {
    /// `A[port0][port0]` contribution.
    pub g00: f64,
    /// `A[port1][port1]` contribution.
    pub g11: f64,
    /// `A[port0][port1] == A[port1][port0]` contribution.
    pub g01: f64,
}

impl AdmittanceStamp {
    /// The stamp for a plain conductor of conductance `g` between the two ports: `G` on both
    /// diagonals, `-G` off-diagonal.
    pub fn conductor(g: f64) -> Self {
        Self {
            g00: g,
            g11: g,
            g01: -g,
        }
    }

    /// The zero stamp (e.g. for a fully blocked or uninitialized link).
    pub fn zero() -> Self {
        Self::default()
    }

    /// True iff the stamp obeys spec §3's invariants: symmetric (trivially, by construction)
    /// and non-negative on the diagonal.
    pub fn is_valid(&self) -> bool {
        self.g00.is_finite()
            && self.g11.is_finite()
            && self.g01.is_finite()
            && self.g00 >= 0.0
            && self.g11 >= 0.0
    }
}

/// The 2-vector source contribution a link stamps onto `{b}` for its port pair (spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceStamp {
    /// `b[port0]` contribution.
    pub b0: f64,
    /// `b[port1]` contribution.
    pub b1: f64,
}

impl SourceStamp {
    pub fn zero() -> Self {
        Self::default()
    }

    /// The source stamp for a potential source `V` behind conductance `G`: `-G*V` at port 0,
    /// `+G*V` at port 1 (spec §4.2).
    pub fn potential_source(g: f64, v: f64) -> Self {
        Self {
            b0: -g * v,
            b1: g * v,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.b0.is_finite() && self.b1.is_finite()
    }
}

/// A link's two port-to-node bindings. Port 0 -> port 1 is the positive flow direction
/// (spec §3). Either port may be bound to the ground node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMap {
    pub port0: usize,
    pub port1: usize,
}

impl PortMap {
    pub fn new(port0: usize, port1: usize) -> Self {
        Self { port0, port1 }
    }
}

/// The capability interface every link satisfies (spec §4.2).
///
/// Implementations own no node references; they receive node indices at `initialize` and are
/// handed potentials/flow sinks through the node arena the `Solver` passes to `minor_step`/
/// `compute_flows`/`transport_flows`.
pub trait Link: Send {
    /// Diagnostic name, used in warnings.
    fn name(&self) -> &str;

    /// Binds ports to node indices and applies port-specific rules (e.g. "port 0 must be
    /// ground"). Must set the link's initialized flag on success.
    fn initialize(&mut self, ports: PortMap, node_count: usize) -> Result<(), GunnsError>;

    /// Dynamically rewires one port, subject to the same port rules as `initialize`. On
    /// rejection the port binding is left unchanged.
    fn set_port(&mut self, port_index: usize, node_index: usize) -> Result<(), GunnsError>;

    fn ports(&self) -> PortMap;

    /// Link-specific port rule check, consulted by both `initialize` and `set_port`. The
    /// default accepts anything; non-trivial links (demand bridges, grounded sources) override
    /// this (spec §4.6, "checkSpecificPortRules").
    fn check_specific_port_rules(&self, _port_index: usize, _node_index: usize) -> bool {
        true
    }

    /// Updates internal state that depends only on prior-major-step potentials and `dt`.
    /// Produces this major step's first admittance/source stamps.
    fn step(&mut self, dt: f64);

    /// Called once per minor step with the most recent potentials at this link's two ports, so
    /// a non-linear link can linearize about the current operating point and re-stamp.
    fn minor_step(&mut self, dt: f64, minor_step_index: u32, potentials: (f64, f64));

    /// The non-linearity hook: does the link accept the current solution?
    fn confirm_solution_acceptable(
        &mut self,
        minor_step_index: u32,
        major_step_index: u64,
    ) -> ConvergenceOutcome;

    /// True if this link's admittance stamp changed since the last time it was read — tells the
    /// Solver whether to re-decompose or reuse the cached factorization.
    fn needs_admittance_update(&self) -> bool;

    /// The link's current admittance stamp for its port pair.
    fn admittance_stamp(&self) -> AdmittanceStamp;

    /// The link's current source stamp for its port pair.
    fn source_stamp(&self) -> SourceStamp;

    /// After `x` is known: compute potential drop, flux, and power from the two ports'
    /// potentials. Must preserve the sign convention (positive flux is port0 -> port1).
    fn compute_flows(&mut self, dt: f64, potentials: (f64, f64));

    /// Deposits inflow/outflow on the link's incident nodes via the provided sink closure,
    /// called once per port with `(node_index, magnitude, is_inflow)`.
    fn transport_flows(&mut self, dt: f64, sink: &mut dyn FnMut(usize, f64, bool));

    /// Rehydrates derived state after a checkpoint load.
    fn restart(&mut self) {}

    /// Last computed potential drop (`p0 - p1`).
    fn potential_drop(&self) -> f64 {
        0.0
    }

    /// Last computed flux (positive port0 -> port1).
    fn flux(&self) -> f64 {
        0.0
    }

    /// Last computed power (`potential_drop * flux`).
    fn power(&self) -> f64 {
        0.0
    }

    /// Blockage-malfunction multiplier in `[0, 1]`; `1.0` means unblocked.
    fn blockage(&self) -> f64 {
        1.0
    }
}
