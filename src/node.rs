//! Network node: a scalar potential plus flow accumulation and a network-capacitance probe.
//!
//! Mirrors the contract of `GunnsBasicNode` (spec §4.1): the node is a plain data type, not a
//! polymorphic base class (spec §9 redesign flag) — derived node variants (fluid nodes,
//! thermal nodes, ...) live outside the core and compose a `Node` rather than subclassing it.

use serde::{Deserialize, Serialize};

/// A node's potential response to a unit flux injected at that node, plus the full delta-
/// potential vector across all nodes (spec §3, "NetworkCapacitance probe").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacitanceResponse {
    /// The requesting node's own potential response to its unit flux request.
    pub self_response: f64,
    /// Delta-potential at every non-ground node, in node order, for the same unit flux.
    pub delta_potential: Vec<f64>,
}

/// A single node in the network graph: identified by its index into the solver's node array.
///
/// The final node `N-1` is reserved as the zero-potential ground/boundary node (spec §3); the
/// solver is responsible for enforcing that invariant (`Node::ground` is never mutated by
/// `set_potential`). Flow fields are magnitudes (non-negative); sign convention lives in the
/// links that deposit flow, not in the node.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    is_ground: bool,
    potential: f64,

    inflow: f64,
    outflow: f64,
    net_flow: f64,
    flow_through: f64,
    scheduled_outflux: f64,

    capacitance: f64,
    capacitance_request: f64,
    capacitance_response: Option<CapacitanceResponse>,

    island: Option<Vec<usize>>,

    initialized: bool,
}

impl Node {
    /// Constructs a non-ground node with the given diagnostic name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_ground: false,
            potential: 0.0,
            inflow: 0.0,
            outflow: 0.0,
            net_flow: 0.0,
            flow_through: 0.0,
            scheduled_outflux: 0.0,
            capacitance: 0.0,
            capacitance_request: 0.0,
            capacitance_response: None,
            island: None,
            initialized: true,
        }
    }

    /// Constructs the reserved ground node. Its potential is fixed at zero for its lifetime.
    pub fn ground(name: impl Into<String>) -> Self {
        let mut n = Self::new(name);
        n.is_ground = true;
        n
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ground(&self) -> bool {
        self.is_ground
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Mutates potential. Reserved for the Solver; writing to the ground node is a no-op
    /// (spec §4.1).
    pub fn set_potential(&mut self, p: f64) {
        if !self.is_ground {
            self.potential = p;
        }
    }

    pub fn potential(&self) -> f64 {
        if self.is_ground { 0.0 } else { self.potential }
    }

    /// Additive accumulation of inflow. `f` must be finite and non-negative; out-of-contract
    /// values are silently clamped to zero rather than poisoning the accumulator, since this is
    /// a runtime hot path links call every step (cf. spec §7 NumericOverflow policy of "replace
    /// with zero, warn").
    pub fn collect_influx(&mut self, f: f64) {
        if f.is_finite() && f >= 0.0 {
            self.inflow += f;
        } else {
            tracing::warn!(node = %self.name, value = f, "collect_influx: non-finite or negative flux ignored");
        }
    }

    pub fn collect_outflux(&mut self, f: f64) {
        if f.is_finite() && f >= 0.0 {
            self.outflow += f;
        } else {
            tracing::warn!(node = %self.name, value = f, "collect_outflux: non-finite or negative flux ignored");
        }
    }

    /// Pre-commit reservation of outgoing flow, so overflow-aware links can see how much flow
    /// is already being pulled out before they compute their own contribution.
    pub fn schedule_outflux(&mut self, f: f64) {
        if f.is_finite() && f >= 0.0 {
            self.scheduled_outflux += f;
        } else {
            tracing::warn!(node = %self.name, value = f, "schedule_outflux: non-finite or negative flux ignored");
        }
    }

    pub fn scheduled_outflux(&self) -> f64 {
        self.scheduled_outflux
    }

    pub fn inflow(&self) -> f64 {
        self.inflow
    }

    pub fn outflow(&self) -> f64 {
        self.outflow
    }

    pub fn net_flow(&self) -> f64 {
        self.net_flow
    }

    pub fn flow_through(&self) -> f64 {
        self.flow_through
    }

    /// Computes `netFlow = inflow - outflow` and `flowThrough = min(inflow, outflow)` for this
    /// major step. `dt` is accepted for derived node variants that integrate stored mass/energy
    /// from flow; the base node has no such state.
    pub fn integrate_flows(&mut self, _dt: f64) {
        self.net_flow = self.inflow - self.outflow;
        self.flow_through = self.inflow.min(self.outflow);
    }

    /// True when the node is pulling out more flow than it has ever received this step, a
    /// diagnostic used by overflow-aware links (mirrors `GunnsBasicNode::isOverflowing`).
    pub fn is_overflowing(&self, dt: f64) -> bool {
        dt > 0.0 && self.scheduled_outflux > self.inflow
    }

    /// Zeros all flow accumulators ahead of the next major step's link transport phase.
    pub fn reset_flows(&mut self) {
        self.inflow = 0.0;
        self.outflow = 0.0;
        self.net_flow = 0.0;
        self.flow_through = 0.0;
        self.scheduled_outflux = 0.0;
    }

    /// Requests the Solver compute this node's effective capacitance on the next decomposition.
    /// `flux` must be `> 0`; the request is consumed (reset to zero) once the Solver honors it.
    pub fn set_network_capacitance_request(&mut self, flux: f64) {
        if flux > 0.0 {
            self.capacitance_request = flux;
        } else {
            tracing::warn!(node = %self.name, flux, "network capacitance request must be > 0, ignored");
        }
    }

    pub fn network_capacitance_request(&self) -> f64 {
        self.capacitance_request
    }

    /// Consumes the pending capacitance request (called by the Solver once honored).
    pub(crate) fn take_capacitance_request(&mut self) -> Option<f64> {
        if self.capacitance_request > 0.0 {
            let f = self.capacitance_request;
            self.capacitance_request = 0.0;
            Some(f)
        } else {
            None
        }
    }

    pub(crate) fn set_capacitance_response(&mut self, response: CapacitanceResponse) {
        self.capacitance = response.self_response;
        self.capacitance_response = Some(response);
    }

    pub fn network_capacitance(&self) -> f64 {
        self.capacitance
    }

    pub fn network_capacitance_response(&self) -> Option<&CapacitanceResponse> {
        self.capacitance_response.as_ref()
    }

    /// Network-capacitance value (`C/dt` contribution to the diagonal of `A`), distinct from
    /// the capacitance *response* above: this is a per-step input the node (or a node-owning
    /// link) rewrites directly, not something the solver computes.
    pub fn capacitance(&self) -> f64 {
        self.capacitance
    }

    pub fn set_capacitance(&mut self, c: f64) {
        self.capacitance = c.max(0.0);
    }

    pub(crate) fn set_island(&mut self, island: Option<Vec<usize>>) {
        self.island = island;
    }

    /// Returns the island node list this node currently belongs to, or `None` if islanding is
    /// disabled (spec §4.1).
    pub fn island_vector(&self) -> Option<&[usize]> {
        self.island.as_deref()
    }

    /// Rehydrates derived state after a checkpoint load. The base node has no derived state to
    /// recompute; present for the `restart()` contract every node/link implements (spec §6).
    pub fn restart(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_node_potential_is_fixed() {
        let mut g = Node::ground("ground");
        g.set_potential(42.0);
        assert_eq!(g.potential(), 0.0);
        assert!(g.is_ground());
    }

    #[test]
    fn flow_accumulation_and_integration() {
        let mut n = Node::new("n0");
        n.collect_influx(5.0);
        n.collect_influx(2.0);
        n.collect_outflux(3.0);
        n.integrate_flows(0.1);
        assert_eq!(n.inflow(), 7.0);
        assert_eq!(n.outflow(), 3.0);
        assert_eq!(n.net_flow(), 4.0);
        assert_eq!(n.flow_through(), 3.0);
    }

    #[test]
    fn reset_flows_zeros_everything() {
        let mut n = Node::new("n0");
        n.collect_influx(5.0);
        n.schedule_outflux(1.0);
        n.reset_flows();
        assert_eq!(n.inflow(), 0.0);
        assert_eq!(n.scheduled_outflux(), 0.0);
    }

    #[test]
    fn non_finite_flux_is_rejected_not_poisoned() {
        let mut n = Node::new("n0");
        n.collect_influx(f64::NAN);
        n.collect_influx(-1.0);
        assert_eq!(n.inflow(), 0.0);
    }

    #[test]
    fn capacitance_request_is_consumed_once() {
        let mut n = Node::new("n0");
        n.set_network_capacitance_request(1.0);
        assert_eq!(n.take_capacitance_request(), Some(1.0));
        assert_eq!(n.take_capacitance_request(), None);
    }

    #[test]
    fn negative_capacitance_request_is_ignored() {
        let mut n = Node::new("n0");
        n.set_network_capacitance_request(-1.0);
        assert_eq!(n.network_capacitance_request(), 0.0);
    }

    #[test]
    fn overflowing_requires_positive_dt() {
        let mut n = Node::new("n0");
        n.schedule_outflux(10.0);
        assert!(n.is_overflowing(0.1));
        assert!(!n.is_overflowing(0.0));
    }
}
