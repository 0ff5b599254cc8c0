//! MinorStepController (spec §4.5): the inner loop that lets non-linear links converge within
//! one major step, plus the flow-transport tail of the pipeline.
//!
//! Node rows and node indices coincide here: `AdmittanceSystem::new` reserves the last index as
//! ground (spec §3), so an island's node-index list (`Island::nodes`) is already the row list
//! `AdmittanceSystem::island_block` expects.

use nalgebra::DVector;

use crate::backend::{BackendKind, DecomposeOutcome, LuBackend, MatrixBackend};
use crate::island::Island;
use crate::link::{ConvergenceOutcome, Link};
use crate::log::{BitSet, MajorStepRecord, MinorStepRecord, StepOutcome};
use crate::node::Node;
use crate::system::AdmittanceSystem;

/// Tunables the controller needs from `SolverConfig` (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct MinorStepConfig {
    pub convergence_tol_abs: f64,
    pub convergence_tol_rel: f64,
    pub minor_step_limit: u32,
    pub decomposition_limit: u32,
    pub min_linearization: f64,
    pub worst_case_timing: bool,
}

/// What a major step produced: the terminal outcome plus the log record to append.
pub struct MajorStepOutcome {
    pub outcome: StepOutcome,
    pub minor_step_count: u32,
    pub decomposition_count: u32,
    pub record: MajorStepRecord,
}

fn port_potentials(nodes: &[Node], ports: crate::link::PortMap) -> (f64, f64) {
    (nodes[ports.port0].potential(), nodes[ports.port1].potential())
}

/// Drives one major step to completion (spec §4.5). `backends`/`dirty` are indexed in parallel
/// with `islands`, already sized and selected by the caller (the Solver owns backend selection,
/// spec §4.6).
#[allow(clippy::too_many_arguments)]
pub fn run_major_step(
    dt: f64,
    major_step_index: u64,
    config: &MinorStepConfig,
    nodes: &mut [Node],
    links: &mut [Box<dyn Link>],
    system: &mut AdmittanceSystem,
    islands: &[Island],
    backends: &mut [Box<dyn MatrixBackend>],
    dirty: &mut [bool],
    cancelled: &dyn Fn() -> bool,
) -> MajorStepOutcome {
    let ground_index = system.ground_index();

    for link in links.iter_mut() {
        link.step(dt);
    }
    for node in nodes.iter_mut() {
        if !node.is_ground() {
            node.reset_flows();
        }
    }

    let mut prev_x = system.x().clone();
    let mut minor_steps_log = Vec::new();
    let mut decomposition_count: u32 = 0;
    let mut minor_step_count: u32 = 0;
    let mut outcome = StepOutcome::Success;

    'minor: loop {
        if cancelled() {
            outcome = StepOutcome::Cancelled;
            break 'minor;
        }

        minor_step_count += 1;

        for link in links.iter_mut() {
            let ports = link.ports();
            let potentials = port_potentials(nodes, ports);
            link.minor_step(dt, minor_step_count, potentials);
        }

        system.clear();
        for node_index in 0..ground_index {
            let c_over_dt = if dt > 0.0 { nodes[node_index].capacitance() / dt } else { 0.0 };
            system.stamp_capacitance(node_index, c_over_dt);
        }
        let mut any_admittance_changed = config.worst_case_timing;
        for link in links.iter_mut() {
            if link.needs_admittance_update() {
                any_admittance_changed = true;
            }
            let ports = link.ports();
            system.stamp_admittance(ports.port0, ports.port1, link.admittance_stamp());
            system.stamp_source(ports.port0, ports.port1, link.source_stamp());
        }

        if any_admittance_changed {
            dirty.iter_mut().for_each(|d| *d = true);
        }

        system.floor_diagonal(config.min_linearization);

        for (island_index, island) in islands.iter().enumerate() {
            if island.nodes.is_empty() {
                continue;
            }
            let (sub_a, sub_b) = system.island_block(&island.nodes);

            if dirty[island_index] {
                let mut result = backends[island_index].decompose(&sub_a);
                if result == DecomposeOutcome::Singular && backends[island_index].kind() == BackendKind::CpuCholesky {
                    tracing::warn!(island = island_index, "cholesky decomposition singular, falling back to LU");
                    backends[island_index] = Box::new(LuBackend::default());
                    result = backends[island_index].decompose(&sub_a);
                }
                if result == DecomposeOutcome::Singular {
                    tracing::warn!(island = island_index, "island singular after LU fallback, zeroing potentials");
                    system.scatter_island_solution(&island.nodes, &DVector::zeros(island.nodes.len()));
                    continue;
                }
                dirty[island_index] = false;
                decomposition_count += 1;
            }

            match backends[island_index].solve(&sub_b) {
                Some(solved) => system.scatter_island_solution(&island.nodes, &solved),
                None => {
                    tracing::warn!(island = island_index, "solve failed against cached factorization");
                }
            }
        }

        for node_index in 0..ground_index {
            nodes[node_index].set_potential(system.x()[node_index]);
        }

        let mut node_bits = BitSet::new(ground_index);
        for node_index in 0..ground_index {
            let pk = system.x()[node_index];
            let pk1 = prev_x[node_index];
            let tol = config.convergence_tol_abs + config.convergence_tol_rel * pk.abs().max(pk1.abs());
            if (pk - pk1).abs() >= tol {
                node_bits.set(node_index);
            }
        }

        let mut link_bits = BitSet::new(links.len());
        let mut all_confirmed = true;
        for (link_index, link) in links.iter_mut().enumerate() {
            match link.confirm_solution_acceptable(minor_step_count, major_step_index) {
                ConvergenceOutcome::Confirmed => {}
                ConvergenceOutcome::Rejected => {
                    link_bits.set(link_index);
                    all_confirmed = false;
                }
                ConvergenceOutcome::Delayed => {
                    all_confirmed = false;
                }
            }
        }

        minor_steps_log.push(MinorStepRecord {
            node_non_convergence: node_bits,
            link_rejection: link_bits,
        });
        prev_x = system.x().clone();

        if all_confirmed {
            outcome = StepOutcome::Success;
            break 'minor;
        }
        if decomposition_count > config.decomposition_limit {
            outcome = StepOutcome::DecompLimit;
            tracing::warn!(major_step_index, decomposition_count, "decomposition limit exceeded");
            break 'minor;
        }
        if minor_step_count > config.minor_step_limit {
            outcome = StepOutcome::MinorLimit;
            tracing::warn!(major_step_index, minor_step_count, "minor step limit exceeded");
            break 'minor;
        }
    }

    if outcome != StepOutcome::Cancelled {
        for link in links.iter_mut() {
            let ports = link.ports();
            let potentials = port_potentials(nodes, ports);
            link.compute_flows(dt, potentials);
        }
        for link in links.iter_mut() {
            let mut sink = |node_index: usize, magnitude: f64, is_inflow: bool| {
                let node = &mut nodes[node_index];
                if is_inflow {
                    node.collect_influx(magnitude);
                } else {
                    node.collect_outflux(magnitude);
                }
            };
            link.transport_flows(dt, &mut sink);
        }
        for node in nodes.iter_mut() {
            if !node.is_ground() {
                node.integrate_flows(dt);
            }
        }
    }

    MajorStepOutcome {
        outcome,
        minor_step_count,
        decomposition_count,
        record: MajorStepRecord {
            major_step_index,
            minor_step_count,
            outcome,
            minor_steps: minor_steps_log,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CholeskyBackend;
    use crate::backend::{BackendKind, DecomposeOutcome};
    use crate::error::GunnsError;
    use crate::link::{AdmittanceStamp, PortMap, SourceStamp};
    use nalgebra::DMatrix;

    struct Conductor {
        ports: PortMap,
        g: f64,
        flux: f64,
        drop: f64,
    }

    impl Conductor {
        fn new(g: f64) -> Self {
            Self { ports: PortMap::new(0, 0), g, flux: 0.0, drop: 0.0 }
        }
    }

    impl Link for Conductor {
        fn name(&self) -> &str {
            "conductor"
        }
        fn initialize(&mut self, ports: PortMap, _node_count: usize) -> Result<(), GunnsError> {
            self.ports = ports;
            Ok(())
        }
        fn set_port(&mut self, port_index: usize, node_index: usize) -> Result<(), GunnsError> {
            if port_index == 0 {
                self.ports.port0 = node_index;
            } else {
                self.ports.port1 = node_index;
            }
            Ok(())
        }
        fn ports(&self) -> PortMap {
            self.ports
        }
        fn step(&mut self, _dt: f64) {}
        fn minor_step(&mut self, _dt: f64, _k: u32, _potentials: (f64, f64)) {}
        fn confirm_solution_acceptable(&mut self, _k: u32, _major: u64) -> ConvergenceOutcome {
            ConvergenceOutcome::Confirmed
        }
        fn needs_admittance_update(&self) -> bool {
            false
        }
        fn admittance_stamp(&self) -> AdmittanceStamp {
            AdmittanceStamp::conductor(self.g)
        }
        fn source_stamp(&self) -> SourceStamp {
            SourceStamp::zero()
        }
        fn compute_flows(&mut self, _dt: f64, potentials: (f64, f64)) {
            self.drop = potentials.0 - potentials.1;
            self.flux = self.g * self.drop;
        }
        fn transport_flows(&mut self, _dt: f64, sink: &mut dyn FnMut(usize, f64, bool)) {
            if self.flux >= 0.0 {
                sink(self.ports.port0, self.flux, false);
                sink(self.ports.port1, self.flux, true);
            } else {
                sink(self.ports.port0, -self.flux, true);
                sink(self.ports.port1, -self.flux, false);
            }
        }
    }

    struct PotentialSource {
        ports: PortMap,
        g: f64,
        v: f64,
    }

    impl Link for PotentialSource {
        fn name(&self) -> &str {
            "source"
        }
        fn initialize(&mut self, ports: PortMap, _node_count: usize) -> Result<(), GunnsError> {
            self.ports = ports;
            Ok(())
        }
        fn set_port(&mut self, _port_index: usize, _node_index: usize) -> Result<(), GunnsError> {
            Ok(())
        }
        fn ports(&self) -> PortMap {
            self.ports
        }
        fn step(&mut self, _dt: f64) {}
        fn minor_step(&mut self, _dt: f64, _k: u32, _potentials: (f64, f64)) {}
        fn confirm_solution_acceptable(&mut self, _k: u32, _major: u64) -> ConvergenceOutcome {
            ConvergenceOutcome::Confirmed
        }
        fn needs_admittance_update(&self) -> bool {
            false
        }
        fn admittance_stamp(&self) -> AdmittanceStamp {
            AdmittanceStamp::conductor(self.g)
        }
        fn source_stamp(&self) -> SourceStamp {
            SourceStamp::potential_source(self.g, self.v)
        }
        fn compute_flows(&mut self, _dt: f64, _potentials: (f64, f64)) {}
        fn transport_flows(&mut self, _dt: f64, _sink: &mut dyn FnMut(usize, f64, bool)) {}
    }

    #[test]
    fn two_node_divider_converges_in_one_minor_step() {
        // Node 0 = A, node 1 = ground.
        let mut nodes = vec![Node::new("A"), Node::ground("G")];
        let mut links: Vec<Box<dyn Link>> = vec![
            Box::new(PotentialSource { ports: PortMap::new(1, 0), g: 1.0, v: 10.0 }),
            Box::new(Conductor { ports: PortMap::new(0, 1), g: 1.0, flux: 0.0, drop: 0.0 }),
        ];
        let mut system = AdmittanceSystem::new(2);
        let islands = vec![Island { nodes: vec![0] }];
        let mut backends: Vec<Box<dyn MatrixBackend>> = vec![Box::new(CholeskyBackend::default())];
        let mut dirty = vec![true];
        let config = MinorStepConfig {
            convergence_tol_abs: 1e-9,
            convergence_tol_rel: 1e-9,
            minor_step_limit: 10,
            decomposition_limit: 10,
            min_linearization: 0.0,
            worst_case_timing: false,
        };

        let out = run_major_step(
            1.0,
            0,
            &config,
            &mut nodes,
            &mut links,
            &mut system,
            &islands,
            &mut backends,
            &mut dirty,
            &|| false,
        );

        assert_eq!(out.outcome, StepOutcome::Success);
        assert_eq!(out.minor_step_count, 1);
        assert!((nodes[0].potential() - 5.0).abs() < 1e-9);
    }

    struct AlwaysReject {
        ports: PortMap,
    }

    impl Link for AlwaysReject {
        fn name(&self) -> &str {
            "stubborn"
        }
        fn initialize(&mut self, ports: PortMap, _node_count: usize) -> Result<(), GunnsError> {
            self.ports = ports;
            Ok(())
        }
        fn set_port(&mut self, _port_index: usize, _node_index: usize) -> Result<(), GunnsError> {
            Ok(())
        }
        fn ports(&self) -> PortMap {
            self.ports
        }
        fn step(&mut self, _dt: f64) {}
        fn minor_step(&mut self, _dt: f64, _k: u32, _potentials: (f64, f64)) {}
        fn confirm_solution_acceptable(&mut self, _k: u32, _major: u64) -> ConvergenceOutcome {
            ConvergenceOutcome::Rejected
        }
        fn needs_admittance_update(&self) -> bool {
            false
        }
        fn admittance_stamp(&self) -> AdmittanceStamp {
            AdmittanceStamp::conductor(1.0)
        }
        fn source_stamp(&self) -> SourceStamp {
            SourceStamp::zero()
        }
        fn compute_flows(&mut self, _dt: f64, _potentials: (f64, f64)) {}
        fn transport_flows(&mut self, _dt: f64, _sink: &mut dyn FnMut(usize, f64, bool)) {}
    }

    #[test]
    fn stubborn_link_hits_minor_step_limit() {
        let mut nodes = vec![Node::new("A"), Node::ground("G")];
        let mut links: Vec<Box<dyn Link>> = vec![Box::new(AlwaysReject { ports: PortMap::new(0, 1) })];
        let mut system = AdmittanceSystem::new(2);
        let islands = vec![Island { nodes: vec![0] }];
        let mut backends: Vec<Box<dyn MatrixBackend>> = vec![Box::new(CholeskyBackend::default())];
        let mut dirty = vec![true];
        let config = MinorStepConfig {
            convergence_tol_abs: 1e-9,
            convergence_tol_rel: 1e-9,
            minor_step_limit: 3,
            decomposition_limit: 100,
            min_linearization: 0.0,
            worst_case_timing: false,
        };

        let out = run_major_step(
            1.0,
            0,
            &config,
            &mut nodes,
            &mut links,
            &mut system,
            &islands,
            &mut backends,
            &mut dirty,
            &|| false,
        );

        assert_eq!(out.outcome, StepOutcome::MinorLimit);
        assert_eq!(out.minor_step_count, 4);
        assert!(out.record.minor_steps.last().unwrap().link_rejection.get(0));
    }

    #[test]
    fn cancellation_stops_before_flow_transport() {
        let mut nodes = vec![Node::new("A"), Node::ground("G")];
        let mut links: Vec<Box<dyn Link>> = vec![Box::new(AlwaysReject { ports: PortMap::new(0, 1) })];
        let mut system = AdmittanceSystem::new(2);
        let islands = vec![Island { nodes: vec![0] }];
        let mut backends: Vec<Box<dyn MatrixBackend>> = vec![Box::new(CholeskyBackend::default())];
        let mut dirty = vec![true];
        let config = MinorStepConfig {
            convergence_tol_abs: 1e-9,
            convergence_tol_rel: 1e-9,
            minor_step_limit: 10,
            decomposition_limit: 10,
            min_linearization: 0.0,
            worst_case_timing: false,
        };

        let out = run_major_step(
            1.0,
            0,
            &config,
            &mut nodes,
            &mut links,
            &mut system,
            &islands,
            &mut backends,
            &mut dirty,
            &|| true,
        );

        assert_eq!(out.outcome, StepOutcome::Cancelled);
        assert_eq!(out.minor_step_count, 0);
        assert_eq!(nodes[0].inflow(), 0.0);
    }

    #[test]
    fn cholesky_backend_is_the_default_fixture_backend() {
        let mut backend = CholeskyBackend::default();
        assert_eq!(backend.kind(), BackendKind::CpuCholesky);
        let a = DMatrix::from_row_slice(1, 1, &[1.0]);
        assert_eq!(backend.decompose(&a), DecomposeOutcome::Ok);
    }
}
