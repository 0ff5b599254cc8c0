//! The assembled linear system `[A]{x} = {b}` (spec §3, "AdmittanceSystem").
//!
//! `A` is dense, symmetric, and positive semi-definite, of order `N-1` (the ground node has no
//! row). Assembly sums every link's admittance stamp plus each node's `C/dt` capacitance onto
//! the diagonal — the same incidence-driven summation shape as the teacher's `create_ybus`
//! (`examples/chengts95-rustpower/src/basic/system/system.rs`), generalized from a complex
//! per-branch Ybus to a real per-link stamp sum.

use nalgebra::{DMatrix, DVector};

use crate::link::{AdmittanceStamp, SourceStamp};

/// The triple `(A, b, x)` for a network of `node_count` nodes, the last of which is ground.
#[derive(Debug, Clone)]
pub struct AdmittanceSystem {
    ground_index: usize,
    a: DMatrix<f64>,
    b: DVector<f64>,
    x: DVector<f64>,
}

impl AdmittanceSystem {
    /// `node_count` includes the reserved ground node; the system order is `node_count - 1`.
    pub fn new(node_count: usize) -> Self {
        assert!(node_count >= 1, "a network needs at least the ground node");
        let order = node_count - 1;
        Self {
            ground_index: order,
            a: DMatrix::zeros(order, order),
            b: DVector::zeros(order),
            x: DVector::zeros(order),
        }
    }

    pub fn order(&self) -> usize {
        self.a.nrows()
    }

    fn row(&self, node_index: usize) -> Option<usize> {
        (node_index != self.ground_index).then_some(node_index)
    }

    pub(crate) fn ground_index(&self) -> usize {
        self.ground_index
    }

    /// Floors every diagonal entry at `min_value`, the `minLinearization` config option
    /// (spec §6): a small-value floor that keeps a weakly-connected node's row from decomposing
    /// to a singular or near-singular pivot.
    pub(crate) fn floor_diagonal(&mut self, min_value: f64) {
        for r in 0..self.a.nrows() {
            if self.a[(r, r)] < min_value {
                self.a[(r, r)] = min_value;
            }
        }
    }

    /// Zeros `A` and `b` ahead of a fresh full assembly this major/minor step.
    pub fn clear(&mut self) {
        self.a.fill(0.0);
        self.b.fill(0.0);
    }

    /// Adds a link's admittance stamp for its two port node indices. A port bound to ground
    /// contributes only the diagonal term on its counterpart row, per spec §3's "stamping into
    /// the ground row/column has no effect on the solve."
    pub fn stamp_admittance(&mut self, node0: usize, node1: usize, stamp: AdmittanceStamp) {
        if !stamp.is_valid() {
            tracing::warn!(?stamp, "numeric overflow in admittance stamp, replacing with zero");
            return;
        }
        match (self.row(node0), self.row(node1)) {
            (Some(r0), Some(r1)) => {
                self.a[(r0, r0)] += stamp.g00;
                self.a[(r1, r1)] += stamp.g11;
                self.a[(r0, r1)] += stamp.g01;
                self.a[(r1, r0)] += stamp.g01;
            }
            (Some(r0), None) => self.a[(r0, r0)] += stamp.g00,
            (None, Some(r1)) => self.a[(r1, r1)] += stamp.g11,
            (None, None) => {}
        }
    }

    /// Adds a link's source stamp for its two port node indices.
    pub fn stamp_source(&mut self, node0: usize, node1: usize, stamp: SourceStamp) {
        if !stamp.is_valid() {
            tracing::warn!(?stamp, "numeric overflow in source stamp, replacing with zero");
            return;
        }
        if let Some(r0) = self.row(node0) {
            self.b[r0] += stamp.b0;
        }
        if let Some(r1) = self.row(node1) {
            self.b[r1] += stamp.b1;
        }
    }

    /// Adds a node's `C/dt` capacitance contribution to its own diagonal entry.
    pub fn stamp_capacitance(&mut self, node_index: usize, c_over_dt: f64) {
        if let Some(r) = self.row(node_index) {
            self.a[(r, r)] += c_over_dt;
        }
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn set_x(&mut self, x: DVector<f64>) {
        self.x = x;
    }

    /// Extracts the dense sub-block of `A` (and matching slice of `b`) for one island's rows.
    pub fn island_block(&self, rows: &[usize]) -> (DMatrix<f64>, DVector<f64>) {
        let n = rows.len();
        let mut sub_a = DMatrix::zeros(n, n);
        let mut sub_b = DVector::zeros(n);
        for (i, &ri) in rows.iter().enumerate() {
            sub_b[i] = self.b[ri];
            for (j, &rj) in rows.iter().enumerate() {
                sub_a[(i, j)] = self.a[(ri, rj)];
            }
        }
        (sub_a, sub_b)
    }

    /// Writes a solved island's `x` values back into the full system's `x` vector.
    pub fn scatter_island_solution(&mut self, rows: &[usize], solved: &DVector<f64>) {
        for (i, &ri) in rows.iter().enumerate() {
            self.x[ri] = solved[i];
        }
    }

    /// True iff row `node_index` (a non-ground node) is an all-zero row — it has no conductive
    /// path and no capacitance, the degenerate case of spec §3's `AdmittanceSystem` invariant.
    pub fn is_zero_row(&self, node_index: usize) -> bool {
        match self.row(node_index) {
            Some(r) => (0..self.a.ncols()).all(|c| self.a[(r, c)] == 0.0),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_stamping() {
        let mut sys = AdmittanceSystem::new(3); // nodes 0,1 + ground(2)
        sys.stamp_admittance(0, 1, AdmittanceStamp::conductor(2.0));
        assert_eq!(sys.a()[(0, 1)], sys.a()[(1, 0)]);
        assert_eq!(sys.a()[(0, 1)], -2.0);
        assert_eq!(sys.a()[(0, 0)], 2.0);
        assert_eq!(sys.a()[(1, 1)], 2.0);
    }

    #[test]
    fn stamping_into_ground_only_touches_the_other_row() {
        let mut sys = AdmittanceSystem::new(2); // node 0 + ground(1)
        sys.stamp_admittance(0, 1, AdmittanceStamp::conductor(1.0));
        assert_eq!(sys.order(), 1);
        assert_eq!(sys.a()[(0, 0)], 1.0);
    }

    #[test]
    fn source_stamp_sums() {
        let mut sys = AdmittanceSystem::new(3);
        sys.stamp_source(0, 1, SourceStamp { b0: -5.0, b1: 5.0 });
        assert_eq!(sys.b()[0], -5.0);
        assert_eq!(sys.b()[1], 5.0);
    }

    #[test]
    fn zero_row_detection() {
        let sys = AdmittanceSystem::new(3);
        assert!(sys.is_zero_row(0));
    }

    #[test]
    fn island_block_roundtrip() {
        let mut sys = AdmittanceSystem::new(4); // 0,1,2 + ground(3)
        sys.stamp_admittance(0, 1, AdmittanceStamp::conductor(1.0));
        let (sub_a, sub_b) = sys.island_block(&[0, 1]);
        assert_eq!(sub_a[(0, 1)], -1.0);
        assert_eq!(sub_b.len(), 2);
        let solved = DVector::from_vec(vec![9.0, 8.0]);
        sys.scatter_island_solution(&[0, 1], &solved);
        assert_eq!(sys.x()[0], 9.0);
        assert_eq!(sys.x()[1], 8.0);
    }
}
