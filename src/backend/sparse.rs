use nalgebra::{DMatrix, DVector};
use rsparse::data::{Numeric, Sprs, Symb};

use super::{BackendKind, DecomposeOutcome, MatrixBackend};

/// `CPU_SPARSE` — direct sparse LU over a CSC matrix, for large sparse islands (spec §4.3).
/// Grounded on the teacher's `RSparseSolver`
/// (`examples/chengts95-rustpower/src/basic/solver/rsparse.rs`): same crate, same
/// symbolic-then-numeric-then-permute-solve shape, generalized from the teacher's per-call
/// factorization into a cached `decompose`/`solve` split.
#[derive(Default)]
pub struct SparseBackend {
    symbolic: Option<Symb>,
    numeric: Option<Numeric<f64>>,
    n: usize,
    singular: bool,
}

fn dense_to_csc(a: &DMatrix<f64>) -> Sprs {
    let n = a.nrows();
    let mut p = Vec::with_capacity(n + 1);
    let mut i = Vec::new();
    let mut x = Vec::new();
    p.push(0isize);
    for col in 0..n {
        for row in 0..n {
            let v = a[(row, col)];
            if v != 0.0 {
                i.push(row);
                x.push(v);
            }
        }
        p.push(i.len() as isize);
    }
    Sprs {
        m: n,
        n,
        nzmax: x.len(),
        p,
        i,
        x,
    }
}

impl MatrixBackend for SparseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CpuSparse
    }

    fn decompose(&mut self, a: &DMatrix<f64>) -> DecomposeOutcome {
        self.n = a.nrows();
        let sprs = dense_to_csc(a);
        let mut symbolic = rsparse::sqr(&sprs, 1, false);
        match rsparse::lu(&sprs, &mut symbolic, 1.0e-6) {
            Ok(numeric) => {
                self.symbolic = Some(symbolic);
                self.numeric = Some(numeric);
                self.singular = false;
                DecomposeOutcome::Ok
            }
            Err(_) => {
                self.symbolic = None;
                self.numeric = None;
                self.singular = true;
                DecomposeOutcome::Singular
            }
        }
    }

    fn solve(&mut self, b: &DVector<f64>) -> Option<DVector<f64>> {
        let numeric = self.numeric.as_ref()?;
        let symbolic = self.symbolic.as_ref()?;
        let b_slice: Vec<f64> = b.iter().copied().collect();
        let mut scratch = vec![0.0; self.n];
        ipvec(&numeric.pinv, &b_slice, &mut scratch);
        rsparse::lsolve(&numeric.l, &mut scratch);
        rsparse::usolve(&numeric.u, &mut scratch);
        let mut out = vec![0.0; self.n];
        ipvec(&symbolic.q, &scratch, &mut out);
        Some(DVector::from_vec(out))
    }

    fn is_singular(&self) -> bool {
        self.singular
    }
}

fn ipvec(p: &Option<Vec<isize>>, b: &[f64], x: &mut [f64]) {
    match p {
        Some(pvec) => {
            for k in 0..b.len() {
                x[pvec[k] as usize] = b[k];
            }
        }
        None => x.copy_from_slice(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_simple_spd_system() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let mut backend = SparseBackend::default();
        assert_eq!(backend.decompose(&a), DecomposeOutcome::Ok);
        let x = backend.solve(&b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-6);
        assert!((x[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn agrees_with_cholesky_on_well_conditioned_system() {
        use super::super::CholeskyBackend;
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 2.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let mut chol = CholeskyBackend::default();
        let mut sparse = SparseBackend::default();
        chol.decompose(&a);
        sparse.decompose(&a);
        let x_chol = chol.solve(&b).unwrap();
        let x_sparse = sparse.solve(&b).unwrap();
        for k in 0..3 {
            assert!((x_chol[k] - x_sparse[k]).abs() < 1e-6);
        }
    }

    #[test]
    fn does_not_support_capacitance_probe() {
        assert!(!SparseBackend::default().supports_capacitance_probe());
    }
}
