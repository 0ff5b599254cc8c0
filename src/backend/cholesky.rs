use nalgebra::{DMatrix, DVector, linalg::Cholesky};

use super::{BackendKind, DecomposeOutcome, MatrixBackend};

/// `CPU_CHOLESKY` — the default backend, and the only one that supports the network-
/// capacitance probe (spec §4.3): symmetric Cholesky over a dense matrix.
#[derive(Default)]
pub struct CholeskyBackend {
    factor: Option<Cholesky<f64, nalgebra::Dyn>>,
    singular: bool,
}

impl MatrixBackend for CholeskyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CpuCholesky
    }

    fn decompose(&mut self, a: &DMatrix<f64>) -> DecomposeOutcome {
        match Cholesky::new(a.clone()) {
            Some(c) => {
                self.factor = Some(c);
                self.singular = false;
                DecomposeOutcome::Ok
            }
            None => {
                self.factor = None;
                self.singular = true;
                DecomposeOutcome::Singular
            }
        }
    }

    fn solve(&mut self, b: &DVector<f64>) -> Option<DVector<f64>> {
        self.factor.as_ref().map(|f| f.solve(b))
    }

    fn is_singular(&self) -> bool {
        self.singular
    }

    fn supports_capacitance_probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_simple_spd_system() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let mut backend = CholeskyBackend::default();
        assert_eq!(backend.decompose(&a), DecomposeOutcome::Ok);
        let x = backend.solve(&b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 1.0).abs() < 1e-9);
        assert!(!backend.is_singular());
    }

    #[test]
    fn detects_singular_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let mut backend = CholeskyBackend::default();
        assert_eq!(backend.decompose(&a), DecomposeOutcome::Singular);
        assert!(backend.is_singular());
    }

    #[test]
    fn supports_capacitance_probe() {
        assert!(CholeskyBackend::default().supports_capacitance_probe());
    }
}
