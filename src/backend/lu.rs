use nalgebra::{DMatrix, DVector, linalg::LU};

use super::{BackendKind, DecomposeOutcome, MatrixBackend};

/// `CPU_LU` — partial-pivot dense LU, the fallback when Cholesky fails (spec §4.3, §7
/// `Singular` recovery policy).
#[derive(Default)]
pub struct LuBackend {
    factor: Option<LU<f64, nalgebra::Dyn, nalgebra::Dyn>>,
    singular: bool,
}

impl MatrixBackend for LuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CpuLu
    }

    fn decompose(&mut self, a: &DMatrix<f64>) -> DecomposeOutcome {
        let lu = LU::new(a.clone());
        // A zero or near-zero pivot on the diagonal of U indicates a singular matrix (spec §7).
        let min_pivot = lu
            .u()
            .diagonal()
            .iter()
            .fold(f64::INFINITY, |acc, v| acc.min(v.abs()));
        self.singular = !min_pivot.is_finite() || min_pivot < 1.0e-300;
        self.factor = Some(lu);
        if self.singular {
            DecomposeOutcome::Singular
        } else {
            DecomposeOutcome::Ok
        }
    }

    fn solve(&mut self, b: &DVector<f64>) -> Option<DVector<f64>> {
        if self.singular {
            return None;
        }
        self.factor.as_ref().and_then(|f| f.solve(b))
    }

    fn is_singular(&self) -> bool {
        self.singular
    }
}
