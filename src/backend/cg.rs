//! A diagonally-preconditioned conjugate-gradient driver shared by the GPU backends.
//!
//! `A` is guaranteed symmetric positive semi-definite (spec §3), so CG is a well-founded choice
//! for a backend that never performs an on-GPU factorization — the open question in spec §9
//! ("whether `GPU_SPARSE` ... is unclear") is resolved in DESIGN.md by keeping both GPU variants
//! iterative rather than resolving to two different factorization kernels.
//!
//! The matrix-vector product is the only operation actually dispatched to the device; the
//! reduction/update arithmetic runs on the CPU against the read-back result, matching the
//! teacher's `gat-gpu` pattern of submitting one kernel per step and reading results back
//! (`examples/monistowl-gat/crates/gat-gpu/src/kernels/runner.rs`).

pub struct CgOutcome {
    pub x: Vec<f64>,
    pub converged: bool,
}

/// Solves `A x = b` via CG, where `spmv(v)` computes `A * v` (dispatched on the GPU by the
/// caller) and `diag` is the preconditioner (`A`'s diagonal).
pub fn conjugate_gradient(
    n: usize,
    diag: &[f64],
    b: &[f64],
    mut spmv: impl FnMut(&[f64]) -> Vec<f64>,
    max_iter: usize,
    tol: f64,
) -> CgOutcome {
    let precond = |r: &[f64]| -> Vec<f64> {
        (0..n)
            .map(|i| if diag[i].abs() > 1.0e-300 { r[i] / diag[i] } else { r[i] })
            .collect()
    };

    let mut x = vec![0.0; n];
    let ax = spmv(&x);
    let mut r: Vec<f64> = (0..n).map(|i| b[i] - ax[i]).collect();
    let mut z = precond(&r);
    let mut p = z.clone();
    let mut rz_old: f64 = dot(&r, &z);

    let b_norm = norm(b).max(1.0e-300);
    if norm(&r) / b_norm < tol {
        return CgOutcome { x, converged: true };
    }

    for _ in 0..max_iter {
        let ap = spmv(&p);
        let pap = dot(&p, &ap);
        if pap.abs() < 1.0e-300 {
            break;
        }
        let alpha = rz_old / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        if norm(&r) / b_norm < tol {
            return CgOutcome { x, converged: true };
        }
        z = precond(&r);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz_old;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
        rz_old = rz_new;
    }

    CgOutcome {
        x,
        converged: norm(&r) / b_norm < tol,
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_small_spd_system() {
        // A = [[4,1],[1,3]], b = [1,2]
        let a = [[4.0, 1.0], [1.0, 3.0]];
        let diag = [4.0, 3.0];
        let b = [1.0, 2.0];
        let out = conjugate_gradient(
            2,
            &diag,
            &b,
            |v| vec![a[0][0] * v[0] + a[0][1] * v[1], a[1][0] * v[0] + a[1][1] * v[1]],
            100,
            1e-10,
        );
        assert!(out.converged);
        assert!((out.x[0] - (1.0 / 11.0)).abs() < 1e-6);
        assert!((out.x[1] - (7.0 / 11.0)).abs() < 1e-6);
    }
}
