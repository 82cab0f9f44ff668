//! Dense Cholesky solve of the damped normal equations `(JᵀJ + λI) δ = b`.
//! A non-positive pivot returns `None`, signalling the outer LM loop to
//! increase the damping and retry rather than propagating an error.

use nalgebra::DMatrix;

/// Decomposes a symmetric positive-definite matrix `a` in place into its
/// lower-triangular Cholesky factor `L` (`a = L Lᵀ`). Returns `None` if a
/// pivot is non-positive (not PD, typically because damping is still too
/// small).
fn cholesky_factor(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = a.nrows();
    let mut l = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[(i, j)] = sum.sqrt();
            } else {
                l[(i, j)] = sum / l[(j, j)];
            }
        }
    }
    Some(l)
}

fn forward_substitute(l: &DMatrix<f64>, b: &[f64]) -> Vec<f64> {
    let n = l.nrows();
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[(i, k)] * y[k];
        }
        y[i] = sum / l[(i, i)];
    }
    y
}

fn back_substitute_transpose(l: &DMatrix<f64>, y: &[f64]) -> Vec<f64> {
    let n = l.nrows();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[(k, i)] * x[k];
        }
        x[i] = sum / l[(i, i)];
    }
    x
}

/// Solves `a x = b` via Cholesky. Returns `None` (a "zero step" in LM terms)
/// if `a` is not positive definite at the current damping.
pub fn cholesky_solve(a: &DMatrix<f64>, b: &[f64]) -> Option<Vec<f64>> {
    let l = cholesky_factor(a)?;
    let y = forward_substitute(&l, b);
    Some(back_substitute_transpose(&l, &y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solves_a_small_spd_system() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 0.5, 0.0, 0.5, 2.0]);
        let x_true = vec![1.0, -2.0, 3.0];
        let b: Vec<f64> = (0..3)
            .map(|i| (0..3).map(|j| a[(i, j)] * x_true[j]).sum())
            .collect();
        let x = cholesky_solve(&a, &b).unwrap();
        for (got, want) in x.iter().zip(x_true.iter()) {
            assert_relative_eq!(got, want, epsilon = 1e-9);
        }
    }

    #[test]
    fn rejects_non_positive_definite_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(cholesky_solve(&a, &[1.0, 1.0]).is_none());
    }

    #[test]
    fn damping_restores_positive_definiteness() {
        let mut a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        for i in 0..2 {
            a[(i, i)] += 10.0;
        }
        assert!(cholesky_solve(&a, &[1.0, 1.0]).is_some());
    }
}
