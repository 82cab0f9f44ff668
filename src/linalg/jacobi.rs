//! Cyclic Jacobi eigendecomposition for small symmetric matrices, reimplemented
//! at 3, 4 and 9 dimensions: general 3×3 matrices (SVD support),
//! the triangulation DLT normal matrix (4×4), and the eight-point essential
//! matrix null space (9×9).

use nalgebra::{DMatrix, DVector};

const TOLERANCE: f64 = 1e-10;
const MAX_SWEEPS: usize = 100;

/// Eigendecomposition of a symmetric `n x n` matrix via cyclic Jacobi
/// rotation, annihilating the largest off-diagonal entries each sweep.
/// Returns `(eigenvalues, eigenvectors)` with eigenvectors as columns,
/// unsorted.
pub fn jacobi_eigen_symmetric(a: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    let mut a = a.clone();
    let mut v = DMatrix::<f64>::identity(n, n);

    for _sweep in 0..MAX_SWEEPS {
        let mut off_diag_sum = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off_diag_sum += a[(p, q)] * a[(p, q)];
            }
        }
        if off_diag_sum.sqrt() < TOLERANCE {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[(p, q)].abs() < TOLERANCE {
                    continue;
                }
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * a[(p, q)]);
                let t = theta.signum() / (theta.abs() + (1.0 + theta * theta).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;

                let a_pp = a[(p, p)];
                let a_qq = a[(q, q)];
                let a_pq = a[(p, q)];
                a[(p, p)] = a_pp - t * a_pq;
                a[(q, q)] = a_qq + t * a_pq;
                a[(p, q)] = 0.0;
                a[(q, p)] = 0.0;

                for i in 0..n {
                    if i != p && i != q {
                        let a_ip = a[(i, p)];
                        let a_iq = a[(i, q)];
                        a[(i, p)] = c * a_ip - s * a_iq;
                        a[(p, i)] = a[(i, p)];
                        a[(i, q)] = s * a_ip + c * a_iq;
                        a[(q, i)] = a[(i, q)];
                    }
                }
                for i in 0..n {
                    let v_ip = v[(i, p)];
                    let v_iq = v[(i, q)];
                    v[(i, p)] = c * v_ip - s * v_iq;
                    v[(i, q)] = s * v_ip + c * v_iq;
                }
            }
        }
    }

    let eigenvalues = DVector::from_iterator(n, (0..n).map(|i| a[(i, i)]));
    (eigenvalues, v)
}

/// Sorts an eigendecomposition by descending eigenvalue, reordering columns
/// of `vectors` to match.
pub fn sort_descending(values: &mut DVector<f64>, vectors: &mut DMatrix<f64>) {
    let n = values.len();
    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| values[j].partial_cmp(&values[i]).unwrap());
    let sorted_values = DVector::from_iterator(n, idx.iter().map(|&i| values[i]));
    let mut sorted_vectors = DMatrix::<f64>::zeros(n, n);
    for (col, &i) in idx.iter().enumerate() {
        sorted_vectors.set_column(col, &vectors.column(i));
    }
    *values = sorted_values;
    *vectors = sorted_vectors;
}

/// Smallest-eigenvalue eigenvector of `a^T a`, used for null-space extraction
/// (8-point algorithm, triangulation DLT).
pub fn smallest_eigenvector(ata: &DMatrix<f64>) -> DVector<f64> {
    let (mut values, mut vectors) = jacobi_eigen_symmetric(ata);
    sort_descending(&mut values, &mut vectors);
    let n = values.len();
    vectors.column(n - 1).into_owned()
}

/// The two smallest-eigenvalue eigenvectors of `a^T a` (7-point algorithm
/// 2-D null space).
pub fn two_smallest_eigenvectors(ata: &DMatrix<f64>) -> (DVector<f64>, DVector<f64>) {
    let (mut values, mut vectors) = jacobi_eigen_symmetric(ata);
    sort_descending(&mut values, &mut vectors);
    let n = values.len();
    (
        vectors.column(n - 1).into_owned(),
        vectors.column(n - 2).into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn diagonal_matrix_is_its_own_eigendecomposition() {
        let a = DMatrix::from_diagonal(&DVector::from_vec(vec![3.0, 1.0, 2.0]));
        let (mut values, mut vectors) = jacobi_eigen_symmetric(&a);
        sort_descending(&mut values, &mut vectors);
        assert_relative_eq!(values, DVector::from_vec(vec![3.0, 2.0, 1.0]), epsilon = 1e-9);
    }

    #[test]
    fn reconstructs_symmetric_matrix() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 2.0, 1.0, 3.0, 0.5, 2.0, 0.5, 5.0]);
        let (values, vectors) = jacobi_eigen_symmetric(&a);
        let reconstructed = &vectors * DMatrix::from_diagonal(&values) * vectors.transpose();
        assert_relative_eq!(reconstructed, a, epsilon = 1e-8);
    }

    #[test]
    fn smallest_eigenvector_is_orthogonal_to_others() {
        let a = DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 5.0]);
        let v = smallest_eigenvector(&a);
        assert_relative_eq!(v.dot(&DVector::from_vec(vec![0.0, 1.0, 0.0])).abs(), 1.0, epsilon = 1e-9);
    }
}
