//! SVD of a 3×3 matrix: form `AᵀA`, Jacobi-eigendecompose it,
//! recover `U = A V Σ⁻¹` with modified Gram-Schmidt, and enforce a
//! right-handed `U` when the matrix is rank-deficient.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use super::jacobi::{jacobi_eigen_symmetric, sort_descending};

pub struct Svd3 {
    pub u: Matrix3<f64>,
    pub singular_values: Vector3<f64>,
    pub v: Matrix3<f64>,
}

pub fn svd3(a: &Matrix3<f64>) -> Svd3 {
    let ata = a.transpose() * a;
    let ata_d = DMatrix::from_fn(3, 3, |i, j| ata[(i, j)]);
    let (mut values, mut vectors) = jacobi_eigen_symmetric(&ata_d);
    sort_descending(&mut values, &mut vectors);

    let v = Matrix3::from_fn(|i, j| vectors[(i, j)]);
    let singular_values = Vector3::new(
        values[0].max(0.0).sqrt(),
        values[1].max(0.0).sqrt(),
        values[2].max(0.0).sqrt(),
    );

    let mut u_cols = [Vector3::zeros(); 3];
    for k in 0..3 {
        if singular_values[k] > 1e-12 {
            u_cols[k] = (a * v.column(k)) / singular_values[k];
        }
    }

    // Modified Gram-Schmidt orthonormalization of whichever columns came out
    // of the division above (guards against a near-zero singular value
    // leaving its column undefined or non-orthogonal to its neighbours).
    for k in 0..3 {
        let mut col = u_cols[k];
        for j in 0..k {
            col -= u_cols[j] * u_cols[j].dot(&col);
        }
        let norm = col.norm();
        if norm > 1e-12 {
            u_cols[k] = col / norm;
        }
    }

    if singular_values[2] < 1e-9 {
        // Rank <= 2: rebuild the third column to keep U right-handed rather
        // than trusting whatever fell out of a near-zero division.
        u_cols[2] = u_cols[0].cross(&u_cols[1]);
    }

    let u = Matrix3::from_columns(&u_cols);
    Svd3 {
        u,
        singular_values,
        v,
    }
}

/// Projects `m` onto the nearest rank-2 matrix with equal non-zero singular
/// values.
pub fn enforce_essential_rank2(m: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = svd3(m);
    let avg = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
    let sigma = Matrix3::from_diagonal(&Vector3::new(avg, avg, 0.0));
    svd.u * sigma * svd.v.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reconstructs_a_full_rank_matrix() {
        let a = Matrix3::new(1.0, 2.0, 3.0, 0.0, 1.0, 4.0, 5.0, 6.0, 0.0);
        let svd = svd3(&a);
        let sigma = Matrix3::from_diagonal(&svd.singular_values);
        let reconstructed = svd.u * sigma * svd.v.transpose();
        assert_relative_eq!(reconstructed, a, epsilon = 1e-8);
    }

    #[test]
    fn identity_has_unit_singular_values() {
        let svd = svd3(&Matrix3::identity());
        assert_relative_eq!(svd.singular_values, Vector3::new(1.0, 1.0, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn rank2_matrix_gets_right_handed_u() {
        let a = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        let svd = svd3(&a);
        assert_relative_eq!(svd.u.determinant(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn enforces_rank2_with_equal_singular_values() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 0.0, 1.0, 4.0, 5.0, 6.0, 0.0);
        let e = enforce_essential_rank2(&m);
        let svd = svd3(&e);
        assert_relative_eq!(svd.singular_values[0], svd.singular_values[1], epsilon = 1e-8);
        assert_relative_eq!(svd.singular_values[2], 0.0, epsilon = 1e-8);
    }
}
