//! Sparse CSR matrix and damped conjugate-gradient solve, the
//! alternative inner solve to dense Cholesky for large problems.

/// Compressed sparse row matrix.
#[derive(Clone, Debug)]
pub struct CsrMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl CsrMatrix {
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nrows];
        for &(r, c, v) in triplets {
            rows[r].push((c, v));
        }
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for row in rows.iter_mut() {
            row.sort_by_key(|&(c, _)| c);
            for (c, v) in row.drain(..) {
                col_idx.push(c);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        }
    }

    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        debug_assert_eq!(x.len(), self.ncols);
        let mut out = vec![0.0; self.nrows];
        for row in 0..self.nrows {
            let start = self.row_ptr[row];
            let end = self.row_ptr[row + 1];
            let mut acc = 0.0;
            for k in start..end {
                acc += self.values[k] * x[self.col_idx[k]];
            }
            out[row] = acc;
        }
        out
    }

    pub fn transpose(&self) -> CsrMatrix {
        let mut triplets = Vec::with_capacity(self.values.len());
        for row in 0..self.nrows {
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                triplets.push((self.col_idx[k], row, self.values[k]));
            }
        }
        CsrMatrix::from_triplets(self.ncols, self.nrows, &triplets)
    }

    /// `JᵀJ` for a sparse Jacobian `self`. Dense
    /// because the normal matrix is generally much less sparse than `J`
    /// itself, but built from the sparse `J` without ever densifying it.
    pub fn compute_jtj_dense(&self) -> nalgebra::DMatrix<f64> {
        let jt = self.transpose();
        let n = self.ncols;
        let mut jtj = nalgebra::DMatrix::<f64>::zeros(n, n);
        for row in 0..jt.nrows {
            for a in jt.row_ptr[row]..jt.row_ptr[row + 1] {
                let col_a = jt.col_idx[a];
                let val_a = jt.values[a];
                for b in jt.row_ptr[row]..jt.row_ptr[row + 1] {
                    let col_b = jt.col_idx[b];
                    jtj[(col_a, col_b)] += val_a * jt.values[b];
                }
            }
        }
        jtj
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Damped conjugate gradient solve of `(JᵀJ + λI) x = b`, given `j` (the
/// sparse Jacobian) so the normal-equations product is applied matrix-free
/// as `Jᵀ(J x) + λ x` rather than by forming `JᵀJ` explicitly. Uses a
/// standard Fletcher-Reeves loop: `max(10n, 1000)` iterations,
/// tolerance `1e-10` on the residual norm.
pub fn damped_cg(j: &CsrMatrix, lambda: f64, b: &[f64]) -> Vec<f64> {
    let n = j.ncols;
    let max_iters = (10 * n).max(1000);
    let tol = 1e-10;

    let apply = |x: &[f64]| -> Vec<f64> {
        let jx = j.mul_vec(x);
        let jt = j.transpose();
        let mut out = jt.mul_vec(&jx);
        for i in 0..n {
            out[i] += lambda * x[i];
        }
        out
    };

    let mut x = vec![0.0; n];
    let mut r: Vec<f64> = b.to_vec();
    let mut p = r.clone();
    let mut rs_old = dot(&r, &r);

    if rs_old.sqrt() < tol {
        return x;
    }

    for _ in 0..max_iters {
        let ap = apply(&p);
        let denom = dot(&p, &ap);
        if denom.abs() < 1e-300 {
            break;
        }
        let alpha = rs_old / denom;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        let rs_new = dot(&r, &r);
        if rs_new.sqrt() < tol {
            break;
        }
        let beta = rs_new / rs_old;
        for i in 0..n {
            p[i] = r[i] + beta * p[i];
        }
        rs_old = rs_new;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mul_vec_matches_dense_multiply() {
        let triplets = vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0)];
        let m = CsrMatrix::from_triplets(2, 2, &triplets);
        let out = m.mul_vec(&[1.0, 2.0]);
        assert_relative_eq!(out[0], 4.0);
        assert_relative_eq!(out[1], 6.0);
    }

    #[test]
    fn damped_cg_solves_spd_system() {
        // J = identity-like 2x2 so JtJ + lambda*I is trivially SPD.
        let triplets = vec![(0, 0, 2.0), (1, 1, 3.0)];
        let j = CsrMatrix::from_triplets(2, 2, &triplets);
        let x = damped_cg(&j, 0.1, &[4.0, 9.0]);
        // (JtJ + 0.1 I) = diag(4.1, 9.1)
        assert_relative_eq!(x[0], 4.0 / 4.1, epsilon = 1e-6);
        assert_relative_eq!(x[1], 9.0 / 9.1, epsilon = 1e-6);
    }

    #[test]
    fn compute_jtj_dense_matches_manual_product() {
        let triplets = vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 4.0)];
        let j = CsrMatrix::from_triplets(2, 2, &triplets);
        let jtj = j.compute_jtj_dense();
        // J = [[1,2],[3,4]] -> JtJ = [[10,14],[14,20]]
        assert_relative_eq!(jtj[(0, 0)], 10.0);
        assert_relative_eq!(jtj[(0, 1)], 14.0);
        assert_relative_eq!(jtj[(1, 1)], 20.0);
    }
}
