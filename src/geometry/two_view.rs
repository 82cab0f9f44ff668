//! Two-view essential-matrix geometry: 7-point and 8-point
//! estimators, RANSAC wrapper, `(R, t)` decomposition, cheirality scoring,
//! and the final camera-pair assembly.

use nalgebra::{DMatrix, Matrix3, Point3, Vector3};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{RoteraError, Result};
use crate::linalg::jacobi::two_smallest_eigenvectors;
use crate::linalg::quaternion;
use crate::linalg::svd3::{enforce_essential_rank2, svd3};
use crate::model::Viewpoint;

use super::triangulation::triangulate_dlt;

const SAMPSON_INLIER_THRESHOLD: f64 = 0.01;
const DEGENERATE_TRANSLATION_THRESHOLD: f64 = 0.1;
const RANSAC_MAX_ITERATIONS: usize = 100;
const EXHAUSTIVE_THRESHOLD: usize = 15;
const INITIAL_BASELINE_SCALE: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    pub a: (f64, f64),
    pub b: (f64, f64),
}

/// `(x, y)` normalized by the current intrinsics,
/// `y` flipped to match the camera-frame convention `project_to_pixel` uses
/// (`v = cy − fy·y'`), so the resulting ray direction `(x, y, 1)` is
/// comparable across both cameras.
pub fn normalize(u: f64, v: f64, vp: &Viewpoint) -> (f64, f64) {
    ((u - vp.cx) / vp.focal_length, (vp.cy - v) / vp.fy())
}

fn constraint_row(a: (f64, f64), b: (f64, f64)) -> [f64; 9] {
    let (x1, y1) = a;
    let (x2, y2) = b;
    [
        x2 * x1,
        x2 * y1,
        x2,
        y2 * x1,
        y2 * y1,
        y2,
        x1,
        y1,
        1.0,
    ]
}

fn vector_to_matrix3(v: &nalgebra::DVector<f64>) -> Matrix3<f64> {
    Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8])
}

/// Real roots of `a x³ + b x² + c x + d = 0` via Cardano's closed-form
/// solution.
fn cardano_real_roots(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    if a.abs() < 1e-12 {
        // Degenerates to quadratic/linear; handle directly.
        if b.abs() < 1e-12 {
            if c.abs() < 1e-12 {
                return Vec::new();
            }
            return vec![-d / c];
        }
        let disc = c * c - 4.0 * b * d;
        if disc < 0.0 {
            return Vec::new();
        }
        let sq = disc.sqrt();
        return vec![(-c + sq) / (2.0 * b), (-c - sq) / (2.0 * b)];
    }
    let (b, c, d) = (b / a, c / a, d / a);
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let offset = -b / 3.0;

    let discriminant = (q / 2.0).powi(2) + (p / 3.0).powi(3);
    if discriminant > 0.0 {
        let sqrt_disc = discriminant.sqrt();
        let u = cbrt(-q / 2.0 + sqrt_disc);
        let v = cbrt(-q / 2.0 - sqrt_disc);
        vec![u + v + offset]
    } else if discriminant.abs() < 1e-14 {
        let u = cbrt(-q / 2.0);
        vec![2.0 * u + offset, -u + offset]
    } else {
        let r = (-p / 3.0).sqrt();
        let phi = (-q / (2.0 * r.powi(3))).clamp(-1.0, 1.0).acos();
        (0..3)
            .map(|k| 2.0 * r * ((phi + 2.0 * std::f64::consts::PI * k as f64) / 3.0).cos() + offset)
            .collect()
    }
}

fn cbrt(x: f64) -> f64 {
    x.signum() * x.abs().cbrt()
}

/// 7-point essential-matrix estimator: builds the 2-D
/// null space of the 7×9 constraint matrix, forms the pencil
/// `E(α) = αF₁ + (1−α)F₂`, and returns one rank-2-enforced candidate per
/// real root of `det(E(α)) = 0`.
pub fn seven_point(correspondences: &[Correspondence]) -> Vec<Matrix3<f64>> {
    debug_assert_eq!(correspondences.len(), 7);
    let rows: Vec<[f64; 9]> = correspondences.iter().map(|c| constraint_row(c.a, c.b)).collect();
    let a = DMatrix::from_row_slice(7, 9, &rows.iter().flatten().copied().collect::<Vec<_>>());
    let ata = a.transpose() * &a;
    let (f1_vec, f2_vec) = two_smallest_eigenvectors(&ata);
    let f1 = vector_to_matrix3(&f1_vec);
    let f2 = vector_to_matrix3(&f2_vec);

    // det(alpha*f1 + (1-alpha)*f2) is a cubic in alpha; recover its
    // coefficients by interpolating through 4 sample points rather than
    // expanding the determinant symbolically.
    let det_at = |alpha: f64| -> f64 { (f1 * alpha + f2 * (1.0 - alpha)).determinant() };
    let samples = [-1.0, 0.0, 1.0, 2.0];
    let values: Vec<f64> = samples.iter().map(|&s| det_at(s)).collect();
    let vander = DMatrix::from_row_slice(
        4,
        4,
        &samples
            .iter()
            .flat_map(|&s| [s * s * s, s * s, s, 1.0])
            .collect::<Vec<_>>(),
    );
    let rhs = nalgebra::DVector::from_vec(values);
    let coeffs = match vander.clone().lu().solve(&rhs) {
        Some(c) => c,
        None => return Vec::new(),
    };

    cardano_real_roots(coeffs[0], coeffs[1], coeffs[2], coeffs[3])
        .into_iter()
        .map(|alpha| enforce_essential_rank2(&(f1 * alpha + f2 * (1.0 - alpha))))
        .collect()
}

/// 8-point (or more) essential-matrix estimator.
pub fn eight_point(correspondences: &[Correspondence]) -> Matrix3<f64> {
    debug_assert!(correspondences.len() >= 8);
    let rows: Vec<[f64; 9]> = correspondences.iter().map(|c| constraint_row(c.a, c.b)).collect();
    let n = rows.len();
    let a = DMatrix::from_row_slice(n, 9, &rows.iter().flatten().copied().collect::<Vec<_>>());
    let ata = a.transpose() * &a;
    let f_vec = crate::linalg::jacobi::smallest_eigenvector(&ata);
    enforce_essential_rank2(&vector_to_matrix3(&f_vec))
}

fn sampson_error(e: &Matrix3<f64>, c: &Correspondence) -> f64 {
    let x1 = Vector3::new(c.a.0, c.a.1, 1.0);
    let x2 = Vector3::new(c.b.0, c.b.1, 1.0);
    let ex1 = e * x1;
    let etx2 = e.transpose() * x2;
    let num = (x2.dot(&ex1)).powi(2);
    let denom = ex1.x.powi(2) + ex1.y.powi(2) + etx2.x.powi(2) + etx2.y.powi(2);
    if denom < 1e-15 {
        f64::INFINITY
    } else {
        num / denom
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoseCandidate {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Four `(R, t)` candidates from `E`.
pub fn decompose_essential(e: &Matrix3<f64>) -> [PoseCandidate; 4] {
    let svd = svd3(e);
    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let mut r1 = svd.u * w * svd.v.transpose();
    let mut r2 = svd.u * w.transpose() * svd.v.transpose();
    if r1.determinant() < 0.0 {
        r1 = -r1;
    }
    if r2.determinant() < 0.0 {
        r2 = -r2;
    }
    let t = svd.u.column(2).into_owned();
    [
        PoseCandidate { rotation: r1, translation: t },
        PoseCandidate { rotation: r1, translation: -t },
        PoseCandidate { rotation: r2, translation: t },
        PoseCandidate { rotation: r2, translation: -t },
    ]
}

fn cheirality_count(candidate: &PoseCandidate, correspondences: &[Correspondence]) -> usize {
    let cam1 = canonical_camera(Point3::origin(), [1.0, 0.0, 0.0, 0.0]);
    let q2 = quaternion::from_rotation_matrix(&candidate.rotation);
    let cam2 = canonical_camera(Point3::origin() + candidate.translation, q2);
    correspondences
        .iter()
        .filter(|c| {
            let u1 = c.a.0 * cam1.focal_length + cam1.cx;
            let v1 = cam1.cy - c.a.1 * cam1.fy();
            let u2 = c.b.0 * cam2.focal_length + cam2.cx;
            let v2 = cam2.cy - c.b.1 * cam2.fy();
            match triangulate_dlt(&[(&cam1, u1, v1), (&cam2, u2, v2)]) {
                Some(p) => {
                    crate::projection::world_to_camera(&cam1, p).is_some()
                        && crate::projection::world_to_camera(&cam2, p).is_some()
                }
                None => false,
            }
        })
        .count()
}

fn canonical_camera(position: Point3<f64>, rotation: crate::linalg::quaternion::Quat) -> Viewpoint {
    let mut vp = Viewpoint::new("canonical", 2.0, 2.0);
    vp.position = position;
    vp.rotation = rotation;
    vp.focal_length = 1.0;
    vp.cx = 0.0;
    vp.cy = 0.0;
    vp
}

fn is_degenerate_translation(t: &Vector3<f64>) -> bool {
    let below = [t.x.abs(), t.y.abs(), t.z.abs()]
        .iter()
        .filter(|&&c| c < DEGENERATE_TRANSLATION_THRESHOLD)
        .count();
    below >= 2
}

pub struct TwoViewResult {
    pub essential: Matrix3<f64>,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub inlier_count: usize,
}

fn score_candidate_matrix(e: &Matrix3<f64>, correspondences: &[Correspondence]) -> Option<(usize, usize, f64, PoseCandidate)> {
    let candidates = decompose_essential(e);
    candidates
        .iter()
        .filter(|c| !is_degenerate_translation(&c.translation))
        .map(|c| {
            let cheirality = cheirality_count(c, correspondences);
            let errors: Vec<f64> = correspondences.iter().map(|corr| sampson_error(e, corr)).collect();
            let inliers = errors.iter().filter(|&&err| err < SAMPSON_INLIER_THRESHOLD).count();
            let total: f64 = errors.iter().sum();
            (cheirality, inliers, total, *c)
        })
        .max_by(|a, b| {
            let score_a = a.0 * 1000 + a.1;
            let score_b = b.0 * 1000 + b.1;
            score_a.cmp(&score_b).then(b.2.partial_cmp(&a.2).unwrap())
        })
}

/// RANSAC wrapper over the 7-point estimator. Samples
/// exhaustively when `n <= 15`, otherwise randomly up to 100 iterations.
pub fn ransac_essential_matrix<R: Rng>(
    correspondences: &[Correspondence],
    rng: &mut R,
) -> Result<TwoViewResult> {
    if correspondences.len() < 7 {
        return Err(RoteraError::Precondition("fewer than 7 correspondences for essential matrix"));
    }

    let n = correspondences.len();
    let mut best: Option<(usize, usize, f64, Matrix3<f64>, PoseCandidate)> = None;

    let mut try_sample = |sample: &[usize]| {
        let subset: Vec<Correspondence> = sample.iter().map(|&i| correspondences[i]).collect();
        for e in seven_point(&subset) {
            if let Some((cheirality, inliers, total, candidate)) = score_candidate_matrix(&e, correspondences) {
                let is_better = match &best {
                    None => true,
                    Some((bc, bi, bt, _, _)) => {
                        (cheirality, inliers) > (*bc, *bi) || ((cheirality, inliers) == (*bc, *bi) && total < *bt)
                    }
                };
                if is_better {
                    best = Some((cheirality, inliers, total, e, candidate));
                }
            }
        }
    };

    if n <= EXHAUSTIVE_THRESHOLD {
        let indices: Vec<usize> = (0..n).collect();
        for combo in combinations(&indices, 7) {
            try_sample(&combo);
        }
    } else {
        let indices: Vec<usize> = (0..n).collect();
        for _ in 0..RANSAC_MAX_ITERATIONS {
            let mut sample = indices.clone();
            sample.shuffle(rng);
            try_sample(&sample[..7]);
        }
    }

    match best {
        Some((_, inliers, _, e, candidate)) => Ok(TwoViewResult {
            essential: e,
            rotation: candidate.rotation,
            translation: candidate.translation,
            inlier_count: inliers,
        }),
        None => Err(RoteraError::DegenerateGeometry(
            "RANSAC exhausted candidates without a non-degenerate translation",
        )),
    }
}

fn combinations(items: &[usize], k: usize) -> Vec<Vec<usize>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    if items.len() < k {
        return Vec::new();
    }
    let mut out = Vec::new();
    for i in 0..=(items.len() - k) {
        let rest = combinations(&items[i + 1..], k - 1);
        for mut tail in rest {
            let mut combo = vec![items[i]];
            combo.append(&mut tail);
            out.push(combo);
        }
    }
    out
}

/// Assembles the final two-camera pair from a [`TwoViewResult`]: camera 1 at
/// identity, camera 2 at the scaled translation with the recovered rotation.
pub fn assemble_camera_pair(result: &TwoViewResult) -> (Point3<f64>, crate::linalg::quaternion::Quat, Point3<f64>, crate::linalg::quaternion::Quat) {
    let cam1_pos = Point3::origin();
    let cam1_rot = [1.0, 0.0, 0.0, 0.0];
    let scaled_t = result.translation.normalize() * INITIAL_BASELINE_SCALE;
    let cam2_pos = Point3::origin() + scaled_t;
    let cam2_rot = quaternion::from_rotation_matrix(&result.rotation);
    (cam1_pos, cam1_rot, cam2_pos, cam2_rot)
}
