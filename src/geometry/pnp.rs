//! Perspective-n-Point pose recovery: given a
//! camera's known intrinsics and 3+ 3D↔2D correspondences, recovers
//! position and orientation plus a reliability score.
//!
//! Solved as a linear DLT over the 12 entries of `[R|t]` (treating the
//! rotation block as unconstrained, then projecting it back onto the
//! rotation manifold via [`svd3`]) rather than a minimal-solver closed form:
//! this reuses the crate's general symmetric eigensolver instead of a
//! fourth bespoke numerical kernel.

use nalgebra::{DMatrix, Matrix3, Point3, Vector3};

use crate::linalg::jacobi::smallest_eigenvector;
use crate::linalg::quaternion::{self, Quat};
use crate::linalg::svd3::svd3;

pub struct PnpEstimate {
    pub position: Point3<f64>,
    pub rotation: Quat,
    /// In `[0, 1]`; the fraction of input correspondences that reproject in
    /// front of the recovered camera, scaled down further if the recovered
    /// `[R|t]` block was far from orthogonal before projection.
    pub reliability: f64,
}

struct NormalizedCorrespondence {
    world: Point3<f64>,
    ray_x: f64,
    ray_y: f64,
}

fn normalize_observation(u: f64, v: f64, fx: f64, fy: f64, cx: f64, cy: f64) -> (f64, f64) {
    ((u - cx) / fx, (cy - v) / fy)
}

/// Recovers pose from `correspondences: [(world, u, v)]` given the camera's
/// (fixed, already-known) intrinsics. Requires at least 6 correspondences
/// for the linear system to be well-posed; with exactly 3-5, the system is
/// under-determined and `None` is returned (callers fall back to VP or EM).
pub fn estimate_pose(
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    correspondences: &[(Point3<f64>, f64, f64)],
) -> Option<PnpEstimate> {
    if correspondences.len() < 6 {
        return None;
    }
    let points: Vec<NormalizedCorrespondence> = correspondences
        .iter()
        .map(|&(world, u, v)| {
            let (x, y) = normalize_observation(u, v, fx, fy, cx, cy);
            NormalizedCorrespondence { world, ray_x: x, ray_y: y }
        })
        .collect();

    let mut rows: Vec<[f64; 12]> = Vec::with_capacity(points.len() * 2);
    for p in &points {
        let (x, y, z) = (p.world.x, p.world.y, p.world.z);
        // ray.y * p_cam.z - p_cam.y = 0
        rows.push([
            0.0, 0.0, 0.0, 0.0,
            -x, -y, -z, -1.0,
            p.ray_y * x, p.ray_y * y, p.ray_y * z, p.ray_y,
        ]);
        // p_cam.x - ray.x * p_cam.z = 0
        rows.push([
            x, y, z, 1.0,
            0.0, 0.0, 0.0, 0.0,
            -p.ray_x * x, -p.ray_x * y, -p.ray_x * z, -p.ray_x,
        ]);
    }
    let n = rows.len();
    let a = DMatrix::from_row_slice(n, 12, &rows.iter().flatten().copied().collect::<Vec<_>>());
    let ata = a.transpose() * &a;
    let m = smallest_eigenvector(&ata);

    let r_raw = Matrix3::new(m[0], m[1], m[2], m[4], m[5], m[6], m[8], m[9], m[10]);
    let t_raw = Vector3::new(m[3], m[7], m[11]);

    let row_norms = [
        r_raw.row(0).norm(),
        r_raw.row(1).norm(),
        r_raw.row(2).norm(),
    ];
    let avg_norm = row_norms.iter().sum::<f64>() / 3.0;
    if avg_norm < 1e-9 {
        return None;
    }
    let row_norm_spread = (row_norms.iter().map(|n| (n - avg_norm).abs()).sum::<f64>() / avg_norm) / 3.0;

    let svd = svd3(&(r_raw / avg_norm));
    let mut r = svd.u * svd.v.transpose();
    let mut t = t_raw / avg_norm;
    if r.determinant() < 0.0 {
        r = -r;
        t = -t;
    }

    // The linear system determines [R|t] up to an overall sign; pick the
    // sign that puts most correspondences in front of the camera.
    let depth_positive_count = points
        .iter()
        .filter(|p| (r * p.world.coords + t).z > 0.0)
        .count();
    if depth_positive_count * 2 < points.len() {
        r = -r;
        t = -t;
    }
    let depth_positive_count = points.iter().filter(|p| (r * p.world.coords + t).z > 0.0).count();

    let position = Point3::from(-(r.transpose() * t));
    let rotation = quaternion::from_rotation_matrix(&r.transpose());

    let depth_fraction = depth_positive_count as f64 / points.len() as f64;
    let reliability = (depth_fraction * (1.0 - row_norm_spread.min(1.0))).clamp(0.0, 1.0);

    Some(PnpEstimate {
        position,
        rotation,
        reliability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::quaternion::rotation_between_vectors;
    use crate::model::Viewpoint;

    fn synthetic_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
        ]
    }

    #[test]
    fn recovers_a_known_camera_pose() {
        let mut vp = Viewpoint::new("cam", 1000.0, 800.0);
        vp.position = Point3::new(-20.0, 15.0, -25.0);
        vp.focal_length = 1000.0;
        vp.cx = 500.0;
        vp.cy = 400.0;
        let look_dir = (Point3::new(0.5, 0.5, 0.5) - vp.position).normalize();
        vp.rotation = rotation_between_vectors(Vector3::new(0.0, 0.0, 1.0), look_dir);

        let correspondences: Vec<(Point3<f64>, f64, f64)> = synthetic_points()
            .into_iter()
            .filter_map(|p| {
                crate::projection::project_world_to_pixel(&vp, p).map(|(u, v)| (p, u, v))
            })
            .collect();
        assert!(correspondences.len() >= 6);

        let estimate = estimate_pose(vp.focal_length, vp.fy(), vp.cx, vp.cy, &correspondences).unwrap();
        assert!((estimate.position - vp.position).norm() < 1e-3);
        assert!(estimate.reliability > 0.9);
    }

    #[test]
    fn too_few_correspondences_returns_none() {
        let correspondences = vec![
            (Point3::new(0.0, 0.0, 0.0), 500.0, 400.0),
            (Point3::new(1.0, 0.0, 0.0), 510.0, 400.0),
        ];
        assert!(estimate_pose(1000.0, 1000.0, 500.0, 400.0, &correspondences).is_none());
    }
}
