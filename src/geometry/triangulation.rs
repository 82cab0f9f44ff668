//! DLT-based ray-ray triangulation. Builds a linear camera matrix per viewpoint (ignoring
//! distortion, an approximation acceptable only for seeding LM) and solves
//! the stacked homogeneous system via the 4-dimensional Jacobi
//! eigendecomposition.

use nalgebra::{DMatrix, Matrix3x4, Point3};

use crate::linalg::jacobi::smallest_eigenvector;
use crate::linalg::quaternion;
use crate::model::Viewpoint;

/// Linear (distortion-free) camera matrix `P` such that
/// `[u·z_cam, v·z_cam, z_cam]ᵀ = P [world, 1]ᵀ`, matching `project_to_pixel`
/// with distortion, skew and higher intrinsics frozen.
pub fn camera_matrix(vp: &Viewpoint) -> Matrix3x4<f64> {
    let sign = if vp.is_z_reflected { -1.0 } else { 1.0 };
    let r_inv = quaternion::to_rotation_matrix(quaternion::inverse(vp.rotation)) * sign;
    let t_cam = -(r_inv * vp.position.coords);
    let fx = vp.focal_length;
    let fy = vp.fy();

    let row0 = r_inv.row(0) * fx + r_inv.row(2) * vp.cx;
    let row1 = r_inv.row(1) * -fy + r_inv.row(2) * vp.cy;
    let row2 = r_inv.row(2);

    let t0 = t_cam.x * fx + t_cam.z * vp.cx;
    let t1 = t_cam.y * -fy + t_cam.z * vp.cy;
    let t2 = t_cam.z;

    Matrix3x4::new(
        row0[0], row0[1], row0[2], t0, row1[0], row1[1], row1[2], t1, row2[0], row2[1], row2[2], t2,
    )
}

/// Triangulates a world point from 2 or more `(viewpoint, u, v)` observations.
/// Returns `None` if fewer than 2 observations are given or the smallest
/// eigenvector's homogeneous coordinate is too close to zero to divide by.
pub fn triangulate_dlt(observations: &[(&Viewpoint, f64, f64)]) -> Option<Point3<f64>> {
    if observations.len() < 2 {
        return None;
    }
    let mut rows = Vec::with_capacity(observations.len() * 2);
    for &(vp, u, v) in observations {
        let p = camera_matrix(vp);
        let row_u = p.row(0) - p.row(2) * u;
        let row_v = p.row(1) - p.row(2) * v;
        rows.push([row_u[0], row_u[1], row_u[2], row_u[3]]);
        rows.push([row_v[0], row_v[1], row_v[2], row_v[3]]);
    }
    let a = DMatrix::from_row_slice(
        rows.len(),
        4,
        &rows.iter().flat_map(|r| r.iter().copied()).collect::<Vec<_>>(),
    );
    let ata = a.transpose() * &a;
    let x = smallest_eigenvector(&ata);
    let w = x[3];
    if w.abs() < 1e-9 {
        return None;
    }
    Some(Point3::new(x[0] / w, x[1] / w, x[2] / w))
}

/// Squared perpendicular-distance residual for a depth sanity check.
pub fn reprojects_in_front(vp: &Viewpoint, point: Point3<f64>) -> bool {
    crate::projection::world_to_camera(vp, point).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::quaternion;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn camera_looking_at(position: Point3<f64>, target: Point3<f64>, f: f64, w: f64, h: f64) -> Viewpoint {
        let mut vp = Viewpoint::new("cam", w, h);
        vp.position = position;
        vp.focal_length = f;
        vp.cx = w / 2.0;
        vp.cy = h / 2.0;
        let look_dir = (target - position).normalize();
        vp.rotation = quaternion::rotation_between_vectors(Vector3::new(0.0, 0.0, 1.0), look_dir);
        vp
    }

    #[test]
    fn triangulates_a_point_from_two_views() {
        let world = Point3::new(1.0, 2.0, 3.0);
        let cam1 = camera_looking_at(Point3::new(-10.0, 0.0, 0.0), Point3::origin(), 1000.0, 800.0, 600.0);
        let cam2 = camera_looking_at(Point3::new(10.0, 5.0, -5.0), Point3::origin(), 1000.0, 800.0, 600.0);
        let (u1, v1) = crate::projection::project_world_to_pixel(&cam1, world).unwrap();
        let (u2, v2) = crate::projection::project_world_to_pixel(&cam2, world).unwrap();
        let recovered = triangulate_dlt(&[(&cam1, u1, v1), (&cam2, u2, v2)]).unwrap();
        assert_relative_eq!(recovered, world, epsilon = 1e-4);
    }

    #[test]
    fn fewer_than_two_views_fails() {
        let cam = camera_looking_at(Point3::new(-10.0, 0.0, 0.0), Point3::origin(), 1000.0, 800.0, 600.0);
        assert!(triangulate_dlt(&[(&cam, 400.0, 300.0)]).is_none());
    }
}
