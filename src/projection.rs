//! Pinhole projection with radial/tangential distortion, and analytical
//! Jacobians of the reprojection residual w.r.t. camera-frame coordinates,
//! pose, intrinsics and world point.
//!
//! The Jacobian is assembled by chaining small closed-form blocks (camera
//! frame → normalized plane → distorted plane → pixel, and pose/point →
//! camera frame) rather than a single CSE-flattened expression; each block
//! is exact and this keeps every intermediate quantity nameable.

use nalgebra::{Matrix2x3, Matrix2x4, Matrix3, Matrix3x4, Point3, Vector3};

use crate::linalg::quaternion::{self, Quat};
use crate::model::Viewpoint;

pub const NEAR_PLANE: f64 = 0.1;

/// `p_cam = R(q)⁻¹ (p_world - position)`, negated when
/// `is_z_reflected`. `None` if the point falls behind the near plane.
pub fn world_to_camera(vp: &Viewpoint, world: Point3<f64>) -> Option<Vector3<f64>> {
    let diff = world - vp.position;
    let q_inv = quaternion::inverse(vp.rotation);
    let mut p_cam = quaternion::rotate_vector(q_inv, diff);
    if vp.is_z_reflected {
        p_cam = -p_cam;
    }
    if p_cam.z < NEAR_PLANE {
        return None;
    }
    Some(p_cam)
}

pub struct Distorted {
    pub x_prime: f64,
    pub y_prime: f64,
    pub x_dist: f64,
    pub y_dist: f64,
}

/// Normalized-plane projection followed by the Brown-Conrady distortion
/// model.
pub fn distort(p_cam: Vector3<f64>, vp: &Viewpoint) -> Distorted {
    let x = p_cam.x / p_cam.z;
    let y = p_cam.y / p_cam.z;
    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    let [k1, k2, k3] = vp.radial;
    let [p1, p2] = vp.tangential;
    let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
    let tang_x = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
    let tang_y = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
    Distorted {
        x_prime: x,
        y_prime: y,
        x_dist: x * radial + tang_x,
        y_dist: y * radial + tang_y,
    }
}

/// Pixel coordinates from camera-frame coordinates.
///
/// The skew term multiplies the *undistorted* `y'`, not the distorted
/// value. Kept exactly this way since cameras already calibrated against
/// this convention would otherwise drift.
pub fn project_to_pixel(p_cam: Vector3<f64>, vp: &Viewpoint) -> (f64, f64) {
    let d = distort(p_cam, vp);
    let fx = vp.focal_length;
    let fy = vp.fy();
    let u = vp.cx + fx * d.x_dist + vp.skew * d.y_prime;
    let v = vp.cy - fy * d.y_dist;
    (u, v)
}

pub fn project_world_to_pixel(vp: &Viewpoint, world: Point3<f64>) -> Option<(f64, f64)> {
    let p_cam = world_to_camera(vp, world)?;
    Some(project_to_pixel(p_cam, vp))
}

/// `d(pixel)/d(p_cam)`, a 2×3 matrix.
pub fn jacobian_pixel_wrt_camera_frame(p_cam: Vector3<f64>, vp: &Viewpoint) -> Matrix2x3<f64> {
    let pz = p_cam.z;
    let x = p_cam.x / pz;
    let y = p_cam.y / pz;
    let r2 = x * x + y * y;
    let [k1, k2, k3] = vp.radial;
    let [p1, p2] = vp.tangential;
    let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
    let d_radial_d_r2 = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r2 * r2;
    let d_radial_dx = d_radial_d_r2 * 2.0 * x;
    let d_radial_dy = d_radial_d_r2 * 2.0 * y;

    let d_tangx_dx = 2.0 * p1 * y + 6.0 * p2 * x;
    let d_tangx_dy = 2.0 * p1 * x + 2.0 * p2 * y;
    let d_tangy_dx = 2.0 * p1 * x + 2.0 * p2 * y;
    let d_tangy_dy = 6.0 * p1 * y + 2.0 * p2 * x;

    let d_xdist_dx = radial + x * d_radial_dx + d_tangx_dx;
    let d_xdist_dy = x * d_radial_dy + d_tangx_dy;
    let d_ydist_dx = y * d_radial_dx + d_tangy_dx;
    let d_ydist_dy = radial + y * d_radial_dy + d_tangy_dy;

    let fx = vp.focal_length;
    let fy = vp.fy();
    let du_dxp = fx * d_xdist_dx;
    let du_dyp = fx * d_xdist_dy + vp.skew;
    let dv_dxp = -fy * d_ydist_dx;
    let dv_dyp = -fy * d_ydist_dy;

    // d(x', y')/d(p_cam).
    let dxp_dpcam = Vector3::new(1.0 / pz, 0.0, -p_cam.x / (pz * pz));
    let dyp_dpcam = Vector3::new(0.0, 1.0 / pz, -p_cam.y / (pz * pz));

    let du_dpcam = dxp_dpcam * du_dxp + dyp_dpcam * du_dyp;
    let dv_dpcam = dxp_dpcam * dv_dxp + dyp_dpcam * dv_dyp;

    Matrix2x3::from_rows(&[du_dpcam.transpose(), dv_dpcam.transpose()])
}

/// `d(pixel)/d(intrinsics)` as `[dfx, dcx, dcy, dskew, daspect, dk1, dk2, dk3, dp1, dp2]`
/// restricted to the free subset when `use_simple_intrinsics` is set.
pub struct IntrinsicsJacobian {
    pub d_focal: (f64, f64),
    pub d_cx: (f64, f64),
    pub d_cy: (f64, f64),
    pub d_skew: (f64, f64),
    pub d_aspect: (f64, f64),
    pub d_k1: (f64, f64),
    pub d_k2: (f64, f64),
    pub d_k3: (f64, f64),
    pub d_p1: (f64, f64),
    pub d_p2: (f64, f64),
}

pub fn jacobian_pixel_wrt_intrinsics(p_cam: Vector3<f64>, vp: &Viewpoint) -> IntrinsicsJacobian {
    let d = distort(p_cam, vp);
    let x = d.x_prime;
    let y = d.y_prime;
    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;
    let fx = vp.focal_length;
    let fy = vp.fy();

    IntrinsicsJacobian {
        d_focal: (d.x_dist, -d.y_dist * vp.aspect_ratio),
        d_cx: (1.0, 0.0),
        d_cy: (0.0, 1.0),
        d_skew: (y, 0.0),
        d_aspect: (0.0, -fx * d.y_dist),
        d_k1: (fx * x * r2, -fy * y * r2),
        d_k2: (fx * x * r4, -fy * y * r4),
        d_k3: (fx * x * r6, -fy * y * r6),
        d_p1: (
            fx * (2.0 * x * y),
            -fy * (r2 + 2.0 * y * y),
        ),
        d_p2: (
            fx * (r2 + 2.0 * x * x),
            -fy * (2.0 * x * y),
        ),
    }
}

/// `d(p_cam)/d(position)`, `d(p_cam)/d(quaternion)` and
/// `d(p_cam)/d(world point)`, all derived from the same rotation-matrix
/// partials and sign-flipped together when `is_z_reflected`.
pub struct PoseJacobians {
    pub d_pcam_d_position: Matrix3<f64>,
    pub d_pcam_d_quat: Matrix3x4<f64>,
    pub d_pcam_d_world: Matrix3<f64>,
}

pub fn pose_jacobians(vp: &Viewpoint, world: Point3<f64>) -> PoseJacobians {
    let diff = world - vp.position;
    let q_inv = quaternion::inverse(vp.rotation);
    let r_inv = quaternion::to_rotation_matrix(q_inv);

    let sign = if vp.is_z_reflected { -1.0 } else { 1.0 };

    let d_pcam_d_world = r_inv * sign;
    let d_pcam_d_position = -r_inv * sign;

    // d(R(q_inv) diff)/d(q_inv components), via the analytic partials of
    // the rotation matrix entries wrt [w,x,y,z].
    let (w, x, y, z) = (q_inv[0], q_inv[1], q_inv[2], q_inv[3]);
    let dr_dw = Matrix3::new(0.0, -2.0 * z, 2.0 * y, 2.0 * z, 0.0, -2.0 * x, -2.0 * y, 2.0 * x, 0.0);
    let dr_dx = Matrix3::new(0.0, 2.0 * y, 2.0 * z, 2.0 * y, -4.0 * x, -2.0 * w, 2.0 * z, 2.0 * w, -4.0 * x);
    let dr_dy = Matrix3::new(-4.0 * y, 2.0 * x, 2.0 * w, 2.0 * x, 0.0, 2.0 * z, -2.0 * w, 2.0 * z, -4.0 * y);
    let dr_dz = Matrix3::new(-4.0 * z, -2.0 * w, 2.0 * x, 2.0 * w, -4.0 * z, 2.0 * y, 2.0 * x, 2.0 * y, 0.0);

    let col_w = dr_dw * diff;
    let col_x = dr_dx * diff;
    let col_y = dr_dy * diff;
    let col_z = dr_dz * diff;
    let d_rotated_d_qinv = Matrix3x4::from_columns(&[col_w, col_x, col_y, col_z]);

    // q_inv = conjugate(q) = (w, -x, -y, -z): chain rule flips sign of the
    // x/y/z columns.
    let d_pcam_d_quat = Matrix3x4::from_columns(&[
        d_rotated_d_qinv.column(0) * sign,
        d_rotated_d_qinv.column(1) * -sign,
        d_rotated_d_qinv.column(2) * -sign,
        d_rotated_d_qinv.column(3) * -sign,
    ]);

    PoseJacobians {
        d_pcam_d_position,
        d_pcam_d_quat,
        d_pcam_d_world,
    }
}

/// Reference implementation used only to validate the closed-form Jacobian
/// during tests/`autodiff-check` builds: central finite differences are an adequate stand-in for a
/// true dual-number autodiff tape here because the crate's only
/// differentiable primitive is this single projection function.
pub fn finite_difference_jacobian_wrt_world(
    vp: &Viewpoint,
    world: Point3<f64>,
    h: f64,
) -> Option<Matrix2x3<f64>> {
    let mut cols = [Vector3::zeros(); 3];
    for axis in 0..3 {
        let mut plus = world;
        let mut minus = world;
        plus[axis] += h;
        minus[axis] -= h;
        let p_plus = project_world_to_pixel(vp, plus)?;
        let p_minus = project_world_to_pixel(vp, minus)?;
        cols[axis] = Vector3::new((p_plus.0 - p_minus.0) / (2.0 * h), (p_plus.1 - p_minus.1) / (2.0 * h), 0.0);
    }
    Some(Matrix2x3::new(
        cols[0].x, cols[1].x, cols[2].x, cols[0].y, cols[1].y, cols[2].y,
    ))
}
