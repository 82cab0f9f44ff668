//! Quaternion algebra. Quaternions are stored `[w, x, y, z]` throughout the
//! crate, matching the data model rather than `nalgebra`'s `[x, y, z, w]`
//! internal layout, so these are hand-rolled instead of delegated to
//! `nalgebra::UnitQuaternion` even though that type is used elsewhere for
//! camera extrinsics.

use nalgebra::Vector3;

pub type Quat = [f64; 4];

pub fn norm(q: Quat) -> f64 {
    (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt()
}

pub fn normalize(q: Quat) -> Quat {
    let n = norm(q);
    if n < 1e-300 {
        return [1.0, 0.0, 0.0, 0.0];
    }
    [q[0] / n, q[1] / n, q[2] / n, q[3] / n]
}

/// Hamilton product `a * b`.
pub fn multiply(a: Quat, b: Quat) -> Quat {
    let (aw, ax, ay, az) = (a[0], a[1], a[2], a[3]);
    let (bw, bx, by, bz) = (b[0], b[1], b[2], b[3]);
    [
        aw * bw - ax * bx - ay * by - az * bz,
        aw * bx + ax * bw + ay * bz - az * by,
        aw * by - ax * bz + ay * bw + az * bx,
        aw * bz + ax * by - ay * bx + az * bw,
    ]
}

/// Inverse of a quaternion; for a unit quaternion this is the conjugate.
pub fn inverse(q: Quat) -> Quat {
    let n2 = q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3];
    let conj = [q[0], -q[1], -q[2], -q[3]];
    [conj[0] / n2, conj[1] / n2, conj[2] / n2, conj[3] / n2]
}

/// Rotates `v` by unit quaternion `q` using
/// `v' = v + 2w(q_vec × v) + 2(q_vec × (q_vec × v))`.
pub fn rotate_vector(q: Quat, v: Vector3<f64>) -> Vector3<f64> {
    let w = q[0];
    let qv = Vector3::new(q[1], q[2], q[3]);
    let t1 = qv.cross(&v);
    let t2 = qv.cross(&t1);
    v + t1 * (2.0 * w) + t2 * 2.0
}

/// Shortest-arc rotation taking unit vector `from` to unit vector `to`.
/// Handles the antiparallel case
/// by choosing an axis orthogonal to `from`.
pub fn rotation_between_vectors(from: Vector3<f64>, to: Vector3<f64>) -> Quat {
    let from = from.normalize();
    let to = to.normalize();
    let cos_theta = from.dot(&to).clamp(-1.0, 1.0);

    if cos_theta > 1.0 - 1e-12 {
        return [1.0, 0.0, 0.0, 0.0];
    }
    if cos_theta < -1.0 + 1e-12 {
        // Antiparallel: any axis orthogonal to `from` works. Pick whichever
        // world axis is least aligned with `from` to avoid a degenerate
        // cross product.
        let world_axis = if from.x.abs() < from.y.abs() && from.x.abs() < from.z.abs() {
            Vector3::new(1.0, 0.0, 0.0)
        } else if from.y.abs() < from.z.abs() {
            Vector3::new(0.0, 1.0, 0.0)
        } else {
            Vector3::new(0.0, 0.0, 1.0)
        };
        let axis = from.cross(&world_axis).normalize();
        return [0.0, axis.x, axis.y, axis.z];
    }

    let axis = from.cross(&to);
    let s = ((1.0 + cos_theta) * 2.0).sqrt();
    let inv_s = 1.0 / s;
    normalize([s * 0.5, axis.x * inv_s, axis.y * inv_s, axis.z * inv_s])
}

/// Converts a unit quaternion to its 3×3 rotation matrix, row-major flattened.
pub fn to_rotation_matrix(q: Quat) -> nalgebra::Matrix3<f64> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
    nalgebra::Matrix3::new(
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - z * w),
        2.0 * (x * z + y * w),
        2.0 * (x * y + z * w),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - x * w),
        2.0 * (x * z - y * w),
        2.0 * (y * z + x * w),
        1.0 - 2.0 * (x * x + y * y),
    )
}

/// Converts a rotation matrix to a unit quaternion using the standard
/// trace-branching formulation: branch on the trace, falling
/// back to whichever diagonal entry is largest to avoid dividing by a
/// near-zero term.
pub fn from_rotation_matrix(m: &nalgebra::Matrix3<f64>) -> Quat {
    let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];
    if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        normalize([
            0.25 * s,
            (m[(2, 1)] - m[(1, 2)]) / s,
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(1, 0)] - m[(0, 1)]) / s,
        ])
    } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
        let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0;
        normalize([
            (m[(2, 1)] - m[(1, 2)]) / s,
            0.25 * s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
        ])
    } else if m[(1, 1)] > m[(2, 2)] {
        let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0;
        normalize([
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            0.25 * s,
            (m[(1, 2)] + m[(2, 1)]) / s,
        ])
    } else {
        let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0;
        normalize([
            (m[(1, 0)] - m[(0, 1)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
            (m[(1, 2)] + m[(2, 1)]) / s,
            0.25 * s,
        ])
    }
}
