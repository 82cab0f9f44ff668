//! Vanishing-point machinery: VP estimation from image-space
//! line segments, focal-length recovery from two orthogonal VPs, and
//! rotation recovery up to a 4-way sign ambiguity.

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::linalg::jacobi::smallest_eigenvector;
use crate::linalg::svd3::svd3;
use crate::model::{Axis, Line, LineDirection, VanishingLine, Viewpoint};

/// Homogeneous least-squares intersection of 2+ line segments, each given as
/// `(p0, p1)` pixel endpoints.
pub fn intersect_lines(segments: &[((f64, f64), (f64, f64))]) -> Option<(f64, f64)> {
    if segments.len() < 2 {
        return None;
    }
    let rows: Vec<[f64; 3]> = segments
        .iter()
        .map(|&((x0, y0), (x1, y1))| {
            // Line through the two endpoints in homogeneous form: cross
            // product of the two homogeneous endpoints.
            let a = Vector3::new(x0, y0, 1.0);
            let b = Vector3::new(x1, y1, 1.0);
            let l = a.cross(&b);
            [l.x, l.y, l.z]
        })
        .collect();
    let n = rows.len();
    let a = DMatrix::from_row_slice(n, 3, &rows.iter().flatten().copied().collect::<Vec<_>>());
    let ata = a.transpose() * &a;
    let v = smallest_eigenvector(&ata);
    if v[2].abs() < 1e-9 {
        return None;
    }
    Some((v[0] / v[2], v[1] / v[2]))
}

fn axis_lines_as_segments(axis: Axis, viewpoint_idx: crate::model::ViewpointId, vanishing_lines: &[VanishingLine], lines: &[Line], world_points: &[crate::model::WorldPoint], observations: impl Fn(crate::model::WorldPointId) -> Option<(f64, f64)>) -> Vec<((f64, f64), (f64, f64))> {
    let mut segments: Vec<((f64, f64), (f64, f64))> = vanishing_lines
        .iter()
        .filter(|vl| vl.viewpoint == viewpoint_idx && vl.axis == axis)
        .map(|vl| (vl.endpoints[0], vl.endpoints[1]))
        .collect();

    // A direction-constrained line whose endpoints are both observed in this
    // viewpoint acts as a virtual vanishing line on its axis.
    let line_axis = match axis {
        Axis::X => LineDirection::X,
        Axis::Y => LineDirection::Y,
        Axis::Z => LineDirection::Z,
    };
    for line in lines {
        if line.direction != line_axis {
            continue;
        }
        let _ = world_points;
        if let (Some(p0), Some(p1)) = (observations(line.endpoints[0]), observations(line.endpoints[1])) {
            segments.push((p0, p1));
        }
    }
    segments
}

/// Focal length estimate from two orthogonal vanishing points and the
/// principal point: `f = √(−(v1−pp)·(v2−pp))`, discarded if the
/// radicand is non-positive.
pub fn focal_length_from_vps(v1: (f64, f64), v2: (f64, f64), pp: (f64, f64)) -> Option<f64> {
    let d1 = (v1.0 - pp.0, v1.1 - pp.1);
    let d2 = (v2.0 - pp.0, v2.1 - pp.1);
    let dot = d1.0 * d2.0 + d1.1 * d2.1;
    let radicand = -dot;
    if radicand > 0.0 {
        Some(radicand.sqrt())
    } else {
        None
    }
}

/// Rotation candidates from two or three orthogonal vanishing points: each
/// column is `normalize([(vₐ−pp)/f, (vₐ−pp)/f, 1])` (y-flipped),
/// orthonormalized via SVD, returned with up to 4 sign ambiguities.
pub fn rotation_candidates_from_vps(
    vp_x: Option<(f64, f64)>,
    vp_y: Option<(f64, f64)>,
    vp_z: Option<(f64, f64)>,
    pp: (f64, f64),
    f: f64,
) -> Vec<Matrix3<f64>> {
    let direction = |v: (f64, f64)| -> Vector3<f64> {
        Vector3::new((v.0 - pp.0) / f, -(v.1 - pp.1) / f, 1.0).normalize()
    };
    let dirs: Vec<Option<Vector3<f64>>> = vec![vp_x.map(direction), vp_y.map(direction), vp_z.map(direction)];

    // Fill any missing axis as the cross product of the other two so the
    // columns always form a full right-handed basis before orthonormalizing.
    let present: Vec<usize> = dirs.iter().enumerate().filter(|(_, d)| d.is_some()).map(|(i, _)| i).collect();
    if present.len() < 2 {
        return Vec::new();
    }
    let mut cols = [Vector3::zeros(); 3];
    for &i in &present {
        cols[i] = dirs[i].unwrap();
    }
    let missing: Vec<usize> = (0..3).filter(|i| !present.contains(i)).collect();
    if let Some(&m) = missing.first() {
        let others: Vec<usize> = (0..3).filter(|&i| i != m).collect();
        cols[m] = cols[others[0]].cross(&cols[others[1]]).normalize();
    }

    let raw = Matrix3::from_columns(&cols);
    let svd = svd3(&raw);
    let base = svd.u * svd.v.transpose();

    let mut out = Vec::with_capacity(4);
    for sign_a in [1.0, -1.0] {
        for sign_b in [1.0, -1.0] {
            let flip = Matrix3::from_diagonal(&Vector3::new(sign_a, sign_b, sign_a * sign_b));
            let candidate = base * flip;
            if candidate.determinant() > 0.0 {
                out.push(candidate);
            }
        }
    }
    out
}

/// "Can initialize with VP" gate: at least 2 axes present, 2+
/// lines per axis, and either 2 fully-locked points (strict) or 1 fully
/// locked point with a `hasFixedLength` line elsewhere (relaxed).
pub fn can_initialize_with_vp(
    axes_with_enough_lines: usize,
    fully_locked_point_count: usize,
    any_other_fixed_length_line: bool,
) -> bool {
    axes_with_enough_lines >= 2
        && (fully_locked_point_count >= 2 || (fully_locked_point_count >= 1 && any_other_fixed_length_line))
}

/// Estimates a camera orientation and focal length from vanishing points
/// alone. Returns `None` if fewer than 2 axes have enough converging lines,
/// or the recovered focal length is non-physical.
pub fn estimate_orientation(
    viewpoint: &Viewpoint,
    vanishing_lines: &[VanishingLine],
    lines: &[Line],
    world_points: &[crate::model::WorldPoint],
    viewpoint_id: crate::model::ViewpointId,
    observations: impl Fn(crate::model::WorldPointId) -> Option<(f64, f64)> + Copy,
) -> Option<(f64, Vec<Matrix3<f64>>)> {
    let pp = (viewpoint.cx, viewpoint.cy);
    let axes = [Axis::X, Axis::Y, Axis::Z];
    let vps: Vec<Option<(f64, f64)>> = axes
        .iter()
        .map(|&axis| {
            let segments = axis_lines_as_segments(axis, viewpoint_id, vanishing_lines, lines, world_points, observations);
            intersect_lines(&segments)
        })
        .collect();

    let present: Vec<(Axis, (f64, f64))> = axes
        .iter()
        .zip(vps.iter())
        .filter_map(|(&a, v)| v.map(|v| (a, v)))
        .collect();
    if present.len() < 2 {
        return None;
    }
    let f = focal_length_from_vps(present[0].1, present[1].1, pp)?;
    let candidates = rotation_candidates_from_vps(vps[0], vps[1], vps[2], pp, f);
    if candidates.is_empty() {
        return None;
    }
    Some((f, candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersects_two_converging_segments() {
        let segments = vec![((0.0, 0.0), (10.0, 10.0)), ((0.0, 20.0), (10.0, 10.0))];
        let p = intersect_lines(&segments).unwrap();
        assert!((p.0 - 10.0).abs() < 1e-6);
        assert!((p.1 - 10.0).abs() < 1e-6);
    }

    #[test]
    fn focal_length_discarded_when_radicand_negative() {
        assert!(focal_length_from_vps((0.0, 0.0), (0.0, 0.0), (0.0, 0.0)).is_none());
    }

    #[test]
    fn vp_gate_requires_two_axes_and_an_anchor() {
        assert!(can_initialize_with_vp(2, 2, false));
        assert!(can_initialize_with_vp(2, 1, true));
        assert!(!can_initialize_with_vp(2, 1, false));
        assert!(!can_initialize_with_vp(1, 2, false));
    }
}
