//! The value map: a layout pass over every entity followed by a stateless
//! residual/Jacobian evaluator. Instead of entities mutating a shared
//! map and relying on a push/pop count invariant, [`Layout::build`] computes
//! `{variable_count, residual_count, per-entity slices}` up front; residuals
//! and the Jacobian are then pure functions of a variable vector, and the
//! push/pop symmetry invariant becomes a comparison of slice lengths against
//! `last_residuals.len()` after evaluation.

use std::collections::HashSet;

use nalgebra::{DMatrix, DVector, Point3, Vector3};

use crate::error::{RoteraError, Result};
use crate::model::{Constraint, ImagePointId, Line, LineDirection, Project, ViewpointId, WorldPointId};
use crate::projection;

/// Where a viewpoint's free pose variables live in the global variable
/// vector, or `None` if `is_pose_locked`.
#[derive(Debug, Clone, Copy)]
pub struct PoseSlot {
    pub position_start: usize,
    pub quat_start: usize,
}

/// Which intrinsic scalars are free, and where.
#[derive(Debug, Clone, Copy)]
pub enum IntrinsicsSlot {
    Simple { start: usize },
    Full { start: usize },
}

impl IntrinsicsSlot {
    pub fn len(self) -> usize {
        match self {
            IntrinsicsSlot::Simple { .. } => 3,
            IntrinsicsSlot::Full { .. } => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorldPointSlot {
    pub axes: [Option<usize>; 3],
}

/// The full variable/residual layout for one solve.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub num_variables: usize,
    pub num_residuals: usize,
    pub viewpoint_pose: Vec<Option<PoseSlot>>,
    pub viewpoint_intrinsics: Vec<IntrinsicsSlot>,
    pub viewpoint_quat_residual: Vec<Option<usize>>,
    pub world_point_slots: Vec<WorldPointSlot>,
    /// Authoritative (viewpoint, image_point) observations in evaluation
    /// order, each consuming 2 residuals starting at the paired offset.
    pub observations: Vec<(ViewpointId, ImagePointId, usize)>,
    /// (line_id, residual_start, residual_count).
    pub line_residuals: Vec<(usize, usize, usize)>,
    /// (constraint_id, residual_start, residual_count).
    pub constraint_residuals: Vec<(usize, usize, usize)>,
}

impl Layout {
    pub fn build(project: &Project) -> Layout {
        let mut layout = Layout::default();
        let mut var_cursor = 0usize;
        let mut res_cursor = 0usize;

        layout.viewpoint_intrinsics.reserve(project.viewpoints.len());
        layout.viewpoint_pose.reserve(project.viewpoints.len());
        layout.viewpoint_quat_residual.reserve(project.viewpoints.len());

        for vp in &project.viewpoints {
            let pose = if vp.is_pose_locked {
                None
            } else {
                let slot = PoseSlot {
                    position_start: var_cursor,
                    quat_start: var_cursor + 3,
                };
                var_cursor += 7;
                Some(slot)
            };
            layout.viewpoint_pose.push(pose);

            let intrinsics = if vp.use_simple_intrinsics {
                let slot = IntrinsicsSlot::Simple { start: var_cursor };
                var_cursor += 3;
                slot
            } else {
                let slot = IntrinsicsSlot::Full { start: var_cursor };
                var_cursor += 10;
                slot
            };
            layout.viewpoint_intrinsics.push(intrinsics);

            // Soft quaternion-unit-norm residual, only
            // meaningful when the quaternion is actually free.
            let quat_residual = if pose.is_some() {
                let r = res_cursor;
                res_cursor += 1;
                Some(r)
            } else {
                None
            };
            layout.viewpoint_quat_residual.push(quat_residual);
        }

        layout.world_point_slots.reserve(project.world_points.len());
        for wp in &project.world_points {
            let mut slot = WorldPointSlot::default();
            for axis in 0..3 {
                if wp.locked_xyz[axis].is_none() {
                    slot.axes[axis] = Some(var_cursor);
                    var_cursor += 1;
                }
            }
            layout.world_point_slots.push(slot);
        }

        // Observations: the first image point per (viewpoint, world point)
        // pair only.
        let mut seen: HashSet<(ViewpointId, WorldPointId)> = HashSet::new();
        for vp_idx in 0..project.viewpoints.len() {
            let vp_id = ViewpointId(vp_idx);
            if !project.viewpoint(vp_id).enabled_in_solve {
                continue;
            }
            for &ip_id in &project.viewpoint(vp_id).image_points {
                let ip = &project.image_points[ip_id.index()];
                if !seen.insert((vp_id, ip.world_point)) {
                    continue;
                }
                layout.observations.push((vp_id, ip_id, res_cursor));
                res_cursor += 2;
            }
        }

        for (idx, line) in project.lines.iter().enumerate() {
            let count = line.residual_count();
            if count > 0 {
                layout.line_residuals.push((idx, res_cursor, count));
                res_cursor += count;
            }
        }

        for (idx, constraint) in project.constraints.iter().enumerate() {
            let count = constraint.residual_count();
            if count > 0 {
                layout.constraint_residuals.push((idx, res_cursor, count));
                res_cursor += count;
            }
        }

        layout.num_variables = var_cursor;
        layout.num_residuals = res_cursor;
        layout
    }

    /// Global variable indices holding quaternion components, grouped by
    /// viewpoint, for renormalization after an accepted LM step.
    pub fn quaternion_index_groups(&self) -> Vec<[usize; 4]> {
        self.viewpoint_pose
            .iter()
            .filter_map(|slot| slot.map(|s| [s.quat_start, s.quat_start + 1, s.quat_start + 2, s.quat_start + 3]))
            .collect()
    }
}

/// Reads the current project state into a flat variable vector matching
/// `layout`.
pub fn pack(project: &Project, layout: &Layout) -> DVector<f64> {
    let mut x = vec![0.0; layout.num_variables];
    for (idx, vp) in project.viewpoints.iter().enumerate() {
        if let Some(pose) = layout.viewpoint_pose[idx] {
            x[pose.position_start] = vp.position.x;
            x[pose.position_start + 1] = vp.position.y;
            x[pose.position_start + 2] = vp.position.z;
            for k in 0..4 {
                x[pose.quat_start + k] = vp.rotation[k];
            }
        }
        write_intrinsics(&mut x, layout.viewpoint_intrinsics[idx], vp);
    }
    for (idx, wp) in project.world_points.iter().enumerate() {
        let slot = layout.world_point_slots[idx];
        let effective = wp.effective_xyz();
        let current = wp.optimized_xyz;
        for axis in 0..3 {
            if let Some(var) = slot.axes[axis] {
                let value = current
                    .map(|p| p[axis])
                    .or(effective[axis])
                    .unwrap_or(0.0);
                x[var] = value;
            }
        }
    }
    DVector::from_vec(x)
}

fn write_intrinsics(x: &mut [f64], slot: IntrinsicsSlot, vp: &crate::model::Viewpoint) {
    match slot {
        IntrinsicsSlot::Simple { start } => {
            x[start] = vp.focal_length;
            x[start + 1] = vp.cx;
            x[start + 2] = vp.cy;
        }
        IntrinsicsSlot::Full { start } => {
            x[start] = vp.focal_length;
            x[start + 1] = vp.cx;
            x[start + 2] = vp.cy;
            x[start + 3] = vp.aspect_ratio;
            x[start + 4] = vp.skew;
            x[start + 5] = vp.radial[0];
            x[start + 6] = vp.radial[1];
            x[start + 7] = vp.radial[2];
            x[start + 8] = vp.tangential[0];
            x[start + 9] = vp.tangential[1];
        }
    }
}

fn read_intrinsics(x: &[f64], slot: IntrinsicsSlot, vp: &mut crate::model::Viewpoint) {
    match slot {
        IntrinsicsSlot::Simple { start } => {
            vp.focal_length = x[start];
            vp.cx = x[start + 1];
            vp.cy = x[start + 2];
        }
        IntrinsicsSlot::Full { start } => {
            vp.focal_length = x[start];
            vp.cx = x[start + 1];
            vp.cy = x[start + 2];
            vp.aspect_ratio = x[start + 3];
            vp.skew = x[start + 4];
            vp.radial = [x[start + 5], x[start + 6], x[start + 7]];
            vp.tangential = [x[start + 8], x[start + 9]];
        }
    }
}

/// Writes a variable vector back into the project. Does not renormalize
/// quaternions; the LM engine does that explicitly after accepting a step.
pub fn unpack(project: &mut Project, layout: &Layout, x: &DVector<f64>) {
    for idx in 0..project.viewpoints.len() {
        if let Some(pose) = layout.viewpoint_pose[idx] {
            let vp = &mut project.viewpoints[idx];
            vp.position = Point3::new(
                x[pose.position_start],
                x[pose.position_start + 1],
                x[pose.position_start + 2],
            );
            for k in 0..4 {
                vp.rotation[k] = x[pose.quat_start + k];
            }
        }
        read_intrinsics(x.as_slice(), layout.viewpoint_intrinsics[idx], &mut project.viewpoints[idx]);
    }
    for idx in 0..project.world_points.len() {
        let slot = layout.world_point_slots[idx];
        let wp = &mut project.world_points[idx];
        let effective = wp.effective_xyz();
        let mut p = wp.optimized_xyz.unwrap_or_else(|| {
            Point3::new(
                effective[0].unwrap_or(0.0),
                effective[1].unwrap_or(0.0),
                effective[2].unwrap_or(0.0),
            )
        });
        for axis in 0..3 {
            match slot.axes[axis] {
                Some(var) => p[axis] = x[var],
                None => p[axis] = effective[axis].unwrap_or(p[axis]),
            }
        }
        wp.optimized_xyz = Some(p);
    }
}

/// One (row, col, value) entry of the sparse Jacobian.
pub type Triplet = (usize, usize, f64);

/// Evaluates residuals and the Jacobian (as triplets) for the current
/// project state, and records each entity's slice into its
/// `last_residuals` for the push/pop symmetry check.
pub fn evaluate(project: &mut Project, layout: &Layout) -> Result<(DVector<f64>, Vec<Triplet>)> {
    let mut residuals = vec![0.0; layout.num_residuals];
    let mut triplets = Vec::new();

    for (vp_id, ip_id, res_start) in layout.observations.iter().copied() {
        evaluate_observation(project, layout, vp_id, ip_id, res_start, &mut residuals, &mut triplets);
    }

    for &(line_idx, res_start, count) in &layout.line_residuals {
        evaluate_line(project, layout, line_idx, res_start, count, &mut residuals, &mut triplets);
    }

    for vp in &mut project.viewpoints {
        vp.last_quat_residual = None;
    }
    for (vp_idx, quat_res) in layout.viewpoint_quat_residual.iter().enumerate() {
        if let Some(res_idx) = *quat_res {
            evaluate_quat_norm(project, layout, vp_idx, res_idx, &mut residuals, &mut triplets);
        }
    }

    for &(c_idx, res_start, count) in &layout.constraint_residuals {
        evaluate_constraint(project, layout, c_idx, res_start, count, &mut residuals, &mut triplets);
    }

    check_residual_bookkeeping(project, layout)?;

    Ok((DVector::from_vec(residuals), triplets))
}

fn evaluate_observation(
    project: &mut Project,
    layout: &Layout,
    vp_id: ViewpointId,
    ip_id: ImagePointId,
    res_start: usize,
    residuals: &mut [f64],
    triplets: &mut Vec<Triplet>,
) {
    let ip = project.image_points[ip_id.index()].clone();
    let vp = project.viewpoint(vp_id).clone();
    let wp_idx = ip.world_point.index();
    let world = project.world_points[wp_idx]
        .optimized_xyz
        .unwrap_or_else(Point3::origin);

    let (du, dv);
    match projection::world_to_camera(&vp, world) {
        Some(p_cam) => {
            let (u, v) = projection::project_to_pixel(p_cam, &vp);
            du = u - ip.u;
            dv = v - ip.v;

            let jac_pixel = projection::jacobian_pixel_wrt_camera_frame(p_cam, &vp);
            let pose = projection::pose_jacobians(&vp, world);
            let intrinsics = projection::jacobian_pixel_wrt_intrinsics(p_cam, &vp);

            if let Some(pose_slot) = layout.viewpoint_pose[vp_id.index()] {
                let d_pos = jac_pixel * pose.d_pcam_d_position;
                for col in 0..3 {
                    triplets.push((res_start, pose_slot.position_start + col, d_pos[(0, col)]));
                    triplets.push((res_start + 1, pose_slot.position_start + col, d_pos[(1, col)]));
                }
                let d_quat = jac_pixel * pose.d_pcam_d_quat;
                for col in 0..4 {
                    triplets.push((res_start, pose_slot.quat_start + col, d_quat[(0, col)]));
                    triplets.push((res_start + 1, pose_slot.quat_start + col, d_quat[(1, col)]));
                }
            }

            let wp_slot = layout.world_point_slots[wp_idx];
            let d_world = jac_pixel * pose.d_pcam_d_world;
            for axis in 0..3 {
                if let Some(var) = wp_slot.axes[axis] {
                    triplets.push((res_start, var, d_world[(0, axis)]));
                    triplets.push((res_start + 1, var, d_world[(1, axis)]));
                }
            }

            push_intrinsics_triplets(layout.viewpoint_intrinsics[vp_id.index()], &intrinsics, res_start, triplets);
        }
        None => {
            // Behind the near plane: the point cannot currently contribute
            // a useful gradient. A constant penalty keeps LM pushing the
            // solution away from this configuration without a singular
            // Jacobian row.
            du = 1.0e3;
            dv = 1.0e3;
        }
    }
    residuals[res_start] = du;
    residuals[res_start + 1] = dv;
    project.image_points[ip_id.index()].last_residuals = [du, dv];
}

fn push_intrinsics_triplets(
    slot: IntrinsicsSlot,
    j: &projection::IntrinsicsJacobian,
    res_start: usize,
    triplets: &mut Vec<Triplet>,
) {
    let mut push = |offset: usize, (du, dv): (f64, f64)| {
        triplets.push((res_start, offset, du));
        triplets.push((res_start + 1, offset, dv));
    };
    match slot {
        IntrinsicsSlot::Simple { start } => {
            push(start, j.d_focal);
            push(start + 1, j.d_cx);
            push(start + 2, j.d_cy);
        }
        IntrinsicsSlot::Full { start } => {
            push(start, j.d_focal);
            push(start + 1, j.d_cx);
            push(start + 2, j.d_cy);
            push(start + 3, j.d_aspect);
            push(start + 4, j.d_skew);
            push(start + 5, j.d_k1);
            push(start + 6, j.d_k2);
            push(start + 7, j.d_k3);
            push(start + 8, j.d_p1);
            push(start + 9, j.d_p2);
        }
    }
}

/// Target direction for a line's direction residual: the unit axis vector
/// for axis-aligned lines (sign-matched to the current direction), or the
/// current direction projected into its constrained plane, for
/// plane-constrained lines.
fn target_direction(direction: LineDirection, current: Vector3<f64>) -> Vector3<f64> {
    let axis_target = |axis: Vector3<f64>| -> Vector3<f64> {
        let sign = if current.dot(&axis) < 0.0 { -1.0 } else { 1.0 };
        axis * sign
    };
    match direction {
        LineDirection::Free => current,
        LineDirection::X => axis_target(Vector3::x()),
        LineDirection::Y => axis_target(Vector3::y()),
        LineDirection::Z => axis_target(Vector3::z()),
        LineDirection::Xy => {
            let projected = Vector3::new(current.x, current.y, 0.0);
            if projected.norm() > 1e-9 {
                projected.normalize()
            } else {
                current
            }
        }
        LineDirection::Xz => {
            let projected = Vector3::new(current.x, 0.0, current.z);
            if projected.norm() > 1e-9 {
                projected.normalize()
            } else {
                current
            }
        }
        LineDirection::Yz => {
            let projected = Vector3::new(0.0, current.y, current.z);
            if projected.norm() > 1e-9 {
                projected.normalize()
            } else {
                current
            }
        }
    }
}

fn evaluate_line(
    project: &mut Project,
    layout: &Layout,
    line_idx: usize,
    res_start: usize,
    count: usize,
    residuals: &mut [f64],
    triplets: &mut Vec<Triplet>,
) {
    let line = project.lines[line_idx].clone();
    let [a_id, b_id] = line.endpoints;
    let a = project.world_points[a_id.index()].optimized_xyz.unwrap_or_else(Point3::origin);
    let b = project.world_points[b_id.index()].optimized_xyz.unwrap_or_else(Point3::origin);
    let delta = b - a;
    let len = delta.norm();
    let mut local = vec![0.0; count];
    let mut cursor = 0;

    if line.direction != LineDirection::Free {
        let dir = if len > 1e-9 { delta / len } else { Vector3::z() };
        let target = target_direction(line.direction, dir);
        let deviation = dir - target;
        local[0] = deviation.x;
        local[1] = deviation.y;
        local[2] = deviation.z;
        // Finite-difference the direction residual wrt endpoints: the
        // closed form is a small but fiddly projection-derivative
        // (d(normalize(v))/dv) and a numerical Jacobian keeps this path
        // transparent for the less performance-critical line residuals.
        finite_diff_line_direction_jacobian(
            &project.world_points,
            a_id,
            b_id,
            a,
            b,
            line.direction,
            layout,
            res_start,
            triplets,
        );
        cursor += 3;
    }
    if let Some(target_len) = line.target_length {
        local[cursor] = len - target_len;
        let dir = if len > 1e-9 { delta / len } else { Vector3::z() };
        let a_slot = layout.world_point_slots[a_id.index()];
        let b_slot = layout.world_point_slots[b_id.index()];
        for axis in 0..3 {
            if let Some(var) = a_slot.axes[axis] {
                triplets.push((res_start + cursor, var, -dir[axis]));
            }
            if let Some(var) = b_slot.axes[axis] {
                triplets.push((res_start + cursor, var, dir[axis]));
            }
        }
    }

    residuals[res_start..res_start + count].copy_from_slice(&local);
    project.lines[line_idx].last_residuals = local;
}

fn finite_diff_line_direction_jacobian(
    world_points: &[crate::model::WorldPoint],
    a_id: WorldPointId,
    b_id: WorldPointId,
    a: Point3<f64>,
    b: Point3<f64>,
    direction: LineDirection,
    layout: &Layout,
    res_start: usize,
    triplets: &mut Vec<Triplet>,
) {
    let h = 1e-6;
    let base = {
        let delta = b - a;
        let len = delta.norm();
        let dir = if len > 1e-9 { delta / len } else { Vector3::z() };
        dir - target_direction(direction, dir)
    };
    let mut perturb = |point: Point3<f64>, other: Point3<f64>, is_a: bool, axis: usize| -> Vector3<f64> {
        let mut p = point;
        p[axis] += h;
        let (aa, bb) = if is_a { (p, other) } else { (other, p) };
        let delta = bb - aa;
        let len = delta.norm();
        let dir = if len > 1e-9 { delta / len } else { Vector3::z() };
        let dev = dir - target_direction(direction, dir);
        (dev - base) / h
    };
    let a_slot = layout.world_point_slots[a_id.index()];
    let b_slot = layout.world_point_slots[b_id.index()];
    let _ = world_points;
    for axis in 0..3 {
        if let Some(var) = a_slot.axes[axis] {
            let d = perturb(a, b, true, axis);
            for k in 0..3 {
                triplets.push((res_start + k, var, d[k]));
            }
        }
        if let Some(var) = b_slot.axes[axis] {
            let d = perturb(b, a, false, axis);
            for k in 0..3 {
                triplets.push((res_start + k, var, d[k]));
            }
        }
    }
}

fn evaluate_quat_norm(
    project: &mut Project,
    layout: &Layout,
    vp_idx: usize,
    res_idx: usize,
    residuals: &mut [f64],
    triplets: &mut Vec<Triplet>,
) {
    let q = project.viewpoints[vp_idx].rotation;
    let norm_sq: f64 = q.iter().map(|c| c * c).sum();
    let deviation = norm_sq - 1.0;
    residuals[res_idx] = deviation;
    project.viewpoints[vp_idx].last_quat_residual = Some(deviation);
    if let Some(pose) = layout.viewpoint_pose[vp_idx] {
        for k in 0..4 {
            triplets.push((res_idx, pose.quat_start + k, 2.0 * q[k]));
        }
    }
}

fn evaluate_constraint(
    project: &mut Project,
    layout: &Layout,
    c_idx: usize,
    res_start: usize,
    count: usize,
    residuals: &mut [f64],
    triplets: &mut Vec<Triplet>,
) {
    let points = match &project.constraints[c_idx] {
        Constraint::CoplanarPoints { points, .. } => points.clone(),
    };
    let coords: Vec<Vector3<f64>> = points
        .iter()
        .map(|&id| {
            project.world_points[id.index()]
                .optimized_xyz
                .unwrap_or_else(Point3::origin)
                .coords
        })
        .collect();
    let local = crate::model::entities::plane_deviation_residuals(&coords);
    debug_assert_eq!(local.len(), count);
    residuals[res_start..res_start + count].copy_from_slice(&local);

    finite_diff_coplanar_jacobian(layout, &points, &coords, &local, res_start, triplets);

    if let Constraint::CoplanarPoints { last_residuals, .. } = &mut project.constraints[c_idx] {
        *last_residuals = local;
    }
}

/// Finite-differences `plane_deviation_residuals` wrt every free coordinate
/// of the constrained points, same pattern as `evaluate_line`'s direction
/// residual: the best-fit-plane deviation has no convenient closed form, so
/// a numerical Jacobian keeps this path transparent.
fn finite_diff_coplanar_jacobian(
    layout: &Layout,
    points: &[WorldPointId],
    coords: &[Vector3<f64>],
    base: &[f64],
    res_start: usize,
    triplets: &mut Vec<Triplet>,
) {
    let h = 1e-6;
    for (i, &wp_id) in points.iter().enumerate() {
        let slot = layout.world_point_slots[wp_id.index()];
        for axis in 0..3 {
            let Some(var) = slot.axes[axis] else { continue };
            let mut perturbed = coords.to_vec();
            perturbed[i][axis] += h;
            let perturbed_res = crate::model::entities::plane_deviation_residuals(&perturbed);
            for k in 0..base.len() {
                let d = (perturbed_res[k] - base[k]) / h;
                triplets.push((res_start + k, var, d));
            }
        }
    }
}

/// Push/pop symmetry check: every entity's `last_residuals`
/// must match the residual count its layout slice reserved.
fn check_residual_bookkeeping(project: &Project, layout: &Layout) -> Result<()> {
    for &(vp_id, ip_id, _) in &layout.observations {
        let actual = project.image_points[ip_id.index()].last_residuals.len();
        if actual != 2 {
            return Err(RoteraError::Invariant(format!(
                "viewpoint {} image point {}: expected 2 residuals, stored {actual}",
                vp_id.index(),
                ip_id.index()
            )));
        }
    }

    for &(line_idx, _, count) in &layout.line_residuals {
        let actual = project.lines[line_idx].last_residuals.len();
        if actual != count {
            return Err(RoteraError::Invariant(format!(
                "line {line_idx}: pushed {count} residuals but stored {actual}"
            )));
        }
    }

    for (vp_idx, quat_res) in layout.viewpoint_quat_residual.iter().enumerate() {
        let expected = quat_res.is_some();
        let actual = project.viewpoints[vp_idx].last_quat_residual.is_some();
        if expected != actual {
            return Err(RoteraError::Invariant(format!(
                "viewpoint {vp_idx}: expected quaternion residual {expected}, stored {actual}"
            )));
        }
    }

    for &(c_idx, _, count) in &layout.constraint_residuals {
        let actual = match &project.constraints[c_idx] {
            Constraint::CoplanarPoints { last_residuals, .. } => last_residuals.len(),
        };
        if actual != count {
            return Err(RoteraError::Invariant(format!(
                "constraint {c_idx}: pushed {count} residuals but stored {actual}"
            )));
        }
    }

    Ok(())
}

/// Converts triplets to a dense Jacobian.
pub fn triplets_to_dense(triplets: &[Triplet], nrows: usize, ncols: usize) -> DMatrix<f64> {
    let mut j = DMatrix::<f64>::zeros(nrows, ncols);
    for &(r, c, v) in triplets {
        j[(r, c)] += v;
    }
    j
}
