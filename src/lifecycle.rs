//! Project state lifecycle: snapshot/restore for the candidate
//! orchestrator's independent probes, and the two reset passes that run
//! before each solve attempt.

use nalgebra::Point3;

use crate::linalg::quaternion::Quat;
use crate::model::Project;

#[derive(Debug, Clone)]
pub struct Snapshot {
    world_point_xyz: Vec<Option<Point3<f64>>>,
    world_point_inferred: Vec<[Option<f64>; 3]>,
    viewpoint_pose: Vec<(Point3<f64>, Quat, f64)>,
}

/// Captures per-world-point `optimized_xyz` and `inferred_xyz`, and
/// per-viewpoint `(position, rotation, focal_length)`.
pub fn save_project_state(project: &Project) -> Snapshot {
    Snapshot {
        world_point_xyz: project.world_points.iter().map(|wp| wp.optimized_xyz).collect(),
        world_point_inferred: project.world_points.iter().map(|wp| wp.inferred_xyz).collect(),
        viewpoint_pose: project
            .viewpoints
            .iter()
            .map(|vp| (vp.position, vp.rotation, vp.focal_length))
            .collect(),
    }
}

/// Restores every tracked field to the snapshot's values. Idempotent:
/// `save` → mutate → `restore` returns bit-identical tracked fields.
pub fn restore_project_state(project: &mut Project, snapshot: &Snapshot) {
    for (wp, xyz) in project.world_points.iter_mut().zip(&snapshot.world_point_xyz) {
        wp.optimized_xyz = *xyz;
    }
    for (wp, inferred) in project.world_points.iter_mut().zip(&snapshot.world_point_inferred) {
        wp.inferred_xyz = *inferred;
    }
    for (vp, (pos, rot, focal)) in project.viewpoints.iter_mut().zip(&snapshot.viewpoint_pose) {
        vp.position = *pos;
        vp.rotation = *rot;
        vp.focal_length = *focal;
    }
}

/// Clears per-solve derived state before an attempt: residual bookkeeping,
/// reprojected pixel caches, and outlier flags. Does not clear
/// `optimized_xyz` unless `auto_initialize_world_points` requests it.
pub fn reset_before_attempt(project: &mut Project, auto_initialize_world_points: bool) {
    for wp in &mut project.world_points {
        wp.last_residuals.clear();
        if auto_initialize_world_points {
            wp.optimized_xyz = None;
        }
    }
    for line in &mut project.lines {
        line.last_residuals.clear();
    }
    for ip in &mut project.image_points {
        ip.reprojected = None;
        ip.is_outlier = false;
        ip.last_residuals = [0.0, 0.0];
    }
    for vp in &mut project.viewpoints {
        vp.last_quat_residual = None;
    }
    for constraint in &mut project.constraints {
        match constraint {
            crate::model::Constraint::CoplanarPoints { last_residuals, .. } => last_residuals.clear(),
        }
    }
}

const FOCAL_LOW_RATIO: f64 = 0.3;
const FOCAL_HIGH_RATIO: f64 = 5.0;

/// Resets intrinsics to a safe starting point before re-initialization
///: zeroes distortion and skew, resets aspect to 1, resets
/// focal length to `max(w,h)` only if the current value sits outside
/// `[0.3·min(w,h), 5·max(w,h)]`, and snaps the principal point to the image
/// center if it falls outside the image bounds.
pub fn reset_cameras_for_initialization(project: &mut Project) {
    for vp in &mut project.viewpoints {
        vp.skew = 0.0;
        vp.radial = [0.0; 3];
        vp.tangential = [0.0; 2];
        vp.aspect_ratio = 1.0;

        let min_dim = vp.width.min(vp.height);
        let max_dim = vp.width.max(vp.height);
        let low = FOCAL_LOW_RATIO * min_dim;
        let high = FOCAL_HIGH_RATIO * max_dim;
        if vp.focal_length < low || vp.focal_length > high {
            vp.focal_length = max_dim;
        }

        if vp.cx < 0.0 || vp.cx > vp.width || vp.cy < 0.0 || vp.cy > vp.height {
            vp.cx = vp.width / 2.0;
            vp.cy = vp.height / 2.0;
        }

        vp.init_status = crate::model::InitStatus::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Viewpoint, WorldPoint};
    use nalgebra::Point3;

    #[test]
    fn save_then_mutate_then_restore_is_idempotent() {
        let mut project = Project::new();
        let mut wp = WorldPoint::new("a");
        wp.optimized_xyz = Some(Point3::new(1.0, 2.0, 3.0));
        project.add_world_point(wp);
        project.add_viewpoint(Viewpoint::new("cam", 800.0, 600.0));

        let snapshot = save_project_state(&project);
        project.world_points[0].optimized_xyz = Some(Point3::new(99.0, 99.0, 99.0));
        project.viewpoints[0].position = Point3::new(5.0, 5.0, 5.0);
        restore_project_state(&mut project, &snapshot);

        assert_eq!(project.world_points[0].optimized_xyz, Some(Point3::new(1.0, 2.0, 3.0)));
        assert_eq!(project.viewpoints[0].position, Point3::origin());
    }

    #[test]
    fn reset_cameras_clamps_out_of_range_focal_length() {
        let mut project = Project::new();
        let mut vp = Viewpoint::new("cam", 1000.0, 800.0);
        vp.focal_length = 1_000_000.0;
        vp.cx = -50.0;
        project.add_viewpoint(vp);
        reset_cameras_for_initialization(&mut project);
        assert_eq!(project.viewpoints[0].focal_length, 1000.0);
        assert_eq!(project.viewpoints[0].cx, 500.0);
    }

    #[test]
    fn reset_before_attempt_preserves_optimized_xyz_by_default() {
        let mut project = Project::new();
        let mut wp = WorldPoint::new("a");
        wp.optimized_xyz = Some(Point3::new(1.0, 2.0, 3.0));
        project.add_world_point(wp);
        reset_before_attempt(&mut project, false);
        assert!(project.world_points[0].optimized_xyz.is_some());
        reset_before_attempt(&mut project, true);
        assert!(project.world_points[0].optimized_xyz.is_none());
    }
}
