//! The readiness analyzer: a pre-flight check run before any
//! numerical work, reporting whether a solve and/or initialization can
//! proceed and why not.

use std::collections::{HashSet, VecDeque};

use crate::model::{Constraint, EntityRef, LineDirection, Project, ViewpointId, WorldPointId};
use crate::valuemap::Layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: IssueSeverity,
    /// Stable machine-readable code, e.g.
    /// `"AMBIGUOUS_DEPTH"`.
    pub code: &'static str,
    pub message: String,
    /// The specific entities this issue concerns, empty when the issue is
    /// project-wide rather than tied to particular entities.
    pub entity_ids: Vec<EntityRef>,
}

impl Issue {
    fn new(severity: IssueSeverity, code: &'static str, message: impl Into<String>, entity_ids: Vec<EntityRef>) -> Self {
        Self { severity, code, message: message.into(), entity_ids }
    }
}

#[derive(Debug, Clone)]
pub struct Readiness {
    pub can_optimize: bool,
    pub can_initialize: bool,
    pub total_dof: usize,
    pub constraint_dof: usize,
    pub net_dof: i64,
    pub issues: Vec<Issue>,
}

const MIN_EM_CORRESPONDENCES: usize = 7;
/// Matches `pnp::estimate_pose`'s linear-DLT requirement
/// (`src/init/camera_pose.rs`'s `try_pnp` rejects anything below 6), not the
/// theoretical 3-point minimum: a camera readiness calls eligible for PnP
/// must actually be initializable by it.
const MIN_PNP_POINTS: usize = 6;
const MIN_VANISHING_LINES_PER_AXIS: usize = 2;
const MIN_AXES_FOR_VP: usize = 2;
const DUPLICATE_ANCHOR_EPSILON: f64 = 1e-6;

fn has_pnp_camera(project: &Project) -> bool {
    project.enabled_viewpoint_ids().into_iter().any(|vp_id| {
        let count = project
            .viewpoint(vp_id)
            .image_points
            .iter()
            .filter(|&&ip_id| {
                let wp_id = project.image_points[ip_id.index()].world_point;
                project.world_point(wp_id).is_fully_constrained()
            })
            .count();
        count >= MIN_PNP_POINTS
    })
}

fn has_vp_camera(project: &Project) -> bool {
    project.enabled_viewpoint_ids().into_iter().any(|vp_id| {
        let mut per_axis = std::collections::HashMap::new();
        for &vl_id in &project.viewpoint(vp_id).vanishing_lines {
            *per_axis.entry(project.vanishing_lines[vl_id.index()].axis as u8).or_insert(0) += 1;
        }
        per_axis.values().filter(|&&n| n >= MIN_VANISHING_LINES_PER_AXIS).count() >= MIN_AXES_FOR_VP
    })
}

fn has_em_pair(project: &Project) -> bool {
    let ids = project.enabled_viewpoint_ids();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let shared = project.viewpoint(ids[i])
                .image_points
                .iter()
                .filter(|&&ip_id| {
                    let wp_id = project.image_points[ip_id.index()].world_point;
                    project.authoritative_image_point(ids[j], wp_id).is_some()
                })
                .count();
            if shared >= MIN_EM_CORRESPONDENCES {
                return true;
            }
        }
    }
    false
}

fn has_scale_reference(project: &Project) -> bool {
    let fixed_length_line = project.lines.iter().any(|l| l.target_length.is_some());
    let two_locked_points = project.world_points.iter().filter(|wp| wp.is_locked()).count() >= 2;
    fixed_length_line || two_locked_points
}

fn has_axis_reference(project: &Project) -> bool {
    let axis_line = project.lines.iter().any(|l| matches!(l.direction, LineDirection::X | LineDirection::Y | LineDirection::Z));
    let vanishing = !project.vanishing_lines.is_empty();
    axis_line || vanishing
}

/// World points observed by 2+ enabled cameras: the anchors BFS-reachability
/// is measured from.
fn multi_camera_anchors(project: &Project) -> HashSet<usize> {
    (0..project.world_points.len())
        .filter(|&i| project.observations_of(WorldPointId(i)).len() >= 2)
        .collect()
}

fn ambiguous_depth_points(project: &Project) -> Vec<usize> {
    let anchors = multi_camera_anchors(project);
    if anchors.is_empty() {
        return (0..project.world_points.len()).collect();
    }

    let mut reachable: HashSet<usize> = anchors.clone();
    let mut queue: VecDeque<usize> = anchors.into_iter().collect();
    while let Some(current) = queue.pop_front() {
        for line in &project.lines {
            let [a, b] = line.endpoints;
            if a.index() == current && reachable.insert(b.index()) {
                queue.push_back(b.index());
            }
            if b.index() == current && reachable.insert(a.index()) {
                queue.push_back(a.index());
            }
        }
    }

    (0..project.world_points.len()).filter(|i| !reachable.contains(i)).collect()
}

fn duplicate_anchor_pairs(project: &Project) -> Vec<(usize, usize)> {
    let locked: Vec<(usize, nalgebra::Point3<f64>)> = project
        .world_points
        .iter()
        .enumerate()
        .filter_map(|(i, wp)| wp.effective_point().map(|p| (i, p)))
        .collect();
    let mut pairs = Vec::new();
    for i in 0..locked.len() {
        for j in (i + 1)..locked.len() {
            if (locked[i].1 - locked[j].1).norm() < DUPLICATE_ANCHOR_EPSILON {
                pairs.push((locked[i].0, locked[j].0));
            }
        }
    }
    pairs
}

/// Runs the readiness analysis. Does not mutate `project`.
pub fn analyze(project: &Project) -> Readiness {
    let mut issues = Vec::new();

    let has_free_entity = project.world_points.iter().any(|wp| !wp.is_locked())
        || project.viewpoints.iter().any(|vp| !vp.is_pose_locked);
    if !has_free_entity {
        issues.push(Issue::new(IssueSeverity::Error, "NO_FREE_ENTITY", "every world point and camera pose is locked; nothing to solve for", Vec::new()));
    }

    let has_anything_to_fit = !project.lines.is_empty() || !project.constraints.is_empty() || !project.image_points.is_empty();
    if !has_anything_to_fit {
        issues.push(Issue::new(IssueSeverity::Error, "NO_CONSTRAINTS", "no lines, constraints or observations in the project", Vec::new()));
    }

    let pnp = has_pnp_camera(project);
    let vp = has_vp_camera(project);
    let em = has_em_pair(project);
    let has_init_path = pnp || vp || em;
    if !has_init_path {
        let entity_ids = project.enabled_viewpoint_ids().into_iter().map(EntityRef::Viewpoint).collect();
        issues.push(Issue::new(
            IssueSeverity::Warning,
            "NO_INITIALIZATION_PATH",
            "no camera qualifies for PnP or VP initialization, and no camera pair shares enough correspondences for an essential matrix",
            entity_ids,
        ));
    }

    if !has_scale_reference(project) {
        issues.push(Issue::new(IssueSeverity::Warning, "NO_SCALE_REFERENCE", "no fixed-length line or pair of locked points to fix the reconstruction's scale", Vec::new()));
    }
    if !has_axis_reference(project) {
        issues.push(Issue::new(IssueSeverity::Warning, "NO_AXIS_REFERENCE", "no axis-aligned line or vanishing line to fix the reconstruction's orientation", Vec::new()));
    }

    for idx in ambiguous_depth_points(project) {
        issues.push(Issue::new(
            IssueSeverity::Warning,
            "AMBIGUOUS_DEPTH",
            format!("world point {idx} ('{}') has no path to a multi-camera-visible anchor", project.world_points[idx].name),
            vec![EntityRef::WorldPoint(WorldPointId(idx))],
        ));
    }

    for (i, j) in duplicate_anchor_pairs(project) {
        issues.push(Issue::new(
            IssueSeverity::Warning,
            "DUPLICATE_ANCHOR",
            format!("world points {i} and {j} are locked to the same position"),
            vec![EntityRef::WorldPoint(WorldPointId(i)), EntityRef::WorldPoint(WorldPointId(j))],
        ));
    }

    for c in &project.constraints {
        match c {
            Constraint::CoplanarPoints { points, .. } if points.len() < 4 => {
                let entity_ids = points.iter().map(|&id| EntityRef::WorldPoint(id)).collect();
                issues.push(Issue::new(IssueSeverity::Info, "TRIVIAL_COPLANARITY", "a coplanarity constraint on fewer than 4 points contributes no residuals", entity_ids));
            }
            _ => {}
        }
    }

    let layout = Layout::build(project);
    let total_dof = layout.num_variables;
    let constraint_dof = layout.num_residuals;
    let net_dof = total_dof as i64 - constraint_dof as i64;

    let can_optimize = !issues.iter().any(|i| i.severity == IssueSeverity::Error);
    let can_initialize = can_optimize && has_init_path;

    Readiness {
        can_optimize,
        can_initialize,
        total_dof,
        constraint_dof,
        net_dof,
        issues,
    }
}

/// Present so callers can key issues by viewpoint without re-deriving pair
/// indices; not otherwise used internally.
pub fn viewpoint_pairs(project: &Project) -> Vec<(ViewpointId, ViewpointId)> {
    let ids = project.enabled_viewpoint_ids();
    let mut pairs = Vec::new();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            pairs.push((ids[i], ids[j]));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorldPoint;

    #[test]
    fn empty_project_reports_both_blocking_errors() {
        let project = Project::new();
        let readiness = analyze(&project);
        assert!(!readiness.can_optimize);
        assert!(readiness.issues.iter().any(|i| i.code == "NO_FREE_ENTITY"));
        assert!(readiness.issues.iter().any(|i| i.code == "NO_CONSTRAINTS"));
    }

    #[test]
    fn isolated_single_camera_point_is_flagged_ambiguous_depth() {
        let mut project = Project::new();
        project.add_world_point(WorldPoint::new("lonely"));
        let readiness = analyze(&project);
        assert!(readiness.issues.iter().any(|i| i.code == "AMBIGUOUS_DEPTH"));
    }

    #[test]
    fn duplicate_locked_positions_are_flagged() {
        let mut project = Project::new();
        project.add_world_point({
            let mut p = WorldPoint::new("a");
            p.locked_xyz = [Some(1.0), Some(2.0), Some(3.0)];
            p
        });
        project.add_world_point({
            let mut p = WorldPoint::new("b");
            p.locked_xyz = [Some(1.0), Some(2.0), Some(3.0)];
            p
        });
        let readiness = analyze(&project);
        assert!(readiness.issues.iter().any(|i| i.code == "DUPLICATE_ANCHOR"));
    }
}
