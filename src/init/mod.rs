//! Unified initialization: camera pose recovery followed by six phases that
//! turn a cold project's world points from "unset" into a usable first
//! guess.

pub mod branching;
pub mod camera_pose;

use std::collections::{HashSet, VecDeque};

use nalgebra::{Point3, Vector3};
use rand::Rng;

use crate::logging::{LogTag, Logger};
use crate::log_info;
use crate::model::{InitStatus, LineDirection, Project, ViewpointId, WorldPointId};

use crate::geometry::triangulation::triangulate_dlt;

fn axis_unit(direction: LineDirection) -> Option<Vector3<f64>> {
    match direction {
        LineDirection::X => Some(Vector3::x()),
        LineDirection::Y => Some(Vector3::y()),
        LineDirection::Z => Some(Vector3::z()),
        _ => None,
    }
}

/// A reasonable default propagation direction for a plane-constrained line
/// when no other information pins it down further.
fn plane_default_direction(direction: LineDirection) -> Option<Vector3<f64>> {
    match direction {
        LineDirection::Xy => Some(Vector3::new(1.0, 1.0, 0.0).normalize()),
        LineDirection::Xz => Some(Vector3::new(1.0, 0.0, 1.0).normalize()),
        LineDirection::Yz => Some(Vector3::new(0.0, 1.0, 1.0).normalize()),
        _ => None,
    }
}

/// Phase 1: seed fully-constrained points from `effective_xyz`, preserving
/// any point that already carries `optimized_xyz` from a prior attempt.
pub fn seed_fully_constrained(project: &mut Project) {
    for wp in &mut project.world_points {
        if wp.optimized_xyz.is_some() {
            continue;
        }
        if let Some(p) = wp.effective_point() {
            wp.optimized_xyz = Some(p);
        }
    }
}

/// Phase 2: propagate through axis/plane lines with `target_length`, up to
/// 10 sweeps of "one endpoint known, the other unknown" fixpoint iteration.
pub fn propagate_through_lines(project: &mut Project) {
    for _ in 0..10 {
        let mut changed = false;
        for idx in 0..project.lines.len() {
            let line = project.lines[idx].clone();
            let Some(length) = line.target_length else { continue };
            if line.direction == LineDirection::Free {
                continue;
            }
            let [a, b] = line.endpoints;
            let a_pos = project.world_points[a.index()].optimized_xyz;
            let b_pos = project.world_points[b.index()].optimized_xyz;
            let direction = axis_unit(line.direction).or_else(|| plane_default_direction(line.direction));
            let Some(direction) = direction else { continue };
            match (a_pos, b_pos) {
                (Some(known), None) => {
                    project.world_points[b.index()].optimized_xyz = Some(known + direction * length);
                    changed = true;
                }
                (None, Some(known)) => {
                    project.world_points[a.index()].optimized_xyz = Some(known - direction * length);
                    changed = true;
                }
                _ => {}
            }
        }
        if !changed {
            break;
        }
    }
}

/// Phase 3: triangulate points visible in 2+ initialized cameras using the
/// DLT-based ray-ray triangulator; the first valid camera pair wins.
pub fn triangulate_multiview(project: &mut Project, logger: &Logger) {
    let initialized: Vec<ViewpointId> = project
        .enabled_viewpoint_ids()
        .into_iter()
        .filter(|&id| project.viewpoint(id).init_status != InitStatus::Uninitialized)
        .collect();

    for wp_idx in 0..project.world_points.len() {
        let wp_id = WorldPointId(wp_idx);
        if project.world_points[wp_idx].optimized_xyz.is_some() {
            continue;
        }
        let observers: Vec<(ViewpointId, (f64, f64))> = initialized
            .iter()
            .filter_map(|&vp_id| {
                project
                    .authoritative_image_point(vp_id, wp_id)
                    .map(|ip_id| (vp_id, (project.image_points[ip_id.index()].u, project.image_points[ip_id.index()].v)))
            })
            .collect();
        if observers.len() < 2 {
            continue;
        }
        let a = &observers[0];
        let b = &observers[1];
        let views = [
            (project.viewpoint(a.0), a.1 .0, a.1 .1),
            (project.viewpoint(b.0), b.1 .0, b.1 .1),
        ];
        if let Some(point) = triangulate_dlt(&views) {
            project.world_points[wp_idx].optimized_xyz = Some(point);
            log_info!(logger, LogTag::Tri, "triangulated world point {wp_idx} from {} views", observers.len());
        }
    }
}

/// Phase 4: BFS across the line graph from any initialized point.
/// Step distance is `target_length ?? 0.5·scene_scale`; the ± sign
/// along an axis-aligned line is resolved by reprojection error when exactly
/// one VP-initialized camera observes the new point, else defaults to `+`.
pub fn bfs_propagate(project: &mut Project, scene_scale: f64) {
    let mut known: HashSet<usize> = project
        .world_points
        .iter()
        .enumerate()
        .filter(|(_, wp)| wp.optimized_xyz.is_some())
        .map(|(i, _)| i)
        .collect();
    if known.is_empty() {
        return;
    }

    let mut queue: VecDeque<usize> = known.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        let current_pos = project.world_points[current].optimized_xyz.unwrap();
        for idx in 0..project.lines.len() {
            let line = project.lines[idx].clone();
            let [a, b] = line.endpoints;
            let (known_end, other) = if a.index() == current && !known.contains(&b.index()) {
                (a, b)
            } else if b.index() == current && !known.contains(&a.index()) {
                (b, a)
            } else {
                continue;
            };
            let _ = known_end;
            let step = line.target_length.unwrap_or(0.5 * scene_scale);
            let direction = axis_unit(line.direction).or_else(|| plane_default_direction(line.direction)).unwrap_or(Vector3::z());

            let plus = current_pos + direction * step;
            let minus = current_pos - direction * step;

            let vp_initialized_observers: Vec<ViewpointId> = project
                .enabled_viewpoint_ids()
                .into_iter()
                .filter(|&vp| {
                    project.viewpoint(vp).init_status == InitStatus::VpInitialized
                        && project.authoritative_image_point(vp, other).is_some()
                })
                .collect();

            let chosen = if vp_initialized_observers.len() == 1 {
                let vp_id = vp_initialized_observers[0];
                let ip_id = project.authoritative_image_point(vp_id, other).unwrap();
                let obs = (project.image_points[ip_id.index()].u, project.image_points[ip_id.index()].v);
                let vp = project.viewpoint(vp_id).clone();
                let err = |candidate: Point3<f64>| -> f64 {
                    match crate::projection::project_world_to_pixel(&vp, candidate) {
                        Some((u, v)) => ((u - obs.0).powi(2) + (v - obs.1).powi(2)).sqrt(),
                        None => f64::INFINITY,
                    }
                };
                if err(plus) <= err(minus) {
                    plus
                } else {
                    minus
                }
            } else {
                plus
            };

            project.world_points[other.index()].optimized_xyz = Some(chosen);
            known.insert(other.index());
            queue.push_back(other.index());
        }
    }
}

/// Phase 5: coplanar groups of 4+ points laid out in a square grid, groups
/// separated in z by `0.3·scene_scale`.
pub fn layout_coplanar_groups(project: &mut Project, scene_scale: f64) {
    let groups: Vec<Vec<WorldPointId>> = project
        .constraints
        .iter()
        .filter_map(|c| match c {
            crate::model::Constraint::CoplanarPoints { points, .. } if points.len() >= 4 => Some(points.clone()),
            _ => None,
        })
        .collect();

    for (group_index, points) in groups.iter().enumerate() {
        let unset: Vec<WorldPointId> = points
            .iter()
            .copied()
            .filter(|id| project.world_points[id.index()].optimized_xyz.is_none())
            .collect();
        if unset.is_empty() {
            continue;
        }
        let side = (unset.len() as f64).sqrt().ceil() as usize;
        let spacing = scene_scale / (side.max(1) as f64);
        let z = group_index as f64 * 0.3 * scene_scale;
        for (i, id) in unset.into_iter().enumerate() {
            let row = (i / side.max(1)) as f64;
            let col = (i % side.max(1)) as f64;
            project.world_points[id.index()].optimized_xyz =
                Some(Point3::new(col * spacing, row * spacing, z));
        }
    }
}

/// Phase 6: anything still unseeded is placed uniformly at random in a cube
/// of side `scene_scale` centered on the origin, using a seeded RNG.
pub fn random_fill<R: Rng>(project: &mut Project, scene_scale: f64, rng: &mut R) {
    let half = scene_scale / 2.0;
    for wp in &mut project.world_points {
        if wp.optimized_xyz.is_none() {
            let x = rng.gen_range(-half..=half);
            let y = rng.gen_range(-half..=half);
            let z = rng.gen_range(-half..=half);
            wp.optimized_xyz = Some(Point3::new(x, y, z));
        }
    }
}

/// Recovers camera poses (VP → PnP → EM), then runs all six world-point
/// initialization phases in order.
pub fn run_unified_initialization<R: Rng>(project: &mut Project, scene_scale: f64, rng: &mut R, logger: &Logger) {
    camera_pose::initialize_camera_poses(project, rng, logger);
    seed_fully_constrained(project);
    propagate_through_lines(project);
    triangulate_multiview(project, logger);
    bfs_propagate(project, scene_scale);
    layout_coplanar_groups(project, scene_scale);
    random_fill(project, scene_scale, rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorldPoint;

    #[test]
    fn phase1_seeds_fully_constrained_points_only() {
        let mut project = Project::new();
        let locked = project.add_world_point({
            let mut p = WorldPoint::new("locked");
            p.locked_xyz = [Some(1.0), Some(2.0), Some(3.0)];
            p
        });
        project.add_world_point(WorldPoint::new("free"));
        seed_fully_constrained(&mut project);
        assert_eq!(project.world_points[locked.index()].optimized_xyz, Some(Point3::new(1.0, 2.0, 3.0)));
        assert!(project.world_points[1].optimized_xyz.is_none());
    }

    #[test]
    fn phase2_propagates_along_an_axis_line() {
        let mut project = Project::new();
        let a = project.add_world_point({
            let mut p = WorldPoint::new("a");
            p.locked_xyz = [Some(0.0), Some(0.0), Some(0.0)];
            p
        });
        let b = project.add_world_point(WorldPoint::new("b"));
        let mut line = crate::model::Line::new(a, b, LineDirection::X);
        line.target_length = Some(5.0);
        project.add_line(line);

        seed_fully_constrained(&mut project);
        propagate_through_lines(&mut project);
        let pos = project.world_points[b.index()].optimized_xyz.unwrap();
        assert!((pos.x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn phase6_fills_remaining_points_within_the_scale_cube() {
        use rand::SeedableRng;
        let mut project = Project::new();
        project.add_world_point(WorldPoint::new("unseeded"));
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        random_fill(&mut project, 10.0, &mut rng);
        let pos = project.world_points[0].optimized_xyz.unwrap();
        assert!(pos.x.abs() <= 5.0 && pos.y.abs() <= 5.0 && pos.z.abs() <= 5.0);
    }
}
