//! Coordinate alignment: two complementary similarity-transform
//! procedures that pull a reconstruction (whose scale, rotation and global
//! sign are otherwise arbitrary) onto the user's locked coordinates and
//! declared line directions.

use nalgebra::{Point3, Vector3};

use crate::error::Result;
use crate::linalg::quaternion::{self, Quat};
use crate::log_info;
use crate::logging::{LogTag, Logger};
use crate::model::{LineDirection, Project};
use crate::solver::{self, LmOptions};
use crate::valuemap::Layout;

/// Applies a similarity transform (rotate, then scale, then translate) to
/// every unlocked world point and every pose-unlocked camera.
fn apply_similarity(project: &mut Project, src_centroid: Point3<f64>, dst_centroid: Point3<f64>, rotation: Quat, scale: f64) {
    for wp in &mut project.world_points {
        if wp.is_locked() {
            continue;
        }
        if let Some(p) = wp.optimized_xyz {
            let rotated = quaternion::rotate_vector(rotation, p - src_centroid);
            wp.optimized_xyz = Some(dst_centroid + rotated * scale);
        }
    }
    for vp in &mut project.viewpoints {
        if vp.is_pose_locked {
            continue;
        }
        let rotated = quaternion::rotate_vector(rotation, vp.position - src_centroid);
        vp.position = dst_centroid + rotated * scale;
        vp.rotation = quaternion::normalize(quaternion::multiply(rotation, vp.rotation));
    }
}

/// Snaps every fully-locked world point to its exact target, undoing any
/// drift the similarity transform introduced through floating-point error.
fn snap_locked_points(project: &mut Project) {
    for wp in &mut project.world_points {
        if let Some(target) = wp.effective_point() {
            if wp.is_locked() {
                wp.optimized_xyz = Some(target);
            }
        }
    }
}

/// Aligns the current reconstruction to locked anchor points via Procrustes
/// similarity: translate, uniformly scale, and rotate so the current
/// estimate's anchor centroid/spread matches the locked targets'. Requires
/// at least 2 anchors (points that are fully locked and already have a
/// current estimate); does nothing and returns `false` otherwise.
pub fn align_to_locked_points(project: &mut Project, logger: &Logger) -> bool {
    let anchors: Vec<(Point3<f64>, Point3<f64>)> = project
        .world_points
        .iter()
        .filter(|wp| wp.is_locked())
        .filter_map(|wp| wp.optimized_xyz.map(|cur| (cur, wp.effective_point().unwrap())))
        .collect();
    if anchors.len() < 2 {
        return false;
    }

    let n = anchors.len() as f64;
    let src_centroid = anchors.iter().fold(Point3::origin(), |acc, (s, _)| acc + s.coords) / n;
    let dst_centroid = anchors.iter().fold(Point3::origin(), |acc, (_, d)| acc + d.coords) / n;

    let mut best_pair = (0, 1);
    let mut best_len = 0.0;
    for i in 0..anchors.len() {
        for j in (i + 1)..anchors.len() {
            let len = (anchors[j].1 - anchors[i].1).norm();
            if len > best_len {
                best_len = len;
                best_pair = (i, j);
            }
        }
    }
    if best_len < 1e-9 {
        return false;
    }

    let (i, j) = best_pair;
    let src_dir = anchors[j].0 - anchors[i].0;
    let dst_dir = anchors[j].1 - anchors[i].1;
    let src_len = src_dir.norm();
    if src_len < 1e-9 {
        return false;
    }
    let scale = dst_dir.norm() / src_len;
    let rotation = quaternion::rotation_between_vectors(src_dir, dst_dir);

    apply_similarity(project, src_centroid, dst_centroid, rotation, scale);
    snap_locked_points(project);
    log_info!(logger, LogTag::Align, "aligned to {} locked anchors, scale={scale:.4}", anchors.len());
    true
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentOutcome {
    pub ambiguous: bool,
    pub chose_positive: bool,
}

fn axis_unit(direction: LineDirection) -> Option<Vector3<f64>> {
    match direction {
        LineDirection::X => Some(Vector3::x()),
        LineDirection::Y => Some(Vector3::y()),
        LineDirection::Z => Some(Vector3::z()),
        _ => None,
    }
}

/// Builds the two candidate projects produced by rotating the whole scene
/// (about the reference line's midpoint) so the line's current direction
/// aligns with `+axis` or `-axis` respectively.
fn candidate_projects(project: &Project, a: Point3<f64>, b: Point3<f64>, axis: Vector3<f64>) -> Option<(Project, Project)> {
    let actual = b - a;
    if actual.norm() < 1e-9 {
        return None;
    }
    let midpoint = Point3::from((a.coords + b.coords) / 2.0);

    let rot_plus = quaternion::rotation_between_vectors(actual, axis);
    let rot_minus = quaternion::rotation_between_vectors(actual, -axis);

    let mut plus = project.clone();
    apply_similarity(&mut plus, midpoint, midpoint, rot_plus, 1.0);
    let mut minus = project.clone();
    apply_similarity(&mut minus, midpoint, midpoint, rot_minus, 1.0);
    Some((plus, minus))
}

/// Finds a second axis-aligned line (different axis than `exclude_direction`)
/// with both endpoints placed, for the dot-product heuristic.
fn second_axis_line(project: &Project, exclude_direction: LineDirection) -> Option<(Point3<f64>, Point3<f64>, Vector3<f64>)> {
    project.lines.iter().find_map(|line| {
        if line.direction == exclude_direction {
            return None;
        }
        let axis = axis_unit(line.direction)?;
        let [ea, eb] = line.endpoints;
        let a = project.world_points[ea.index()].optimized_xyz?;
        let b = project.world_points[eb.index()].optimized_xyz?;
        Some((a, b, axis))
    })
}

fn probe_cost(project: &Project, layout: &Layout, iterations: usize) -> f64 {
    let mut probe = project.clone();
    let logger = Logger::new();
    let options = LmOptions {
        max_iterations: iterations,
        ..LmOptions::default()
    };
    match solver::run(&mut probe, layout, &logger, &options) {
        Ok(outcome) => outcome.final_cost,
        Err(_) => f64::INFINITY,
    }
}

/// Resolves the global sign ambiguity left by the reconstruction: tries both
/// `+axis`/`-axis` alignments of the first direction-constrained line, and
/// picks one either by a second axis-aligned line's dot product (the common
/// case) or, when no usable second line exists, by a short escalating LM
/// probe that compares residual cost between the two candidates.
pub fn align_to_line_directions(project: &mut Project, logger: &Logger, forced_sign: Option<bool>) -> Result<AlignmentOutcome> {
    let reference = project
        .lines
        .iter()
        .find_map(|line| axis_unit(line.direction).map(|axis| (line.endpoints, axis, line.direction)));

    let Some(([ea, eb], axis, direction)) = reference else {
        return Ok(AlignmentOutcome { ambiguous: true, chose_positive: true });
    };
    let (Some(a), Some(b)) = (
        project.world_points[ea.index()].optimized_xyz,
        project.world_points[eb.index()].optimized_xyz,
    ) else {
        return Ok(AlignmentOutcome { ambiguous: true, chose_positive: true });
    };

    let Some((plus, minus)) = candidate_projects(project, a, b, axis) else {
        return Ok(AlignmentOutcome { ambiguous: true, chose_positive: true });
    };

    if let Some(forced) = forced_sign {
        let outcome = AlignmentOutcome { ambiguous: false, chose_positive: forced };
        *project = if forced { plus } else { minus };
        log_info!(logger, LogTag::Align, "line-direction alignment forced to {}", if forced { "+" } else { "-" });
        return Ok(outcome);
    }

    let second = second_axis_line(project, direction);
    const DOT_EPSILON: f64 = 1e-3;

    let outcome = if let Some((sa, sb, second_axis)) = second {
        // Re-derive the second line's endpoints by index, not by value,
        // since apply_similarity already moved the points in each candidate.
        let idx_a = project.world_points.iter().position(|wp| wp.optimized_xyz == Some(sa));
        let idx_b = project.world_points.iter().position(|wp| wp.optimized_xyz == Some(sb));
        if let (Some(ia), Some(ib)) = (idx_a, idx_b) {
            let plus_dir_vec = plus.world_points[ib].optimized_xyz.unwrap() - plus.world_points[ia].optimized_xyz.unwrap();
            let minus_dir_vec = minus.world_points[ib].optimized_xyz.unwrap() - minus.world_points[ia].optimized_xyz.unwrap();
            let plus_dot = plus_dir_vec.dot(&second_axis);
            let minus_dot = minus_dir_vec.dot(&second_axis);
            if (plus_dot - minus_dot).abs() > DOT_EPSILON {
                Some(plus_dot > minus_dot)
            } else {
                None
            }
        } else {
            None
        }
    } else {
        None
    };

    let outcome = match outcome {
        Some(choice) => AlignmentOutcome { ambiguous: false, chose_positive: choice },
        None => {
            let layout = Layout::build(project);
            let mut decided = None;
            for iterations in [30, 300, 500] {
                let plus_cost = probe_cost(&plus, &layout, iterations);
                let minus_cost = probe_cost(&minus, &layout, iterations);
                let denom = plus_cost.max(minus_cost).max(1e-12);
                if (plus_cost - minus_cost).abs() / denom > 0.01 {
                    decided = Some(plus_cost < minus_cost);
                    break;
                }
            }
            match decided {
                Some(choice) => AlignmentOutcome { ambiguous: false, chose_positive: choice },
                None => AlignmentOutcome { ambiguous: true, chose_positive: true },
            }
        }
    };

    *project = if outcome.chose_positive { plus } else { minus };
    log_info!(
        logger,
        LogTag::Align,
        "line-direction alignment chose {} (ambiguous={})",
        if outcome.chose_positive { "+" } else { "-" },
        outcome.ambiguous
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Line, WorldPoint};

    #[test]
    fn procrustes_rescales_and_rotates_unlocked_points() {
        let mut project = Project::new();
        let a = project.add_world_point({
            let mut p = WorldPoint::new("a");
            p.locked_xyz = [Some(0.0), Some(0.0), Some(0.0)];
            p.optimized_xyz = Some(Point3::origin());
            p
        });
        let b = project.add_world_point({
            let mut p = WorldPoint::new("b");
            p.locked_xyz = [Some(20.0), Some(0.0), Some(0.0)];
            p.optimized_xyz = Some(Point3::new(10.0, 0.0, 0.0));
            p
        });
        let c = project.add_world_point({
            let mut p = WorldPoint::new("c");
            p.optimized_xyz = Some(Point3::new(5.0, 5.0, 0.0));
            p
        });
        let _ = (a, b);

        let ran = align_to_locked_points(&mut project, &Logger::new());
        assert!(ran);
        let moved = project.world_points[c.index()].optimized_xyz.unwrap();
        assert!((moved.x - 10.0).abs() < 1e-6);
        assert!((moved.y - 10.0).abs() < 1e-6);
    }

    #[test]
    fn too_few_anchors_is_a_no_op() {
        let mut project = Project::new();
        project.add_world_point({
            let mut p = WorldPoint::new("a");
            p.locked_xyz = [Some(0.0), Some(0.0), Some(0.0)];
            p.optimized_xyz = Some(Point3::origin());
            p
        });
        assert!(!align_to_locked_points(&mut project, &Logger::new()));
    }

    #[test]
    fn dot_product_heuristic_picks_a_consistent_sign() {
        let mut project = Project::new();
        let origin = project.add_world_point({
            let mut p = WorldPoint::new("origin");
            p.optimized_xyz = Some(Point3::origin());
            p
        });
        let x_end = project.add_world_point({
            let mut p = WorldPoint::new("x");
            p.optimized_xyz = Some(Point3::new(0.0, -5.0, 0.0));
            p
        });
        let y_end = project.add_world_point({
            let mut p = WorldPoint::new("y");
            p.optimized_xyz = Some(Point3::new(0.0, 0.0, 3.0));
            p
        });
        project.add_line(Line::new(origin, x_end, LineDirection::X));
        project.add_line(Line::new(origin, y_end, LineDirection::Y));

        let outcome = align_to_line_directions(&mut project, &Logger::new(), None).unwrap();
        assert!(!outcome.ambiguous);
    }
}
