//! Sign-enumeration branching inference over axis-aligned, fixed-length
//! lines.
//!
//! Each branch carries a full copy of every world point's inferred axis
//! coordinates plus the list of fork choices that produced it, so the
//! caller ([`crate::model::Project::propagate_inferences`]) can keep the
//! first surviving branch without re-deriving anything.

use std::collections::HashMap;

use crate::model::{Line, LineDirection, Project, WorldPointId};

/// One fork decision: the line that was ambiguous, which endpoint got the
/// `+L` branch, and which axis.
#[derive(Debug, Clone, Copy)]
pub struct Choice {
    pub line_index: usize,
    pub positive: bool,
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub coords: Vec<(WorldPointId, [Option<f64>; 3])>,
    pub choices: Vec<Choice>,
}

const EPSILON: f64 = 0.001;

fn axis_index(direction: LineDirection) -> Option<usize> {
    match direction {
        LineDirection::X => Some(0),
        LineDirection::Y => Some(1),
        LineDirection::Z => Some(2),
        _ => None,
    }
}

/// Shared-axis coordinates between a line's endpoints for non-axis-aligned
/// but still direction-constrained lines (`xy`, `xz`, `yz`) have no single
/// shared scalar axis, so only pure axis lines participate in propagation
/// and forking.
fn propagate_to_fixpoint(
    lines: &[Line],
    coords: &mut HashMap<WorldPointId, [Option<f64>; 3]>,
) -> bool {
    let mut changed = true;
    while changed {
        changed = false;
        for line in lines {
            let Some(axis) = axis_index(line.direction) else { continue };
            let [a, b] = line.endpoints;
            let a_val = coords.get(&a).and_then(|c| c[axis]);
            let b_val = coords.get(&b).and_then(|c| c[axis]);
            match (a_val, b_val) {
                (Some(av), Some(bv)) => {
                    if (av - bv).abs() > EPSILON {
                        return false;
                    }
                }
                (Some(av), None) => {
                    coords.entry(b).or_insert([None; 3])[axis] = Some(av);
                    changed = true;
                }
                (None, Some(bv)) => {
                    coords.entry(a).or_insert([None; 3])[axis] = Some(bv);
                    changed = true;
                }
                (None, None) => {}
            }
        }
    }
    true
}

/// Finds the next axis-aligned, fixed-length line with exactly one endpoint
/// coordinate known on its axis.
fn next_ambiguity(
    lines: &[Line],
    coords: &HashMap<WorldPointId, [Option<f64>; 3]>,
) -> Option<(usize, usize, WorldPointId, WorldPointId, f64)> {
    for (idx, line) in lines.iter().enumerate() {
        let Some(axis) = axis_index(line.direction) else { continue };
        let Some(length) = line.target_length else { continue };
        let [a, b] = line.endpoints;
        let a_val = coords.get(&a).and_then(|c| c[axis]);
        let b_val = coords.get(&b).and_then(|c| c[axis]);
        match (a_val, b_val) {
            (Some(src), None) => return Some((idx, axis, a, b, src)),
            (None, Some(src)) => return Some((idx, axis, b, a, src)),
            _ => {}
        }
    }
    None
}

fn recurse(
    lines: &[Line],
    mut coords: HashMap<WorldPointId, [Option<f64>; 3]>,
    mut choices: Vec<Choice>,
    out: &mut Vec<Branch>,
) {
    if !propagate_to_fixpoint(lines, &mut coords) {
        return; // contradiction: branch pruned.
    }
    match next_ambiguity(lines, &coords) {
        None => {
            let mut sorted: Vec<_> = coords.into_iter().collect();
            sorted.sort_by_key(|(id, _)| id.index());
            out.push(Branch {
                coords: sorted,
                choices,
            });
        }
        Some((line_index, axis, _src_point, dst_point, src_value)) => {
            let length = line_length(lines, line_index);
            for positive in [true, false] {
                let mut next_coords = coords.clone();
                let mut next_choices = choices.clone();
                let offset = if positive { length } else { -length };
                next_coords.entry(dst_point).or_insert([None; 3])[axis] = Some(src_value + offset);
                next_choices.push(Choice { line_index, positive });
                recurse(lines, next_coords, next_choices, out);
            }
        }
    }
}

fn line_length(lines: &[Line], index: usize) -> f64 {
    lines[index].target_length.unwrap_or(0.0)
}

/// Enumerates every surviving branch: at most `2^n` for `n`
/// axis-aligned fixed-length lines, at least 1 when the seed constraints are
/// already consistent.
pub fn enumerate_branches(project: &Project) -> Vec<Branch> {
    let mut seed = HashMap::new();
    for (idx, wp) in project.world_points.iter().enumerate() {
        seed.insert(WorldPointId(idx), wp.locked_xyz);
    }
    let mut out = Vec::new();
    recurse(&project.lines, seed, Vec::new(), &mut out);
    out
}
