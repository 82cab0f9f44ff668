//! Scenario 4: sign-enumeration branching over axis-aligned lines.

use rotera_core::init::branching::enumerate_branches;
use rotera_core::model::{LineDirection, Project, WorldPoint};

/// Three axis-aligned lines hanging off a single locked origin, each free
/// to fork positive or negative along its axis: up to 2^3 = 8 branches,
/// pruned only by contradictions (there are none here, so all 8 survive),
/// and any two survivors differ solely in which sign they picked per axis.
#[test]
fn three_independent_axis_lines_enumerate_eight_branches() {
    let mut project = Project::new();
    let origin = project.add_world_point({
        let mut p = WorldPoint::new("origin");
        p.locked_xyz = [Some(0.0), Some(0.0), Some(0.0)];
        p
    });
    let x_end = project.add_world_point(WorldPoint::new("x_end"));
    let y_end = project.add_world_point(WorldPoint::new("y_end"));
    let z_end = project.add_world_point(WorldPoint::new("z_end"));

    for (endpoint, direction) in [(x_end, LineDirection::X), (y_end, LineDirection::Y), (z_end, LineDirection::Z)] {
        let mut line = rotera_core::model::Line::new(origin, endpoint, direction);
        line.target_length = Some(5.0);
        project.add_line(line);
    }

    let branches = enumerate_branches(&project);
    assert!(!branches.is_empty());
    assert!(branches.len() <= 8, "expected at most 8 branches, got {}", branches.len());
    assert_eq!(branches.len(), 8, "three independent forks with no contradictions should all survive");

    for branch in &branches {
        assert_eq!(branch.choices.len(), 3);
    }

    let mut signatures: Vec<Vec<bool>> = branches
        .iter()
        .map(|b| {
            let mut choices = b.choices.clone();
            choices.sort_by_key(|c| c.line_index);
            choices.iter().map(|c| c.positive).collect()
        })
        .collect();
    signatures.sort();
    signatures.dedup();
    assert_eq!(signatures.len(), 8, "every sign combination should be distinct");
}
