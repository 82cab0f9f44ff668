//! Scenario 2: two-view essential-matrix bootstrap.

mod common;

use nalgebra::{Point3, Vector3};
use rotera_core::{optimize_project, SolverOptions};

/// Eight coplanar-but-not-collinear points, observed from two cameras
/// separated by a baseline along a non-axis direction, with neither camera
/// given any locked anchor or vanishing line: the only initialization path
/// is the essential matrix.
#[test]
fn two_uninitialized_cameras_bootstrap_from_shared_correspondences() {
    common::init_tracing();

    let mut project = rotera_core::model::Project::new();

    let cam1_pos = Point3::new(0.0, 0.0, -60.0);
    let cam2_pos = cam1_pos + Vector3::new(10.0, 4.0, 2.0).normalize() * 10.0;
    let vp1 = common::camera_at("cam1", cam1_pos, Point3::origin(), 1000.0, 1000.0, 800.0);
    let vp2 = common::camera_at("cam2", cam2_pos, Point3::origin(), 1000.0, 1000.0, 800.0);
    let vp1_id = project.add_viewpoint(vp1);
    let vp2_id = project.add_viewpoint(vp2);

    let grid = [
        (-6.0, -6.0, 0.0),
        (-2.0, -6.0, 0.0),
        (2.0, -6.0, 0.0),
        (6.0, -6.0, 0.0),
        (-6.0, 6.0, 0.0),
        (-2.0, 6.0, 0.0),
        (2.0, 6.0, 0.0),
        (6.0, 6.0, 0.0),
    ];

    for (i, &(x, y, z)) in grid.iter().enumerate() {
        let mut wp = rotera_core::model::WorldPoint::new(&format!("p{i}"));
        wp.locked_xyz = [None, None, None];
        let wp_id = project.add_world_point(wp);
        common::add_unlocked_observation(&mut project, wp_id, Point3::new(x, y, z), vp1_id);
        common::add_unlocked_observation(&mut project, wp_id, Point3::new(x, y, z), vp2_id);
    }

    let options = SolverOptions {
        max_attempts: 5,
        ..Default::default()
    };
    let result = optimize_project(&mut project, &options);

    assert!(result.readiness.can_initialize, "{:?}", result.readiness.issues);
    assert!(result.converged, "log:\n{}", result.log.join("\n"));
    assert!(result.median_reprojection_error.unwrap() < 1.0);

    let recovered_baseline = (result.cameras[1].position - result.cameras[0].position).normalize();
    let true_baseline = (cam2_pos - cam1_pos).normalize();
    let alignment = recovered_baseline.dot(&true_baseline).abs();
    assert!(alignment > 0.95, "baseline direction mismatch: {alignment}");
}
