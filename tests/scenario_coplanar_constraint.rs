//! Scenario: a coplanarity constraint resolves a depth ambiguity that a
//! single camera's reprojection residual alone cannot.

mod common;

use nalgebra::Point3;
use rotera_core::model::{Constraint, Project, WorldPoint};
use rotera_core::{optimize_project, SolverOptions};

#[test]
fn coplanar_constraint_pulls_a_perturbed_point_back_into_the_locked_plane() {
    common::init_tracing();

    let mut project = Project::new();
    let camera_position = Point3::new(0.0, 0.0, -50.0);
    let mut vp = common::camera_at("cam", camera_position, Point3::origin(), 1000.0, 1000.0, 800.0);
    vp.is_pose_locked = true;
    let vp_id = project.add_viewpoint(vp);

    // Three locked anchors pin the z=0 plane.
    let a0 = common::add_observed_point(&mut project, "a0", Point3::new(0.0, 0.0, 0.0), vp_id);
    let a1 = common::add_observed_point(&mut project, "a1", Point3::new(10.0, 0.0, 0.0), vp_id);
    let a2 = common::add_observed_point(&mut project, "a2", Point3::new(0.0, 10.0, 0.0), vp_id);

    // The fourth point's true position is (5, 5, 0), also in the plane. Its
    // image observation is computed from the true position, but its initial
    // guess is placed further out along the same camera ray at z = 2.5, so
    // the camera ray alone cannot distinguish the two: the reprojection
    // residual starts near zero and only the coplanarity constraint can pull
    // it back down to the plane.
    let true_point = Point3::new(5.0, 5.0, 0.0);
    let mut free = WorldPoint::new("free");
    let free_id = project.add_world_point(free.clone());
    let (u, v) = rotera_core::projection::project_world_to_pixel(&project.viewpoint(vp_id).clone(), true_point).unwrap();
    project.add_image_point(rotera_core::model::ImagePoint::new(u, v, free_id, vp_id));

    let ray_direction = true_point - camera_position;
    let perturbed = camera_position + ray_direction * 1.05;
    assert!(perturbed.z.abs() > 1.0, "perturbation should move the point off the z=0 plane");
    free = project.world_points[free_id.index()].clone();
    free.optimized_xyz = Some(perturbed);
    project.world_points[free_id.index()] = free;

    project.add_constraint(Constraint::coplanar_points(vec![a0, a1, a2, free_id]));

    let options = SolverOptions {
        max_attempts: 5,
        auto_initialize_world_points: false,
        ..Default::default()
    };
    let result = optimize_project(&mut project, &options);

    assert!(result.readiness.can_optimize, "{:?}", result.readiness.issues);
    assert!(result.converged, "log:\n{}", result.log.join("\n"));

    let solved = project.world_points[free_id.index()].optimized_xyz.unwrap();
    assert!(
        solved.z.abs() < 0.1,
        "coplanarity constraint failed to pull point back into the plane: final z = {}",
        solved.z
    );
    let lateral_error = ((solved.x - true_point.x).powi(2) + (solved.y - true_point.y).powi(2)).sqrt();
    assert!(lateral_error < 1.0, "point drifted too far laterally: {solved:?}");
}
