//! Scenario 3: coordinate-sign invariance.
//!
//! The same calibration scene as the vanishing-point scenario, mirrored
//! across the XZ plane (every Y coordinate negated), should converge to an
//! equally good solution with the camera's Y position flipped to match.

mod common;

use nalgebra::Point3;
use rotera_core::model::{Axis, LineDirection};
use rotera_core::{optimize_project, SolverOptions};

fn build_scene(y_sign: f64) -> (rotera_core::model::Project, Point3<f64>) {
    let mut project = rotera_core::model::Project::new();
    let truth_position = Point3::new(-30.0, y_sign * 20.0, -40.0);
    let vp = common::camera_at("cam", truth_position, Point3::origin(), 1000.0, 1000.0, 800.0);
    let vp_id = project.add_viewpoint(vp);

    let o = common::add_observed_point(&mut project, "O", Point3::new(0.0, 0.0, 0.0), vp_id);
    let x = common::add_observed_point(&mut project, "X", Point3::new(10.0, 0.0, 0.0), vp_id);
    let y = common::add_observed_point(&mut project, "Y", Point3::new(0.0, y_sign * 10.0, 0.0), vp_id);
    let z = common::add_observed_point(&mut project, "Z", Point3::new(0.0, 0.0, 10.0), vp_id);

    common::axis_line(&mut project, o, x, LineDirection::X, 10.0);
    common::axis_line(&mut project, o, y, LineDirection::Y, 10.0);
    common::axis_line(&mut project, o, z, LineDirection::Z, 10.0);

    common::vanishing_line(&mut project, vp_id, Axis::X, Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0));
    common::vanishing_line(&mut project, vp_id, Axis::X, Point3::new(0.0, y_sign * 10.0, 0.0), Point3::new(10.0, y_sign * 10.0, 0.0));
    common::vanishing_line(&mut project, vp_id, Axis::Z, Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 10.0));
    common::vanishing_line(&mut project, vp_id, Axis::Z, Point3::new(10.0, 0.0, 0.0), Point3::new(10.0, 0.0, 10.0));

    (project, truth_position)
}

#[test]
fn mirrored_scene_converges_with_opposite_camera_y_sign() {
    common::init_tracing();

    let (mut positive, truth_positive) = build_scene(1.0);
    let (mut negative, truth_negative) = build_scene(-1.0);

    let options = SolverOptions { max_attempts: 5, ..Default::default() };
    let result_positive = optimize_project(&mut positive, &options);
    let result_negative = optimize_project(&mut negative, &options);

    assert!(result_positive.converged, "positive log:\n{}", result_positive.log.join("\n"));
    assert!(result_negative.converged, "negative log:\n{}", result_negative.log.join("\n"));

    let ratio = result_negative.residual.max(1e-12) / result_positive.residual.max(1e-12);
    assert!(ratio < 10.0 && ratio > 0.1, "residual ratio too large: {ratio}");

    let pos_y = result_positive.cameras[0].position.y;
    let neg_y = result_negative.cameras[0].position.y;
    assert!(pos_y.signum() != neg_y.signum(), "expected opposite signs, got {pos_y} and {neg_y}");
    assert!((truth_positive.y - pos_y).abs() < 1.0 || (truth_positive.y + pos_y).abs() < 1.0);
    assert!((truth_negative.y - neg_y).abs() < 1.0 || (truth_negative.y + neg_y).abs() < 1.0);
}
