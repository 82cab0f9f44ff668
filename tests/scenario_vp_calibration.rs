//! Scenario 1: single-camera vanishing-point calibration.

mod common;

use nalgebra::Point3;
use rotera_core::model::{Axis, LineDirection};
use rotera_core::{optimize_project, Quality, SolverOptions};

#[test]
fn single_camera_vp_calibration_recovers_pose_and_converges() {
    common::init_tracing();

    let mut project = rotera_core::model::Project::new();
    let truth_position = Point3::new(-30.0, 20.0, -40.0);
    let vp = common::camera_at("cam", truth_position, Point3::origin(), 1000.0, 1000.0, 800.0);
    let vp_id = project.add_viewpoint(vp);

    let o = common::add_observed_point(&mut project, "O", Point3::new(0.0, 0.0, 0.0), vp_id);
    let x = common::add_observed_point(&mut project, "X", Point3::new(10.0, 0.0, 0.0), vp_id);
    let y = common::add_observed_point(&mut project, "Y", Point3::new(0.0, 10.0, 0.0), vp_id);
    let z = common::add_observed_point(&mut project, "Z", Point3::new(0.0, 0.0, 10.0), vp_id);

    common::axis_line(&mut project, o, x, LineDirection::X, 10.0);
    common::axis_line(&mut project, o, y, LineDirection::Y, 10.0);
    common::axis_line(&mut project, o, z, LineDirection::Z, 10.0);

    common::vanishing_line(&mut project, vp_id, Axis::X, Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0));
    common::vanishing_line(&mut project, vp_id, Axis::X, Point3::new(0.0, 10.0, 0.0), Point3::new(10.0, 10.0, 0.0));
    common::vanishing_line(&mut project, vp_id, Axis::Z, Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 10.0));
    common::vanishing_line(&mut project, vp_id, Axis::Z, Point3::new(10.0, 0.0, 0.0), Point3::new(10.0, 0.0, 10.0));

    let options = SolverOptions {
        max_attempts: 5,
        ..Default::default()
    };
    let result = optimize_project(&mut project, &options);

    assert!(result.readiness.can_optimize, "{:?}", result.readiness.issues);
    assert!(result.converged, "log:\n{}", result.log.join("\n"));
    assert!(result.median_reprojection_error.unwrap() < 1.0, "median error too large: {:?}", result.median_reprojection_error);
    assert!(matches!(result.quality, Quality::Excellent | Quality::SurveyGrade));

    let recovered = result.cameras[0].position;
    let error = (recovered - truth_position).norm();
    assert!(
        error < 0.05 * truth_position.coords.norm(),
        "recovered position {recovered:?} too far from truth {truth_position:?}"
    );
}
