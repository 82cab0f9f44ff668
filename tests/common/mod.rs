//! Shared scaffolding for the scenario-level integration tests.

use nalgebra::{Point3, Vector3};
use rotera_core::linalg::quaternion::{self, Quat};
use rotera_core::model::{ImagePoint, Line, LineDirection, Project, VanishingLine, Viewpoint, WorldPoint};

/// Installs a `tracing_subscriber` when `Rotera_VERBOSE_TESTS=true`, so a
/// solve's log lines surface on stdout during `cargo test -- --nocapture`.
pub fn init_tracing() {
    if std::env::var_os("Rotera_VERBOSE_TESTS").map(|v| v == "true").unwrap_or(false) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

pub fn looking_at(position: Point3<f64>, target: Point3<f64>) -> Quat {
    let look_dir = (target - position).normalize();
    quaternion::rotation_between_vectors(Vector3::new(0.0, 0.0, 1.0), look_dir)
}

pub fn camera_at(name: &str, position: Point3<f64>, target: Point3<f64>, focal: f64, width: f64, height: f64) -> Viewpoint {
    let mut vp = Viewpoint::new(name, width, height);
    vp.position = position;
    vp.focal_length = focal;
    vp.cx = width / 2.0;
    vp.cy = height / 2.0;
    vp.rotation = looking_at(position, target);
    vp
}

/// Adds a fully-locked world point and an image observation for it in `vp`,
/// projected from `vp`'s current (ground-truth) pose. Returns the world
/// point id.
pub fn add_observed_point(
    project: &mut Project,
    name: &str,
    world: Point3<f64>,
    vp_id: rotera_core::model::ViewpointId,
) -> rotera_core::model::WorldPointId {
    let mut wp = WorldPoint::new(name);
    wp.locked_xyz = [Some(world.x), Some(world.y), Some(world.z)];
    let wp_id = project.add_world_point(wp);
    let (u, v) = rotera_core::projection::project_world_to_pixel(&project.viewpoint(vp_id).clone(), world).unwrap();
    project.add_image_point(ImagePoint::new(u, v, wp_id, vp_id));
    wp_id
}

/// Adds an unlocked world point observed (but not geometrically located) in
/// `vp`, at the pixel `world` projects to under `vp`'s current pose.
pub fn add_unlocked_observation(
    project: &mut Project,
    wp_id: rotera_core::model::WorldPointId,
    world: Point3<f64>,
    vp_id: rotera_core::model::ViewpointId,
) {
    let (u, v) = rotera_core::projection::project_world_to_pixel(&project.viewpoint(vp_id).clone(), world).unwrap();
    project.add_image_point(ImagePoint::new(u, v, wp_id, vp_id));
}

pub fn axis_line(project: &mut Project, a: rotera_core::model::WorldPointId, b: rotera_core::model::WorldPointId, direction: LineDirection, length: f64) {
    let mut line = Line::new(a, b, direction);
    line.target_length = Some(length);
    project.add_line(line);
}

/// Adds a vanishing line for `axis` in `vp`, as the image-space segment
/// between the projections of `p0` and `p1` under `vp`'s ground-truth pose.
pub fn vanishing_line(
    project: &mut Project,
    vp_id: rotera_core::model::ViewpointId,
    axis: rotera_core::model::Axis,
    p0: Point3<f64>,
    p1: Point3<f64>,
) {
    let vp = project.viewpoint(vp_id).clone();
    let e0 = rotera_core::projection::project_world_to_pixel(&vp, p0).unwrap();
    let e1 = rotera_core::projection::project_world_to_pixel(&vp, p1).unwrap();
    project.add_vanishing_line(VanishingLine { viewpoint: vp_id, axis, endpoints: [e0, e1] });
}
