//! Camera pose initialization: a VP → PnP → EM fallback chain that carries
//! every enabled viewpoint out of `Uninitialized` before world-point
//! initialization and triangulation run.
//!
//! Vanishing points recover orientation and focal length but never position,
//! so a VP win still needs a handful of already-known world points to resect
//! the camera center. PnP needs enough 3D↔2D correspondences to stand on its
//! own. When neither path has enough to go on, a pair of otherwise stuck
//! cameras can still bootstrap each other from shared image correspondences
//! alone via the essential matrix.

use nalgebra::{DMatrix, Matrix3, Point3, Vector3};
use rand::Rng;

use crate::geometry::{pnp, two_view, vanishing};
use crate::linalg::cholesky::cholesky_solve;
use crate::linalg::quaternion::{self, Quat};
use crate::logging::{LogTag, Logger};
use crate::log_info;
use crate::model::{InitStatus, Project, ViewpointId, WorldPointId};

const MIN_VP_ANCHORS: usize = 2;
const MIN_EM_CORRESPONDENCES: usize = 7;
const MAX_VP_MEAN_REPROJECTION_ERROR: f64 = 50.0;

fn skew(v: Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Resects a camera position given its world-to-camera rotation `r` (as
/// vanishing-point recovery produces it) and 2+ world-point/ray
/// correspondences, `rays` given as camera-frame direction vectors
/// `(world_point, ray)`. Each pair contributes the two independent rows of
/// `skew(ray)·R·(P − C) = 0`, solved in the least-squares sense over the 3
/// unknowns of the camera center `C`.
fn resect_position(r: &Matrix3<f64>, rays: &[(Point3<f64>, Vector3<f64>)]) -> Option<Point3<f64>> {
    if rays.len() < MIN_VP_ANCHORS {
        return None;
    }
    let mut ata = Matrix3::zeros();
    let mut atb = Vector3::zeros();
    for &(world, ray) in rays {
        let s = skew(ray.normalize());
        let rp = r * world.coords;
        let a = s * r;
        let b = s * rp;
        ata += a.transpose() * a;
        atb += a.transpose() * b;
    }
    let a = DMatrix::from_row_slice(
        3,
        3,
        &[
            ata[(0, 0)], ata[(0, 1)], ata[(0, 2)],
            ata[(1, 0)], ata[(1, 1)], ata[(1, 2)],
            ata[(2, 0)], ata[(2, 1)], ata[(2, 2)],
        ],
    );
    let x = cholesky_solve(&a, &[atb.x, atb.y, atb.z])?;
    Some(Point3::new(x[0], x[1], x[2]))
}

fn mean_reprojection_error(
    vp: &mut crate::model::Viewpoint,
    position: Point3<f64>,
    rotation: Quat,
    anchors: &[(Point3<f64>, f64, f64)],
) -> f64 {
    vp.position = position;
    vp.rotation = rotation;
    let errors: Vec<f64> = anchors
        .iter()
        .map(|&(world, u, v)| match crate::projection::project_world_to_pixel(vp, world) {
            Some((pu, pv)) => ((pu - u).powi(2) + (pv - v).powi(2)).sqrt(),
            None => f64::INFINITY,
        })
        .collect();
    errors.iter().sum::<f64>() / errors.len() as f64
}

fn locked_anchors(project: &Project, vp_id: ViewpointId) -> Vec<(Point3<f64>, f64, f64)> {
    project
        .world_points
        .iter()
        .enumerate()
        .filter_map(|(i, wp)| {
            let world = wp.effective_point()?;
            let ip_id = project.authoritative_image_point(vp_id, WorldPointId(i))?;
            let ip = &project.image_points[ip_id.index()];
            Some((world, ip.u, ip.v))
        })
        .collect()
}

/// Tries vanishing-point orientation recovery followed by linear resection of
/// position from the camera's locked anchors. Leaves the viewpoint untouched
/// and returns `false` on any failure so the caller can fall through to PnP.
fn try_vp(project: &mut Project, vp_id: ViewpointId, logger: &Logger) -> bool {
    let vp = project.viewpoint(vp_id).clone();
    let observations = |wp_id: WorldPointId| -> Option<(f64, f64)> {
        let ip_id = project.authoritative_image_point(vp_id, wp_id)?;
        let ip = &project.image_points[ip_id.index()];
        Some((ip.u, ip.v))
    };
    let Some((focal, rotations)) = vanishing::estimate_orientation(
        &vp,
        &project.vanishing_lines,
        &project.lines,
        &project.world_points,
        vp_id,
        observations,
    ) else {
        return false;
    };

    let anchors = locked_anchors(project, vp_id);
    if anchors.len() < MIN_VP_ANCHORS {
        return false;
    }

    let mut scratch = vp.clone();
    scratch.focal_length = focal;
    let mut best: Option<(f64, Point3<f64>, Quat)> = None;
    for rotation_matrix in &rotations {
        // `rotation_matrix` is world-to-camera (each column is a world axis
        // expressed in camera coordinates); `vp.rotation` is stored the other
        // way around (camera-to-world, see `projection::world_to_camera`).
        let rotation_cw = quaternion::from_rotation_matrix(&rotation_matrix.transpose());
        let rays: Vec<(Point3<f64>, Vector3<f64>)> = anchors
            .iter()
            .map(|&(world, u, v)| {
                let x = (u - vp.cx) / focal;
                let y = (vp.cy - v) / focal;
                (world, Vector3::new(x, y, 1.0))
            })
            .collect();
        let Some(position) = resect_position(rotation_matrix, &rays) else { continue };
        let err = mean_reprojection_error(&mut scratch, position, rotation_cw, &anchors);
        if best.as_ref().map(|(e, ..)| err < *e).unwrap_or(true) {
            best = Some((err, position, rotation_cw));
        }
    }

    match best {
        Some((err, position, rotation)) if err <= MAX_VP_MEAN_REPROJECTION_ERROR => {
            let vp_mut = project.viewpoint_mut(vp_id);
            vp_mut.focal_length = focal;
            vp_mut.position = position;
            vp_mut.rotation = rotation;
            vp_mut.init_status = InitStatus::VpInitialized;
            log_info!(
                logger,
                LogTag::VpPlusEm,
                "viewpoint {} initialized from vanishing points (mean reprojection error {err:.2}px)",
                vp_id.index()
            );
            true
        }
        _ => false,
    }
}

/// Tries linear PnP from every currently-known world point observed by this
/// viewpoint. Requires 6+ correspondences and a reliability score above a
/// permissive threshold, since this is only a seed for the refinement solve.
fn try_pnp(project: &mut Project, vp_id: ViewpointId, logger: &Logger) -> bool {
    const MIN_RELIABILITY: f64 = 0.5;

    let vp = project.viewpoint(vp_id).clone();
    let correspondences = locked_anchors(project, vp_id);
    if correspondences.len() < 6 {
        return false;
    }
    let Some(estimate) = pnp::estimate_pose(vp.focal_length, vp.fy(), vp.cx, vp.cy, &correspondences) else {
        return false;
    };
    if estimate.reliability < MIN_RELIABILITY {
        return false;
    }
    let vp_mut = project.viewpoint_mut(vp_id);
    vp_mut.position = estimate.position;
    vp_mut.rotation = estimate.rotation;
    vp_mut.init_status = InitStatus::PnpInitialized;
    log_info!(
        logger,
        LogTag::VpPlusEm,
        "viewpoint {} initialized from PnP ({} correspondences, reliability {:.2})",
        vp_id.index(),
        correspondences.len(),
        estimate.reliability
    );
    true
}

fn shared_correspondences(
    project: &Project,
    a: ViewpointId,
    b: ViewpointId,
) -> Vec<((f64, f64), (f64, f64))> {
    project
        .viewpoint(a)
        .image_points
        .iter()
        .filter_map(|&ip_id| {
            let ip_a = &project.image_points[ip_id.index()];
            let ip_b_id = project.authoritative_image_point(b, ip_a.world_point)?;
            let ip_b = &project.image_points[ip_b_id.index()];
            Some(((ip_a.u, ip_a.v), (ip_b.u, ip_b.v)))
        })
        .collect()
}

/// Tries to bootstrap two still-uninitialized cameras from their shared
/// image correspondences alone, via RANSAC essential-matrix estimation. Only
/// meaningful between two cameras that are *both* uninitialized: composing
/// the essential matrix's canonical two-camera frame with an already-posed
/// partner's real-world frame would need a similarity alignment this chain
/// doesn't otherwise perform, so EM here is reserved for pairs with no other
/// option.
fn try_em_pair<R: Rng>(project: &mut Project, a: ViewpointId, b: ViewpointId, rng: &mut R, logger: &Logger) -> bool {
    let shared = shared_correspondences(project, a, b);
    if shared.len() < MIN_EM_CORRESPONDENCES {
        return false;
    }
    let vp_a = project.viewpoint(a).clone();
    let vp_b = project.viewpoint(b).clone();
    let correspondences: Vec<two_view::Correspondence> = shared
        .iter()
        .map(|&(oa, ob)| two_view::Correspondence {
            a: two_view::normalize(oa.0, oa.1, &vp_a),
            b: two_view::normalize(ob.0, ob.1, &vp_b),
        })
        .collect();

    match two_view::ransac_essential_matrix(&correspondences, rng) {
        Ok(result) => {
            let (pos1, rot1, pos2, rot2) = two_view::assemble_camera_pair(&result);
            {
                let va = project.viewpoint_mut(a);
                va.position = pos1;
                va.rotation = rot1;
                va.init_status = InitStatus::EmInitialized;
            }
            {
                let vb = project.viewpoint_mut(b);
                vb.position = pos2;
                vb.rotation = rot2;
                vb.init_status = InitStatus::EmInitialized;
            }
            log_info!(
                logger,
                LogTag::EssentialMatrix,
                "viewpoints {} and {} initialized from the essential matrix ({} inliers of {})",
                a.index(),
                b.index(),
                result.inlier_count,
                correspondences.len()
            );
            true
        }
        Err(_) => false,
    }
}

/// Runs the VP → PnP fallback chain on every enabled, still-uninitialized
/// viewpoint, then pairs up whatever's left for essential-matrix
/// bootstrapping. Cameras that exhaust every path are left `Uninitialized`
/// for the unified world-point initialization to seed blind, via its random
/// fill phase, same as it already does for points with no path of their own.
pub fn initialize_camera_poses<R: Rng>(project: &mut Project, rng: &mut R, logger: &Logger) {
    let ids = project.enabled_viewpoint_ids();

    for &id in &ids {
        let vp = project.viewpoint(id);
        if vp.is_pose_locked || vp.init_status != InitStatus::Uninitialized {
            continue;
        }
        if try_vp(project, id, logger) {
            continue;
        }
        if try_pnp(project, id, logger) {
            continue;
        }
    }

    let remaining: Vec<ViewpointId> = ids
        .iter()
        .copied()
        .filter(|&id| {
            let vp = project.viewpoint(id);
            !vp.is_pose_locked && vp.init_status == InitStatus::Uninitialized
        })
        .collect();
    for (i, &a) in remaining.iter().enumerate() {
        if project.viewpoint(a).init_status != InitStatus::Uninitialized {
            continue;
        }
        for &b in &remaining[i + 1..] {
            if project.viewpoint(b).init_status != InitStatus::Uninitialized {
                continue;
            }
            if try_em_pair(project, a, b, rng, logger) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Line, LineDirection, Viewpoint, WorldPoint};

    fn locked(x: f64, y: f64, z: f64, name: &str) -> WorldPoint {
        let mut p = WorldPoint::new(name);
        p.locked_xyz = [Some(x), Some(y), Some(z)];
        p
    }

    #[test]
    fn resect_position_recovers_a_known_camera_center() {
        // A 90-degree yaw so the world-to-camera vs. camera-to-world
        // distinction is actually exercised, not masked by an identity.
        let r_wc = Matrix3::new(0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -1.0, 0.0, 0.0);
        let true_position = Point3::new(3.0, -2.0, 5.0);
        let anchors = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let rays: Vec<(Point3<f64>, Vector3<f64>)> = anchors
            .iter()
            .map(|&p| {
                let cam = r_wc * (p - true_position);
                (p, Vector3::new(cam.x / cam.z, cam.y / cam.z, 1.0))
            })
            .collect();
        let recovered = resect_position(&r_wc, &rays).unwrap();
        assert!((recovered - true_position).norm() < 1e-6);
    }

    #[test]
    fn try_pnp_initializes_a_camera_with_enough_correspondences() {
        let mut project = Project::new();
        let mut truth = Viewpoint::new("cam", 1000.0, 800.0);
        truth.position = Point3::new(-10.0, 8.0, -20.0);
        truth.focal_length = 1000.0;
        truth.cx = 500.0;
        truth.cy = 400.0;
        let look_dir = (Point3::new(0.5, 0.5, 0.5) - truth.position).normalize();
        truth.rotation = quaternion::rotation_between_vectors(Vector3::new(0.0, 0.0, 1.0), look_dir);

        let cube = [
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, 0.0, 1.0),
            (1.0, 1.0, 0.0),
            (1.0, 0.0, 1.0),
            (0.0, 1.0, 1.0),
            (1.0, 1.0, 1.0),
        ];

        let mut blank = Viewpoint::new("cam", 1000.0, 800.0);
        blank.focal_length = 1000.0;
        blank.cx = 500.0;
        blank.cy = 400.0;
        let vp_id = project.add_viewpoint(blank);

        for (i, &(x, y, z)) in cube.iter().enumerate() {
            let wp_id = project.add_world_point(locked(x, y, z, &format!("p{i}")));
            let (u, v) = crate::projection::project_world_to_pixel(&truth, Point3::new(x, y, z)).unwrap();
            project.add_image_point(crate::model::ImagePoint::new(u, v, wp_id, vp_id));
        }

        let logger = Logger::new();
        assert!(try_pnp(&mut project, vp_id, &logger));
        assert_eq!(project.viewpoint(vp_id).init_status, InitStatus::PnpInitialized);
        assert!((project.viewpoint(vp_id).position - truth.position).norm() < 1e-2);
    }

    #[test]
    fn try_vp_fails_without_vanishing_lines_or_locked_anchors() {
        let mut project = Project::new();
        let mut vp = Viewpoint::new("cam", 1000.0, 800.0);
        vp.focal_length = 1000.0;
        vp.cx = 500.0;
        vp.cy = 400.0;
        let vp_id = project.add_viewpoint(vp);

        let a = project.add_world_point(WorldPoint::new("a"));
        let b = project.add_world_point(WorldPoint::new("b"));
        let mut line = Line::new(a, b, LineDirection::X);
        line.target_length = Some(1.0);
        project.add_line(line);

        let logger = Logger::new();
        assert!(!try_vp(&mut project, vp_id, &logger));
    }

    #[test]
    fn initialize_camera_poses_leaves_hopeless_cameras_uninitialized() {
        use rand::SeedableRng;
        let mut project = Project::new();
        let vp = Viewpoint::new("cam", 1000.0, 800.0);
        project.add_viewpoint(vp);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let logger = Logger::new();
        initialize_camera_poses(&mut project, &mut rng, &logger);
        assert_eq!(project.viewpoints[0].init_status, InitStatus::Uninitialized);
    }
}
