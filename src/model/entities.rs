//! The entity types making up a [`super::Project`].

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::linalg::quaternion::Quat;

use super::ids::{ImagePointId, LineId, ViewpointId, WorldPointId};

/// Where a viewpoint's pose came from, and whether it has since been
/// refined by LM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InitStatus {
    #[default]
    Uninitialized,
    VpInitialized,
    PnpInitialized,
    EmInitialized,
    Refined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldPoint {
    pub name: String,
    /// Per-axis user lock: `Some(v)` means "this coordinate is locked to v".
    pub locked_xyz: [Option<f64>; 3],
    /// Per-axis value computed once per solve by branching inference /
    /// constraint propagation; lower priority than `locked_xyz`.
    pub inferred_xyz: [Option<f64>; 3],
    /// Current 3D estimate; `None` before initialization.
    pub optimized_xyz: Option<Point3<f64>>,
    /// Residuals this point's owned constraints stored on the last solve.
    pub last_residuals: Vec<f64>,
}

impl WorldPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locked_xyz: [None; 3],
            inferred_xyz: [None; 3],
            optimized_xyz: None,
            last_residuals: Vec::new(),
        }
    }

    /// `locked ?? inferred ?? null` per axis.
    pub fn effective_xyz(&self) -> [Option<f64>; 3] {
        let mut out = [None; 3];
        for axis in 0..3 {
            out[axis] = self.locked_xyz[axis].or(self.inferred_xyz[axis]);
        }
        out
    }

    pub fn is_fully_constrained(&self) -> bool {
        self.effective_xyz().iter().all(Option::is_some)
    }

    pub fn is_locked(&self) -> bool {
        self.locked_xyz.iter().all(Option::is_some)
    }

    /// `effective_xyz` as a dense point, only meaningful when
    /// `is_fully_constrained()`.
    pub fn effective_point(&self) -> Option<Point3<f64>> {
        let e = self.effective_xyz();
        Some(Point3::new(e[0]?, e[1]?, e[2]?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Line direction constraint: axis-aligned, plane-constrained, or
/// free (no direction residual).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineDirection {
    Free,
    X,
    Y,
    Z,
    Xy,
    Xz,
    Yz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    pub endpoints: [WorldPointId; 2],
    pub direction: LineDirection,
    pub target_length: Option<f64>,
    pub is_construction: bool,
    pub last_residuals: Vec<f64>,
}

impl Line {
    pub fn new(a: WorldPointId, b: WorldPointId, direction: LineDirection) -> Self {
        Self {
            endpoints: [a, b],
            direction,
            target_length: None,
            is_construction: false,
            last_residuals: Vec::new(),
        }
    }

    pub fn is_axis_aligned(&self) -> bool {
        matches!(self.direction, LineDirection::X | LineDirection::Y | LineDirection::Z)
    }

    pub fn has_fixed_length(&self) -> bool {
        self.target_length.is_some()
    }

    /// Number of direction residuals this line contributes: 0 when free, or
    /// 3 otherwise. Together with an optional length residual this gives a
    /// 0-4 residual range per line.
    pub fn direction_residual_count(&self) -> usize {
        match self.direction {
            LineDirection::Free => 0,
            _ => 3,
        }
    }

    pub fn length_residual_count(&self) -> usize {
        if self.has_fixed_length() {
            1
        } else {
            0
        }
    }

    pub fn residual_count(&self) -> usize {
        self.direction_residual_count() + self.length_residual_count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VanishingLine {
    pub viewpoint: ViewpointId,
    pub axis: Axis,
    pub endpoints: [(f64, f64); 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewpoint {
    pub name: String,
    pub width: f64,
    pub height: f64,

    pub position: Point3<f64>,
    pub rotation: Quat,

    pub focal_length: f64,
    pub aspect_ratio: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
    pub radial: [f64; 3],
    pub tangential: [f64; 2],

    pub use_simple_intrinsics: bool,
    pub is_possibly_cropped: bool,
    pub is_pose_locked: bool,
    pub enabled_in_solve: bool,
    pub is_z_reflected: bool,

    pub init_status: InitStatus,

    pub image_points: Vec<ImagePointId>,
    pub vanishing_lines: Vec<super::ids::VanishingLineId>,

    /// Quaternion-unit-norm residual stored on the last solve, `None` when
    /// the pose is locked and the layout reserves no such residual.
    pub last_quat_residual: Option<f64>,
}

impl Viewpoint {
    pub fn new(name: impl Into<String>, width: f64, height: f64) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            position: Point3::origin(),
            rotation: [1.0, 0.0, 0.0, 0.0],
            focal_length: width.max(height),
            aspect_ratio: 1.0,
            cx: width / 2.0,
            cy: height / 2.0,
            skew: 0.0,
            radial: [0.0; 3],
            tangential: [0.0; 2],
            use_simple_intrinsics: true,
            is_possibly_cropped: false,
            is_pose_locked: false,
            enabled_in_solve: true,
            is_z_reflected: false,
            init_status: InitStatus::Uninitialized,
            image_points: Vec::new(),
            vanishing_lines: Vec::new(),
            last_quat_residual: None,
        }
    }

    pub fn fy(&self) -> f64 {
        self.focal_length * self.aspect_ratio
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePoint {
    pub u: f64,
    pub v: f64,
    pub world_point: WorldPointId,
    pub viewpoint: ViewpointId,
    pub reprojected: Option<(f64, f64)>,
    pub is_outlier: bool,
    pub last_residuals: [f64; 2],
}

impl ImagePoint {
    pub fn new(u: f64, v: f64, world_point: WorldPointId, viewpoint: ViewpointId) -> Self {
        Self {
            u,
            v,
            world_point,
            viewpoint,
            reprojected: None,
            is_outlier: false,
            last_residuals: [0.0; 2],
        }
    }
}

/// Tagged sum of constraint kinds. `CoplanarPoints` is the variant in scope;
/// adding another kind is one more match arm in
/// [`crate::valuemap::constraint_residuals`], not a new trait impl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constraint {
    CoplanarPoints {
        points: Vec<WorldPointId>,
        last_residuals: Vec<f64>,
    },
}

impl Constraint {
    pub fn coplanar_points(points: Vec<WorldPointId>) -> Self {
        Self::CoplanarPoints {
            points,
            last_residuals: Vec::new(),
        }
    }

    /// Residual count contributed: a coplanarity constraint on N points
    /// contributes `N - 3` scalar residuals (deviation of each point beyond
    /// the first three, which always define *some* plane, from the
    /// best-fit plane through all of them).
    pub fn residual_count(&self) -> usize {
        match self {
            Constraint::CoplanarPoints { points, .. } => points.len().saturating_sub(3),
        }
    }
}

pub fn plane_deviation_residuals(points: &[Vector3<f64>]) -> Vec<f64> {
    if points.len() < 4 {
        return Vec::new();
    }
    let centroid: Vector3<f64> =
        points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / points.len() as f64;
    let mut cov = nalgebra::Matrix3::zeros();
    for p in points {
        let d = p - centroid;
        cov += d * d.transpose();
    }
    let svd = crate::linalg::svd3(&cov);
    // Normal is the singular vector with the smallest singular value (last
    // column after descending sort).
    let normal = svd.v.column(2).into_owned();
    points
        .iter()
        .skip(3)
        .map(|p| (p - centroid).dot(&normal))
        .collect()
}
