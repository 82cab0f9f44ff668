//! The project data model.

pub mod entities;
pub mod ids;
pub mod project;

pub use entities::{
    Axis, Constraint, ImagePoint, InitStatus, Line, LineDirection, VanishingLine, Viewpoint,
    WorldPoint,
};
pub use ids::{ConstraintId, EntityRef, ImagePointId, LineId, VanishingLineId, ViewpointId, WorldPointId};
pub use project::Project;
