//! Typed arena indices. Every entity lives in a `Vec` owned by [`super::Project`]
//! and is referred to by one of these newtypes instead of a shared-ownership
//! pointer, so back-references are plain `usize` comparisons and the graph
//! can never form a reference cycle.

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

entity_id!(WorldPointId);
entity_id!(ViewpointId);
entity_id!(ImagePointId);
entity_id!(LineId);
entity_id!(VanishingLineId);
entity_id!(ConstraintId);

/// A reference to any entity kind, used by the readiness analyzer to point
/// at the specific entities an issue concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRef {
    WorldPoint(WorldPointId),
    Viewpoint(ViewpointId),
    Line(LineId),
}
