//! Two-view, vanishing-point and PnP geometry, plus the DLT triangulator
//! shared by unified initialization.

pub mod pnp;
pub mod triangulation;
pub mod two_view;
pub mod vanishing;
