//! The transparent Levenberg-Marquardt engine.

pub mod lm;

pub use lm::{run, InnerSolve, LmOptions, LmOutcome};
