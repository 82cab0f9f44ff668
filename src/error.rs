//! Error kinds for the solver core.
//!
//! Precondition failures, degenerate geometry and non-convergence are all
//! recovered locally by callers (readiness gate, RANSAC scoring, the
//! candidate orchestrator's fallback chain) and never escape
//! [`crate::optimize_project`] as an `Err` — they show up in
//! [`crate::SolverResult`] or the log instead. Only [`RoteraError::Invariant`]
//! represents a programmer bug and is allowed to propagate.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoteraError {
    /// Not enough data to attempt a numerical solve: fewer than 7 correspondences, zero enabled cameras, zero
    /// constraints/observations.
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// Geometry that cannot yield a valid estimate: collinear vanishing
    /// lines, a near-zero triangulation singular value, a translation with
    /// two near-zero components, a non-orthonormal rotation recovered from a
    /// VP triad.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    /// The LM outer loop hit `maxIterations` or exhausted the inner damping
    /// loop without accepting a step.
    #[error("did not converge: {0}")]
    NonConvergence(&'static str),

    /// Branching inference found two already-known axis coordinates that
    /// disagree by more than epsilon; the branch is pruned.
    #[error("contradictory constraint: {0}")]
    Contradiction(&'static str),

    /// A push/pop residual-count mismatch, or an analytical-vs-autodiff
    /// gradient disagreement beyond tolerance. Always a bug, never a user
    /// error; the solve aborts.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, RoteraError>;
