//! Linear algebra kernels.
//!
//! These are deliberately hand-rolled rather than delegated to
//! `nalgebra::linalg` so the Levenberg-Marquardt engine can expose and log
//! each step of the normal-equations solve. `nalgebra` is still used
//! throughout as the vector/matrix container type.

pub mod cholesky;
pub mod jacobi;
pub mod quaternion;
pub mod sparse;
pub mod svd3;

pub use cholesky::cholesky_solve;
pub use sparse::{CsrMatrix, damped_cg};
pub use svd3::svd3;
