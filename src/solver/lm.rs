//! A transparent Levenberg-Marquardt engine: the outer damped
//! Gauss-Newton loop with adaptive damping, dense-or-sparse inner solve, and
//! quaternion renormalization after every accepted step.

use nalgebra::DVector;

use crate::error::{RoteraError, Result};
use crate::linalg::cholesky::cholesky_solve;
use crate::linalg::sparse::{damped_cg, CsrMatrix};
use crate::logging::{Level, LogTag, Logger};
use crate::model::Project;
use crate::valuemap::{self, Layout};
use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy)]
pub enum InnerSolve {
    Dense,
    Sparse,
    /// Run both and cross-check step agreement.
    Both,
}

#[derive(Debug, Clone, Copy)]
pub struct LmOptions {
    pub max_iterations: usize,
    pub initial_damping: f64,
    pub cost_tolerance: f64,
    pub param_tolerance: f64,
    pub gradient_tolerance: f64,
    pub inner_solve: InnerSolve,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            initial_damping: 1e-3,
            cost_tolerance: 1e-6,
            param_tolerance: 1e-6,
            gradient_tolerance: 1e-6,
            inner_solve: InnerSolve::Dense,
        }
    }
}

const DAMPING_FLOOR: f64 = 1e-10;
const DAMPING_CEILING: f64 = 1e10;
const MAX_DAMPING_INCREASES: usize = 10;

#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub converged: bool,
    pub iterations: usize,
    pub final_cost: f64,
    pub reason: String,
}

fn sum_of_squares(r: &DVector<f64>) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Runs the outer LM loop, mutating `project` in place through repeated
/// `valuemap::pack`/`unpack`/`evaluate` cycles.
pub fn run(project: &mut Project, layout: &Layout, logger: &Logger, options: &LmOptions) -> Result<LmOutcome> {
    let mut x = valuemap::pack(project, layout);

    let (mut residuals, mut triplets) = valuemap::evaluate(project, layout)?;
    let mut cost = sum_of_squares(&residuals);
    let mut lambda = options.initial_damping;

    log_info!(logger, LogTag::Step, "starting LM: {} variables, {} residuals, cost={cost:.6}", layout.num_variables, layout.num_residuals);

    for iteration in 0..options.max_iterations {
        let j = valuemap::triplets_to_dense(&triplets, layout.num_residuals, layout.num_variables);
        let jt = j.transpose();
        let jtj = &jt * &j;
        let neg_jtr = -(&jt * &residuals);

        let grad_norm = neg_jtr.norm();
        if grad_norm < options.gradient_tolerance {
            log_info!(logger, LogTag::Step, "[Step {iteration}] converged: gradient norm {grad_norm:.2e} below tolerance");
            return Ok(LmOutcome {
                converged: true,
                iterations: iteration,
                final_cost: cost,
                reason: "gradient tolerance reached".into(),
            });
        }

        let mut accepted = false;
        let mut damping_increases = 0;
        let mut step_converged = false;

        while damping_increases < MAX_DAMPING_INCREASES {
            let mut damped = jtj.clone();
            for i in 0..layout.num_variables {
                damped[(i, i)] += lambda;
            }
            let dense_step = cholesky_solve(&damped, neg_jtr.as_slice());

            let delta = match options.inner_solve {
                InnerSolve::Dense => dense_step.clone(),
                InnerSolve::Sparse => {
                    let sparse_j = CsrMatrix::from_triplets(layout.num_residuals, layout.num_variables, &triplets);
                    Some(damped_cg(&sparse_j, lambda, neg_jtr.as_slice()))
                }
                InnerSolve::Both => {
                    let sparse_j = CsrMatrix::from_triplets(layout.num_residuals, layout.num_variables, &triplets);
                    let sparse_step = damped_cg(&sparse_j, lambda, neg_jtr.as_slice());
                    if let Some(dense) = &dense_step {
                        let dense_norm: f64 = dense.iter().map(|v| v * v).sum::<f64>().sqrt();
                        let diff: f64 = dense
                            .iter()
                            .zip(sparse_step.iter())
                            .map(|(a, b)| (a - b).powi(2))
                            .sum::<f64>()
                            .sqrt();
                        let tol = (1e-6_f64).max(0.01 * dense_norm);
                        if diff > tol {
                            return Err(RoteraError::Invariant(format!(
                                "dense and sparse LM steps disagree by {diff:.3e} (tolerance {tol:.3e})"
                            )));
                        }
                    }
                    Some(sparse_step)
                }
            };

            let Some(delta) = delta else {
                lambda = (lambda * 10.0).min(DAMPING_CEILING);
                damping_increases += 1;
                log_debug!(logger, LogTag::Step, "[Step {iteration}] non-PD normal matrix, raising damping to {lambda:.3e}");
                continue;
            };

            let step_norm: f64 = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
            if step_norm < options.param_tolerance {
                step_converged = true;
            }

            let candidate_x = DVector::from_iterator(x.len(), x.iter().zip(delta.iter()).map(|(a, b)| a + b));
            valuemap::unpack(project, layout, &candidate_x);
            let (candidate_residuals, candidate_triplets) = valuemap::evaluate(project, layout)?;
            let candidate_cost = sum_of_squares(&candidate_residuals);

            if candidate_cost < cost {
                let prev_cost = cost;
                x = candidate_x;
                residuals = candidate_residuals;
                triplets = candidate_triplets;
                cost = candidate_cost;
                lambda = (lambda / 10.0).max(DAMPING_FLOOR);
                accepted = true;
                log_debug!(logger, LogTag::Step, "[Step {iteration}] accepted: cost {prev_cost:.6} -> {cost:.6}, lambda={lambda:.3e}");

                renormalize_quaternions(project, layout, logger);
                x = valuemap::pack(project, layout);

                if (prev_cost - cost).abs() < options.cost_tolerance || cost < options.cost_tolerance {
                    return Ok(LmOutcome {
                        converged: true,
                        iterations: iteration + 1,
                        final_cost: cost,
                        reason: "cost tolerance reached".into(),
                    });
                }
                break;
            } else {
                valuemap::unpack(project, layout, &x);
                let _ = valuemap::evaluate(project, layout)?;
                lambda = (lambda * 10.0).min(DAMPING_CEILING);
                damping_increases += 1;
            }
        }

        if step_converged && accepted {
            return Ok(LmOutcome {
                converged: true,
                iterations: iteration + 1,
                final_cost: cost,
                reason: "parameter tolerance reached".into(),
            });
        }

        if !accepted {
            log_warn!(logger, LogTag::Step, "[Step {iteration}] exhausted damping increases without an accepted step");
            return Ok(LmOutcome {
                converged: false,
                iterations: iteration + 1,
                final_cost: cost,
                reason: "damping loop exhausted".into(),
            });
        }
    }

    Ok(LmOutcome {
        converged: false,
        iterations: options.max_iterations,
        final_cost: cost,
        reason: "maximum iterations reached".into(),
    })
}

/// Renormalizes every quaternion whose four indices are all free variables
///: this prevents drift toward a reflected minimum.
fn renormalize_quaternions(project: &mut Project, layout: &Layout, logger: &Logger) {
    let mut renormalized = Vec::new();
    for (idx, slot) in layout.viewpoint_pose.iter().enumerate() {
        if slot.is_some() {
            let q = project.viewpoints[idx].rotation;
            let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
            if (norm - 1.0).abs() > 1e-9 {
                project.viewpoints[idx].rotation = crate::linalg::quaternion::normalize(q);
                renormalized.push(idx);
            }
        }
    }
    if !renormalized.is_empty() {
        log_debug!(logger, LogTag::Step, "renormalized quaternions for viewpoints {renormalized:?}");
    }
}
