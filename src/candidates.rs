//! The candidate orchestrator: tries a handful of
//! `(seed, branch, alignment_sign)` triples with short probe solves, then
//! replays the best one at full iteration budget.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::Result;
use crate::init;
use crate::lifecycle::{self, Snapshot};
use crate::log_info;
use crate::logging::{LogTag, Logger};
use crate::model::Project;
use crate::solver::{self, LmOptions, LmOutcome};
use crate::valuemap::{self, Layout};

pub const DEFAULT_SEEDS: [u64; 3] = [42, 12345, 98770];
const PROBE_ITERATIONS: usize = 200;
const EARLY_EXIT_RESIDUAL: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub seed: u64,
    pub branch_index: usize,
    pub alignment_sign: bool,
    pub probe_cost: f64,
}

/// Runs unified initialization plus a short probe solve for one
/// `(seed, branch, sign)` triple against a scratch copy of `project`, leaving
/// `project` itself untouched.
fn run_probe(project: &Project, scene_scale: f64, seed: u64, branch_index: usize, sign: bool, logger: &Logger) -> (Project, f64) {
    let mut probe = project.clone();
    let branches = init::branching::enumerate_branches(&probe);
    if let Some(branch) = branches.get(branch_index).or_else(|| branches.first()) {
        for (id, coords) in &branch.coords {
            probe.world_point_mut(*id).inferred_xyz = *coords;
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    init::run_unified_initialization(&mut probe, scene_scale, &mut rng, logger);

    let _ = crate::align::align_to_locked_points(&mut probe, logger);
    let _ = crate::align::align_to_line_directions(&mut probe, logger, Some(sign));

    let layout = Layout::build(&probe);
    let options = LmOptions {
        max_iterations: PROBE_ITERATIONS,
        ..LmOptions::default()
    };
    let cost = match solver::run(&mut probe, &layout, logger, &options) {
        Ok(outcome) => outcome.final_cost,
        Err(_) => f64::INFINITY,
    };
    (probe, cost)
}

pub struct OrchestratorResult {
    pub outcome: LmOutcome,
    pub candidates_tried: usize,
    pub winning_candidate: Candidate,
}

/// Runs the full candidate search: generate every `(seed, branch, sign)`
/// triple, probe each, stop early on a clear win, then replay the best one
/// at full budget.
pub fn run_orchestrator(project: &mut Project, scene_scale: f64, max_attempts: usize, options: &LmOptions, logger: &Logger) -> Result<OrchestratorResult> {
    let pristine: Snapshot = lifecycle::save_project_state(project);

    let seeds: Vec<u64> = DEFAULT_SEEDS.iter().copied().take(max_attempts.max(1)).collect();
    let branch_count = init::branching::enumerate_branches(project).len().max(1);

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut best: Option<(Candidate, Project)> = None;
    let mut early_exit = false;

    'search: for &seed in &seeds {
        for branch_index in 0..branch_count {
            for &sign in &[true, false] {
                lifecycle::restore_project_state(project, &pristine);
                let (probe_project, cost) = run_probe(project, scene_scale, seed, branch_index, sign, logger);
                let candidate = Candidate {
                    seed,
                    branch_index,
                    alignment_sign: sign,
                    probe_cost: cost,
                };
                log_info!(logger, LogTag::Candidate, "seed={seed} branch={branch_index} sign={sign} cost={cost:.4}");

                let is_better = best.as_ref().map(|(b, _)| cost < b.probe_cost).unwrap_or(true);
                if is_better {
                    best = Some((candidate.clone(), probe_project));
                }
                candidates.push(candidate);

                if cost < EARLY_EXIT_RESIDUAL {
                    early_exit = true;
                    break 'search;
                }
            }
        }
    }

    lifecycle::restore_project_state(project, &pristine);

    let Some((winning_candidate, _)) = best else {
        return Err(crate::error::RoteraError::Precondition("no candidates were evaluated"));
    };

    // Replay the winning candidate from the pristine snapshot for a
    // full-iteration-budget final solve.
    let mut rng = ChaCha8Rng::seed_from_u64(winning_candidate.seed);
    let branches = init::branching::enumerate_branches(project);
    if let Some(branch) = branches.get(winning_candidate.branch_index).or_else(|| branches.first()) {
        for (id, coords) in &branch.coords {
            project.world_point_mut(*id).inferred_xyz = *coords;
        }
    }
    init::run_unified_initialization(project, scene_scale, &mut rng, logger);
    let _ = crate::align::align_to_locked_points(project, logger);
    let _ = crate::align::align_to_line_directions(project, logger, Some(winning_candidate.alignment_sign));

    let layout = Layout::build(project);
    let _ = valuemap::evaluate(project, &layout)?;
    let outcome = solver::run(project, &layout, logger, options)?;

    log_info!(
        logger,
        LogTag::Candidate,
        "{} of {} candidates tried, early_exit={early_exit}, final cost={:.6}",
        candidates.len(),
        seeds.len() * branch_count * 2,
        outcome.final_cost
    );

    Ok(OrchestratorResult {
        outcome,
        candidates_tried: candidates.len(),
        winning_candidate,
    })
}
