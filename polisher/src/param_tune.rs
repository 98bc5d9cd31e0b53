//! Tune the parameters of the refinement oracle.
//!
//! Each iteration perturbs the current parameter set into a batch of candidates,
//! scores every candidate by a test-mode consensus on a held-out subset of regions,
//! and carries the best one forward. The current set is always in the batch,
//! so the selected accuracy never goes down.
use crate::consensus::{corrections, ConsensusConfig};
use crate::error::{PoissonError, Result};
use crate::oracle::{Inputs, RefinementOracle};
use definitions::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoroshiro128PlusPlus;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy)]
pub struct TuneConfig {
    iterations: usize,
    verbose: u8,
}

impl TuneConfig {
    pub fn new(iterations: usize, verbose: u8) -> Self {
        Self {
            iterations,
            verbose,
        }
    }
}

/// Where the selected parameters go after each iteration.
pub trait Checkpoint {
    fn save(&mut self, params: &ParameterSet, history: &[TrainingIteration]) -> Result<()>;
}

/// Parameters to a TOML file, the history to `<file>.history.json` next to it.
/// Both are replaced atomically, but not together: the history is written first,
/// so after a crash between the two it may be one iteration ahead of the parameter file.
/// The parameter file never holds a set missing from the history.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    params: PathBuf,
    history: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: &Path) -> Self {
        let mut history = path.as_os_str().to_owned();
        history.push(".history.json");
        Self {
            params: path.to_path_buf(),
            history: PathBuf::from(history),
        }
    }
    pub fn params_path(&self) -> &Path {
        &self.params
    }
    pub fn history_path(&self) -> &Path {
        &self.history
    }
}

impl Checkpoint for FileCheckpoint {
    fn save(&mut self, params: &ParameterSet, history: &[TrainingIteration]) -> Result<()> {
        let json = serde_json::to_vec_pretty(history).map_err(std::io::Error::from)?;
        crate::params::write_atomically(&self.history, &json)?;
        crate::params::save(&self.params, params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// All the iterations were done.
    Completed,
    /// The accuracy stopped improving.
    Converged,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub parameters: ParameterSet,
    pub history: Vec<TrainingIteration>,
    pub stop: StopReason,
}

/// Reject a training setup before anything is evaluated.
pub fn check_training(params: &ParameterSet, config: &TuneConfig) -> Result<()> {
    let train = &params.train;
    if config.iterations == 0 {
        return Err(PoissonError::config("the number of iterations should be positive"));
    }
    if !(train.step.is_finite() && 0f64 < train.step && train.step <= 1f64) {
        let msg = format!("train.step should be in (0,1], found {}", train.step);
        return Err(PoissonError::config(msg));
    }
    if train.params_per_candidate == 0 || train.regions == 0 {
        let msg = "train.params_per_candidate and train.regions should be positive";
        return Err(PoissonError::config(msg));
    }
    if !(train.epsilon.is_finite() && 0f64 <= train.epsilon) {
        let msg = format!("train.epsilon should be non-negative, found {}", train.epsilon);
        return Err(PoissonError::config(msg));
    }
    let tunable = params.tunable();
    if 0 < train.candidates && tunable.is_empty() {
        return Err(PoissonError::config("no numeric parameter to tune"));
    }
    for name in tunable {
        match params.knob(name) {
            Some(knob) if knob.is_numeric() => {}
            Some(knob) => {
                let msg = format!("{name}={knob} is not numeric and can not be tuned");
                return Err(PoissonError::config(msg));
            }
            None => return Err(PoissonError::config(format!("{name} is not in the parameters"))),
        }
    }
    Ok(())
}

/// Pick `size` regions at random, keeping their order.
pub fn training_subset(regions: &[Region], size: usize, seed: u64) -> Vec<Region> {
    if regions.len() <= size {
        return regions.to_vec();
    }
    let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, regions.len(), size).into_vec();
    picked.sort_unstable();
    picked.iter().map(|&i| regions[i].clone()).collect()
}

/// A new parameter set, with a few of the `tunable` knobs of `base` moved by at most `train.step` (relative).
/// Integers always move by at least one.
pub fn perturb<R: Rng>(base: &ParameterSet, tunable: &[&str], rng: &mut R) -> ParameterSet {
    let step = base.train.step;
    let take = base.train.params_per_candidate.min(tunable.len());
    let mut params = base.clone();
    let picked = rand::seq::index::sample(rng, tunable.len(), take);
    for i in picked.iter() {
        let name = tunable[i];
        let u: f64 = rng.gen_range(-step..=step);
        let moved = match base.knob(name) {
            Some(&Knob::Float(v)) if v == 0f64 => Knob::Float(v + u),
            Some(&Knob::Float(v)) => Knob::Float(v * (1f64 + u)),
            Some(&Knob::Int(v)) => {
                let delta = match (v as f64 * u).round() as i64 {
                    0 if u < 0f64 => -1,
                    0 => 1,
                    delta => delta,
                };
                Knob::Int(v.saturating_add(delta))
            }
            _ => continue,
        };
        params.knobs.insert(name.to_string(), moved);
    }
    params
}

/// The baseline followed by `train.candidates` perturbations of it.
pub fn propose(base: &ParameterSet, iteration: usize) -> Vec<ParameterSet> {
    let tunable = base.tunable();
    let seed = base.train.seed.wrapping_add(iteration as u64);
    let mut rng: Xoroshiro128PlusPlus = SeedableRng::seed_from_u64(seed);
    let perturbed = (0..base.train.candidates).map(|_| perturb(base, &tunable, &mut rng));
    std::iter::once(base.clone()).chain(perturbed).collect()
}

/// Mean accuracy over `regions`. A single failed region disqualifies the candidate,
/// so that every candidate is scored on the same regions.
pub fn evaluate<O: RefinementOracle + ?Sized>(
    oracle: &O,
    inputs: &Inputs,
    params: &ParameterSet,
    regions: &[Region],
    verbose: u8,
) -> Evaluation {
    if regions.is_empty() {
        let reason = "no region to evaluate".to_string();
        return Evaluation::Disqualified { reason };
    }
    let config = ConsensusConfig::new(true, verbose);
    let total = corrections(oracle, inputs, params, regions, &config).try_fold(0f64, |sum, c| {
        c.map(|record| sum + record.accuracy.unwrap_or(0f64))
    });
    match total {
        Ok(sum) => Evaluation::Scored {
            accuracy: sum / regions.len() as f64,
        },
        Err(failure) => Evaluation::Disqualified {
            reason: failure.to_string(),
        },
    }
}

/// Index of the best candidate. The baseline (index 0) wins ties, then the smaller index.
/// A candidate without a finite accuracy is never selected.
pub fn select(results: &[CandidateResult]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, result) in results.iter().enumerate() {
        let accuracy = result.evaluation.accuracy().filter(|acc| acc.is_finite());
        if let Some(acc) = accuracy {
            match best {
                Some((_, max)) if acc <= max => {}
                _ => best = Some((i, acc)),
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Train the parameters for `config.iterations` rounds on the workers of `pool`.
/// The selected parameters are saved to `checkpoint` after every round.
/// `cancel` is checked between rounds; a round once started always completes.
#[allow(clippy::too_many_arguments)]
pub fn train<O, C>(
    oracle: &O,
    inputs: &Inputs,
    initial: ParameterSet,
    regions: &[Region],
    config: &TuneConfig,
    pool: &rayon::ThreadPool,
    checkpoint: &mut C,
    cancel: &AtomicBool,
) -> Result<TrainingOutcome>
where
    O: RefinementOracle + ?Sized,
    C: Checkpoint + ?Sized,
{
    check_training(&initial, config)?;
    if regions.is_empty() {
        return Err(PoissonError::config("no region to train on"));
    }
    let subset = training_subset(regions, initial.train.regions, initial.train.seed);
    info!(
        "TRAIN\tSTART\t{}\t{}\t{}",
        config.iterations,
        subset.len(),
        pool.current_num_threads()
    );
    let mut current = initial;
    let mut history: Vec<TrainingIteration> = vec![];
    let mut stop = StopReason::Completed;
    let mut stale = 0;
    for index in 1..=config.iterations {
        if cancel.load(Ordering::SeqCst) {
            info!("TRAIN\tCANCEL\t{index}");
            stop = StopReason::Cancelled;
            break;
        }
        let candidates = propose(&current, index);
        let evaluations: Vec<_> = pool.install(|| {
            candidates
                .par_iter()
                .map(|params| evaluate(oracle, inputs, params, &subset, config.verbose))
                .collect()
        });
        let results: Vec<_> = candidates
            .into_iter()
            .zip(evaluations)
            .map(|(parameters, evaluation)| CandidateResult {
                parameters,
                evaluation,
            })
            .collect();
        for (i, result) in results.iter().enumerate() {
            match &result.evaluation {
                Evaluation::Scored { accuracy } => debug!("CAND\t{index}\t{i}\t{accuracy:.4}"),
                Evaluation::Disqualified { reason } => debug!("CAND\t{index}\t{i}\tNA\t{reason}"),
            }
        }
        let selected = select(&results).ok_or(PoissonError::AllCandidatesFailed(index))?;
        let iteration = TrainingIteration {
            index,
            candidates: results,
            selected,
        };
        let accuracy = iteration.accuracy();
        let previous = history.last().map(|it| it.accuracy());
        if 0 < iteration.disqualified() {
            warn!("TRAIN\t{index}\t{} candidates failed", iteration.disqualified());
        }
        current = iteration.selected_parameters().clone();
        history.push(iteration);
        checkpoint.save(&current, &history)?;
        info!("TRAIN\t{index}\t{accuracy:.4}\t{selected}");
        if let (Some(patience), Some(previous)) = (current.train.patience, previous) {
            match accuracy - previous <= current.train.epsilon {
                true => stale += 1,
                false => stale = 0,
            }
            if 0 < patience && patience <= stale {
                info!("TRAIN\tCONVERGED\t{index}");
                stop = StopReason::Converged;
                break;
            }
        }
    }
    Ok(TrainingOutcome {
        parameters: current,
        history,
        stop,
    })
}
