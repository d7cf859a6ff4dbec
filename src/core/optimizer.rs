//! Bounded differential evolution (`best1bin`) with a per-generation callback.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::error::{PlannerError, PlannerResult};
use super::objective::Objective;
use super::types::DecisionPair;

#[derive(Debug, Clone, Default)]
pub struct RunControl {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl RunControl {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    pub fn check(&self) -> PlannerResult<()> {
        if let Some(flag) = &self.cancelled {
            if flag.load(Ordering::Relaxed) {
                return Err(PlannerError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PlannerError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    pub population_size: usize,
    pub max_generations: u32,
    /// Differential weight, redrawn uniformly from this range every generation.
    pub mutation: (f64, f64),
    pub recombination: f64,
    pub tolerance: f64,
    pub absolute_tolerance: f64,
    pub seed: Option<u64>,
    pub polish: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: 15,
            max_generations: 1_000,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            tolerance: 0.01,
            absolute_tolerance: 0.0,
            seed: None,
            polish: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationState<'a> {
    pub generation: u32,
    pub best_point: &'a [f64],
    pub best_cost: f64,
    /// Relative spread of the population energies; `+inf` while any member is
    /// infeasible.
    pub convergence: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    Converged,
    MaxGenerations,
    CallbackStopped,
    Cancelled,
    DeadlineExceeded,
}

impl Termination {
    fn message(self) -> &'static str {
        match self {
            Termination::Converged => "Optimization terminated successfully.",
            Termination::MaxGenerations => "Maximum number of generations has been exceeded.",
            Termination::CallbackStopped => "Callback function requested stop early.",
            Termination::Cancelled => "Run cancelled before convergence.",
            Termination::DeadlineExceeded => "Deadline exceeded before convergence.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub point: Vec<f64>,
    pub decision: DecisionPair,
    pub cost: f64,
    pub generations: u32,
    pub evaluations: usize,
    pub success: bool,
    pub termination: Termination,
    pub message: String,
}

impl OptimizationResult {
    pub fn is_feasible(&self) -> bool {
        self.cost.is_finite()
    }
}

#[derive(Debug, Clone)]
pub struct DifferentialEvolution {
    bounds: Vec<(f64, f64)>,
    config: OptimizerConfig,
}

impl DifferentialEvolution {
    pub fn new(bounds: &[(f64, f64)], config: OptimizerConfig) -> PlannerResult<Self> {
        if bounds.is_empty() {
            return Err(PlannerError::invalid("bounds", "at least one dimension is required"));
        }
        if bounds
            .iter()
            .any(|(lo, hi)| !lo.is_finite() || !hi.is_finite() || lo >= hi)
        {
            return Err(PlannerError::invalid("bounds", "each range must be finite with lo < hi"));
        }
        if config.population_size == 0 {
            return Err(PlannerError::invalid("population_size", "must be > 0"));
        }
        if config.max_generations == 0 {
            return Err(PlannerError::invalid("max_generations", "must be > 0"));
        }
        let (m_lo, m_hi) = config.mutation;
        if !(0.0..=2.0).contains(&m_lo) || !(0.0..=2.0).contains(&m_hi) || m_lo > m_hi {
            return Err(PlannerError::invalid(
                "mutation",
                "range must lie within [0, 2] with lo <= hi",
            ));
        }
        if !(0.0..=1.0).contains(&config.recombination) {
            return Err(PlannerError::invalid("recombination", "must be between 0 and 1"));
        }
        if [config.tolerance, config.absolute_tolerance]
            .iter()
            .any(|t| t.is_nan() || *t < 0.0)
        {
            return Err(PlannerError::invalid("tolerance", "must be >= 0"));
        }
        Ok(Self {
            bounds: bounds.to_vec(),
            config,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn dims(&self) -> usize {
        self.bounds.len()
    }

    fn scale(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .zip(&self.bounds)
            .map(|(u, (lo, hi))| lo + u * (hi - lo))
            .collect()
    }

    /// `callback` runs once per generation; returning `ControlFlow::Break`
    /// ends the run. A run that never sees a finite cost still terminates and
    /// reports its infinite best.
    pub fn run<O, C>(&self, objective: &O, mut callback: C, control: &RunControl) -> OptimizationResult
    where
        O: Objective + ?Sized,
        C: FnMut(&GenerationState<'_>) -> ControlFlow<()>,
    {
        let dims = self.dims();
        let size = (self.config.population_size * dims).max(5);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        debug!(dims, population = size, seed = ?self.config.seed, "starting differential evolution");

        let mut population = latin_hypercube(size, dims, &mut rng);
        let mut energies: Vec<f64> = population
            .iter()
            .map(|member| objective.cost(&self.scale(member)))
            .collect();
        let mut evaluations = size;
        let mut best = argmin(&energies);

        let mut termination = Termination::MaxGenerations;
        let mut generations = 0;
        let (m_lo, m_hi) = self.config.mutation;

        for generation in 1..=self.config.max_generations {
            if let Err(err) = control.check() {
                termination = match err {
                    PlannerError::DeadlineExceeded => Termination::DeadlineExceeded,
                    _ => Termination::Cancelled,
                };
                break;
            }
            generations = generation;

            let weight = if m_lo < m_hi {
                rng.random_range(m_lo..m_hi)
            } else {
                m_lo
            };

            for i in 0..size {
                let (r0, r1) = pick_two_others(i, size, &mut rng);
                let fill_point = rng.random_range(0..dims);
                let mut trial = population[i].clone();
                for d in 0..dims {
                    if d == fill_point || rng.random::<f64>() < self.config.recombination {
                        trial[d] = population[best][d]
                            + weight * (population[r0][d] - population[r1][d]);
                    }
                }
                for value in trial.iter_mut() {
                    let v = *value;
                    if !(0.0..=1.0).contains(&v) {
                        *value = rng.random::<f64>();
                    }
                }

                let energy = objective.cost(&self.scale(&trial));
                evaluations += 1;
                if energy <= energies[i] {
                    population[i] = trial;
                    energies[i] = energy;
                    if energy < energies[best] {
                        best = i;
                    }
                }
            }

            let convergence = relative_spread(&energies);
            let best_point = self.scale(&population[best]);
            let state = GenerationState {
                generation,
                best_point: &best_point,
                best_cost: energies[best],
                convergence,
            };
            trace!(generation, best_cost = energies[best], convergence, "generation complete");

            if callback(&state).is_break() {
                termination = Termination::CallbackStopped;
                break;
            }
            if self.has_converged(&energies) {
                termination = Termination::Converged;
                break;
            }
        }

        let mut point = self.scale(&population[best]);
        let mut cost = energies[best];
        if self.config.polish && cost.is_finite() && control.check().is_ok() {
            let (polished, polished_cost, used) = self.lattice_polish(objective, point, cost);
            point = polished;
            cost = polished_cost;
            evaluations += used;
        }

        let result = OptimizationResult {
            decision: DecisionPair::from_point(&point),
            point,
            cost,
            generations,
            evaluations,
            success: termination == Termination::Converged,
            termination,
            message: termination.message().to_string(),
        };
        if result.is_feasible() {
            info!(
                months_to_wait = result.decision.months_to_wait,
                mortgage_years = result.decision.mortgage_years,
                cost = result.cost,
                generations = result.generations,
                evaluations = result.evaluations,
                "differential evolution finished"
            );
        } else {
            warn!(
                generations = result.generations,
                evaluations = result.evaluations,
                "differential evolution found no finite cost"
            );
        }
        result
    }

    fn has_converged(&self, energies: &[f64]) -> bool {
        if energies.iter().any(|e| !e.is_finite()) {
            return false;
        }
        let (mean, std) = mean_and_std(energies);
        std <= self.config.absolute_tolerance + self.config.tolerance * mean.abs()
    }

    fn lattice_polish<O>(&self, objective: &O, start: Vec<f64>, start_cost: f64) -> (Vec<f64>, f64, usize)
    where
        O: Objective + ?Sized,
    {
        let dims = self.dims();
        if self.bounds.iter().any(|(lo, hi)| lo.ceil() > hi.floor()) {
            return (start, start_cost, 0);
        }
        let mut current: Vec<f64> = start
            .iter()
            .zip(&self.bounds)
            .map(|(x, (lo, hi))| x.round_ties_even().clamp(lo.ceil(), hi.floor()))
            .collect();
        let mut evaluations = 1;
        let mut current_cost = objective.cost(&current);
        if current_cost.is_nan() || current_cost > start_cost {
            current = start;
            current_cost = start_cost;
        }

        let offsets = neighbour_offsets(dims);
        loop {
            let mut best_move: Option<(Vec<f64>, f64)> = None;
            for offset in &offsets {
                let candidate: Vec<f64> = current
                    .iter()
                    .zip(offset)
                    .map(|(x, step)| x + f64::from(*step))
                    .collect();
                let inside = candidate
                    .iter()
                    .zip(&self.bounds)
                    .all(|(x, (lo, hi))| x >= lo && x <= hi);
                if !inside {
                    continue;
                }
                let cost = objective.cost(&candidate);
                evaluations += 1;
                let threshold = best_move.as_ref().map_or(current_cost, |(_, c)| *c);
                if cost < threshold {
                    best_move = Some((candidate, cost));
                }
            }
            match best_move {
                Some((point, cost)) => {
                    current = point;
                    current_cost = cost;
                }
                None => break,
            }
        }
        (current, current_cost, evaluations)
    }
}

fn latin_hypercube(size: usize, dims: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let segment = 1.0 / size as f64;
    let mut population = vec![vec![0.0; dims]; size];
    for d in 0..dims {
        let mut column: Vec<f64> = (0..size)
            .map(|k| (k as f64 + rng.random::<f64>()) * segment)
            .collect();
        column.shuffle(rng);
        for (member, value) in population.iter_mut().zip(column) {
            member[d] = value;
        }
    }
    population
}

fn pick_two_others(i: usize, size: usize, rng: &mut StdRng) -> (usize, usize) {
    let mut r0 = rng.random_range(0..size);
    while r0 == i {
        r0 = rng.random_range(0..size);
    }
    let mut r1 = rng.random_range(0..size);
    while r1 == i || r1 == r0 {
        r1 = rng.random_range(0..size);
    }
    (r0, r1)
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn relative_spread(energies: &[f64]) -> f64 {
    if energies.iter().any(|e| !e.is_finite()) {
        return f64::INFINITY;
    }
    let (mean, std) = mean_and_std(energies);
    std / mean.abs()
}

fn neighbour_offsets(dims: usize) -> Vec<Vec<i32>> {
    let mut offsets = vec![Vec::new()];
    for _ in 0..dims {
        offsets = offsets
            .into_iter()
            .flat_map(|prefix| {
                [-1, 0, 1].into_iter().map(move |step| {
                    let mut next = prefix.clone();
                    next.push(step);
                    next
                })
            })
            .collect();
    }
    offsets.retain(|o| o.iter().any(|s| *s != 0));
    offsets
}
