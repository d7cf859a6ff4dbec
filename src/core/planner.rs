use rand::rngs::StdRng;
use rand::{SeedableRng, seq::index};
use rayon::prelude::*;
use tracing::{info, info_span, warn};

use super::error::{PlannerError, PlannerResult};
use super::grid::{CostMatrix, GridScanner};
use super::objective::{CostBreakdown, MortgageObjective, cost_breakdown};
use super::optimizer::{DifferentialEvolution, OptimizationResult, OptimizerConfig, RunControl};
use super::projection::{Candidate, CandidateSource, ProjectionReport, ScenarioProjector};
use super::recorder::TrajectoryRecorder;
use super::types::{DecisionPair, ImprovingStep, ScenarioParameters, search_bounds};

const OPTIMIZER_CANDIDATES: usize = 4;
const GRID_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub optimizer: OptimizerConfig,
    /// Seed for sampling grid candidates; `None` draws from the OS.
    pub candidate_seed: Option<u64>,
    pub control: RunControl,
}

#[derive(Debug, Clone)]
pub struct PlanReport {
    pub parameters: ScenarioParameters,
    pub optimal: DecisionPair,
    pub optimal_cost: f64,
    pub breakdown: CostBreakdown,
    pub optimization: OptimizationResult,
    pub grid: CostMatrix,
    pub grid_steps: Vec<ImprovingStep>,
    pub optimizer_steps: Vec<ImprovingStep>,
    pub candidates: Vec<Candidate>,
    pub projection: ProjectionReport,
}

/// From the optimizer's improving log, the last five finite steps minus the
/// very last; plus up to five grid improving steps sampled without
/// replacement, kept in raster order.
pub fn select_candidates(
    optimizer_steps: &[ImprovingStep],
    grid_steps: &[ImprovingStep],
    rng: &mut StdRng,
) -> Vec<Candidate> {
    let finite: Vec<&ImprovingStep> = optimizer_steps
        .iter()
        .filter(|s| s.cost.is_finite())
        .collect();
    let tail_start = finite.len().saturating_sub(OPTIMIZER_CANDIDATES + 1);
    let mut candidates: Vec<Candidate> = finite[tail_start..]
        .iter()
        .take(OPTIMIZER_CANDIDATES)
        .map(|step| Candidate::from_step(step, CandidateSource::Optimizer))
        .collect();

    let amount = GRID_CANDIDATES.min(grid_steps.len());
    let mut picked = index::sample(rng, grid_steps.len(), amount).into_vec();
    picked.sort_unstable();
    candidates.extend(
        picked
            .into_iter()
            .map(|i| Candidate::from_step(&grid_steps[i], CandidateSource::Grid)),
    );
    candidates
}

pub fn plan_scenario(params: &ScenarioParameters, options: &PlanOptions) -> PlannerResult<PlanReport> {
    params.validate()?;
    let span = info_span!("plan", threshold = params.installment_threshold);
    let _guard = span.enter();

    let objective = MortgageObjective::new(params);
    let recorder = TrajectoryRecorder::new(objective);
    let optimizer = DifferentialEvolution::new(&search_bounds(), options.optimizer)?;
    let optimization = optimizer.run(
        &recorder,
        |state| recorder.on_generation(state),
        &options.control,
    );
    options.control.check()?;
    if !optimization.is_feasible() {
        warn!(
            evaluations = optimization.evaluations,
            "no feasible plan under current constraints"
        );
        return Err(PlannerError::NoFeasiblePlan);
    }
    let optimal = optimization.decision;
    let optimal_cost = optimization.cost;
    let optimizer_steps = recorder.into_trajectory().improving_steps();

    let scan = GridScanner::new(params).run(&options.control)?;
    let grid_min = scan.matrix.min_cost();
    if optimal_cost > grid_min {
        warn!(
            optimizer_cost = optimal_cost,
            grid_cost = grid_min,
            "optimizer finished above the grid minimum"
        );
    }

    let mut rng = match options.candidate_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let candidates = select_candidates(&optimizer_steps, &scan.improving_steps, &mut rng);
    let projection = ScenarioProjector::new(params).compile(optimal, optimal_cost, &candidates)?;

    info!(
        months_to_wait = optimal.months_to_wait,
        mortgage_years = optimal.mortgage_years,
        cost = optimal_cost,
        candidates = candidates.len(),
        "plan ready"
    );
    Ok(PlanReport {
        parameters: *params,
        optimal,
        optimal_cost,
        breakdown: cost_breakdown(params, optimal),
        optimization,
        grid: scan.matrix,
        grid_steps: scan.improving_steps,
        optimizer_steps,
        candidates,
        projection,
    })
}

/// Independent plans with the installment threshold raised by `step` each
/// time: `threshold`, `threshold + step`, ... (`count` plans).
pub fn threshold_sweep(
    params: &ScenarioParameters,
    step: f64,
    count: u32,
    options: &PlanOptions,
) -> PlannerResult<Vec<PlanReport>> {
    if !step.is_finite() || step < 0.0 {
        return Err(PlannerError::invalid("step", "must be a finite amount >= 0"));
    }
    if count == 0 {
        return Err(PlannerError::invalid("count", "must be > 0"));
    }
    (0..count)
        .into_par_iter()
        .map(|k| {
            let threshold = params.installment_threshold + step * f64::from(k);
            plan_scenario(&params.with_installment_threshold(threshold), options)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::sample_parameters;

    fn step(index: usize, months: u32, years: u32, cost: f64) -> ImprovingStep {
        ImprovingStep {
            sequence_index: index,
            months_to_wait: months,
            mortgage_years: years,
            cost,
        }
    }

    fn seeded_options() -> PlanOptions {
        PlanOptions {
            optimizer: OptimizerConfig {
                seed: Some(42),
                ..OptimizerConfig::default()
            },
            candidate_seed: Some(42),
            control: RunControl::unbounded(),
        }
    }

    #[test]
    fn candidates_take_the_optimizer_tail_without_the_final_step() {
        let optimizer_steps: Vec<ImprovingStep> = (1..=8)
            .map(|i| step(i, 10 - i as u32, 20, 1_000.0 - i as f64))
            .collect();
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = select_candidates(&optimizer_steps, &[], &mut rng);

        let months: Vec<u32> = candidates.iter().map(|c| c.decision.months_to_wait).collect();
        assert_eq!(months, vec![6, 5, 4, 3]);
        assert!(candidates.iter().all(|c| c.source == CandidateSource::Optimizer));
    }

    #[test]
    fn short_optimizer_logs_are_taken_whole_up_to_four() {
        let optimizer_steps = vec![step(1, 5, 20, 10.0), step(2, 4, 20, 9.0)];
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = select_candidates(&optimizer_steps, &[], &mut rng);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn grid_candidates_are_sampled_without_replacement_in_raster_order() {
        let grid_steps: Vec<ImprovingStep> = (1..=12)
            .map(|i| step(i, i as u32, 30 - i as u32, 500.0 - i as f64))
            .collect();
        let mut rng = StdRng::seed_from_u64(9);
        let candidates = select_candidates(&[], &grid_steps, &mut rng);

        assert_eq!(candidates.len(), 5);
        assert!(candidates.iter().all(|c| c.source == CandidateSource::Grid));
        assert!(
            candidates
                .windows(2)
                .all(|w| w[0].decision.months_to_wait < w[1].decision.months_to_wait)
        );
    }

    #[test]
    fn short_grid_logs_are_taken_whole() {
        let grid_steps = vec![step(1, 1, 17, 1.0)];
        let mut rng = StdRng::seed_from_u64(9);
        let candidates = select_candidates(&[], &grid_steps, &mut rng);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].decision, DecisionPair::new(1, 17));
    }

    #[test]
    fn plan_matches_the_grid_minimum() {
        let params = sample_parameters();
        let report = plan_scenario(&params, &seeded_options()).expect("feasible plan");

        assert_eq!(report.optimal, DecisionPair::new(1, 17));
        assert!((report.optimal_cost - 102_274.705_383_977_6).abs() < 1e-4);
        assert!(report.optimal_cost <= report.grid.min_cost());
        assert_eq!(report.grid.argmin().map(|(d, _)| d), Some(report.optimal));
        assert!(!report.optimizer_steps.is_empty());
        assert_eq!(report.projection.summary[0].months_to_wait, 1);
        assert_eq!(report.projection.summary[0].mortgage_years, 17);
    }

    #[test]
    fn invalid_parameters_fail_before_any_search() {
        let mut params = sample_parameters();
        params.house_price_growth = 0.0;
        let err = plan_scenario(&params, &seeded_options()).expect_err("zero rate");
        assert!(matches!(
            err,
            PlannerError::DegenerateRate {
                name: "house_price_growth",
                ..
            }
        ));
    }

    #[test]
    fn unreachable_threshold_reports_no_feasible_plan() {
        let mut params = sample_parameters().with_installment_threshold(100.0);
        params.savings_per_month = 0.0;
        params.initial_etf_savings = 0.0;
        let mut options = seeded_options();
        options.optimizer.max_generations = 10;
        let err = plan_scenario(&params, &options).expect_err("nothing is affordable");
        assert_eq!(err, PlannerError::NoFeasiblePlan);
    }

    #[test]
    fn sweep_raises_threshold_and_never_increases_cost() {
        let params = sample_parameters();
        let reports = threshold_sweep(&params, 500.0, 3, &seeded_options()).expect("sweep succeeds");

        let thresholds: Vec<f64> = reports
            .iter()
            .map(|r| r.parameters.installment_threshold)
            .collect();
        assert_eq!(thresholds, vec![2_000.0, 2_500.0, 3_000.0]);
        let optima: Vec<DecisionPair> = reports.iter().map(|r| r.optimal).collect();
        assert_eq!(
            optima,
            vec![
                DecisionPair::new(1, 17),
                DecisionPair::new(1, 13),
                DecisionPair::new(1, 10)
            ]
        );
        assert!(reports.windows(2).all(|w| w[1].optimal_cost <= w[0].optimal_cost));
    }

    #[test]
    fn sweep_rejects_zero_count() {
        let params = sample_parameters();
        assert!(threshold_sweep(&params, 500.0, 0, &seeded_options()).is_err());
    }
}
