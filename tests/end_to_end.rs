use mortgage_planner::core::{
    CandidateSource, DecisionPair, GridScanner, OptimizerConfig, PlanOptions, PlannerError,
    RunControl, ScenarioParameters, decision_cost, plan_scenario, threshold_sweep,
};

const GRID_TOLERANCE: f64 = 1e-6;

fn scenario() -> ScenarioParameters {
    ScenarioParameters {
        rent_price_growth: 0.002,
        rent_price: 1_500.0,
        house_price_growth: 0.003,
        house_price: 300_000.0,
        monthly_mortgage_interest: 0.003,
        installment_threshold: 2_000.0,
        savings_per_month: 800.0,
        etf_growth: 0.005,
        initial_etf_savings: 5_000.0,
    }
}

fn options(seed: u64) -> PlanOptions {
    PlanOptions {
        optimizer: OptimizerConfig {
            seed: Some(seed),
            ..OptimizerConfig::default()
        },
        candidate_seed: Some(seed),
        control: RunControl::unbounded(),
    }
}

#[test]
fn plan_finds_the_grid_minimum_for_several_seeds() {
    let params = scenario();
    let grid = GridScanner::new(&params)
        .run(&RunControl::unbounded())
        .expect("scan succeeds");
    let grid_min = grid.matrix.min_cost();

    for seed in [1, 2, 3] {
        let report = plan_scenario(&params, &options(seed)).expect("feasible plan");
        assert!(report.optimal_cost.is_finite());
        assert!(report.optimal.months_to_wait >= 1);
        assert!((1..=30).contains(&report.optimal.mortgage_years));
        assert!(
            report.optimal_cost <= grid_min + GRID_TOLERANCE,
            "seed {seed}: optimizer {} above grid {grid_min}",
            report.optimal_cost
        );
        assert_eq!(report.optimal, DecisionPair::new(1, 17));
        assert!((report.optimal_cost - 102_274.705_384).abs() < 1e-3);
        assert_eq!(report.optimal_cost, decision_cost(&params, report.optimal));
    }
}

#[test]
fn report_projection_is_consistent_with_the_optimum() {
    let params = scenario();
    let report = plan_scenario(&params, &options(11)).expect("feasible plan");
    let projection = &report.projection;

    let cumulative = &projection.cost_comparison.optimal_cumulative_cost;
    let last = cumulative.last().copied().expect("non-empty series");
    assert!((last - report.optimal_cost).abs() < 1e-6 * report.optimal_cost);

    assert_eq!(projection.ownership.keep_savings.len(), 360);
    assert_eq!(projection.ownership.bought_house.len(), 361);

    let summary = &projection.summary;
    assert!(!summary.is_empty());
    assert!(summary.windows(2).all(|w| w[0].cost_function <= w[1].cost_function));
    assert!(summary.iter().all(|row| row.interest > 0.0));
    let mut pairs: Vec<(u32, u32)> = summary
        .iter()
        .map(|row| (row.months_to_wait, row.mortgage_years))
        .collect();
    assert_eq!(pairs.iter().filter(|p| **p == (1, 17)).count(), 1);
    pairs.sort_unstable();
    pairs.dedup();
    assert_eq!(pairs.len(), summary.len());

    let series = &projection.optimal_series;
    assert_eq!(series.periods.len() as u32, series.completion_period);
    assert_eq!(series.house_prices.len(), series.periods.len());

    assert!(report.candidates.len() <= 9);
    assert!(
        report
            .candidates
            .iter()
            .filter(|c| c.source == CandidateSource::Grid)
            .all(|c| c.cost.is_finite())
    );
}

#[test]
fn sweep_relaxes_the_threshold_and_shortens_the_term() {
    let params = scenario();
    let reports = threshold_sweep(&params, 500.0, 3, &options(5)).expect("sweep succeeds");

    let optima: Vec<(f64, DecisionPair)> = reports
        .iter()
        .map(|r| (r.parameters.installment_threshold, r.optimal))
        .collect();
    assert_eq!(
        optima,
        vec![
            (2_000.0, DecisionPair::new(1, 17)),
            (2_500.0, DecisionPair::new(1, 13)),
            (3_000.0, DecisionPair::new(1, 10)),
        ]
    );
    assert!((reports[1].optimal_cost - 77_248.117).abs() < 1e-2);
    assert!((reports[2].optimal_cost - 59_131.099).abs() < 1e-2);
}

#[test]
fn impossible_threshold_is_reported_as_no_feasible_plan() {
    let mut params = scenario().with_installment_threshold(100.0);
    params.savings_per_month = 0.0;
    params.initial_etf_savings = 0.0;
    let mut opts = options(3);
    opts.optimizer.max_generations = 5;
    assert_eq!(
        plan_scenario(&params, &opts).expect_err("nothing affordable"),
        PlannerError::NoFeasiblePlan
    );
}
