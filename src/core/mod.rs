mod error;
mod finance;
mod grid;
mod objective;
mod optimizer;
mod planner;
mod projection;
mod recorder;
mod types;

pub use error::{PlannerError, PlannerResult};
pub use finance::{
    Installment, amortization_schedule, future_value, payment, principal_paid_at_period,
    total_interest,
};
pub use grid::{CostMatrix, GridScan, GridScanner};
pub use objective::{
    CostBreakdown, Feasibility, MortgageObjective, Objective, cost_breakdown, decision_cost,
};
pub use optimizer::{
    DifferentialEvolution, GenerationState, OptimizationResult, OptimizerConfig, RunControl,
    Termination,
};
pub use planner::{PlanOptions, PlanReport, plan_scenario, select_candidates, threshold_sweep};
pub use projection::{
    Candidate, CandidateCostCurve, CandidateSource, CostComparison, MarketSeries,
    OptimalPlanSeries, OwnershipComparison, ProjectionReport, ProjectionSeries,
    ScenarioProjector, SummaryRow,
};
pub use recorder::{Evaluation, Trajectory, TrajectoryRecorder};
pub use types::{
    DecisionPair, HORIZON_MONTHS, ImprovingStep, MONTHS_BOUNDS, ScenarioParameters,
    YEARS_BOUNDS, search_bounds,
};
