//! Month-by-month expansion of decision pairs into cost and asset series.
//!
//! The optimal pair is projected over a long axis that runs 30 years past the
//! end of its mortgage. Candidates share a second axis sized to the latest
//! purchase among them, so every candidate fits on one plot. Each projection
//! carries its amortization schedule and a cumulative realized cost: rent plus
//! appreciation up to the purchase month, then interest payments on top.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::error::{PlannerError, PlannerResult};
use super::finance::{Installment, amortization_schedule, future_value, payment};
use super::objective::decision_cost;
use super::types::{DecisionPair, HORIZON_MONTHS, ImprovingStep, ScenarioParameters};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CandidateSource {
    Optimizer,
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub decision: DecisionPair,
    pub cost: f64,
    pub source: CandidateSource,
}

impl Candidate {
    pub fn from_step(step: &ImprovingStep, source: CandidateSource) -> Self {
        Self {
            decision: step.decision(),
            cost: step.cost,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSeries {
    pub periods: Vec<u32>,
    pub rent_paid: Vec<f64>,
    pub house_prices: Vec<f64>,
    pub saved_amounts: Vec<f64>,
    pub appreciation_cost: Vec<f64>,
}

impl MarketSeries {
    pub fn build(params: &ScenarioParameters, len: u32) -> Self {
        let periods: Vec<u32> = (0..len).collect();
        let rent_paid: Vec<f64> = periods
            .iter()
            .map(|&k| future_value(k, params.rent_price_growth, 0.0, params.rent_price))
            .collect();
        let house_prices: Vec<f64> = periods
            .iter()
            .map(|&k| future_value(k, params.house_price_growth, params.house_price, 0.0))
            .collect();
        let saved_amounts = periods
            .iter()
            .map(|&k| {
                future_value(
                    k,
                    params.etf_growth,
                    params.initial_etf_savings,
                    params.savings_per_month,
                )
            })
            .collect();
        let appreciation_cost = house_prices.iter().map(|h| h - params.house_price).collect();
        Self {
            periods,
            rent_paid,
            house_prices,
            saved_amounts,
            appreciation_cost,
        }
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSeries {
    pub decision: DecisionPair,
    pub principal: f64,
    pub installment: f64,
    pub schedule: Vec<Installment>,
    /// Entry `k` is the realized cost at period `k`, through the final
    /// installment at `months_to_wait + mortgage_years * 12`.
    pub cumulative_cost: Vec<f64>,
}

impl ProjectionSeries {
    pub fn interest_payments(&self) -> Vec<f64> {
        self.schedule.iter().map(|i| i.interest).collect()
    }

    pub fn principal_payments(&self) -> Vec<f64> {
        self.schedule.iter().map(|i| i.principal).collect()
    }

    pub fn total_interest(&self) -> f64 {
        self.schedule.iter().map(|i| i.interest).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCostCurve {
    pub months_to_wait: u32,
    pub mortgage_years: u32,
    pub cumulative_cost: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostComparison {
    pub periods: Vec<u32>,
    pub candidate_costs: Vec<CandidateCostCurve>,
    pub optimal_cumulative_cost: Vec<f64>,
    pub optimal_months_to_wait: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipComparison {
    pub start_period: u32,
    /// Savings minus rent had the household kept renting.
    pub keep_savings: Vec<f64>,
    /// Realized equity at payoff, then equity plus renewed ETF accumulation.
    pub bought_house: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub months_to_wait: u32,
    pub mortgage_years: u32,
    pub cost_function: f64,
    pub house_value_at_step_n: f64,
    pub house_appreciation_cost: f64,
    pub savings_at_step_n: f64,
    pub rent_paid_at_step_n: f64,
    pub interest: f64,
    pub payments: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimalPlanSeries {
    pub periods: Vec<u32>,
    pub house_prices: Vec<f64>,
    pub rent_prices: Vec<f64>,
    pub saved_amounts: Vec<f64>,
    pub interest_payments: Vec<f64>,
    pub months_to_wait: u32,
    pub completion_period: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionReport {
    #[serde(rename = "scenario1")]
    pub cost_comparison: CostComparison,
    #[serde(rename = "scenario2")]
    pub ownership: OwnershipComparison,
    #[serde(rename = "scenario3")]
    pub summary: Vec<SummaryRow>,
    #[serde(rename = "scenario4")]
    pub optimal_series: OptimalPlanSeries,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy)]
pub struct ScenarioProjector<'a> {
    params: &'a ScenarioParameters,
}

impl<'a> ScenarioProjector<'a> {
    pub fn new(params: &'a ScenarioParameters) -> Self {
        Self { params }
    }

    /// `None` for infeasible or out-of-bounds pairs and for pairs whose
    /// mortgage does not end inside the axis.
    pub fn project(&self, market: &MarketSeries, decision: DecisionPair) -> Option<ProjectionSeries> {
        if !decision.is_within_bounds() || !decision_cost(self.params, decision).is_finite() {
            return None;
        }
        let m = decision.months_to_wait as usize;
        if decision.completion_period() as usize >= market.len() {
            return None;
        }

        let principal = market.house_prices[m] - market.saved_amounts[m];
        let rate = self.params.monthly_mortgage_interest;
        let periods = decision.mortgage_months();
        let schedule = amortization_schedule(principal, rate, periods);

        let mut cumulative_cost: Vec<f64> = market.rent_paid[..=m]
            .iter()
            .zip(&market.appreciation_cost[..=m])
            .map(|(rent, appreciation)| rent + appreciation)
            .collect();
        let mut running = cumulative_cost[m];
        cumulative_cost.reserve(schedule.len());
        for entry in &schedule {
            running += entry.interest;
            cumulative_cost.push(running);
        }

        Some(ProjectionSeries {
            decision,
            principal,
            installment: payment(principal, rate, periods),
            schedule,
            cumulative_cost,
        })
    }

    fn summary_row(
        market: &MarketSeries,
        projection: &ProjectionSeries,
        cost_function: f64,
    ) -> SummaryRow {
        let m = projection.decision.months_to_wait as usize;
        SummaryRow {
            months_to_wait: projection.decision.months_to_wait,
            mortgage_years: projection.decision.mortgage_years,
            cost_function: round2(cost_function),
            house_value_at_step_n: round2(market.house_prices[m]),
            house_appreciation_cost: round2(market.appreciation_cost[m]),
            savings_at_step_n: round2(market.saved_amounts[m]),
            rent_paid_at_step_n: round2(market.rent_paid[m]),
            interest: round2(projection.total_interest()),
            payments: round2(projection.installment),
        }
    }

    /// Candidates equal to the optimum, repeated, infeasible or out of bounds
    /// are skipped, so every decision pair appears once in the summary.
    pub fn compile(
        &self,
        optimal: DecisionPair,
        optimal_cost: f64,
        candidates: &[Candidate],
    ) -> PlannerResult<ProjectionReport> {
        if !optimal.is_within_bounds() {
            return Err(PlannerError::invalid(
                "optimal",
                format!(
                    "decision ({}, {}) is outside the search bounds",
                    optimal.months_to_wait, optimal.mortgage_years
                ),
            ));
        }
        let long_len = optimal.completion_period() + HORIZON_MONTHS;
        let market = MarketSeries::build(self.params, long_len);
        let optimal_projection = self
            .project(&market, optimal)
            .filter(|_| optimal_cost.is_finite())
            .ok_or(PlannerError::NoFeasiblePlan)?;

        let candidates: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.decision != optimal && c.decision.is_within_bounds())
            .collect();
        let latest_purchase = candidates
            .iter()
            .map(|c| c.decision.months_to_wait)
            .chain(std::iter::once(optimal.months_to_wait))
            .max()
            .unwrap_or(optimal.months_to_wait);
        let longest_term = candidates
            .iter()
            .map(|c| c.decision.mortgage_years)
            .max()
            .unwrap_or(0)
            .max(optimal.mortgage_years);
        // Purchases later than the horizon still need room for their whole term.
        let candidate_len = (latest_purchase + HORIZON_MONTHS + 1)
            .max(latest_purchase + longest_term * 12 + 1);
        let candidate_market = MarketSeries::build(self.params, candidate_len);

        let mut projections: BTreeMap<DecisionPair, ProjectionSeries> = BTreeMap::new();
        let mut projected: Vec<&Candidate> = Vec::new();
        let mut candidate_costs = Vec::new();
        for candidate in candidates {
            if projections.contains_key(&candidate.decision) {
                continue;
            }
            let Some(projection) = self.project(&candidate_market, candidate.decision) else {
                debug!(
                    months_to_wait = candidate.decision.months_to_wait,
                    mortgage_years = candidate.decision.mortgage_years,
                    "skipping infeasible candidate"
                );
                continue;
            };
            candidate_costs.push(CandidateCostCurve {
                months_to_wait: candidate.decision.months_to_wait,
                mortgage_years: candidate.decision.mortgage_years,
                cumulative_cost: projection.cumulative_cost.clone(),
            });
            projections.insert(candidate.decision, projection);
            projected.push(candidate);
        }

        let complete = optimal.completion_period() as usize;
        let m = optimal.months_to_wait as usize;
        let keep_savings: Vec<f64> = market.saved_amounts[complete..]
            .iter()
            .zip(&market.rent_paid[complete..])
            .map(|(saved, rent)| saved - rent)
            .collect();
        let realized_cost = market.rent_paid[m] + optimal_projection.total_interest();
        let equity = market.house_prices[complete] - realized_cost;
        let bought_house: Vec<f64> = std::iter::once(equity)
            .chain(
                market.saved_amounts[..HORIZON_MONTHS as usize]
                    .iter()
                    .map(|saved| equity + saved),
            )
            .collect();

        let mut summary: Vec<SummaryRow> = projected
            .iter()
            .filter_map(|candidate| {
                projections
                    .get(&candidate.decision)
                    .map(|projection| Self::summary_row(&candidate_market, projection, candidate.cost))
            })
            .chain(std::iter::once(Self::summary_row(
                &market,
                &optimal_projection,
                optimal_cost,
            )))
            .filter(|row| row.interest != 0.0)
            .collect();
        summary.sort_by(|a, b| {
            a.cost_function
                .total_cmp(&b.cost_function)
                .then(a.months_to_wait.cmp(&b.months_to_wait))
                .then(a.mortgage_years.cmp(&b.mortgage_years))
        });

        let optimal_series = OptimalPlanSeries {
            periods: market.periods[..complete].to_vec(),
            house_prices: market.house_prices[..complete].to_vec(),
            rent_prices: market.rent_paid[..complete].to_vec(),
            saved_amounts: market.saved_amounts[..complete].to_vec(),
            interest_payments: optimal_projection.interest_payments(),
            months_to_wait: optimal.months_to_wait,
            completion_period: optimal.completion_period(),
        };

        Ok(ProjectionReport {
            cost_comparison: CostComparison {
                periods: candidate_market.periods,
                candidate_costs,
                optimal_cumulative_cost: optimal_projection.cumulative_cost,
                optimal_months_to_wait: optimal.months_to_wait,
            },
            ownership: OwnershipComparison {
                start_period: optimal.completion_period(),
                keep_savings,
                bought_house,
            },
            summary,
            optimal_series,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::sample_parameters;

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn candidate(months: u32, years: u32, source: CandidateSource) -> Candidate {
        let params = sample_parameters();
        let decision = DecisionPair::new(months, years);
        Candidate {
            decision,
            cost: decision_cost(&params, decision),
            source,
        }
    }

    #[test]
    fn market_series_start_from_todays_values() {
        let params = sample_parameters();
        let market = MarketSeries::build(&params, 24);
        assert_eq!(market.len(), 24);
        assert_eq!(market.periods[23], 23);
        assert_eq!(market.rent_paid[0], 0.0);
        assert_eq!(market.house_prices[0], params.house_price);
        assert_eq!(market.saved_amounts[0], params.initial_etf_savings);
        assert_eq!(market.appreciation_cost[0], 0.0);
        assert_approx_tol(market.saved_amounts[1], 5_825.0, 1e-9);
    }

    #[test]
    fn projection_ends_at_the_objective_cost() {
        let params = sample_parameters();
        let projector = ScenarioProjector::new(&params);
        let decision = DecisionPair::new(40, 17);
        let market = MarketSeries::build(&params, 40 + 47 * 12);
        let projection = projector.project(&market, decision).expect("feasible");

        assert_eq!(projection.schedule.len(), 204);
        assert_eq!(projection.cumulative_cost.len(), 41 + 204);
        for entry in &projection.schedule {
            assert_approx_tol(entry.total(), projection.installment, 1e-9);
        }
        for k in 0..=40 {
            assert_eq!(
                projection.cumulative_cost[k],
                market.rent_paid[k] + market.appreciation_cost[k]
            );
        }
        let last = *projection.cumulative_cost.last().expect("non-empty");
        assert_approx_tol(last, decision_cost(&params, decision), 1e-6);
        assert!(
            projection
                .cumulative_cost
                .windows(2)
                .all(|w| w[1] >= w[0])
        );
    }

    #[test]
    fn infeasible_pairs_are_not_projected() {
        let params = sample_parameters();
        let market = MarketSeries::build(&params, 600);
        let projector = ScenarioProjector::new(&params);
        assert!(projector.project(&market, DecisionPair::new(1, 16)).is_none());
    }

    #[test]
    fn compile_builds_all_report_groups() {
        let params = sample_parameters();
        let projector = ScenarioProjector::new(&params);
        let optimal = DecisionPair::new(1, 17);
        let optimal_cost = decision_cost(&params, optimal);
        let candidates = [
            candidate(10, 20, CandidateSource::Optimizer),
            candidate(1, 16, CandidateSource::Optimizer),
            candidate(2, 17, CandidateSource::Grid),
            candidate(10, 20, CandidateSource::Grid),
        ];
        let report = projector
            .compile(optimal, optimal_cost, &candidates)
            .expect("feasible optimum");

        let series = &report.optimal_series;
        assert_eq!(series.periods.len(), 205);
        assert_eq!(series.periods.last(), Some(&204));
        assert_eq!(series.house_prices.len(), series.periods.len());
        assert_eq!(series.rent_prices.len(), series.periods.len());
        assert_eq!(series.saved_amounts.len(), series.periods.len());
        assert_eq!(series.interest_payments.len(), 204);
        assert_eq!(series.completion_period, 205);

        let comparison = &report.cost_comparison;
        assert_eq!(comparison.periods.len(), 10 + 360 + 1);
        assert_eq!(comparison.candidate_costs.len(), 2);
        assert_eq!(comparison.candidate_costs[0].months_to_wait, 10);
        assert_eq!(comparison.candidate_costs[1].months_to_wait, 2);
        assert_eq!(comparison.optimal_months_to_wait, 1);
        assert_approx_tol(
            *comparison.optimal_cumulative_cost.last().expect("non-empty"),
            optimal_cost,
            1e-6,
        );

        let ownership = &report.ownership;
        assert_eq!(ownership.start_period, 205);
        assert_eq!(ownership.keep_savings.len(), 360);
        assert_eq!(ownership.bought_house.len(), 361);
        assert_approx_tol(
            ownership.bought_house[1] - ownership.bought_house[0],
            params.initial_etf_savings,
            1e-6,
        );
    }

    #[test]
    fn summary_table_is_sorted_rounded_and_skips_infeasible_rows() {
        let params = sample_parameters();
        let projector = ScenarioProjector::new(&params);
        let optimal = DecisionPair::new(1, 17);
        let candidates = [
            candidate(24, 25, CandidateSource::Grid),
            candidate(1, 16, CandidateSource::Optimizer),
            candidate(3, 18, CandidateSource::Optimizer),
        ];
        let report = projector
            .compile(optimal, decision_cost(&params, optimal), &candidates)
            .expect("feasible optimum");

        let summary = &report.summary;
        assert_eq!(summary.len(), 3);
        assert!(summary.windows(2).all(|w| w[0].cost_function <= w[1].cost_function));
        assert_eq!(
            (summary[0].months_to_wait, summary[0].mortgage_years),
            (1, 17)
        );
        assert_eq!(summary[0].cost_function, 102_274.71);
        assert_eq!(summary[0].house_value_at_step_n, 300_900.0);
        assert_eq!(summary[0].savings_at_step_n, 5_825.0);
        assert_eq!(summary[0].rent_paid_at_step_n, 1_500.0);
        for row in summary {
            assert!(row.interest != 0.0);
            assert!(row.payments <= params.installment_threshold);
            assert_eq!(row.interest, (row.interest * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn infeasible_optimum_is_reported_as_no_feasible_plan() {
        let params = sample_parameters();
        let projector = ScenarioProjector::new(&params);
        let err = projector
            .compile(DecisionPair::new(1, 5), f64::INFINITY, &[])
            .expect_err("optimum is infeasible");
        assert_eq!(err, PlannerError::NoFeasiblePlan);
    }

    #[test]
    fn empty_candidate_list_still_produces_report() {
        let params = sample_parameters();
        let projector = ScenarioProjector::new(&params);
        let optimal = DecisionPair::new(1, 17);
        let report = projector
            .compile(optimal, decision_cost(&params, optimal), &[])
            .expect("feasible optimum");
        assert!(report.cost_comparison.candidate_costs.is_empty());
        assert_eq!(report.cost_comparison.periods.len(), 1 + 360 + 1);
        assert_eq!(report.summary.len(), 1);
    }

    #[test]
    fn summary_lists_each_decision_once() {
        let params = sample_parameters();
        let projector = ScenarioProjector::new(&params);
        let optimal = DecisionPair::new(1, 17);
        let candidates = [
            candidate(3, 18, CandidateSource::Optimizer),
            candidate(2, 17, CandidateSource::Optimizer),
            candidate(1, 17, CandidateSource::Optimizer),
            candidate(2, 17, CandidateSource::Grid),
            candidate(1, 17, CandidateSource::Grid),
        ];
        let report = projector
            .compile(optimal, decision_cost(&params, optimal), &candidates)
            .expect("feasible optimum");

        let pairs: Vec<(u32, u32)> = report
            .summary
            .iter()
            .map(|row| (row.months_to_wait, row.mortgage_years))
            .collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs.iter().filter(|p| **p == (1, 17)).count(), 1);
        assert_eq!(pairs.iter().filter(|p| **p == (2, 17)).count(), 1);
        assert_eq!(pairs[0], (1, 17));
        assert_eq!(report.cost_comparison.candidate_costs.len(), 2);
    }

    #[test]
    fn out_of_bounds_decisions_are_not_projected() {
        let params = sample_parameters();
        let projector = ScenarioProjector::new(&params);
        let market = MarketSeries::build(&params, 600);
        assert!(projector.project(&market, DecisionPair::new(1, 31)).is_none());
        assert!(
            projector
                .project(&market, DecisionPair::new(u32::MAX, u32::MAX))
                .is_none()
        );

        let err = projector
            .compile(DecisionPair::new(u32::MAX, 17), 1.0, &[])
            .expect_err("optimum outside the search box");
        assert!(matches!(err, PlannerError::InvalidParameter { .. }));
    }
}
