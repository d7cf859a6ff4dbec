use serde::Serialize;

use super::finance::{future_value, payment, total_interest};
use super::types::{DecisionPair, ScenarioParameters};

/// Scalar cost over a continuous point. Lower is better; `f64::INFINITY`
/// marks an infeasible point.
pub trait Objective: Sync {
    fn cost(&self, x: &[f64]) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    fn cost(&self, x: &[f64]) -> f64 {
        self(x)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feasibility {
    Feasible,
    InstallmentAboveThreshold,
    SavingsExceedHouseValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub future_house_value: f64,
    pub future_savings: f64,
    pub principal: f64,
    pub mortgage_interest: f64,
    pub total_rent: f64,
    pub house_appreciation_cost: f64,
    pub monthly_payment: f64,
    pub feasibility: Feasibility,
}

impl CostBreakdown {
    pub fn cost(&self) -> f64 {
        match self.feasibility {
            Feasibility::Feasible => {
                self.mortgage_interest + self.total_rent + self.house_appreciation_cost
            }
            _ => f64::INFINITY,
        }
    }
}

pub fn cost_breakdown(params: &ScenarioParameters, decision: DecisionPair) -> CostBreakdown {
    let months = decision.months_to_wait;
    let mortgage_months = decision.mortgage_months();

    let future_house_value = future_value(months, params.house_price_growth, params.house_price, 0.0);
    let future_savings = future_value(
        months,
        params.etf_growth,
        params.initial_etf_savings,
        params.savings_per_month,
    );
    let principal = future_house_value - future_savings;
    let mortgage_interest =
        total_interest(principal, params.monthly_mortgage_interest, mortgage_months);
    let total_rent = future_value(months, params.rent_price_growth, 0.0, params.rent_price);
    let house_appreciation_cost = future_house_value - params.house_price;
    let monthly_payment = payment(principal, params.monthly_mortgage_interest, mortgage_months);

    // NaN installments (zero-month terms) compare false here and fall through
    // to the savings check, like any other non-comparable value.
    let feasibility = if monthly_payment > params.installment_threshold {
        Feasibility::InstallmentAboveThreshold
    } else if future_savings > future_house_value {
        Feasibility::SavingsExceedHouseValue
    } else {
        Feasibility::Feasible
    };

    CostBreakdown {
        future_house_value,
        future_savings,
        principal,
        mortgage_interest,
        total_rent,
        house_appreciation_cost,
        monthly_payment,
        feasibility,
    }
}

/// Total cost of buying after `months_to_wait` with a `mortgage_years` loan:
/// mortgage interest, rent paid while waiting, and the appreciation of the
/// house over today's price.
pub fn decision_cost(params: &ScenarioParameters, decision: DecisionPair) -> f64 {
    cost_breakdown(params, decision).cost()
}

#[derive(Debug, Clone, Copy)]
pub struct MortgageObjective<'a> {
    params: &'a ScenarioParameters,
}

impl<'a> MortgageObjective<'a> {
    pub fn new(params: &'a ScenarioParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &'a ScenarioParameters {
        self.params
    }

    pub fn at(&self, decision: DecisionPair) -> f64 {
        decision_cost(self.params, decision)
    }
}

impl Objective for MortgageObjective<'_> {
    fn cost(&self, x: &[f64]) -> f64 {
        self.at(DecisionPair::from_point(x))
    }
}
