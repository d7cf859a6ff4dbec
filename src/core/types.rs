use serde::{Deserialize, Serialize};

use super::error::{PlannerError, PlannerResult};

pub const MONTHS_BOUNDS: (u32, u32) = (1, 40 * 12);
pub const YEARS_BOUNDS: (u32, u32) = (1, 30);

pub const HORIZON_MONTHS: u32 = 30 * 12;

/// Scenario inputs. Rates are monthly fractions (0.003, not 0.3%).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioParameters {
    pub rent_price_growth: f64,
    pub rent_price: f64,
    pub house_price_growth: f64,
    pub house_price: f64,
    pub monthly_mortgage_interest: f64,
    pub installment_threshold: f64,
    pub savings_per_month: f64,
    pub etf_growth: f64,
    pub initial_etf_savings: f64,
}

impl ScenarioParameters {
    /// Every rate divides somewhere (the annuity term of the future value or
    /// the amortized payment), so a zero rate is a `DegenerateRate` rather
    /// than something to special-case.
    pub fn validate(&self) -> PlannerResult<()> {
        for (name, value) in [
            ("rent_price_growth", self.rent_price_growth),
            ("house_price_growth", self.house_price_growth),
            ("monthly_mortgage_interest", self.monthly_mortgage_interest),
            ("etf_growth", self.etf_growth),
        ] {
            if !value.is_finite() || value == 0.0 {
                return Err(PlannerError::DegenerateRate { name, value });
            }
            if value <= -1.0 {
                return Err(PlannerError::invalid(name, "must be > -1"));
            }
        }

        for (name, value) in [
            ("rent_price", self.rent_price),
            ("savings_per_month", self.savings_per_month),
            ("initial_etf_savings", self.initial_etf_savings),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PlannerError::invalid(name, "must be a finite amount >= 0"));
            }
        }

        if !self.house_price.is_finite() || self.house_price <= 0.0 {
            return Err(PlannerError::invalid("house_price", "must be > 0"));
        }
        if !self.installment_threshold.is_finite() || self.installment_threshold <= 0.0 {
            return Err(PlannerError::invalid(
                "installment_threshold",
                "must be > 0",
            ));
        }
        Ok(())
    }

    pub fn with_installment_threshold(self, installment_threshold: f64) -> Self {
        Self {
            installment_threshold,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPair {
    pub months_to_wait: u32,
    pub mortgage_years: u32,
}

impl DecisionPair {
    pub fn new(months_to_wait: u32, mortgage_years: u32) -> Self {
        Self {
            months_to_wait,
            mortgage_years,
        }
    }

    /// Ties round to even, so 2.5 months becomes 2 and 3.5 becomes 4.
    pub fn from_point(x: &[f64]) -> Self {
        let snap = |v: f64| v.round_ties_even().max(0.0) as u32;
        Self {
            months_to_wait: x.first().copied().map(snap).unwrap_or(0),
            mortgage_years: x.get(1).copied().map(snap).unwrap_or(0),
        }
    }

    pub fn mortgage_months(self) -> u32 {
        self.mortgage_years.saturating_mul(12)
    }

    pub fn completion_period(self) -> u32 {
        self.months_to_wait.saturating_add(self.mortgage_months())
    }

    pub fn is_within_bounds(self) -> bool {
        (MONTHS_BOUNDS.0..=MONTHS_BOUNDS.1).contains(&self.months_to_wait)
            && (YEARS_BOUNDS.0..=YEARS_BOUNDS.1).contains(&self.mortgage_years)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovingStep {
    pub sequence_index: usize,
    pub months_to_wait: u32,
    pub mortgage_years: u32,
    pub cost: f64,
}

impl ImprovingStep {
    pub fn decision(&self) -> DecisionPair {
        DecisionPair::new(self.months_to_wait, self.mortgage_years)
    }
}

pub fn search_bounds() -> [(f64, f64); 2] {
    [
        (f64::from(MONTHS_BOUNDS.0), f64::from(MONTHS_BOUNDS.1)),
        (f64::from(YEARS_BOUNDS.0), f64::from(YEARS_BOUNDS.1)),
    ]
}

#[cfg(test)]
pub(crate) fn sample_parameters() -> ScenarioParameters {
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
