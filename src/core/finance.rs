//! Closed-form compounding and amortization formulas.
//!
//! All rates are per period. Every function here divides by the rate, so
//! callers must pass a non-zero rate; `ScenarioParameters::validate` enforces
//! that at the boundary and the formulas do not special-case it.

use serde::Serialize;

fn growth(rate: f64, period: u32) -> f64 {
    (1.0 + rate).powf(f64::from(period))
}

/// Value after `period` periods of `present_value` compounding at `rate` plus
/// an annuity of `payment` deposited at the end of each period.
pub fn future_value(period: u32, rate: f64, present_value: f64, payment: f64) -> f64 {
    let factor = growth(rate, period);
    present_value * factor + payment / rate * (factor - 1.0)
}

pub fn payment(principal: f64, rate: f64, periods: u32) -> f64 {
    let factor = growth(rate, periods);
    principal * (rate * factor) / (factor - 1.0)
}

pub fn total_interest(principal: f64, rate: f64, periods: u32) -> f64 {
    payment(principal, rate, periods) * f64::from(periods) - principal
}

/// Principal component of installment number `current_period` (0-based).
///
/// Walks the balance forward from the start on every call. Use
/// [`amortization_schedule`] when the whole schedule is needed.
pub fn principal_paid_at_period(
    current_period: u32,
    initial_principal: f64,
    rate: f64,
    total_periods: u32,
) -> f64 {
    let installment = payment(initial_principal, rate, total_periods);
    let mut balance = initial_principal;
    for _ in 0..current_period {
        balance -= installment - balance * rate;
    }
    installment - balance * rate
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    pub principal: f64,
    pub interest: f64,
}

impl Installment {
    pub fn total(&self) -> f64 {
        self.principal + self.interest
    }
}

/// Full schedule of `periods` installments in a single forward pass.
///
/// Entry `k` matches `principal_paid_at_period(k, ..)` step for step, with the
/// interest part being the installment minus that principal.
pub fn amortization_schedule(principal: f64, rate: f64, periods: u32) -> Vec<Installment> {
    let installment = payment(principal, rate, periods);
    let mut balance = principal;
    let mut schedule = Vec::with_capacity(periods as usize);
    for _ in 0..periods {
        let principal_part = installment - balance * rate;
        schedule.push(Installment {
            principal: principal_part,
            interest: installment - principal_part,
        });
        balance -= principal_part;
    }
    schedule
}
