use thiserror::Error;

pub type PlannerResult<T> = Result<T, PlannerError>;

/// Failures surfaced by the planning pipeline.
///
/// An infeasible decision pair is not an error: the objective reports it as
/// `f64::INFINITY` and callers skip it. Errors are reserved for inputs that
/// make the formulas meaningless and for runs that cannot produce a plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("{name} must be a non-zero finite rate, got {value}")]
    DegenerateRate { name: &'static str, value: f64 },

    #[error("no feasible plan under current constraints")]
    NoFeasiblePlan,

    #[error("run cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl PlannerError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
