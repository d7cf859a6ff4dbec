use std::ops::ControlFlow;

use parking_lot::Mutex;
use serde::Serialize;

use super::objective::Objective;
use super::optimizer::GenerationState;
use super::types::{DecisionPair, ImprovingStep};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub point: Vec<f64>,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub calls: Vec<Evaluation>,
    pub improving: Vec<Evaluation>,
}

impl Trajectory {
    pub fn improving_steps(&self) -> Vec<ImprovingStep> {
        self.improving
            .iter()
            .enumerate()
            .map(|(i, eval)| {
                let decision = DecisionPair::from_point(&eval.point);
                ImprovingStep {
                    sequence_index: i + 1,
                    months_to_wait: decision.months_to_wait,
                    mortgage_years: decision.mortgage_years,
                    cost: eval.value,
                }
            })
            .collect()
    }
}

#[derive(Debug)]
struct Log {
    trajectory: Trajectory,
    best: f64,
}

/// Decorates an objective with a record of every evaluation.
///
/// The running minimum and both logs sit behind one lock, so the improving
/// log stays strictly decreasing even when evaluations race. Use one recorder
/// per optimization run.
#[derive(Debug)]
pub struct TrajectoryRecorder<O> {
    objective: O,
    target_cost: Option<f64>,
    log: Mutex<Log>,
}

impl<O: Objective> TrajectoryRecorder<O> {
    pub fn new(objective: O) -> Self {
        Self {
            objective,
            target_cost: None,
            log: Mutex::new(Log {
                trajectory: Trajectory::default(),
                best: f64::INFINITY,
            }),
        }
    }

    pub fn with_target_cost(mut self, cost: f64) -> Self {
        self.target_cost = Some(cost);
        self
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let value = self.objective.cost(x);
        let mut log = self.log.lock();
        let eval = Evaluation {
            point: x.to_vec(),
            value,
        };
        if value < log.best {
            log.best = value;
            log.trajectory.improving.push(eval.clone());
        }
        log.trajectory.calls.push(eval);
        value
    }

    pub fn on_generation(&self, state: &GenerationState<'_>) -> ControlFlow<()> {
        match self.target_cost {
            Some(target) if state.best_cost <= target => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().trajectory.calls.len()
    }

    pub fn best_value(&self) -> f64 {
        self.log.lock().best
    }

    pub fn snapshot(&self) -> Trajectory {
        self.log.lock().trajectory.clone()
    }

    pub fn into_trajectory(self) -> Trajectory {
        self.log.into_inner().trajectory
    }
}

impl<O: Objective> Objective for TrajectoryRecorder<O> {
    fn cost(&self, x: &[f64]) -> f64 {
        self.evaluate(x)
    }
}
