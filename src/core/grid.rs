use std::ops::Range;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use super::error::PlannerResult;
use super::objective::decision_cost;
use super::optimizer::RunControl;
use super::types::{DecisionPair, ImprovingStep, MONTHS_BOUNDS, ScenarioParameters, YEARS_BOUNDS};

/// Objective values over the full lattice, indexed `[years_idx, months_idx]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    months: Vec<u32>,
    years: Vec<u32>,
    costs: Array2<f64>,
}

impl CostMatrix {
    pub fn months(&self) -> &[u32] {
        &self.months
    }

    pub fn years(&self) -> &[u32] {
        &self.years
    }

    pub fn costs(&self) -> &Array2<f64> {
        &self.costs
    }

    pub fn get(&self, decision: DecisionPair) -> Option<f64> {
        let i = self.months.iter().position(|m| *m == decision.months_to_wait)?;
        let j = self.years.iter().position(|y| *y == decision.mortgage_years)?;
        Some(self.costs[[j, i]])
    }

    pub fn min_cost(&self) -> f64 {
        self.costs.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// First cell in raster order holding the minimum, if any is finite.
    pub fn argmin(&self) -> Option<(DecisionPair, f64)> {
        let mut best: Option<(DecisionPair, f64)> = None;
        for (i, months) in self.months.iter().enumerate() {
            for (j, years) in self.years.iter().enumerate() {
                let cost = self.costs[[j, i]];
                if cost.is_finite() && best.is_none_or(|(_, b)| cost < b) {
                    best = Some((DecisionPair::new(*months, *years), cost));
                }
            }
        }
        best
    }

    pub fn feasible_cells(&self) -> usize {
        self.costs.iter().filter(|c| c.is_finite()).count()
    }

    pub fn rows(&self) -> Vec<Vec<Option<f64>>> {
        self.costs
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .map(|c| c.is_finite().then_some(*c))
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridScan {
    pub matrix: CostMatrix,
    pub improving_steps: Vec<ImprovingStep>,
}

#[derive(Debug, Clone)]
pub struct GridScanner<'a> {
    params: &'a ScenarioParameters,
    months: Range<u32>,
    years: Range<u32>,
}

impl<'a> GridScanner<'a> {
    /// Scans months in `[1, 480)` and years in `[1, 30)`.
    pub fn new(params: &'a ScenarioParameters) -> Self {
        Self::with_ranges(
            params,
            MONTHS_BOUNDS.0..MONTHS_BOUNDS.1,
            YEARS_BOUNDS.0..YEARS_BOUNDS.1,
        )
    }

    pub fn with_ranges(params: &'a ScenarioParameters, months: Range<u32>, years: Range<u32>) -> Self {
        Self {
            params,
            months,
            years,
        }
    }

    /// Cells are evaluated in parallel, one column per months value; the
    /// improving steps come from a sequential raster pass afterwards
    /// (months outer, years inner) so their order never depends on
    /// scheduling.
    pub fn run(&self, control: &RunControl) -> PlannerResult<GridScan> {
        let months: Vec<u32> = self.months.clone().collect();
        let years: Vec<u32> = self.years.clone().collect();
        debug!(months = months.len(), years = years.len(), "scanning cost grid");

        let columns = months
            .par_iter()
            .map(|&m| -> PlannerResult<Vec<f64>> {
                control.check()?;
                Ok(years
                    .iter()
                    .map(|&y| decision_cost(self.params, DecisionPair::new(m, y)))
                    .collect())
            })
            .collect::<PlannerResult<Vec<Vec<f64>>>>()?;

        let costs = Array2::from_shape_fn((years.len(), months.len()), |(j, i)| columns[i][j]);

        let mut improving_steps = Vec::new();
        let mut best = f64::INFINITY;
        for (i, &m) in months.iter().enumerate() {
            for (j, &y) in years.iter().enumerate() {
                let cost = costs[[j, i]];
                if cost < best {
                    best = cost;
                    improving_steps.push(ImprovingStep {
                        sequence_index: improving_steps.len() + 1,
                        months_to_wait: m,
                        mortgage_years: y,
                        cost,
                    });
                }
            }
        }

        let matrix = CostMatrix {
            months,
            years,
            costs,
        };
        info!(
            feasible_cells = matrix.feasible_cells(),
            improving_steps = improving_steps.len(),
            min_cost = best,
            "cost grid scanned"
        );
        Ok(GridScan {
            matrix,
            improving_steps,
        })
    }
}
