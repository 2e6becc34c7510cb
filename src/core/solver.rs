use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::interpolation::{ExtrapolationMode, InterpolationError, MonotoneCubicInterpolator};
use super::optimizer::{BoxConstraints, NelderMeadOptions, TerminationReason, nelder_mead};
use super::params::{Params, ParamsError};
use super::quadrature::NormalQuadrature;
use super::types::{AgeSolution, CellStatus, LifecycleSolution};
use super::utility::{
    CellObjective, ContinuationValue, Decision, UTILITY_FLOOR, terminal_utility,
};

/// Wealth at or below this leaves nothing to consume or invest.
pub const WEALTH_EPSILON: f64 = 1e-12;

/// Rates at or above this save nothing, so the equity share is reported at the floor.
const FULL_CONSUMPTION_RATE: f64 = 1.0 - 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub nelder_mead: NelderMeadOptions,
    /// Starting `[consumption_rate, equity_share]` for every cell.
    pub initial_guess: [f64; 2],
    pub parallel: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            nelder_mead: NelderMeadOptions::default(),
            initial_guess: [0.5, 0.99],
            parallel: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("cannot build value function from age {age}: {source}")]
    ValueFunction {
        age: u32,
        #[source]
        source: InterpolationError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSolution {
    pub consumption_rate: f64,
    pub equity_share: f64,
    pub value: f64,
    pub status: CellStatus,
    pub iterations: usize,
}

/// Continuation value built from one solved age: monotone cubic in wealth,
/// linear beyond the grid, never negative.
#[derive(Debug, Clone)]
pub struct ValueFunction {
    interpolant: MonotoneCubicInterpolator,
}

impl ValueFunction {
    pub fn from_values(wealth_grid: &[f64], values: &[f64]) -> Result<Self, InterpolationError> {
        let interpolant = MonotoneCubicInterpolator::new(
            wealth_grid.to_vec(),
            values.to_vec(),
            ExtrapolationMode::Linear,
        )?;
        Ok(Self { interpolant })
    }
}

impl ContinuationValue for ValueFunction {
    fn value_at(&self, wealth: f64) -> f64 {
        let value = self.interpolant.value(wealth);
        if value.is_nan() { value } else { value.max(0.0) }
    }
}

pub fn solve(params: &Params, options: &SolverOptions) -> Result<LifecycleSolution, SolveError> {
    params.validate()?;

    let quadrature = NormalQuadrature::new(
        params.risky_mean_return,
        params.risky_variance,
        params.quadrature_nodes,
    );
    info!(
        start_age = params.start_age,
        end_age = params.end_age,
        grid_points = params.wealth_grid.len(),
        quadrature_nodes = quadrature.len(),
        "solving lifecycle policy"
    );

    let mut solved = Vec::with_capacity(params.age_count());
    let mut next = terminal_row(params);

    for age in (params.start_age..params.end_age).rev() {
        let future = ValueFunction::from_values(&params.wealth_grid, &next.value).map_err(
            |source| SolveError::ValueFunction {
                age: next.age,
                source,
            },
        )?;
        let row = solve_age(age, &future, params, &quadrature, options);
        solved.push(next);
        next = row;
    }
    solved.push(next);
    solved.reverse();

    let solution = LifecycleSolution::new(params.wealth_grid.clone(), solved);
    info!(
        cells = solution.diagnostics.cells,
        converged = solution.diagnostics.converged,
        iteration_limit = solution.diagnostics.iteration_limit,
        numerical_failure = solution.diagnostics.numerical_failure,
        "lifecycle solve finished"
    );
    Ok(solution)
}

/// Closed-form last age: consume everything, hold the equity floor.
pub fn terminal_row(params: &Params) -> AgeSolution {
    let n = params.wealth_grid.len();
    AgeSolution {
        age: params.end_age,
        consumption_rate: vec![1.0; n],
        equity_share: vec![params.equity_floor; n],
        value: params
            .wealth_grid
            .iter()
            .map(|&w| terminal_utility(w, params))
            .collect(),
        status: vec![CellStatus::Converged; n],
    }
}

pub fn solve_age<V>(
    age: u32,
    future: &V,
    params: &Params,
    quadrature: &NormalQuadrature,
    options: &SolverOptions,
) -> AgeSolution
where
    V: ContinuationValue + ?Sized,
{
    let cell = |&wealth: &f64| solve_cell(wealth, age, future, params, quadrature, options);
    let cells: Vec<CellSolution> = if options.parallel {
        params.wealth_grid.par_iter().map(cell).collect()
    } else {
        params.wealth_grid.iter().map(cell).collect()
    };

    for (wealth, c) in params.wealth_grid.iter().zip(&cells) {
        if c.status.is_converged() {
            debug!(
                age,
                wealth,
                rate = c.consumption_rate,
                equity = c.equity_share,
                value = c.value,
                iterations = c.iterations,
                "cell solved"
            );
        } else {
            warn!(
                age,
                wealth,
                status = ?c.status,
                iterations = c.iterations,
                "cell did not converge; keeping best point found"
            );
        }
    }

    let row = AgeSolution {
        age,
        consumption_rate: cells.iter().map(|c| c.consumption_rate).collect(),
        equity_share: cells.iter().map(|c| c.equity_share).collect(),
        value: cells.iter().map(|c| c.value).collect(),
        status: cells.iter().map(|c| c.status).collect(),
    };
    info!(age, "age solved");
    row
}

pub fn solve_cell<V>(
    wealth: f64,
    age: u32,
    future: &V,
    params: &Params,
    quadrature: &NormalQuadrature,
    options: &SolverOptions,
) -> CellSolution
where
    V: ContinuationValue + ?Sized,
{
    let objective = CellObjective {
        params,
        quadrature,
        future,
        wealth,
        age,
    };
    let floor = params.equity_floor;

    if wealth.is_nan() || wealth <= WEALTH_EPSILON {
        let value = objective.evaluate(Decision {
            consumption: 0.0,
            equity_share: floor,
        });
        return CellSolution {
            consumption_rate: 0.0,
            equity_share: floor,
            value: sanitize_value(value),
            status: CellStatus::Infeasible,
            iterations: 0,
        };
    }

    let bounds = BoxConstraints {
        lower: vec![0.0, floor],
        upper: vec![1.0, 1.0],
    };
    let outcome = nelder_mead(&options.initial_guess, &bounds, options.nelder_mead, |x| {
        -objective.evaluate_scaled(x)
    });

    match outcome {
        Ok(result) => {
            let status = match result.convergence.reason {
                TerminationReason::Tolerance => CellStatus::Converged,
                TerminationReason::MaxIterations => CellStatus::IterationLimit,
                TerminationReason::NonFiniteObjective => CellStatus::NumericalFailure,
            };
            let consumption_rate = result.x[0].clamp(0.0, 1.0);
            let equity_share = if consumption_rate >= FULL_CONSUMPTION_RATE {
                floor
            } else {
                result.x[1].clamp(floor, 1.0)
            };
            CellSolution {
                consumption_rate,
                equity_share,
                value: sanitize_value(result.objective.abs()),
                status,
                iterations: result.convergence.iterations,
            }
        }
        Err(msg) => {
            warn!(age, wealth, error = %msg, "optimizer rejected cell");
            CellSolution {
                consumption_rate: options.initial_guess[0].clamp(0.0, 1.0),
                equity_share: options.initial_guess[1].clamp(floor, 1.0),
                value: UTILITY_FLOOR,
                status: CellStatus::NumericalFailure,
                iterations: 0,
            }
        }
    }
}

fn sanitize_value(value: f64) -> f64 {
    if value.is_finite() {
        value.abs().max(UTILITY_FLOOR)
    } else {
        UTILITY_FLOOR
    }
}
