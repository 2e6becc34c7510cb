mod engine;
mod interpolation;
mod optimizer;
mod params;
mod quadrature;
mod solver;
mod types;
mod utility;

pub use engine::{SimulationConfig, SimulationError, simulate_policy};
pub use interpolation::{
    ExtrapolationMode, InterpolationError, LinearInterpolator, MonotoneCubicInterpolator,
};
pub use optimizer::{
    BoxConstraints, ConvergenceInfo, NelderMeadOptions, OptimizationResult, TerminationReason,
    nelder_mead,
};
pub use params::{
    DEFAULT_QUADRATURE_NODES, MAX_QUADRATURE_NODES, Params, ParamsError, ScheduleSpec,
    log_spaced_grid,
};
pub use quadrature::NormalQuadrature;
pub use solver::{
    CellSolution, SolveError, SolverOptions, ValueFunction, WEALTH_EPSILON, solve, solve_age,
    solve_cell, terminal_row,
};
pub use types::{
    AgeSolution, CellStatus, LifecycleSolution, SimulationYearResult, SolveDiagnostics,
};
pub use utility::{
    CellObjective, ContinuationValue, Decision, UTILITY_FLOOR, epstein_zin_utility,
    terminal_utility,
};
