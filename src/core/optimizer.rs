//! Box-constrained Nelder-Mead minimizer.
//!
//! Vertices are projected onto the box after every move. A converged run is
//! restarted from its best vertex with a fresh simplex until a restart no longer
//! improves the objective, which unsticks simplices that collapsed onto a face.
//!
//! References:
//! - Nelder and Mead (1965), simplex direct search.
//! - Gao and Han (2012), adaptive parameters and restart behavior.

#[derive(Debug, Clone, PartialEq)]
pub struct BoxConstraints {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl BoxConstraints {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, String> {
        if lower.is_empty() || lower.len() != upper.len() {
            return Err("constraints require same non-zero lower/upper dimensions".to_string());
        }
        for i in 0..lower.len() {
            if !lower[i].is_finite() || !upper[i].is_finite() || lower[i] > upper[i] {
                return Err(format!(
                    "invalid bound at index {i}: [{}, {}]",
                    lower[i], upper[i]
                ));
            }
        }
        Ok(Self { lower, upper })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| v.clamp(self.lower[i], self.upper[i]))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Tolerance,
    MaxIterations,
    NonFiniteObjective,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceInfo {
    pub iterations: usize,
    pub objective_evaluations: usize,
    pub restarts: usize,
    pub converged: bool,
    pub reason: TerminationReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub x: Vec<f64>,
    pub objective: f64,
    pub convergence: ConvergenceInfo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMeadOptions {
    pub max_iterations: usize,
    pub max_restarts: usize,
    /// Initial simplex edge as a fraction of each bound's width.
    pub initial_step: f64,
    pub reflection: f64,
    pub expansion: f64,
    pub contraction: f64,
    pub shrink: f64,
    /// Relative spread of simplex values, `|f_worst - f_best| / (1 + |f_best|)`.
    pub value_tolerance: f64,
    /// Largest vertex distance from the centroid.
    pub step_tolerance: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            max_restarts: 3,
            initial_step: 0.1,
            reflection: 1.0,
            expansion: 2.0,
            contraction: 0.5,
            shrink: 0.5,
            value_tolerance: 1e-10,
            step_tolerance: 1e-8,
        }
    }
}

struct RunOutcome {
    x: Vec<f64>,
    value: f64,
    iterations: usize,
    evaluations: usize,
    converged: bool,
}

/// Minimizes `objective_fn` inside `bounds` starting from `initial`.
///
/// Non-finite objective values are treated as `+inf` so the simplex moves away
/// from them.
pub fn nelder_mead<F>(
    initial: &[f64],
    bounds: &BoxConstraints,
    options: NelderMeadOptions,
    mut objective_fn: F,
) -> Result<OptimizationResult, String>
where
    F: FnMut(&[f64]) -> f64,
{
    if initial.len() != bounds.dimension() {
        return Err("Nelder-Mead initial vector dimension does not match bounds".to_string());
    }

    let mut guarded = |x: &[f64]| {
        let v = objective_fn(x);
        if v.is_finite() { v } else { f64::INFINITY }
    };

    let mut outcome = run_simplex(&bounds.clamp(initial), bounds, options, &mut guarded);
    let mut iterations = outcome.iterations;
    let mut evaluations = outcome.evaluations;
    let mut restarts = 0;

    while outcome.converged && restarts < options.max_restarts {
        let next = run_simplex(&outcome.x, bounds, options, &mut guarded);
        restarts += 1;
        iterations += next.iterations;
        evaluations += next.evaluations;

        let improvement = outcome.value - next.value;
        let settled = improvement <= options.value_tolerance * (1.0 + outcome.value.abs());
        if next.value <= outcome.value {
            outcome = RunOutcome {
                iterations: 0,
                evaluations: 0,
                ..next
            };
        }
        if settled {
            break;
        }
    }

    let reason = if !outcome.value.is_finite() {
        TerminationReason::NonFiniteObjective
    } else if outcome.converged {
        TerminationReason::Tolerance
    } else {
        TerminationReason::MaxIterations
    };

    Ok(OptimizationResult {
        x: outcome.x,
        objective: outcome.value,
        convergence: ConvergenceInfo {
            iterations,
            objective_evaluations: evaluations,
            restarts,
            converged: reason == TerminationReason::Tolerance,
            reason,
        },
    })
}

fn run_simplex<F>(
    x0: &[f64],
    bounds: &BoxConstraints,
    options: NelderMeadOptions,
    objective_fn: &mut F,
) -> RunOutcome
where
    F: FnMut(&[f64]) -> f64,
{
    let dim = bounds.dimension();
    let mut simplex = Vec::with_capacity(dim + 1);
    let mut values = Vec::with_capacity(dim + 1);
    let mut evals = 0usize;

    simplex.push(x0.to_vec());
    values.push(objective_fn(x0));
    evals += 1;

    for d in 0..dim {
        let mut x = x0.to_vec();
        let step = (bounds.upper[d] - bounds.lower[d]).abs() * options.initial_step.max(1e-4);
        x[d] = (x[d] + step).min(bounds.upper[d]);
        if (x[d] - x0[d]).abs() < 1e-14 {
            x[d] = (x[d] - step).max(bounds.lower[d]);
        }
        values.push(objective_fn(&x));
        simplex.push(x);
        evals += 1;
    }

    let mut iterations = 0usize;
    let mut converged = false;

    for iter in 0..options.max_iterations {
        iterations = iter + 1;

        let mut order: Vec<usize> = (0..simplex.len()).collect();
        order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let best = values[0];
        let worst = values[dim];

        let centroid: Vec<f64> = (0..dim)
            .map(|d| simplex.iter().take(dim).map(|x| x[d]).sum::<f64>() / dim as f64)
            .collect();

        let max_vertex_dist = simplex
            .iter()
            .map(|x| {
                x.iter()
                    .zip(centroid.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt()
            })
            .fold(0.0_f64, f64::max);

        let spread = if best.is_finite() && worst.is_finite() {
            (worst - best).abs() / (1.0 + best.abs())
        } else {
            f64::INFINITY
        };
        if spread <= options.value_tolerance && max_vertex_dist <= options.step_tolerance {
            converged = true;
            break;
        }
        if max_vertex_dist <= f64::EPSILON && best.is_finite() {
            // Fully collapsed on a point; no move can change the simplex.
            converged = spread.is_finite();
            break;
        }

        let xr = bounds.clamp(
            &(0..dim)
                .map(|d| centroid[d] + options.reflection * (centroid[d] - simplex[dim][d]))
                .collect::<Vec<_>>(),
        );
        let fr = objective_fn(&xr);
        evals += 1;

        if fr < values[0] {
            let xe = bounds.clamp(
                &(0..dim)
                    .map(|d| centroid[d] + options.expansion * (xr[d] - centroid[d]))
                    .collect::<Vec<_>>(),
            );
            let fe = objective_fn(&xe);
            evals += 1;

            if fe < fr {
                simplex[dim] = xe;
                values[dim] = fe;
            } else {
                simplex[dim] = xr;
                values[dim] = fr;
            }
            continue;
        }

        if fr < values[dim - 1] {
            simplex[dim] = xr;
            values[dim] = fr;
            continue;
        }

        let xc = bounds.clamp(
            &(0..dim)
                .map(|d| centroid[d] + options.contraction * (simplex[dim][d] - centroid[d]))
                .collect::<Vec<_>>(),
        );
        let fc = objective_fn(&xc);
        evals += 1;

        if fc < values[dim] {
            simplex[dim] = xc;
            values[dim] = fc;
            continue;
        }

        for i in 1..=dim {
            for d in 0..dim {
                simplex[i][d] = simplex[0][d] + options.shrink * (simplex[i][d] - simplex[0][d]);
            }
            simplex[i] = bounds.clamp(&simplex[i]);
            values[i] = objective_fn(&simplex[i]);
            evals += 1;
        }
    }

    let best_idx = (0..values.len())
        .min_by(|&i, &j| values[i].total_cmp(&values[j]))
        .unwrap_or(0);

    RunOutcome {
        x: simplex[best_idx].clone(),
        value: values[best_idx],
        iterations,
        evaluations: evals,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> BoxConstraints {
        BoxConstraints::new(vec![0.0, 0.0], vec![1.0, 1.0]).expect("valid bounds")
    }

    #[test]
    fn finds_interior_minimum_of_quadratic() {
        let out = nelder_mead(&[0.5, 0.99], &unit_box(), NelderMeadOptions::default(), |x| {
            (x[0] - 0.3).powi(2) + 2.0 * (x[1] - 0.7).powi(2)
        })
        .expect("must run");
        assert!(out.convergence.converged);
        assert_eq!(out.convergence.reason, TerminationReason::Tolerance);
        assert!((out.x[0] - 0.3).abs() < 1e-5, "x0 = {}", out.x[0]);
        assert!((out.x[1] - 0.7).abs() < 1e-5, "x1 = {}", out.x[1]);
    }

    #[test]
    fn stays_inside_bounds_when_minimum_is_outside() {
        let out = nelder_mead(&[0.5, 0.5], &unit_box(), NelderMeadOptions::default(), |x| {
            (x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2)
        })
        .expect("must run");
        assert!((out.x[0] - 1.0).abs() < 1e-6);
        assert!(out.x[1].abs() < 1e-6);
        assert!(out.x.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn reports_iteration_limit() {
        let options = NelderMeadOptions {
            max_iterations: 3,
            ..NelderMeadOptions::default()
        };
        let out = nelder_mead(&[0.9, 0.9], &unit_box(), options, |x| {
            (x[0] - 0.1).powi(2) + (x[1] - 0.2).powi(2)
        })
        .expect("must run");
        assert!(!out.convergence.converged);
        assert_eq!(out.convergence.reason, TerminationReason::MaxIterations);
        assert_eq!(out.convergence.restarts, 0);
    }

    #[test]
    fn worse_restart_keeps_converged_best_point() {
        let quadratic = |x: &[f64]| (x[0] - 0.3).powi(2) + (x[1] - 0.6).powi(2);
        let single = NelderMeadOptions {
            max_restarts: 0,
            ..NelderMeadOptions::default()
        };
        let first = nelder_mead(&[0.5, 0.5], &unit_box(), single, quadratic).expect("must run");
        assert!(first.convergence.converged);
        let budget = first.convergence.objective_evaluations;

        // The restart sees an objective that has turned infinite everywhere.
        let mut calls = 0usize;
        let options = NelderMeadOptions {
            max_restarts: 1,
            ..NelderMeadOptions::default()
        };
        let out = nelder_mead(&[0.5, 0.5], &unit_box(), options, |x| {
            calls += 1;
            if calls > budget {
                f64::INFINITY
            } else {
                quadratic(x)
            }
        })
        .expect("must run");
        assert_eq!(out.convergence.restarts, 1);
        assert!(out.convergence.converged);
        assert_eq!(out.convergence.reason, TerminationReason::Tolerance);
        assert_eq!(out.x, first.x);
    }

    #[test]
    fn non_finite_regions_are_avoided() {
        let out = nelder_mead(&[0.5, 0.5], &unit_box(), NelderMeadOptions::default(), |x| {
            if x[0] > 0.6 {
                f64::NAN
            } else {
                (x[0] - 0.4).powi(2) + (x[1] - 0.5).powi(2)
            }
        })
        .expect("must run");
        assert!(out.objective.is_finite());
        assert!((out.x[0] - 0.4).abs() < 1e-5);
    }

    #[test]
    fn everywhere_non_finite_is_flagged() {
        let out = nelder_mead(&[0.5, 0.5], &unit_box(), NelderMeadOptions::default(), |_| {
            f64::INFINITY
        })
        .expect("must run");
        assert!(!out.convergence.converged);
        assert_eq!(out.convergence.reason, TerminationReason::NonFiniteObjective);
    }

    #[test]
    fn degenerate_box_returns_the_only_point() {
        let bounds = BoxConstraints::new(vec![0.0, 0.2], vec![0.0, 1.0]).expect("valid bounds");
        let out = nelder_mead(&[0.5, 0.99], &bounds, NelderMeadOptions::default(), |x| {
            (x[1] - 0.4).powi(2)
        })
        .expect("must run");
        assert_eq!(out.x[0], 0.0);
        assert!((out.x[1] - 0.4).abs() < 1e-5);
    }

    #[test]
    fn rejects_dimension_mismatch_and_bad_bounds() {
        let err = nelder_mead(&[0.5], &unit_box(), NelderMeadOptions::default(), |_| 0.0)
            .expect_err("must reject");
        assert!(err.contains("dimension"));
        assert!(BoxConstraints::new(vec![1.0], vec![0.0]).is_err());
    }
}
