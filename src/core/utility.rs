use super::params::Params;
use super::quadrature::NormalQuadrature;

/// Floor applied to every base raised to a non-integer power.
pub const UTILITY_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub consumption: f64,
    pub equity_share: f64,
}

/// Solved next-period value as a function of wealth.
pub trait ContinuationValue: Sync {
    fn value_at(&self, wealth: f64) -> f64;
}

impl<F> ContinuationValue for F
where
    F: Fn(f64) -> f64 + Sync,
{
    fn value_at(&self, wealth: f64) -> f64 {
        self(wealth)
    }
}

/// Single-period Epstein-Zin value of `decision` at `wealth` and `age`.
///
/// The caller keeps `0 <= consumption <= wealth` and
/// `equity_floor <= equity_share <= 1`. Death contributes nothing to the
/// certainty equivalent, so the survival probability scales the expectation.
/// A NaN continuation value or quadrature weight makes the result NaN.
pub fn epstein_zin_utility<V>(
    decision: Decision,
    wealth: f64,
    age: u32,
    future: &V,
    params: &Params,
    quadrature: &NormalQuadrature,
) -> f64
where
    V: ContinuationValue + ?Sized,
{
    let gamma_exp = 1.0 - params.risk_aversion;
    let rho = params.rho();
    let savings = wealth - decision.consumption;
    let income = params.income_at(age);
    let survival = params.survival_at(age);
    let safe_part = (1.0 - decision.equity_share) * params.risk_free_return;

    let expected = quadrature.expectation(|risky_return| {
        let portfolio_return = decision.equity_share * risky_return + safe_part;
        let next_wealth = income + savings * portfolio_return.exp();
        survival * floored(future.value_at(next_wealth)).powf(gamma_exp)
    });

    let current = (1.0 - params.discount) * floored(decision.consumption).powf(rho);
    let continuation = (params.discount * floored(expected)).powf(rho / gamma_exp);
    floored((current + continuation).powf(1.0 / rho))
}

/// `max(x, UTILITY_FLOOR)` that lets NaN through to the optimizer.
fn floored(x: f64) -> f64 {
    if x.is_nan() { x } else { x.max(UTILITY_FLOOR) }
}

pub fn terminal_utility(wealth: f64, params: &Params) -> f64 {
    let rho = params.rho();
    ((1.0 - params.discount) * wealth.max(UTILITY_FLOOR).powf(rho))
        .powf(1.0 / rho)
        .max(UTILITY_FLOOR)
}

pub struct CellObjective<'a, V: ?Sized> {
    pub params: &'a Params,
    pub quadrature: &'a NormalQuadrature,
    pub future: &'a V,
    pub wealth: f64,
    pub age: u32,
}

impl<V> CellObjective<'_, V>
where
    V: ContinuationValue + ?Sized,
{
    pub fn evaluate(&self, decision: Decision) -> f64 {
        epstein_zin_utility(
            decision,
            self.wealth,
            self.age,
            self.future,
            self.params,
            self.quadrature,
        )
    }

    /// Maps `[consumption_rate, equity_share]` to a decision at this wealth.
    pub fn decision_from_scaled(&self, x: &[f64]) -> Decision {
        Decision {
            consumption: x[0] * self.wealth,
            equity_share: x[1],
        }
    }

    pub fn evaluate_scaled(&self, x: &[f64]) -> f64 {
        self.evaluate(self.decision_from_scaled(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn two_age_params() -> Params {
        Params {
            start_age: 20,
            end_age: 21,
            retirement_age: 70,
            discount: 0.96,
            eis: 0.1,
            risk_aversion: 10.0,
            equity_floor: 0.2,
            risk_free_return: 0.1,
            risky_mean_return: 0.05,
            risky_variance: 0.04,
            income: vec![1.0, 1.0],
            survival: vec![0.99, 0.99],
            wealth_grid: vec![0.1, 1.0, 10.0],
            quadrature_nodes: 9,
        }
    }

    fn quadrature(params: &Params) -> NormalQuadrature {
        NormalQuadrature::new(
            params.risky_mean_return,
            params.risky_variance,
            params.quadrature_nodes,
        )
    }

    #[test]
    fn terminal_utility_is_linear_in_wealth() {
        let params = two_age_params();
        let scale = (1.0 - params.discount).powf(1.0 / params.rho());
        for w in [0.1, 1.0, 10.0] {
            assert_close(terminal_utility(w, &params), scale * w, 1e-12 * w.max(1.0));
        }
    }

    #[test]
    fn matches_hand_computed_value_without_risk() {
        let mut params = two_age_params();
        params.risky_variance = 0.0;
        let q = quadrature(&params);
        let future = |w: f64| 2.0 * w;
        let decision = Decision {
            consumption: 0.5,
            equity_share: 0.5,
        };

        let r = 0.5 * 0.05 + 0.5 * 0.1;
        let next = 1.0 + 0.5 * f64::exp(r);
        let expected = 0.99 * (2.0 * next).powf(-9.0);
        let rho = 1.0 - 1.0 / 0.1;
        let manual = (0.04 * 0.5_f64.powf(rho) + (0.96 * expected).powf(rho / -9.0)).powf(1.0 / rho);

        let value = epstein_zin_utility(decision, 1.0, 20, &future, &params, &q);
        assert_close(value, manual, 1e-12);
    }

    #[test]
    fn zero_consumption_and_zero_future_stay_finite() {
        let params = two_age_params();
        let q = quadrature(&params);
        let dead = |_: f64| 0.0;
        let value = epstein_zin_utility(
            Decision {
                consumption: 0.0,
                equity_share: 0.2,
            },
            1.0,
            20,
            &dead,
            &params,
            &q,
        );
        assert!(value.is_finite());
        assert!(value >= UTILITY_FLOOR);
    }

    #[test]
    fn nan_continuation_is_not_floored_away() {
        let params = two_age_params();
        let q = quadrature(&params);
        let broken = |_: f64| f64::NAN;
        let value = epstein_zin_utility(
            Decision {
                consumption: 0.5,
                equity_share: 0.5,
            },
            1.0,
            20,
            &broken,
            &params,
            &q,
        );
        assert!(value.is_nan());
    }

    #[test]
    fn zero_survival_leaves_only_current_consumption() {
        let mut params = two_age_params();
        params.survival = vec![0.0, 0.0];
        let q = quadrature(&params);
        let future = |w: f64| w;
        let value = epstein_zin_utility(
            Decision {
                consumption: 1.0,
                equity_share: 0.5,
            },
            2.0,
            20,
            &future,
            &params,
            &q,
        );
        let consume_only = terminal_utility(1.0, &params);
        assert!((value - consume_only).abs() <= 1e-6 * consume_only);
    }

    #[test]
    fn objective_scales_rate_by_wealth() {
        let params = two_age_params();
        let q = quadrature(&params);
        let future = |w: f64| terminal_utility(w, &params);
        let objective = CellObjective {
            params: &params,
            quadrature: &q,
            future: &future,
            wealth: 4.0,
            age: 20,
        };
        let d = objective.decision_from_scaled(&[0.25, 0.6]);
        assert_close(d.consumption, 1.0, 1e-15);
        assert_close(d.equity_share, 0.6, 0.0);
        assert_close(objective.evaluate_scaled(&[0.25, 0.6]), objective.evaluate(d), 0.0);
    }

    #[test]
    fn consumption_sweep_is_continuous_and_unimodal() {
        let params = two_age_params();
        let q = quadrature(&params);
        let future = |w: f64| terminal_utility(w, &params);
        for wealth in [0.5, 1.0, 10.0] {
            let values: Vec<f64> = (0..=200)
                .map(|i| {
                    let c = wealth * i as f64 / 200.0;
                    epstein_zin_utility(
                        Decision {
                            consumption: c,
                            equity_share: 0.5,
                        },
                        wealth,
                        20,
                        &future,
                        &params,
                        &q,
                    )
                })
                .collect();

            let step_limit = 0.25 * values.iter().cloned().fold(0.0, f64::max);
            assert!(values.windows(2).skip(1).all(|w| (w[1] - w[0]).abs() <= step_limit));

            let sign_changes = values
                .windows(2)
                .map(|w| w[1] - w[0])
                .filter(|d| d.abs() > 1e-12)
                .map(f64::signum)
                .collect::<Vec<_>>()
                .windows(2)
                .filter(|s| s[0] > 0.0 && s[1] < 0.0)
                .count();
            let rising_after_fall = values
                .windows(2)
                .map(|w| w[1] - w[0])
                .collect::<Vec<_>>()
                .windows(2)
                .any(|d| d[0] < -1e-12 && d[1] > 1e-12);
            assert!(sign_changes <= 1, "more than one interior maximum at {wealth}");
            assert!(!rising_after_fall, "valley in consumption sweep at {wealth}");
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(40))]
        #[test]
        fn utility_is_finite_and_above_floor(
            wealth in 0.01f64..50.0,
            rate in 0.0f64..=1.0,
            equity in 0.2f64..=1.0,
            eis in 0.05f64..0.9,
            risk_aversion in 1.5f64..15.0,
        ) {
            let mut params = two_age_params();
            params.eis = eis;
            params.risk_aversion = risk_aversion;
            let q = quadrature(&params);
            let future = |w: f64| terminal_utility(w, &params);
            let value = epstein_zin_utility(
                Decision { consumption: rate * wealth, equity_share: equity },
                wealth,
                20,
                &future,
                &params,
                &q,
            );
            prop_assert!(value.is_finite());
            prop_assert!(value >= UTILITY_FLOOR);
        }

        #[test]
        fn utility_increases_with_continuation_level(
            wealth in 0.1f64..20.0,
            rate in 0.05f64..0.95,
            equity in 0.2f64..=1.0,
        ) {
            let params = two_age_params();
            let q = quadrature(&params);
            let low = |w: f64| w;
            let high = |w: f64| 1.5 * w;
            let decision = Decision { consumption: rate * wealth, equity_share: equity };
            let u_low = epstein_zin_utility(decision, wealth, 20, &low, &params, &q);
            let u_high = epstein_zin_utility(decision, wealth, 20, &high, &params, &q);
            prop_assert!(u_high >= u_low);
        }
    }
}
