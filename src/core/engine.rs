use std::f64::consts::PI;

use thiserror::Error;
use tracing::info;

use super::interpolation::{ExtrapolationMode, InterpolationError, LinearInterpolator};
use super::params::Params;
use super::types::{LifecycleSolution, SimulationYearResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    pub initial_wealth: f64,
    pub paths: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("invalid simulation config: {0}")]
    InvalidConfig(&'static str),
    #[error("solution does not cover ages {start_age}..={end_age}")]
    AgeMismatch { start_age: u32, end_age: u32 },
    #[error("cannot build policy lookup for age {age}: {source}")]
    Policy {
        age: u32,
        #[source]
        source: InterpolationError,
    },
}

struct AgePolicy {
    consumption_rate: LinearInterpolator,
    equity_share: LinearInterpolator,
}

impl AgePolicy {
    fn lookup(&self, wealth: f64) -> (f64, f64) {
        (
            self.consumption_rate.value(wealth),
            self.equity_share.value(wealth),
        )
    }
}

#[derive(Clone, Copy)]
struct YearTracePoint {
    wealth: f64,
    consumption: f64,
    equity_share: f64,
}

struct YearlyAccumulator {
    ages: Vec<u32>,
    paths: usize,
    wealth: Vec<Vec<f64>>,
    consumption: Vec<Vec<f64>>,
    equity_share: Vec<Vec<f64>>,
}

impl YearlyAccumulator {
    fn new(ages: Vec<u32>, expected_samples: usize) -> Self {
        let year_count = ages.len();
        let make = || {
            (0..year_count)
                .map(|_| Vec::with_capacity(expected_samples))
                .collect::<Vec<_>>()
        };

        Self {
            ages,
            paths: expected_samples,
            wealth: make(),
            consumption: make(),
            equity_share: make(),
        }
    }

    fn push(&mut self, index: usize, point: YearTracePoint) {
        self.wealth[index].push(point.wealth);
        self.consumption[index].push(point.consumption);
        self.equity_share[index].push(point.equity_share);
    }

    fn into_results(mut self) -> Vec<SimulationYearResult> {
        let mut results = Vec::with_capacity(self.ages.len());
        for idx in 0..self.ages.len() {
            let alive = self.wealth[idx].len();
            results.push(SimulationYearResult {
                age: self.ages[idx],
                alive_fraction: alive as f64 / self.paths.max(1) as f64,
                median_wealth: percentile(&mut self.wealth[idx], 50.0),
                p10_wealth: percentile(&mut self.wealth[idx], 10.0),
                p90_wealth: percentile(&mut self.wealth[idx], 90.0),
                median_consumption: percentile(&mut self.consumption[idx], 50.0),
                median_equity_share: percentile(&mut self.equity_share[idx], 50.0),
            });
        }
        results
    }
}

pub fn simulate_policy(
    params: &Params,
    solution: &LifecycleSolution,
    config: &SimulationConfig,
) -> Result<Vec<SimulationYearResult>, SimulationError> {
    validate_config(config)?;
    if solution.start_age() != Some(params.start_age)
        || solution.end_age() != Some(params.end_age)
        || solution.rows.len() != params.age_count()
    {
        return Err(SimulationError::AgeMismatch {
            start_age: params.start_age,
            end_age: params.end_age,
        });
    }

    let policies = solution
        .rows
        .iter()
        .map(|row| -> Result<AgePolicy, SimulationError> {
            let build = |y: &[f64]| {
                LinearInterpolator::new(
                    solution.wealth_grid.clone(),
                    y.to_vec(),
                    ExtrapolationMode::Flat,
                )
            };
            Ok(AgePolicy {
                consumption_rate: build(&row.consumption_rate)
                    .map_err(|source| SimulationError::Policy { age: row.age, source })?,
                equity_share: build(&row.equity_share)
                    .map_err(|source| SimulationError::Policy { age: row.age, source })?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut acc = YearlyAccumulator::new(params.ages().collect(), config.paths as usize);

    for path_id in 0..config.paths {
        let mut rng = Rng::new(derive_seed(config.seed, params.start_age, path_id));
        simulate_path(params, &policies, config.initial_wealth, &mut rng, |idx, point| {
            acc.push(idx, point)
        });
    }

    info!(
        paths = config.paths,
        initial_wealth = config.initial_wealth,
        "policy simulation finished"
    );
    Ok(acc.into_results())
}

fn simulate_path<F>(
    params: &Params,
    policies: &[AgePolicy],
    initial_wealth: f64,
    rng: &mut Rng,
    mut record: F,
) where
    F: FnMut(usize, YearTracePoint),
{
    let volatility = params.risky_variance.max(0.0).sqrt();
    let mut wealth = initial_wealth;

    for (idx, age) in params.ages().enumerate() {
        let (rate, equity) = policies[idx].lookup(wealth);
        let rate = rate.clamp(0.0, 1.0);
        let equity = equity.clamp(params.equity_floor, 1.0);
        let consumption = rate * wealth;
        record(
            idx,
            YearTracePoint {
                wealth,
                consumption,
                equity_share: equity,
            },
        );

        if age == params.end_age || rng.next_f64() >= params.survival_at(age) {
            break;
        }

        let risky_return = params.risky_mean_return + volatility * rng.standard_normal();
        let portfolio_return =
            equity * risky_return + (1.0 - equity) * params.risk_free_return;
        wealth = params.income_at(age) + (wealth - consumption) * portfolio_return.exp();
    }
}

fn validate_config(config: &SimulationConfig) -> Result<(), SimulationError> {
    if !config.initial_wealth.is_finite() || config.initial_wealth < 0.0 {
        return Err(SimulationError::InvalidConfig("initial_wealth must be >= 0"));
    }
    if config.paths == 0 {
        return Err(SimulationError::InvalidConfig("paths must be > 0"));
    }
    Ok(())
}

fn derive_seed(base_seed: u64, age: u32, path_id: u32) -> u64 {
    let mixed = base_seed ^ ((age as u64) << 32) ^ path_id as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
