use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable model inputs for one lifecycle solve.
///
/// `income` and `survival` carry one entry per age in `start_age..=end_age`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    pub start_age: u32,
    pub end_age: u32,
    pub retirement_age: u32,
    pub discount: f64,
    pub eis: f64,
    pub risk_aversion: f64,
    pub equity_floor: f64,
    pub risk_free_return: f64,
    pub risky_mean_return: f64,
    pub risky_variance: f64,
    pub income: Vec<f64>,
    pub survival: Vec<f64>,
    pub wealth_grid: Vec<f64>,
    #[serde(default = "default_quadrature_nodes")]
    pub quadrature_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("start_age ({start_age}) must be < end_age ({end_age})")]
    AgeRange { start_age: u32, end_age: u32 },
    #[error("{schedule} schedule needs {expected} entries (one per age), got {actual}")]
    ScheduleLength {
        schedule: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{field} = {value} is out of range: expected {expected}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("wealth grid is invalid: {0}")]
    WealthGrid(&'static str),
    #[error("{0} must differ from 1 for the Epstein-Zin recursion")]
    UnitExponent(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleSpec {
    pub working_income: f64,
    pub retirement_income: f64,
    pub survival: f64,
}

pub const DEFAULT_QUADRATURE_NODES: usize = 9;
/// Largest node count the Gauss-Hermite recurrence resolves in `f64`.
pub const MAX_QUADRATURE_NODES: usize = 100;

fn default_quadrature_nodes() -> usize {
    DEFAULT_QUADRATURE_NODES
}

impl Params {
    /// The reference investor: ages 20 to 115, strong consumption smoothing and
    /// high risk aversion.
    pub fn standard() -> Self {
        let start_age = 20;
        let end_age = 115;
        let retirement_age = 70;
        let schedule = ScheduleSpec {
            working_income: 1.0,
            retirement_income: 1.0,
            survival: 0.99,
        };
        let (income, survival) = schedule.build(start_age, end_age, retirement_age);
        Self {
            start_age,
            end_age,
            retirement_age,
            discount: 0.96,
            eis: 0.1,
            risk_aversion: 10.0,
            equity_floor: 0.2,
            risk_free_return: 0.1,
            risky_mean_return: 0.05,
            // volatility 0.2
            risky_variance: 0.04,
            income,
            survival,
            wealth_grid: log_spaced_grid(-3.0, 3.0, 10),
            quadrature_nodes: DEFAULT_QUADRATURE_NODES,
        }
    }

    pub fn age_count(&self) -> usize {
        (self.end_age - self.start_age + 1) as usize
    }

    pub fn ages(&self) -> std::ops::RangeInclusive<u32> {
        self.start_age..=self.end_age
    }

    fn age_index(&self, age: u32) -> usize {
        debug_assert!(age >= self.start_age && age <= self.end_age);
        (age - self.start_age) as usize
    }

    pub fn income_at(&self, age: u32) -> f64 {
        self.income[self.age_index(age)]
    }

    pub fn survival_at(&self, age: u32) -> f64 {
        self.survival[self.age_index(age)]
    }

    /// `1 - 1/eis`, the intertemporal exponent of the recursion.
    pub fn rho(&self) -> f64 {
        1.0 - 1.0 / self.eis
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.start_age >= self.end_age {
            return Err(ParamsError::AgeRange {
                start_age: self.start_age,
                end_age: self.end_age,
            });
        }

        let expected = self.age_count();
        if self.income.len() != expected {
            return Err(ParamsError::ScheduleLength {
                schedule: "income",
                expected,
                actual: self.income.len(),
            });
        }
        if self.survival.len() != expected {
            return Err(ParamsError::ScheduleLength {
                schedule: "survival",
                expected,
                actual: self.survival.len(),
            });
        }
        if let Some(&v) = self.income.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(ParamsError::OutOfRange {
                field: "income",
                value: v,
                expected: "finite and >= 0",
            });
        }
        if let Some(&v) = self.survival.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(ParamsError::OutOfRange {
                field: "survival",
                value: v,
                expected: "between 0 and 1",
            });
        }

        check_open_unit("discount", self.discount)?;
        check_positive("eis", self.eis)?;
        check_positive("risk_aversion", self.risk_aversion)?;
        if (self.eis - 1.0).abs() < 1e-9 {
            return Err(ParamsError::UnitExponent("eis"));
        }
        if (self.risk_aversion - 1.0).abs() < 1e-9 {
            return Err(ParamsError::UnitExponent("risk_aversion"));
        }
        if !(0.0..=1.0).contains(&self.equity_floor) {
            return Err(ParamsError::OutOfRange {
                field: "equity_floor",
                value: self.equity_floor,
                expected: "between 0 and 1",
            });
        }
        check_finite("risk_free_return", self.risk_free_return)?;
        check_finite("risky_mean_return", self.risky_mean_return)?;
        if !self.risky_variance.is_finite() || self.risky_variance < 0.0 {
            return Err(ParamsError::OutOfRange {
                field: "risky_variance",
                value: self.risky_variance,
                expected: "finite and >= 0",
            });
        }
        if !(1..=MAX_QUADRATURE_NODES).contains(&self.quadrature_nodes) {
            return Err(ParamsError::OutOfRange {
                field: "quadrature_nodes",
                value: self.quadrature_nodes as f64,
                expected: "between 1 and 100",
            });
        }

        if self.wealth_grid.len() < 2 {
            return Err(ParamsError::WealthGrid("needs at least two points"));
        }
        if self.wealth_grid.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(ParamsError::WealthGrid("values must be finite and > 0"));
        }
        if self.wealth_grid.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ParamsError::WealthGrid("values must be strictly increasing"));
        }
        Ok(())
    }
}

impl ScheduleSpec {
    /// Builds `(income, survival)` for `start_age..=end_age`; retirement income
    /// applies from `retirement_age` on.
    pub fn build(self, start_age: u32, end_age: u32, retirement_age: u32) -> (Vec<f64>, Vec<f64>) {
        let income = (start_age..=end_age)
            .map(|age| {
                if age >= retirement_age {
                    self.retirement_income
                } else {
                    self.working_income
                }
            })
            .collect();
        let survival = (start_age..=end_age).map(|_| self.survival).collect();
        (income, survival)
    }
}

/// `exp(linspace(lo, hi, points))`.
pub fn log_spaced_grid(lo: f64, hi: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![lo.exp()],
        _ => {
            let step = (hi - lo) / (points - 1) as f64;
            (0..points).map(|i| (lo + step * i as f64).exp()).collect()
        }
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ParamsError::OutOfRange {
            field,
            value,
            expected: "finite",
        })
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParamsError::OutOfRange {
            field,
            value,
            expected: "finite and > 0",
        })
    }
}

fn check_open_unit(field: &'static str, value: f64) -> Result<(), ParamsError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ParamsError::OutOfRange {
            field,
            value,
            expected: "strictly between 0 and 1",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_params_are_valid() {
        let params = Params::standard();
        params.validate().expect("standard params must validate");
        assert_eq!(params.age_count(), 96);
        assert_eq!(params.income.len(), 96);
        assert_eq!(params.wealth_grid.len(), 10);
    }

    #[test]
    fn log_spaced_grid_spans_exponent_range() {
        let grid = log_spaced_grid(-3.0, 3.0, 10);
        assert!((grid[0] - (-3.0_f64).exp()).abs() < 1e-12);
        assert!((grid[9] - 3.0_f64.exp()).abs() < 1e-9);
        assert!(grid.windows(2).all(|w| w[1] > w[0]));
        let ratios: Vec<f64> = grid.windows(2).map(|w| w[1] / w[0]).collect();
        assert!(ratios.windows(2).all(|r| (r[1] - r[0]).abs() < 1e-9));
    }

    #[test]
    fn schedule_switches_to_retirement_income() {
        let spec = ScheduleSpec {
            working_income: 2.0,
            retirement_income: 0.5,
            survival: 0.98,
        };
        let (income, survival) = spec.build(60, 65, 63);
        assert_eq!(income, vec![2.0, 2.0, 2.0, 0.5, 0.5, 0.5]);
        assert!(survival.iter().all(|s| (*s - 0.98).abs() < 1e-12));
    }

    #[test]
    fn accessors_use_absolute_age() {
        let mut params = Params::standard();
        params.income[1] = 7.0;
        params.survival[2] = 0.5;
        assert_eq!(params.income_at(21), 7.0);
        assert_eq!(params.survival_at(22), 0.5);
    }

    #[test]
    fn validate_rejects_inverted_ages() {
        let mut params = Params::standard();
        params.start_age = 115;
        let err = params.validate().expect_err("must reject start >= end");
        assert!(matches!(err, ParamsError::AgeRange { .. }));
    }

    #[test]
    fn validate_rejects_short_schedule() {
        let mut params = Params::standard();
        params.survival.pop();
        let err = params.validate().expect_err("must reject short survival schedule");
        assert_eq!(
            err,
            ParamsError::ScheduleLength {
                schedule: "survival",
                expected: 96,
                actual: 95,
            }
        );
    }

    #[test]
    fn validate_rejects_unit_eis() {
        let mut params = Params::standard();
        params.eis = 1.0;
        let err = params.validate().expect_err("eis of 1 has no power form");
        assert_eq!(err, ParamsError::UnitExponent("eis"));
    }

    #[test]
    fn validate_rejects_non_increasing_grid() {
        let mut params = Params::standard();
        params.wealth_grid = vec![0.1, 1.0, 1.0];
        let err = params.validate().expect_err("must reject repeated grid point");
        assert!(err.to_string().contains("strictly increasing"));

        params.wealth_grid = vec![0.0, 1.0];
        let err = params.validate().expect_err("must reject zero wealth");
        assert!(err.to_string().contains("> 0"));
    }

    #[test]
    fn validate_rejects_survival_above_one() {
        let mut params = Params::standard();
        params.survival[3] = 1.2;
        let err = params.validate().expect_err("must reject survival > 1");
        assert!(err.to_string().contains("survival"));
    }

    #[test]
    fn validate_bounds_quadrature_nodes() {
        let mut params = Params::standard();
        params.quadrature_nodes = MAX_QUADRATURE_NODES;
        assert!(params.validate().is_ok());

        for nodes in [0, MAX_QUADRATURE_NODES + 1, 200, 1000] {
            params.quadrature_nodes = nodes;
            let err = params.validate().expect_err("node count out of range");
            assert!(matches!(
                err,
                ParamsError::OutOfRange {
                    field: "quadrature_nodes",
                    ..
                }
            ));
        }
    }

    #[test]
    fn params_round_trip_through_json_with_default_nodes() {
        let params = Params::standard();
        let mut value = serde_json::to_value(&params).expect("serialize");
        assert!(value.get("riskyMeanReturn").is_some());
        value
            .as_object_mut()
            .expect("object")
            .remove("quadratureNodes");
        let parsed: Params = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed.quadrature_nodes, DEFAULT_QUADRATURE_NODES);
        assert_eq!(parsed.start_age, params.start_age);
        assert_eq!(parsed.income, params.income);
        assert!(
            parsed
                .wealth_grid
                .iter()
                .zip(&params.wealth_grid)
                .all(|(a, b)| (a - b).abs() <= 1e-12 * b)
        );
    }
}
