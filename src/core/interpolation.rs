//! One-dimensional interpolants over the wealth grid.
//!
//! References:
//! - Fritsch and Carlson (1980), monotone piecewise cubic interpolation.
//! - Moler, *Numerical Computing with MATLAB*, `pchip` end-slope rule.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtrapolationMode {
    Flat,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpolationError {
    #[error("invalid interpolation input: {0}")]
    InvalidInput(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryLocation {
    Left,
    Inside(usize),
    Right,
}

fn validate_xy(x: &[f64], y: &[f64]) -> Result<(), InterpolationError> {
    if x.len() != y.len() {
        return Err(InterpolationError::InvalidInput(
            "x and y must have same length",
        ));
    }
    if x.len() < 2 {
        return Err(InterpolationError::InvalidInput(
            "not enough interpolation nodes",
        ));
    }
    if x.windows(2).any(|w| w[1] <= w[0]) {
        return Err(InterpolationError::InvalidInput(
            "x must be strictly increasing",
        ));
    }
    if x.iter().any(|v| !v.is_finite()) || y.iter().any(|v| !v.is_finite()) {
        return Err(InterpolationError::InvalidInput("x and y must be finite"));
    }
    Ok(())
}

fn query_location(x: &[f64], xq: f64) -> QueryLocation {
    if xq < x[0] {
        return QueryLocation::Left;
    }
    if xq > x[x.len() - 1] {
        return QueryLocation::Right;
    }
    let idx = x.partition_point(|v| *v <= xq);
    if idx == 0 {
        QueryLocation::Inside(0)
    } else if idx >= x.len() {
        QueryLocation::Inside(x.len() - 2)
    } else {
        QueryLocation::Inside(idx - 1)
    }
}

fn pchip_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n == 2 {
        let m = (y[1] - y[0]) / (x[1] - x[0]);
        return vec![m, m];
    }

    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();

    let mut d = vec![0.0; n];
    for k in 1..(n - 1) {
        if delta[k - 1] * delta[k] <= 0.0 {
            d[k] = 0.0;
        } else {
            // Weighted harmonic mean keeps each segment monotone.
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            d[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }

    d[0] = end_slope(h[0], h[1], delta[0], delta[1]);
    let m = n - 1;
    d[m] = end_slope(h[m - 1], h[m - 2], delta[m - 1], delta[m - 2]);
    d
}

fn end_slope(h0: f64, h1: f64, delta0: f64, delta1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * delta0 - h0 * delta1) / (h0 + h1);
    if d.signum() != delta0.signum() || delta0 == 0.0 {
        0.0
    } else if delta0.signum() != delta1.signum() && d.abs() > 3.0 * delta0.abs() {
        3.0 * delta0
    } else {
        d
    }
}

#[inline]
fn hermite_eval(x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64, xq: f64) -> f64 {
    let h = x1 - x0;
    let s = (xq - x0) / h;
    let s2 = s * s;
    let s3 = s2 * s;

    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;

    h00 * y0 + h10 * h * m0 + h01 * y1 + h11 * h * m1
}

/// Shape-preserving cubic Hermite interpolation (PCHIP).
///
/// Monotone data yields a monotone interpolant with no overshoot between nodes.
#[derive(Debug, Clone)]
pub struct MonotoneCubicInterpolator {
    x: Vec<f64>,
    y: Vec<f64>,
    slopes: Vec<f64>,
    extrapolation: ExtrapolationMode,
}

impl MonotoneCubicInterpolator {
    pub fn new(
        x: Vec<f64>,
        y: Vec<f64>,
        extrapolation: ExtrapolationMode,
    ) -> Result<Self, InterpolationError> {
        validate_xy(&x, &y)?;
        let slopes = pchip_slopes(&x, &y);
        Ok(Self {
            x,
            y,
            slopes,
            extrapolation,
        })
    }

    pub fn value(&self, xq: f64) -> f64 {
        let n = self.x.len();
        match (query_location(&self.x, xq), self.extrapolation) {
            (QueryLocation::Left, ExtrapolationMode::Flat) => self.y[0],
            (QueryLocation::Left, ExtrapolationMode::Linear) => {
                self.y[0] + self.slopes[0] * (xq - self.x[0])
            }
            (QueryLocation::Right, ExtrapolationMode::Flat) => self.y[n - 1],
            (QueryLocation::Right, ExtrapolationMode::Linear) => {
                self.y[n - 1] + self.slopes[n - 1] * (xq - self.x[n - 1])
            }
            (QueryLocation::Inside(i), _) => hermite_eval(
                self.x[i],
                self.x[i + 1],
                self.y[i],
                self.y[i + 1],
                self.slopes[i],
                self.slopes[i + 1],
                xq,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    x: Vec<f64>,
    y: Vec<f64>,
    extrapolation: ExtrapolationMode,
}

impl LinearInterpolator {
    pub fn new(
        x: Vec<f64>,
        y: Vec<f64>,
        extrapolation: ExtrapolationMode,
    ) -> Result<Self, InterpolationError> {
        validate_xy(&x, &y)?;
        Ok(Self {
            x,
            y,
            extrapolation,
        })
    }

    pub fn value(&self, xq: f64) -> f64 {
        let n = self.x.len();
        match (query_location(&self.x, xq), self.extrapolation) {
            (QueryLocation::Left, ExtrapolationMode::Flat) => self.y[0],
            (QueryLocation::Left, ExtrapolationMode::Linear) => {
                lerp(self.x[0], self.x[1], self.y[0], self.y[1], xq)
            }
            (QueryLocation::Right, ExtrapolationMode::Flat) => self.y[n - 1],
            (QueryLocation::Right, ExtrapolationMode::Linear) => lerp(
                self.x[n - 2],
                self.x[n - 1],
                self.y[n - 2],
                self.y[n - 1],
                xq,
            ),
            (QueryLocation::Inside(i), _) => {
                lerp(self.x[i], self.x[i + 1], self.y[i], self.y[i + 1], xq)
            }
        }
    }
}

#[inline]
fn lerp(x0: f64, x1: f64, y0: f64, y1: f64, xq: f64) -> f64 {
    let w = (xq - x0) / (x1 - x0);
    (1.0 - w) * y0 + w * y1
}
