//! Gauss-Hermite quadrature for expectations over a normal log return.
//!
//! Nodes come from Newton iteration on the orthonormal Hermite recurrence
//! (Golub and Welsch give the same rule via an eigenproblem).

use std::f64::consts::PI;

const NEWTON_TOLERANCE: f64 = 3e-14;
const NEWTON_MAX_ITERATIONS: usize = 64;

/// Nodes and probability weights approximating `E[f(X)]`, `X ~ N(mean, variance)`.
///
/// Weights sum to one. With zero variance the rule collapses to a single node
/// at the mean.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalQuadrature {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl NormalQuadrature {
    pub fn new(mean: f64, variance: f64, points: usize) -> Self {
        if variance <= 0.0 || points <= 1 {
            return Self {
                nodes: vec![mean],
                weights: vec![1.0],
            };
        }

        let (roots, raw_weights) = gauss_hermite(points);
        let scale = (2.0 * variance).sqrt();
        let norm = PI.sqrt();
        let nodes = roots.iter().map(|t| mean + scale * t).collect();
        let weights = raw_weights.iter().map(|w| w / norm).collect();
        Self { nodes, weights }
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.nodes.iter().copied().zip(self.weights.iter().copied())
    }

    pub fn expectation<F>(&self, mut f: F) -> f64
    where
        F: FnMut(f64) -> f64,
    {
        self.iter().map(|(x, w)| w * f(x)).sum()
    }
}

/// Physicists' Gauss-Hermite rule for weight `exp(-t^2)`: roots in descending
/// order and weights summing to `sqrt(pi)`.
fn gauss_hermite(n: usize) -> (Vec<f64>, Vec<f64>) {
    let pi_m4 = PI.powf(-0.25);
    let mut x = vec![0.0; n];
    let mut w = vec![0.0; n];
    let half = n.div_ceil(2);
    let nf = n as f64;

    let mut z = 0.0_f64;
    for i in 0..half {
        z = match i {
            0 => (2.0 * nf + 1.0).sqrt() - 1.85575 * (2.0 * nf + 1.0).powf(-0.16667),
            1 => z - 1.14 * nf.powf(0.426) / z,
            2 => 1.86 * z - 0.86 * x[0],
            3 => 1.91 * z - 0.91 * x[1],
            _ => 2.0 * z - x[i - 2],
        };

        let mut pp = 0.0;
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let mut p1 = pi_m4;
            let mut p2 = 0.0;
            for j in 0..n {
                let p3 = p2;
                p2 = p1;
                let jf = j as f64;
                p1 = z * (2.0 / (jf + 1.0)).sqrt() * p2 - (jf / (jf + 1.0)).sqrt() * p3;
            }
            pp = (2.0 * nf).sqrt() * p2;
            let previous = z;
            z = previous - p1 / pp;
            if (z - previous).abs() <= NEWTON_TOLERANCE {
                break;
            }
        }

        x[i] = z;
        x[n - 1 - i] = -z;
        w[i] = 2.0 / (pp * pp);
        w[n - 1 - i] = w[i];
    }

    (x, w)
}
