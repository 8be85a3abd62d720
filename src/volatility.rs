//! Volatility Impact Score.
//!
//! VIS = (alpha * volatility + beta * upward + gamma * downward) / (alpha + beta + gamma)
//!
//! `volatility` is the sample standard deviation of simple returns, and
//! `upward`/`downward` are the sample standard deviations of the positive and
//! the negative returns on their own.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct VisWeights {
    pub alpha: f64, // overall volatility
    pub beta: f64,  // upside dispersion
    pub gamma: f64, // downside dispersion
}

impl Default for VisWeights {
    fn default() -> Self {
        Self {
            alpha: 2.0,
            beta: 2.0,
            gamma: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Flat => "flat",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolatilityMetrics {
    pub volatility: f64,
    pub upward_volatility: f64,
    pub downward_volatility: f64,
    pub up_proportion: f64,
    pub down_proportion: f64,
    pub mean_positive_return: f64,
    pub mean_negative_return: f64,
    /// Sum of simple returns over the window.
    pub trend: f64,
}

impl VolatilityMetrics {
    pub fn direction(&self) -> TrendDirection {
        if self.trend > 0.0 {
            TrendDirection::Up
        } else if self.trend < 0.0 {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        }
    }
}

/// Simple period-over-period returns; one shorter than the input.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Sample (n - 1) standard deviation. Fewer than two points gives NaN.
fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn metrics_from_returns(returns: &[f64]) -> VolatilityMetrics {
    let positive: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let total = returns.len() as f64;

    // A side with fewer than two moves shows no dispersion.
    let side_std = |side: &[f64]| {
        let s = sample_std(side);
        if s.is_nan() { 0.0 } else { s }
    };

    VolatilityMetrics {
        volatility: sample_std(returns),
        upward_volatility: side_std(&positive),
        downward_volatility: side_std(&negative),
        up_proportion: positive.len() as f64 / total,
        down_proportion: negative.len() as f64 / total,
        mean_positive_return: mean(&positive),
        mean_negative_return: mean(&negative),
        trend: returns.iter().sum(),
    }
}

/// Metrics over a price column (adjusted close).
pub fn compute_metrics(prices: &[f64]) -> VolatilityMetrics {
    metrics_from_returns(&simple_returns(prices))
}

pub fn volatility_impact_score(metrics: &VolatilityMetrics, weights: &VisWeights) -> f64 {
    let weighted = weights.alpha * metrics.volatility
        + weights.beta * metrics.upward_volatility
        + weights.gamma * metrics.downward_volatility;
    weighted / (weights.alpha + weights.beta + weights.gamma)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETURNS: [f64; 8] = [0.01, -0.02, 0.015, 0.03, -0.005, -0.01, 0.02, 0.0];

    #[test]
    fn metrics_split_by_sign() {
        let m = metrics_from_returns(&RETURNS);
        assert_eq!(m.up_proportion, 4.0 / 8.0);
        assert_eq!(m.down_proportion, 3.0 / 8.0);
        assert!((m.mean_positive_return - 0.01875).abs() < 1e-12);
        assert!((m.mean_negative_return + 0.035 / 3.0).abs() < 1e-12);
        assert!((m.trend - 0.04).abs() < 1e-12);
        assert_eq!(m.direction(), TrendDirection::Up);
    }

    #[test]
    fn volatility_term_scales_with_returns() {
        let base = metrics_from_returns(&RETURNS);
        let scaled_returns: Vec<f64> = RETURNS.iter().map(|r| r * 3.0).collect();
        let scaled = metrics_from_returns(&scaled_returns);

        assert!((scaled.volatility - 3.0 * base.volatility).abs() < 1e-12);
        assert!((scaled.upward_volatility - 3.0 * base.upward_volatility).abs() < 1e-12);
        assert!((scaled.downward_volatility - 3.0 * base.downward_volatility).abs() < 1e-12);

        let w = VisWeights::default();
        let vis = volatility_impact_score(&base, &w);
        let vis_scaled = volatility_impact_score(&scaled, &w);
        assert!((vis_scaled - 3.0 * vis).abs() < 1e-12);
    }

    #[test]
    fn score_is_deterministic_and_weighted() {
        let prices = [100.0, 101.0, 99.0, 102.0, 104.0, 103.0];
        let m = compute_metrics(&prices);
        let w = VisWeights::default();
        let a = volatility_impact_score(&m, &w);
        let b = volatility_impact_score(&compute_metrics(&prices), &w);
        assert_eq!(a, b);

        let expected = (2.0 * m.volatility + 2.0 * m.upward_volatility + m.downward_volatility) / 5.0;
        assert!((a - expected).abs() < 1e-15);
    }

    #[test]
    fn one_sided_moves_have_zero_dispersion_on_the_other_side() {
        let m = compute_metrics(&[10.0, 11.0, 12.0, 13.0]);
        assert_eq!(m.downward_volatility, 0.0);
        assert_eq!(m.down_proportion, 0.0);
        assert!(m.upward_volatility > 0.0);
    }

    #[test]
    fn flat_prices_are_flat() {
        let m = compute_metrics(&[5.0, 5.0, 5.0]);
        assert_eq!(m.volatility, 0.0);
        assert_eq!(m.direction(), TrendDirection::Flat);
    }
}
