//! Breakout signals on the last two rows, and triangle/rectangle shapes over
//! the whole close history.

use crate::indicators::{IndicatorBar, IndicatorFrame};
use serde::Serialize;
use std::fmt;

pub const RSI_OVERSOLD: f64 = 30.0;
pub const RSI_OVERBOUGHT: f64 = 70.0;

/// Extrema are compared against this many neighbours on each side.
pub const EXTREMA_ORDER: usize = 5;
/// Successive extrema within this fraction of the price std count as level.
pub const RECTANGLE_TOLERANCE: f64 = 0.2;
/// A trend line whose total drift across the window stays under this
/// fraction of the price std counts as flat.
pub const FLAT_SLOPE_TOLERANCE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakoutSignal {
    BollingerBandBreakout,
    EmaCrossover,
    RsiBreakoutFromOversold,
    RsiBreakoutFromOverbought,
    MacdCrossover,
    VolumeSpike,
}

impl fmt::Display for BreakoutSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BollingerBandBreakout => "Bollinger Band Breakout",
            Self::EmaCrossover => "EMA Crossover",
            Self::RsiBreakoutFromOversold => "RSI Breakout from Oversold",
            Self::RsiBreakoutFromOverbought => "RSI Breakout from Overbought",
            Self::MacdCrossover => "MACD Crossover",
            Self::VolumeSpike => "Volume Spike",
        })
    }
}

/// Signals that fire on the transition from the previous row into the latest
/// one. A condition that already held on the previous row does not fire.
pub fn detect_breakouts(frame: &IndicatorFrame) -> Vec<BreakoutSignal> {
    let (Some(prev), Some(last)) = (frame.previous(), frame.latest()) else {
        return Vec::new();
    };

    let checks: [(BreakoutSignal, fn(&IndicatorBar, &IndicatorBar) -> bool); 6] = [
        (BreakoutSignal::BollingerBandBreakout, |p, l| {
            let was_inside = p.bar.close <= p.upper_band && p.bar.close >= p.lower_band;
            was_inside && (l.bar.close > l.upper_band || l.bar.close < l.lower_band)
        }),
        (BreakoutSignal::EmaCrossover, |p, l| {
            p.ema_20 <= p.ema_50 && l.ema_20 > l.ema_50
        }),
        (BreakoutSignal::RsiBreakoutFromOversold, |p, l| {
            p.rsi < RSI_OVERSOLD && l.rsi >= RSI_OVERSOLD
        }),
        (BreakoutSignal::RsiBreakoutFromOverbought, |p, l| {
            p.rsi > RSI_OVERBOUGHT && l.rsi <= RSI_OVERBOUGHT
        }),
        (BreakoutSignal::MacdCrossover, |p, l| {
            p.macd <= p.signal_line && l.macd > l.signal_line
        }),
        (BreakoutSignal::VolumeSpike, |p, l| !p.volume_spike && l.volume_spike),
    ];

    checks
        .iter()
        .filter(|(_, fired)| fired(prev, last))
        .map(|(signal, _)| *signal)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChartPattern {
    AscendingTriangle,
    DescendingTriangle,
    SymmetricalTriangle,
    Rectangle,
}

impl fmt::Display for ChartPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AscendingTriangle => "Ascending Triangle",
            Self::DescendingTriangle => "Descending Triangle",
            Self::SymmetricalTriangle => "Symmetrical Triangle",
            Self::Rectangle => "Rectangle",
        })
    }
}

/// Indices of local minima and maxima. A point qualifies when it is strictly
/// below (above) the `order` points before it and no higher (lower) than the
/// `order` points after it; points within `order` of either end are skipped.
pub fn local_extrema(values: &[f64], order: usize) -> (Vec<usize>, Vec<usize>) {
    let mut minima = Vec::new();
    let mut maxima = Vec::new();
    if order == 0 || values.len() <= 2 * order {
        return (minima, maxima);
    }

    for i in order..values.len() - order {
        let v = values[i];
        let before = &values[i - order..i];
        let after = &values[i + 1..=i + order];
        if before.iter().all(|&b| v < b) && after.iter().all(|&a| v <= a) {
            minima.push(i);
        }
        if before.iter().all(|&b| v > b) && after.iter().all(|&a| v >= a) {
            maxima.push(i);
        }
    }
    (minima, maxima)
}

/// Least-squares slope of `values[idx]` against `idx`.
fn slope(values: &[f64], indices: &[usize]) -> f64 {
    let n = indices.len() as f64;
    let mean_x = indices.iter().map(|&i| i as f64).sum::<f64>() / n;
    let mean_y = indices.iter().map(|&i| values[i]).sum::<f64>() / n;
    let (num, den) = indices.iter().fold((0.0, 0.0), |(num, den), &i| {
        let dx = i as f64 - mean_x;
        (num + dx * (values[i] - mean_y), den + dx * dx)
    });
    num / den
}

fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn max_step(values: &[f64], indices: &[usize]) -> f64 {
    indices
        .windows(2)
        .map(|w| (values[w[1]] - values[w[0]]).abs())
        .fold(0.0, f64::max)
}

/// Classifies the shape traced by the swing lows and swing highs of `closes`.
///
/// Needs at least two minima and two maxima. Returns `None` when the shape is
/// none of the four, or the prices do not move at all.
pub fn detect_pattern(closes: &[f64], order: usize) -> Option<ChartPattern> {
    let (minima, maxima) = local_extrema(closes, order);
    if minima.len() < 2 || maxima.len() < 2 {
        return None;
    }

    let price_std = population_std(closes);
    if !(price_std > 0.0) {
        return None;
    }

    let level = RECTANGLE_TOLERANCE * price_std;
    if max_step(closes, &minima) < level && max_step(closes, &maxima) < level {
        return Some(ChartPattern::Rectangle);
    }

    let span = closes.len() as f64;
    let flat = FLAT_SLOPE_TOLERANCE * price_std;
    let classify = |s: f64| {
        let drift = s * span;
        if drift.abs() < flat {
            0
        } else if drift > 0.0 {
            1
        } else {
            -1
        }
    };
    let lows = classify(slope(closes, &minima));
    let highs = classify(slope(closes, &maxima));

    match (lows, highs) {
        (1, 0) => Some(ChartPattern::AscendingTriangle),
        (0, -1) => Some(ChartPattern::DescendingTriangle),
        (1, -1) => Some(ChartPattern::SymmetricalTriangle),
        _ => None,
    }
}
