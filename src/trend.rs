//! Majority vote over a fixed list of indicator conditions on the latest row.

use crate::indicators::IndicatorFrame;
use serde::Serialize;
use std::fmt;

pub const RSI_MIDLINE: f64 = 50.0;
pub const ADX_TREND_FLOOR: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendLabel {
    Uptrend,
    Downtrend,
    Sideways,
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uptrend => "Uptrend",
            Self::Downtrend => "Downtrend",
            Self::Sideways => "Sideways",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendVote {
    pub name: &'static str,
    pub bullish: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub votes: Vec<TrendVote>,
    pub uptrend_count: usize,
    pub downtrend_count: usize,
    pub label: TrendLabel,
}

/// Runs the vote on the last row of `frame`. OBV compares against the row
/// before it, so a single-row frame always votes OBV down. NaN makes any
/// comparison false, which counts as a down vote.
///
/// Returns `None` for an empty frame.
pub fn classify_trend(frame: &IndicatorFrame, include_adx: bool) -> Option<TrendReport> {
    let last = frame.latest()?;
    let prev_obv = frame.previous().map_or(f64::NAN, |p| p.obv);

    let mut votes = vec![
        TrendVote {
            name: "SMA TREND",
            bullish: last.sma_20 > last.sma_50,
        },
        TrendVote {
            name: "EMA TREND",
            bullish: last.ema_20 > last.ema_50,
        },
        TrendVote {
            name: "BOLLINGER BANDS TREND",
            bullish: last.bar.close > last.middle_band,
        },
        TrendVote {
            name: "RSI TREND",
            bullish: last.rsi > RSI_MIDLINE,
        },
        TrendVote {
            name: "MACD TREND",
            bullish: last.macd > last.signal_line,
        },
        TrendVote {
            name: "OBV TREND",
            bullish: last.obv > prev_obv,
        },
    ];
    if include_adx {
        votes.push(TrendVote {
            name: "ADX TREND",
            bullish: last.plus_di > last.minus_di && last.adx > ADX_TREND_FLOOR,
        });
    }

    let uptrend_count = votes.iter().filter(|v| v.bullish).count();
    let downtrend_count = votes.len() - uptrend_count;
    let label = match uptrend_count.cmp(&downtrend_count) {
        std::cmp::Ordering::Greater => TrendLabel::Uptrend,
        std::cmp::Ordering::Less => TrendLabel::Downtrend,
        std::cmp::Ordering::Equal => TrendLabel::Sideways,
    };

    Some(TrendReport {
        votes,
        uptrend_count,
        downtrend_count,
        label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_indicators;
    use crate::price_series::tests::series_from_closes;

    fn frame_for(closes: &[f64]) -> IndicatorFrame {
        compute_indicators(&series_from_closes(closes))
    }

    #[test]
    fn steady_rally_is_an_uptrend() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + i as f64 * 1.5).collect();
        let report = classify_trend(&frame_for(&closes), true).unwrap();
        assert_eq!(report.label, TrendLabel::Uptrend);
        assert_eq!(report.votes.len(), 7);
        assert_eq!(report.uptrend_count + report.downtrend_count, 7);
        // MACD and signal converge on a perfectly straight line, so only
        // count the votes that are unambiguous.
        for name in ["SMA TREND", "EMA TREND", "BOLLINGER BANDS TREND", "RSI TREND", "OBV TREND", "ADX TREND"] {
            assert!(report.votes.iter().any(|v| v.name == name && v.bullish), "{name}");
        }
    }

    #[test]
    fn steady_decline_is_a_downtrend() {
        let closes: Vec<f64> = (0..120).map(|i| 300.0 - i as f64 * 1.5).collect();
        let report = classify_trend(&frame_for(&closes), false).unwrap();
        assert_eq!(report.label, TrendLabel::Downtrend);
        assert_eq!(report.votes.len(), 6);
    }

    #[test]
    fn identical_input_gives_identical_report() {
        let closes: Vec<f64> = (0..90)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0)
            .collect();
        let a = classify_trend(&frame_for(&closes), true).unwrap();
        let b = classify_trend(&frame_for(&closes), true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tie_is_sideways() {
        // Short history: SMA/RSI/ADX/bands are NaN and vote down, EMA, MACD
        // and OBV vote up on a rising tail.
        let closes = [10.0, 11.0, 12.0];
        let report = classify_trend(&frame_for(&closes), false).unwrap();
        assert_eq!(report.uptrend_count, 3);
        assert_eq!(report.downtrend_count, 3);
        assert_eq!(report.label, TrendLabel::Sideways);
    }

    #[test]
    fn empty_frame_has_no_report() {
        assert!(classify_trend(&frame_for(&[]), true).is_none());
    }
}
