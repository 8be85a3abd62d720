//! Column-wise technical indicators.
//!
//! Every function returns a vector the same length as its input. Rows where
//! the lookback window is not yet filled hold `f64::NAN`, and NaN inputs flow
//! through into whatever depends on them.

use crate::price_series::{Bar, PriceSeries};
use ta::Next;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, Maximum, Minimum, MovingAverageConvergenceDivergence,
    OnBalanceVolume, SimpleMovingAverage, TrueRange,
};

pub const SWING_WINDOW: usize = 5;
pub const VOLUME_SPIKE_WINDOW: usize = 20;
pub const VOLUME_SPIKE_MULTIPLIER: f64 = 2.0;

/// Support/resistance levels derived from one period's high, low and close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotLevels {
    pub pivot: f64,
    pub r1: f64,
    pub s1: f64,
    pub r2: f64,
    pub s2: f64,
    pub r3: f64,
    pub s3: f64,
}

impl PivotLevels {
    pub fn from_hlc(high: f64, low: f64, close: f64) -> Self {
        let pivot = (high + low + close) / 3.0;
        Self {
            pivot,
            r1: 2.0 * pivot - low,
            s1: 2.0 * pivot - high,
            r2: pivot + (high - low),
            s2: pivot - (high - low),
            r3: high + 2.0 * (pivot - low),
            s3: low - 2.0 * (high - pivot),
        }
    }

    pub fn missing() -> Self {
        Self {
            pivot: f64::NAN,
            r1: f64::NAN,
            s1: f64::NAN,
            r2: f64::NAN,
            s2: f64::NAN,
            r3: f64::NAN,
            s3: f64::NAN,
        }
    }
}

/// A bar plus everything derived from it and the bars before it.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorBar {
    pub bar: Bar,
    pub sma_20: f64,
    pub sma_50: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub middle_band: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    pub rsi: f64,
    pub macd: f64,
    pub signal_line: f64,
    pub atr: f64,
    pub obv: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub adx: f64,
    pub pivot: PivotLevels,
    pub swing_high: f64,
    pub swing_low: f64,
    pub volume_sma_20: f64,
    pub volume_spike: bool,
}

#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub symbol: String,
    pub rows: Vec<IndicatorBar>,
}

impl IndicatorFrame {
    pub fn latest(&self) -> Option<&IndicatorBar> {
        self.rows.last()
    }

    pub fn previous(&self) -> Option<&IndicatorBar> {
        self.rows.len().checked_sub(2).map(|i| &self.rows[i])
    }

    pub fn closes(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.bar.close).collect()
    }
}

/// Builds the full indicator frame for a series. Too-short input is not an
/// error; it just leaves more leading NaN.
pub fn compute_indicators(series: &PriceSeries) -> IndicatorFrame {
    let bars = series.bars();
    let closes = series.closes();
    let volumes = series.volumes();

    let sma_20 = sma(&closes, 20);
    let sma_50 = sma(&closes, 50);
    let ema_20 = ema(&closes, 20);
    let ema_50 = ema(&closes, 50);
    let bands = bollinger(&closes, 20, 2.0);
    let rsi_col = rsi(&closes, 14);
    let macd_col = macd(&closes, 12, 26, 9);
    let atr_col = atr(bars, 14);
    let obv_col = obv(bars);
    let dmi = adx(bars, 14);
    let pivots = pivot_points(bars);
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let swing_high = rolling_max(&highs, SWING_WINDOW);
    let swing_low = rolling_min(&lows, SWING_WINDOW);
    let volume_sma_20 = sma(&volumes, VOLUME_SPIKE_WINDOW);
    let spikes = volume_spikes(&volumes, &volume_sma_20, VOLUME_SPIKE_MULTIPLIER);

    let rows = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| IndicatorBar {
            bar: *bar,
            sma_20: sma_20[i],
            sma_50: sma_50[i],
            ema_20: ema_20[i],
            ema_50: ema_50[i],
            middle_band: bands.middle[i],
            upper_band: bands.upper[i],
            lower_band: bands.lower[i],
            rsi: rsi_col[i],
            macd: macd_col.macd[i],
            signal_line: macd_col.signal[i],
            atr: atr_col[i],
            obv: obv_col[i],
            plus_di: dmi.plus_di[i],
            minus_di: dmi.minus_di[i],
            adx: dmi.adx[i],
            pivot: pivots[i],
            swing_high: swing_high[i],
            swing_low: swing_low[i],
            volume_sma_20: volume_sma_20[i],
            volume_spike: spikes[i],
        })
        .collect();

    IndicatorFrame {
        symbol: series.symbol().to_string(),
        rows,
    }
}

fn nan_column(len: usize) -> Vec<f64> {
    vec![f64::NAN; len]
}

/// Blanks the first `period - 1` rows, where a trailing window of `period`
/// observations does not exist yet.
fn mask_warmup(mut values: Vec<f64>, period: usize) -> Vec<f64> {
    let warmup = period.saturating_sub(1).min(values.len());
    values[..warmup].iter_mut().for_each(|v| *v = f64::NAN);
    values
}

pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let Ok(mut indicator) = SimpleMovingAverage::new(period) else {
        return nan_column(values.len());
    };
    let raw = values.iter().map(|&v| indicator.next(v)).collect();
    mask_warmup(raw, period)
}

/// Exponential average with `2 / (period + 1)` smoothing, seeded by the first
/// value, so it is defined from the first row on.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let Ok(mut indicator) = ExponentialMovingAverage::new(period) else {
        return nan_column(values.len());
    };
    values.iter().map(|&v| indicator.next(v)).collect()
}

#[derive(Debug, Clone)]
pub struct BandColumns {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger(values: &[f64], period: usize, multiplier: f64) -> BandColumns {
    let len = values.len();
    let Ok(mut indicator) = BollingerBands::new(period, multiplier) else {
        return BandColumns {
            middle: nan_column(len),
            upper: nan_column(len),
            lower: nan_column(len),
        };
    };

    let mut middle = Vec::with_capacity(len);
    let mut upper = Vec::with_capacity(len);
    let mut lower = Vec::with_capacity(len);
    for &v in values {
        let out = indicator.next(v);
        middle.push(out.average);
        upper.push(out.upper);
        lower.push(out.lower);
    }

    BandColumns {
        middle: mask_warmup(middle, period),
        upper: mask_warmup(upper, period),
        lower: mask_warmup(lower, period),
    }
}

/// RSI with Wilder averages seeded by the simple mean of the first `period`
/// changes. The first defined row is index `period`.
///
/// Zero average loss with some gain gives 100; no movement at all gives NaN.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = nan_column(values.len());
    if period == 0 || values.len() <= period {
        return out;
    }

    let period_f = period as f64;
    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period].iter().fold((0.0, 0.0), |(g, l), &d| {
        if d > 0.0 { (g + d, l) } else { (g, l - d) }
    });
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for (i, &delta) in deltas.iter().enumerate().skip(period) {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
        out[i + 1] = rsi_from_averages(avg_gain, avg_loss);
    }

    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    // 0/0 stays NaN; g/0 is +inf and maps to 100.
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[derive(Debug, Clone)]
pub struct MacdColumns {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> MacdColumns {
    let len = values.len();
    let Ok(mut indicator) = MovingAverageConvergenceDivergence::new(fast, slow, signal) else {
        return MacdColumns {
            macd: nan_column(len),
            signal: nan_column(len),
        };
    };

    let (macd, signal) = values
        .iter()
        .map(|&v| {
            let out = indicator.next(v);
            (out.macd, out.signal)
        })
        .unzip();

    MacdColumns { macd, signal }
}

/// True range per bar; the first bar has no previous close and uses
/// high - low.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut indicator = TrueRange::new();
    bars.iter().map(|b| indicator.next(b)).collect()
}

/// Rolling mean of the true range.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    sma(&true_range(bars), period)
}

pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let mut indicator = OnBalanceVolume::new();
    bars.iter().map(|b| indicator.next(b)).collect()
}

#[derive(Debug, Clone)]
pub struct DirectionalColumns {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

/// +DI, -DI and ADX with Wilder smoothing.
///
/// The DI lines are defined from row `period` (the first `period` bar-to-bar
/// moves seed the smoothed sums). ADX needs another `period - 1` DX values
/// and starts at row `2 * period - 1`.
pub fn adx(bars: &[Bar], period: usize) -> DirectionalColumns {
    let n = bars.len();
    let mut cols = DirectionalColumns {
        plus_di: nan_column(n),
        minus_di: nan_column(n),
        adx: nan_column(n),
    };
    if period == 0 || n <= period {
        return cols;
    }

    let period_f = period as f64;

    // Index i holds the move from bar i-1 to bar i; index 0 is unused.
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = vec![0.0; n];
    for i in 1..n {
        let (cur, prev) = (&bars[i], &bars[i - 1]);
        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;
        plus_dm[i] = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        minus_dm[i] = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        tr[i] = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());
    }

    let mut smooth_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[1..=period].iter().sum();
    let mut smooth_tr: f64 = tr[1..=period].iter().sum();

    let mut dx = nan_column(n);
    for i in period..n {
        if i > period {
            smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[i];
            smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[i];
            smooth_tr = smooth_tr - smooth_tr / period_f + tr[i];
        }

        let plus_di = 100.0 * smooth_plus / smooth_tr;
        let minus_di = 100.0 * smooth_minus / smooth_tr;
        cols.plus_di[i] = plus_di;
        cols.minus_di[i] = minus_di;

        let di_sum = plus_di + minus_di;
        dx[i] = if di_sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / di_sum
        };
    }

    let first_adx = 2 * period - 1;
    if first_adx >= n {
        return cols;
    }
    let mut adx_value = dx[period..=first_adx].iter().sum::<f64>() / period_f;
    cols.adx[first_adx] = adx_value;
    for i in (first_adx + 1)..n {
        adx_value = (adx_value * (period_f - 1.0) + dx[i]) / period_f;
        cols.adx[i] = adx_value;
    }

    cols
}

/// Pivot levels for each row, taken from the previous row's high, low and
/// close. The first row has no prior period.
pub fn pivot_points(bars: &[Bar]) -> Vec<PivotLevels> {
    std::iter::once(PivotLevels::missing())
        .chain(
            bars.windows(2)
                .map(|w| PivotLevels::from_hlc(w[0].high, w[0].low, w[0].close)),
        )
        .take(bars.len())
        .collect()
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    let Ok(mut indicator) = Maximum::new(window) else {
        return nan_column(values.len());
    };
    let raw = values.iter().map(|&v| indicator.next(v)).collect();
    mask_warmup(raw, window)
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    let Ok(mut indicator) = Minimum::new(window) else {
        return nan_column(values.len());
    };
    let raw = values.iter().map(|&v| indicator.next(v)).collect();
    mask_warmup(raw, window)
}

/// True where volume exceeds `multiplier` times its rolling mean. Rows
/// without a defined mean are never spikes.
pub fn volume_spikes(volumes: &[f64], volume_mean: &[f64], multiplier: f64) -> Vec<bool> {
    volumes
        .iter()
        .zip(volume_mean)
        .map(|(&v, &mean)| v > multiplier * mean)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_series::tests::{bar, series_from_closes};

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn sma_leading_rows_are_nan() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!(close_to(out[2], 2.0));
        assert!(close_to(out[4], 4.0));
    }

    #[test]
    fn sma_and_ema_coincide_with_close_at_period_one() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + 2.0 * i as f64).collect();
        let s = sma(&closes, 1);
        let e = ema(&closes, 1);
        for i in 0..closes.len() {
            assert!(close_to(s[i], closes[i]));
            assert!(close_to(e[i], closes[i]));
        }
    }

    #[test]
    fn ema_on_constant_slope_trails_price_and_converges_to_sma() {
        let closes: Vec<f64> = (0..400).map(|i| 50.0 + 0.5 * i as f64).collect();
        for period in [2usize, 5, 20] {
            let s = sma(&closes, period);
            let e = ema(&closes, period);
            for i in 1..closes.len() {
                assert!(e[i] < closes[i], "ema must lag a rising price");
            }
            // SMA lags by slope * (n - 1) / 2; seeded EMA approaches that lag.
            let last = closes.len() - 1;
            assert!((e[last] - s[last]).abs() < 1e-6, "period {period}");
            let early = period + 1;
            assert!(e[early] - s[early] >= (e[last] - s[last]) - 1e-12);
        }
    }

    #[test]
    fn rsi_stays_within_bounds() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 8.0 + (i % 7) as f64)
            .collect();
        let out = rsi(&closes, 14);
        assert!(out[..14].iter().all(|v| v.is_nan()));
        for v in &out[14..] {
            assert!((0.0..=100.0).contains(v), "rsi {v} out of range");
        }
    }

    #[test]
    fn rsi_is_nan_without_any_change() {
        let out = rsi(&[42.0; 40], 14);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ta_rsi_lacks_the_warmup_and_flat_nan() {
        let mut ta_rsi = ta::indicators::RelativeStrengthIndex::new(14).unwrap();
        let ta_out: Vec<f64> = [42.0; 20].iter().map(|&v| ta_rsi.next(v)).collect();
        assert!(ta_out.iter().all(|v| v.is_finite()));

        let ours = rsi(&[42.0; 20], 14);
        assert!(ours.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rsi_is_100_when_price_only_rises() {
        let closes: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let out = rsi(&closes, 14);
        assert!(close_to(out[29], 100.0));
    }

    #[test]
    fn obv_follows_close_direction() {
        let rising: Vec<Bar> = [10.0, 11.0, 11.0, 12.5, 13.0, 13.0, 14.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i as i64, c, 100.0 + i as f64))
            .collect();
        let up = obv(&rising);
        assert!(up.windows(2).all(|w| w[1] >= w[0]));

        let falling: Vec<Bar> = [14.0, 13.0, 13.0, 12.0, 11.5, 11.5, 10.0]
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i as i64, c, 100.0 + i as f64))
            .collect();
        let down = obv(&falling);
        assert!(down.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn bollinger_bands_are_symmetric_around_sma() {
        let closes: Vec<f64> = (0..40).map(|i| 10.0 + (i % 5) as f64).collect();
        let bands = bollinger(&closes, 20, 2.0);
        let mid = sma(&closes, 20);
        assert!(bands.middle[18].is_nan());
        for i in 19..closes.len() {
            assert!(close_to(bands.middle[i], mid[i]));
            assert!(close_to(
                bands.upper[i] - bands.middle[i],
                bands.middle[i] - bands.lower[i]
            ));
            assert!(bands.upper[i] > bands.middle[i]);
        }
    }

    #[test]
    fn atr_is_rolling_mean_of_true_range() {
        let bars: Vec<Bar> = (0..20).map(|i| bar(i, 100.0 + i as f64, 1.0)).collect();
        let tr = true_range(&bars);
        // Each bar spans 1.0 and gaps up 1.0 from the prior close.
        assert!(close_to(tr[0], 1.0));
        assert!(close_to(tr[5], 1.5));
        let out = atr(&bars, 14);
        assert!(out[12].is_nan());
        let expected = tr[1..15].iter().sum::<f64>() / 14.0;
        assert!(close_to(out[14], expected));
    }

    #[test]
    fn adx_warmup_and_range() {
        let bars: Vec<Bar> = (0..80)
            .map(|i| bar(i, 100.0 + 2.0 * i as f64, 1.0))
            .collect();
        let cols = adx(&bars, 14);
        assert!(cols.plus_di[13].is_nan());
        assert!(!cols.plus_di[14].is_nan());
        assert!(cols.adx[26].is_nan());
        assert!(!cols.adx[27].is_nan());
        for v in cols.adx.iter().filter(|v| !v.is_nan()) {
            assert!((0.0..=100.0).contains(v));
        }
        // A steady climb is all +DM.
        assert!(cols.plus_di[79] > cols.minus_di[79]);
        assert!(cols.adx[79] > 20.0);
    }

    #[test]
    fn pivots_use_the_previous_bar() {
        let bars = vec![bar(0, 100.0, 1.0), bar(1, 110.0, 1.0)];
        let pivots = pivot_points(&bars);
        assert!(pivots[0].pivot.is_nan());
        let p = pivots[1];
        // Previous bar: high 100.5, low 99.5, close 100.
        assert!(close_to(p.pivot, 100.0));
        assert!(close_to(p.r1, 100.5));
        assert!(close_to(p.s1, 99.5));
        assert!(close_to(p.r2, 101.0));
        assert!(close_to(p.s2, 99.0));
        assert!(close_to(p.r3, 101.5));
        assert!(close_to(p.s3, 98.5));
    }

    #[test]
    fn swing_window_tracks_trailing_extremes() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let highs = rolling_max(&values, 5);
        let lows = rolling_min(&values, 5);
        assert!(highs[3].is_nan());
        assert!(close_to(highs[4], 5.0));
        assert!(close_to(highs[7], 9.0));
        assert!(close_to(lows[4], 1.0));
        assert!(close_to(lows[7], 1.0));
    }

    #[test]
    fn short_series_yields_nan_not_panic() {
        let frame = compute_indicators(&series_from_closes(&[10.0, 11.0, 12.0]));
        assert_eq!(frame.rows.len(), 3);
        let last = frame.latest().unwrap();
        assert!(last.sma_50.is_nan());
        assert!(last.rsi.is_nan());
        assert!(last.adx.is_nan());
        assert!(!last.ema_50.is_nan());
        assert!(!last.volume_spike);
    }

    #[test]
    fn volume_spike_needs_twice_the_mean() {
        let volumes = [100.0, 100.0, 250.0, 150.0];
        let means = [f64::NAN, 100.0, 100.0, 100.0];
        assert_eq!(
            volume_spikes(&volumes, &means, 2.0),
            vec![false, false, true, false]
        );
    }
}
