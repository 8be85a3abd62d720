//! The single-symbol commands: trend voting and breakout scanning.

use crate::breakout::{BreakoutSignal, ChartPattern, EXTREMA_ORDER, detect_breakouts, detect_pattern};
use crate::comfy_table;
use crate::indicators::{IndicatorFrame, compute_indicators};
use crate::quotes::{FetchRange, MarketDataProvider, exchange_symbol};
use crate::trend::{TrendReport, classify_trend};
use anyhow::Result;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub symbol: String,
    pub range: FetchRange,
    pub include_adx: bool,
}

#[derive(Debug, Clone)]
pub struct BreakoutReport {
    pub signals: Vec<BreakoutSignal>,
    pub pattern: Option<ChartPattern>,
}

/// Fetches and augments one symbol. `None` when the provider has no rows.
async fn load_frame<P: MarketDataProvider>(
    provider: &P,
    exchange_suffix: &str,
    options: &AnalysisOptions,
) -> Result<Option<IndicatorFrame>> {
    let symbol = exchange_symbol(&options.symbol, exchange_suffix);
    info!(symbol = %symbol, range = %options.range, "fetching");
    let series = provider.fetch(&symbol, &options.range).await?;
    if series.is_empty() {
        println!("No data found for {}.", symbol);
        return Ok(None);
    }
    Ok(Some(compute_indicators(&series)))
}

/// Per-indicator verdicts, each underlined, then the tally.
fn trend_lines(frame: &IndicatorFrame, report: &TrendReport) -> Vec<String> {
    let mut lines = Vec::new();
    for vote in &report.votes {
        let side = if vote.bullish { "Positive" } else { "Negative" };
        let text = format!("{} Trend : {}", side, vote.name);
        let underline = "_".repeat(text.chars().count());
        lines.push(text);
        lines.push(underline);
    }
    lines.push(String::new());
    lines.push(format!("Stock Symbol: {}", frame.symbol));
    lines.push(format!("Overall Trend: {}", report.label));
    lines.push(format!("Uptrend Indicators: {}", report.uptrend_count));
    lines.push(format!("Downtrend Indicators: {}", report.downtrend_count));
    lines
}

pub async fn run_trend<P: MarketDataProvider>(
    provider: &P,
    exchange_suffix: &str,
    options: &AnalysisOptions,
) -> Result<Option<TrendReport>> {
    let Some(frame) = load_frame(provider, exchange_suffix, options).await? else {
        return Ok(None);
    };
    let Some(report) = classify_trend(&frame, options.include_adx) else {
        return Ok(None);
    };

    for line in trend_lines(&frame, &report) {
        println!("{}", line);
    }
    comfy_table::print_indicator_tail(&frame);
    info!(symbol = %frame.symbol, label = %report.label, "trend classified");
    Ok(Some(report))
}

pub async fn run_breakout<P: MarketDataProvider>(
    provider: &P,
    exchange_suffix: &str,
    options: &AnalysisOptions,
) -> Result<Option<BreakoutReport>> {
    let Some(frame) = load_frame(provider, exchange_suffix, options).await? else {
        return Ok(None);
    };

    let report = BreakoutReport {
        signals: detect_breakouts(&frame),
        pattern: detect_pattern(&frame.closes(), EXTREMA_ORDER),
    };

    println!("\nSymbol: {}", frame.symbol);
    if report.signals.is_empty() {
        println!("No breakout signals on the latest bar.");
    } else {
        for signal in &report.signals {
            println!("Breakout signal: {}", signal);
        }
    }
    match report.pattern {
        Some(p) => println!("Chart pattern: {}", p),
        None => println!("No chart pattern detected."),
    }
    if let Some(latest) = frame.latest() {
        comfy_table::print_levels(latest);
    }

    info!(symbol = %frame.symbol, signals = report.signals.len(), "breakout scan done");
    Ok(Some(report))
}
