use crate::price_series::{Bar, PriceSeries};
use crate::storage_utils::ProviderConfig;
use anyhow::Result;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// What slice of history to ask the provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRange {
    /// A rolling lookback such as `5d` or `1mo`, ending now.
    Period { period: String, interval: String },
    /// A fixed calendar range; `end` is exclusive.
    Dates {
        start: NaiveDate,
        end: NaiveDate,
        interval: String,
    },
}

impl FetchRange {
    pub fn period(period: impl Into<String>, interval: impl Into<String>) -> Self {
        Self::Period {
            period: period.into(),
            interval: interval.into(),
        }
    }

    pub fn dates(start: NaiveDate, end: NaiveDate, interval: impl Into<String>) -> Self {
        Self::Dates {
            start,
            end,
            interval: interval.into(),
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Period { period, interval } => vec![
                ("range", period.clone()),
                ("interval", interval.clone()),
            ],
            Self::Dates {
                start,
                end,
                interval,
            } => vec![
                ("period1", midnight_utc(*start).to_string()),
                ("period2", midnight_utc(*end).to_string()),
                ("interval", interval.clone()),
            ],
        }
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Period { period, interval } => write!(f, "{period}/{interval}"),
            Self::Dates {
                start,
                end,
                interval,
            } => write!(f, "{start}..{end}/{interval}"),
        }
    }
}

fn midnight_utc(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Anything that can hand back OHLCV history for a symbol.
///
/// An unknown symbol or an empty window is an empty series, not an error.
pub trait MarketDataProvider {
    async fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<PriceSeries>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request for {symbol} failed: {source}")]
    Transport {
        symbol: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("provider rejected {symbol} ({status}): {message}")]
    Rejected {
        symbol: String,
        status: StatusCode,
        message: String,
    },
    #[error("malformed response for {symbol}: {reason}")]
    Malformed { symbol: String, reason: String },
}

/// Appends the exchange suffix unless the symbol already names an exchange.
pub fn exchange_symbol(symbol: &str, suffix: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if suffix.is_empty() || symbol.contains('.') {
        symbol
    } else {
        format!("{symbol}{suffix}")
    }
}

// --- Chart endpoint payload ---

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
    #[serde(default)]
    adjclose: Vec<AdjCloseBlock>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct AdjCloseBlock {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(50)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl MarketDataProvider for YahooClient {
    async fn fetch(&self, symbol: &str, range: &FetchRange) -> Result<PriceSeries> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let mut query = range.query();
        query.push(("includeAdjustedClose", "true".to_string()));
        query.push(("events", "div,splits".to_string()));

        debug!(symbol, %range, "requesting chart");
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                symbol: symbol.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ProviderError::Transport {
                symbol: symbol.to_string(),
                source,
            })?;

        Ok(parse_chart(symbol, status, &body)?)
    }
}

fn parse_chart(symbol: &str, status: StatusCode, body: &str) -> Result<PriceSeries, ProviderError> {
    let envelope: ChartEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(ProviderError::Rejected {
                symbol: symbol.to_string(),
                status,
                message: body.chars().take(200).collect(),
            });
        }
        Err(e) => {
            return Err(ProviderError::Malformed {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            });
        }
    };

    if let Some(err) = envelope.chart.error {
        // Unknown or delisted tickers come back as "Not Found".
        if err.code == "Not Found" {
            return Ok(PriceSeries::empty(symbol));
        }
        return Err(ProviderError::Rejected {
            symbol: symbol.to_string(),
            status,
            message: format!("{}: {}", err.code, err.description),
        });
    }

    if !status.is_success() {
        return Err(ProviderError::Rejected {
            symbol: symbol.to_string(),
            status,
            message: "no error detail".to_string(),
        });
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(PriceSeries::empty(symbol));
    };

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        // Rows without a close are halts or not-yet-filled candles.
        let Some(close) = at(&quote.close, i) else {
            continue;
        };
        let timestamp = DateTime::from_timestamp(ts, 0).ok_or_else(|| ProviderError::Malformed {
            symbol: symbol.to_string(),
            reason: format!("timestamp {ts} out of range"),
        })?;

        bars.push(Bar {
            timestamp,
            open: at(&quote.open, i).unwrap_or(close),
            high: at(&quote.high, i).unwrap_or(close),
            low: at(&quote.low, i).unwrap_or(close),
            close,
            adj_close: at(&adjclose, i).unwrap_or(close),
            volume: at(&quote.volume, i).unwrap_or(0.0),
        });
    }

    Ok(PriceSeries::new(symbol, bars))
}
