use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV observation. Column names match the cached CSV header.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    #[serde(rename = "Date")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Open")]
    pub open: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Adj Close")]
    pub adj_close: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
}

// `ta` indicators that need more than a close read these.
impl ta::Open for Bar {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Bar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Bar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Bar {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Bar {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// A time-ordered run of bars for one symbol.
///
/// Timestamps are strictly increasing and unique. Gaps (weekends, holidays,
/// closed hours) are left as they are.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Sorts the bars by timestamp and keeps the last bar seen for any
    /// repeated timestamp.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        // Stable sort keeps arrival order among equal timestamps.
        bars.sort_by_key(|b| b.timestamp);

        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(prev) if prev.timestamp == bar.timestamp => *prev = bar,
                _ => deduped.push(bar),
            }
        }

        Self {
            symbol: symbol.into(),
            bars: deduped,
        }
    }

    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn adj_closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.adj_close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}
