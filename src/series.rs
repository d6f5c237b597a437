use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{PairTradeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    /// Epoch milliseconds.
    pub ts: i64,
    pub price_x: f64,
    pub price_y: f64,
}

/// Two aligned price series sharing one strictly increasing time index.
///
/// `x` is the independent leg (hedge instrument), `y` the dependent leg.
/// Only the validating constructors build one, so downstream code can rely on
/// equal lengths, finite prices and ordered timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePair {
    timestamps: Vec<i64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl PricePair {
    pub fn new(points: Vec<PricePoint>) -> Result<Self> {
        let mut timestamps = Vec::with_capacity(points.len());
        let mut x = Vec::with_capacity(points.len());
        let mut y = Vec::with_capacity(points.len());
        for p in points {
            timestamps.push(p.ts);
            x.push(p.price_x);
            y.push(p.price_y);
        }
        Self::from_columns(timestamps, x, y)
    }

    pub fn from_columns(timestamps: Vec<i64>, x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if timestamps.len() != x.len() || timestamps.len() != y.len() {
            return Err(PairTradeError::data(format!(
                "misaligned series: {} timestamps, {} x prices, {} y prices",
                timestamps.len(),
                x.len(),
                y.len()
            )));
        }
        if timestamps.is_empty() {
            return Err(PairTradeError::data("price pair is empty"));
        }
        for (i, w) in timestamps.windows(2).enumerate() {
            if w[1] <= w[0] {
                return Err(PairTradeError::data(format!(
                    "timestamps not strictly increasing at index {}: {} -> {}",
                    i + 1,
                    w[0],
                    w[1]
                )));
            }
        }
        ensure_finite("x", &x)?;
        ensure_finite("y", &y)?;
        Ok(Self { timestamps, x, y })
    }

    /// Builds a pair indexed 0..n, for callers that have no clock.
    pub fn from_prices(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        let timestamps = (0..x.len() as i64).collect();
        Self::from_columns(timestamps, x, y)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn point(&self, index: usize) -> Option<PricePoint> {
        Some(PricePoint {
            ts: *self.timestamps.get(index)?,
            price_x: self.x[index],
            price_y: self.y[index],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = PricePoint> + '_ {
        (0..self.len()).filter_map(|i| self.point(i))
    }

    /// Human readable `start..end` span for log lines.
    pub fn span_label(&self) -> String {
        let first = self.timestamps.first().copied().unwrap_or_default();
        let last = self.timestamps.last().copied().unwrap_or_default();
        format!("{}..{}", format_ts(first), format_ts(last))
    }
}

pub(crate) fn ensure_finite(name: &str, values: &[f64]) -> Result<()> {
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(PairTradeError::data(format!(
            "{} series has a non-finite value at index {}",
            name, i
        )));
    }
    Ok(())
}

pub(crate) fn format_ts(ts_ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ts_ms) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => ts_ms.to_string(),
    }
}
