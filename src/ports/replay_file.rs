use anyhow::{anyhow, Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::config::PairSpec;
use crate::error::PairTradeError;
use crate::series::{PricePair, PricePoint};

// Mirrors one line of the JSONL price dump; extra fields are ignored
#[derive(Debug, Clone, Deserialize)]
struct DumpedSymbolSnapshot {
    price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct DumpedDataEntry {
    timestamp: i64,
    prices: HashMap<String, DumpedSymbolSnapshot>,
}

/// An already-materialized price dump, one JSON object per line:
/// `{"timestamp": <ms>, "prices": {"PEP": {"price": "171.2"}, ...}}`.
#[derive(Debug)]
pub struct ReplayFile {
    data: Vec<DumpedDataEntry>,
}

impl ReplayFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open replay file {}", path_ref.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to load replay file {}", path_ref.display()))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut data = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.context("failed to read replay line")?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: DumpedDataEntry = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse replay entry on line {}", line_no + 1))?;
            data.push(entry);
        }
        if data.is_empty() {
            return Err(anyhow!("replay data is empty"));
        }
        log::info!("[REPLAY] loaded {} entries", data.len());
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.data
            .iter()
            .flat_map(|e| e.prices.keys().cloned())
            .collect()
    }

    /// Extracts the two legs of `pair`. Every entry must quote both symbols;
    /// a missing quote is a gap and fails instead of being skipped.
    pub fn price_pair(&self, pair: &PairSpec) -> std::result::Result<PricePair, PairTradeError> {
        let mut points = Vec::with_capacity(self.data.len());
        for (i, entry) in self.data.iter().enumerate() {
            let price_x = leg_price(entry, &pair.x, i)?;
            let price_y = leg_price(entry, &pair.y, i)?;
            points.push(PricePoint {
                ts: entry.timestamp,
                price_x,
                price_y,
            });
        }
        PricePair::new(points)
    }
}

fn leg_price(
    entry: &DumpedDataEntry,
    symbol: &str,
    index: usize,
) -> std::result::Result<f64, PairTradeError> {
    let snapshot = entry.prices.get(symbol).ok_or_else(|| {
        PairTradeError::data(format!(
            "symbol '{}' missing from replay entry {} (ts={})",
            symbol, index, entry.timestamp
        ))
    })?;
    snapshot.price.to_f64().ok_or_else(|| {
        PairTradeError::data(format!(
            "price {} for '{}' at entry {} is not representable",
            snapshot.price, symbol, index
        ))
    })
}
