use anyhow::{anyhow, Context};
use serde::Serialize;

use crate::backtest::{round_trips, run_backtest, BacktestResult, TradeRecord};
use crate::config::PairTradeConfig;
use crate::error::{PairTradeError, Result};
use crate::kalman::{run_filter_on_pair, FilterOutput};
use crate::ports::replay_file::ReplayFile;
use crate::series::{format_ts, PricePair};
use crate::signal::{generate_signals, SignalRecord};

#[derive(Debug, Clone, Serialize)]
pub struct PairTradeReport {
    pub pair: String,
    pub filter: Vec<FilterOutput>,
    pub signals: Vec<SignalRecord>,
    pub backtest: BacktestResult,
    pub trades: Vec<TradeRecord>,
}

impl PairTradeReport {
    pub fn final_beta(&self) -> Option<f64> {
        self.filter.last().map(|f| f.beta)
    }

    /// Share of steps spent holding a position.
    pub fn exposure(&self) -> f64 {
        if self.signals.is_empty() {
            return 0.0;
        }
        let held = self.signals.iter().filter(|s| s.position != 0).count();
        held as f64 / self.signals.len() as f64
    }

    pub fn win_rate(&self) -> Option<f64> {
        let closed: Vec<&TradeRecord> = self.trades.iter().filter(|t| !t.is_open()).collect();
        if closed.is_empty() {
            return None;
        }
        let wins = closed.iter().filter(|t| t.net_pnl() > 0.0).count();
        Some(wins as f64 / closed.len() as f64)
    }

    pub fn log_summary(&self) {
        let bt = &self.backtest;
        log::info!(
            "[METRICS] {} total_pnl={:.2} sharpe={:.2} max_dd={:.2} costs={:.2} trades={} exposure={:.1}% beta={:.4}",
            self.pair,
            bt.total_pnl,
            bt.sharpe_ratio,
            bt.max_drawdown,
            bt.total_costs,
            self.trades.len(),
            self.exposure() * 100.0,
            self.final_beta().unwrap_or_default()
        );
        if let Some(rate) = self.win_rate() {
            log::info!("[METRICS] {} win_rate={:.1}%", self.pair, rate * 100.0);
        }
    }
}

/// Runs filter, signals and backtest for one pair. Holds only validated,
/// immutable configuration, so one engine can serve independent runs.
#[derive(Debug, Clone)]
pub struct PairTradeEngine {
    cfg: PairTradeConfig,
}

impl PairTradeEngine {
    pub fn new(cfg: PairTradeConfig) -> Result<Self> {
        cfg.validate()?;
        log::info!(
            "[CONFIG] pair={} delta={:e} R={:e} entry_z={} exit_z={} cost_bps={} capital={}",
            cfg.pair,
            cfg.delta,
            cfg.observation_noise,
            cfg.entry_z,
            cfg.exit_z,
            cfg.transaction_cost_bps,
            cfg.initial_capital
        );
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &PairTradeConfig {
        &self.cfg
    }

    pub fn run(&self, prices: &PricePair) -> Result<PairTradeReport> {
        let label = self.cfg.pair.to_string();
        log::info!(
            "[BACKTEST] {} running over {} steps ({})",
            label,
            prices.len(),
            prices.span_label()
        );

        let filter = run_filter_on_pair(&self.cfg.filter_params(), prices)?;
        let signals = generate_signals(&filter, &self.cfg.signal_thresholds())?;
        let backtest = run_backtest(&signals, &filter, prices, &self.cfg.cost_model())?;
        let trades = round_trips(&backtest);
        for trade in &trades {
            log::debug!(
                "[BACKTEST] {} {} {} -> {} net={:.4}",
                label,
                trade.direction.label(),
                format_ts(trade.entry_ts),
                trade
                    .exit_ts
                    .map(format_ts)
                    .unwrap_or_else(|| "open".to_string()),
                trade.net_pnl()
            );
        }

        let report = PairTradeReport {
            pair: label,
            filter,
            signals,
            backtest,
            trades,
        };
        report.log_summary();
        Ok(report)
    }

    /// Loads the configured replay file and runs the configured pair over it.
    pub fn run_backtest_file(&self) -> anyhow::Result<PairTradeReport> {
        let path = self
            .cfg
            .backtest_file
            .as_deref()
            .ok_or_else(|| anyhow!("BACKTEST_FILE must be set to run a replay backtest"))?;
        let replay = ReplayFile::open(path)?;
        let prices = replay
            .price_pair(&self.cfg.pair)
            .with_context(|| format!("failed to align {} from {}", self.cfg.pair, path))?;
        let report = self.run(&prices)?;
        Ok(report)
    }
}

impl TryFrom<PairTradeConfig> for PairTradeEngine {
    type Error = PairTradeError;

    fn try_from(cfg: PairTradeConfig) -> Result<Self> {
        Self::new(cfg)
    }
}
