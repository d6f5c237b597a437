use serde::Serialize;

use crate::error::{PairTradeError, Result};
use crate::kalman::FilterOutput;
use crate::series::{ensure_finite, PricePair};
use crate::signal::{PositionState, SignalRecord};

pub const DEFAULT_TRANSACTION_COST_BPS: f64 = 0.0005;
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostModel {
    /// Fraction of traded notional paid per unit of position change
    /// (0.0005 = 5 bps).
    pub transaction_cost_bps: f64,
    pub periods_per_year: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            transaction_cost_bps: DEFAULT_TRANSACTION_COST_BPS,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
        }
    }
}

impl CostModel {
    pub fn new(transaction_cost_bps: f64) -> Self {
        Self {
            transaction_cost_bps,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.transaction_cost_bps.is_finite() || self.transaction_cost_bps < 0.0 {
            return Err(PairTradeError::config(format!(
                "transaction cost must be finite and >= 0 (got {})",
                self.transaction_cost_bps
            )));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(PairTradeError::config(format!(
                "periods per year must be finite and > 0 (got {})",
                self.periods_per_year
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BacktestStep {
    pub ts: i64,
    pub position: i8,
    pub beta: f64,
    pub d_y: f64,
    pub d_x: f64,
    pub gross_pnl: f64,
    pub trades: u8,
    pub cost: f64,
    pub net_pnl: f64,
    pub equity: f64,
    pub drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub steps: Vec<BacktestStep>,
    pub equity_curve: Vec<f64>,
    pub total_pnl: f64,
    pub total_costs: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

impl BacktestResult {
    pub fn net_pnl(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.net_pnl).collect()
    }

    /// Units of spread traded; a long/short flip counts twice.
    pub fn turnover(&self) -> u64 {
        self.steps.iter().map(|s| s.trades as u64).sum()
    }
}

pub fn run_backtest(
    signals: &[SignalRecord],
    filter: &[FilterOutput],
    pair: &PricePair,
    cost: &CostModel,
) -> Result<BacktestResult> {
    let positions: Vec<i8> = signals.iter().map(|s| s.position).collect();
    let betas: Vec<f64> = filter.iter().map(|f| f.beta).collect();
    compute(pair.timestamps(), &positions, &betas, pair.x(), pair.y(), cost)
}

/// Columnar entry point for callers holding plain vectors; steps are
/// timestamped by index.
pub fn run_backtest_on_columns(
    positions: &[i8],
    betas: &[f64],
    x: &[f64],
    y: &[f64],
    cost: &CostModel,
) -> Result<BacktestResult> {
    let ts: Vec<i64> = (0..positions.len() as i64).collect();
    compute(&ts, positions, betas, x, y, cost)
}

fn compute(
    ts: &[i64],
    positions: &[i8],
    betas: &[f64],
    x: &[f64],
    y: &[f64],
    cost: &CostModel,
) -> Result<BacktestResult> {
    cost.validate()?;
    let n = ts.len();
    if positions.len() != n || betas.len() != n || x.len() != n || y.len() != n {
        return Err(PairTradeError::data(format!(
            "backtest inputs not aligned: index={} positions={} betas={} x={} y={}",
            n,
            positions.len(),
            betas.len(),
            x.len(),
            y.len()
        )));
    }
    if n == 0 {
        return Err(PairTradeError::data("backtest inputs are empty"));
    }
    if let Some(i) = positions.iter().position(|p| !(-1..=1).contains(p)) {
        return Err(PairTradeError::data(format!(
            "position {} at index {} is outside -1..=1",
            positions[i], i
        )));
    }
    ensure_finite("beta", betas)?;
    ensure_finite("x", x)?;
    ensure_finite("y", y)?;

    // first step has no prior price or position, so its diffs are zero
    let d_y = diff(y);
    let d_x = diff(x);
    let prev_pos: Vec<f64> = std::iter::once(0.0)
        .chain(positions[..n - 1].iter().map(|p| *p as f64))
        .collect();
    let prev_beta: Vec<f64> = std::iter::once(0.0)
        .chain(betas[..n - 1].iter().copied())
        .collect();

    let gross: Vec<f64> = (0..n)
        .map(|t| prev_pos[t] * (d_y[t] - prev_beta[t] * d_x[t]))
        .collect();
    let trades: Vec<u8> = std::iter::once(0)
        .chain(positions.windows(2).map(|w| (w[1] - w[0]).unsigned_abs()))
        .collect();
    let costs: Vec<f64> = (0..n)
        .map(|t| trades[t] as f64 * (y[t] + betas[t] * x[t]) * cost.transaction_cost_bps)
        .collect();
    let net: Vec<f64> = gross.iter().zip(&costs).map(|(g, c)| g - c).collect();

    let equity = cumulative_sum(&net);
    let drawdowns = drawdown_curve(&equity);

    let steps: Vec<BacktestStep> = (0..n)
        .map(|t| BacktestStep {
            ts: ts[t],
            position: positions[t],
            beta: betas[t],
            d_y: d_y[t],
            d_x: d_x[t],
            gross_pnl: gross[t],
            trades: trades[t],
            cost: costs[t],
            net_pnl: net[t],
            equity: equity[t],
            drawdown: drawdowns[t],
        })
        .collect();

    Ok(BacktestResult {
        total_pnl: equity[n - 1],
        total_costs: costs.iter().sum(),
        sharpe_ratio: sharpe_ratio(&net, cost.periods_per_year),
        max_drawdown: drawdowns.iter().copied().fold(0.0, f64::min),
        equity_curve: equity,
        steps,
    })
}

fn diff(values: &[f64]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(values.windows(2).map(|w| w[1] - w[0]))
        .collect()
}

fn cumulative_sum(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

fn drawdown_curve(equity: &[f64]) -> Vec<f64> {
    equity
        .iter()
        .scan(f64::NEG_INFINITY, |peak, e| {
            *peak = peak.max(*e);
            Some(e - *peak)
        })
        .collect()
}

/// Annualized mean over sample standard deviation. A flat series (or one
/// too short to have a deviation) scores 0 rather than failing.
pub fn sharpe_ratio(net: &[f64], periods_per_year: f64) -> f64 {
    if net.len() < 2 || net.iter().all(|v| *v == net[0]) {
        return 0.0;
    }
    let n = net.len() as f64;
    let mean = net.iter().sum::<f64>() / n;
    let var = net.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std == 0.0 || !std.is_finite() {
        return 0.0;
    }
    periods_per_year.sqrt() * mean / std
}

pub fn max_drawdown(equity: &[f64]) -> f64 {
    drawdown_curve(equity).into_iter().fold(0.0, f64::min)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub direction: PositionState,
    pub entry_index: usize,
    pub entry_ts: i64,
    pub exit_index: Option<usize>,
    pub exit_ts: Option<i64>,
    pub gross_pnl: f64,
    pub cost: f64,
}

impl TradeRecord {
    pub fn net_pnl(&self) -> f64 {
        self.gross_pnl - self.cost
    }

    pub fn is_open(&self) -> bool {
        self.exit_index.is_none()
    }

    pub fn holding_steps(&self) -> Option<usize> {
        self.exit_index.map(|exit| exit - self.entry_index)
    }
}

/// Groups the step rows into round trips. Gross PnL of a trade is the sum
/// over the steps it was held; the cost of a flip is split evenly between the
/// trade it closes and the one it opens.
pub fn round_trips(result: &BacktestResult) -> Vec<TradeRecord> {
    let mut trades = Vec::new();
    let mut open: Option<TradeRecord> = None;
    let mut prev = 0_i8;
    for (t, step) in result.steps.iter().enumerate() {
        if let Some(trade) = open.as_mut() {
            trade.gross_pnl += step.gross_pnl;
        }
        if step.position == prev {
            continue;
        }
        let flip = prev != 0 && step.position != 0;
        let share = if flip { step.cost / 2.0 } else { step.cost };
        if let Some(mut trade) = open.take() {
            trade.cost += share;
            trade.exit_index = Some(t);
            trade.exit_ts = Some(step.ts);
            trades.push(trade);
        }
        if let Some(direction) = PositionState::from_position(step.position) {
            if direction != PositionState::Flat {
                open = Some(TradeRecord {
                    direction,
                    entry_index: t,
                    entry_ts: step.ts,
                    exit_index: None,
                    exit_ts: None,
                    gross_pnl: 0.0,
                    cost: share,
                });
            }
        }
        prev = step.position;
    }
    if let Some(trade) = open {
        trades.push(trade);
    }
    trades
}
