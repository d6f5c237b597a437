//! Recursive estimate of a drifting hedge ratio.
//!
//! State equation (random walk):
//! ```text
//! beta[t] = beta[t-1] + w,   w ~ N(0, delta)
//! ```
//! Observation equation:
//! ```text
//! y[t] = beta[t] * x[t] + v, v ~ N(0, R)
//! ```
//! The innovation `y[t] - beta[t-1] * x[t]` is the tradeable spread and its
//! predictive variance `S` is what the signal layer normalizes by.

use serde::Serialize;

use crate::error::{PairTradeError, Result};
use crate::series::{ensure_finite, PricePair};

pub const DEFAULT_DELTA: f64 = 1e-4;
pub const DEFAULT_OBSERVATION_NOISE: f64 = 1e-3;
pub const DEFAULT_INITIAL_BETA: f64 = 0.0;
pub const DEFAULT_INITIAL_COVARIANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterParams {
    /// Process noise; how fast beta may drift.
    pub delta: f64,
    /// Measurement noise (R); damps the reaction to each observation.
    pub observation_noise: f64,
    pub initial_beta: f64,
    pub initial_covariance: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self::new(DEFAULT_DELTA, DEFAULT_OBSERVATION_NOISE)
    }
}

impl FilterParams {
    pub fn new(delta: f64, observation_noise: f64) -> Self {
        Self {
            delta,
            observation_noise,
            initial_beta: DEFAULT_INITIAL_BETA,
            initial_covariance: DEFAULT_INITIAL_COVARIANCE,
        }
    }

    pub fn with_initial_state(mut self, beta: f64, covariance: f64) -> Self {
        self.initial_beta = beta;
        self.initial_covariance = covariance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.delta.is_finite() || self.delta < 0.0 {
            return Err(PairTradeError::config(format!(
                "delta must be finite and >= 0 (got {})",
                self.delta
            )));
        }
        if !self.observation_noise.is_finite() || self.observation_noise <= 0.0 {
            return Err(PairTradeError::config(format!(
                "observation noise R must be finite and > 0 (got {})",
                self.observation_noise
            )));
        }
        if !self.initial_beta.is_finite() {
            return Err(PairTradeError::config("initial beta must be finite"));
        }
        if !self.initial_covariance.is_finite() || self.initial_covariance < 0.0 {
            return Err(PairTradeError::config(format!(
                "initial covariance must be finite and >= 0 (got {})",
                self.initial_covariance
            )));
        }
        Ok(())
    }
}

/// Posterior after the latest observation. Owned by a single run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterState {
    pub mean: f64,
    pub covariance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterOutput {
    pub beta: f64,
    pub spread: f64,
    pub spread_variance: f64,
}

impl FilterState {
    pub fn initial(params: &FilterParams) -> Self {
        Self {
            mean: params.initial_beta,
            covariance: params.initial_covariance,
        }
    }

    /// One predict/update cycle. A zero `x` carries no information: the gain
    /// is zero, beta stays put and `S` collapses to `R`.
    pub fn step(self, params: &FilterParams, x: f64, y: f64) -> (FilterState, FilterOutput) {
        let predicted_mean = self.mean;
        let predicted_covariance = self.covariance + params.delta;

        let h = x;
        let error = y - h * predicted_mean;
        let s = h * predicted_covariance * h + params.observation_noise;
        let gain = predicted_covariance * h / s;

        let next = FilterState {
            mean: predicted_mean + gain * error,
            covariance: predicted_covariance * (1.0 - gain * h),
        };
        let output = FilterOutput {
            beta: next.mean,
            spread: error,
            spread_variance: s,
        };
        (next, output)
    }
}

pub fn run_filter(params: &FilterParams, x: &[f64], y: &[f64]) -> Result<Vec<FilterOutput>> {
    params.validate()?;
    if x.len() != y.len() {
        return Err(PairTradeError::data(format!(
            "filter inputs differ in length: x={} y={}",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(PairTradeError::data("filter inputs are empty"));
    }
    ensure_finite("x", x)?;
    ensure_finite("y", y)?;

    let zero_steps = x.iter().filter(|v| **v == 0.0).count();
    if zero_steps > 0 {
        log::warn!(
            "[KALMAN] {} step(s) with zero independent price; beta held on those steps",
            zero_steps
        );
    }

    let (last, outputs) = x.iter().zip(y).fold(
        (FilterState::initial(params), Vec::with_capacity(x.len())),
        |(state, mut acc), (&xt, &yt)| {
            let (next, out) = state.step(params, xt, yt);
            acc.push(out);
            (next, acc)
        },
    );
    log::debug!(
        "[KALMAN] {} steps, final beta={:.4} cov={:.3e}",
        outputs.len(),
        last.mean,
        last.covariance
    );
    Ok(outputs)
}

pub fn run_filter_on_pair(params: &FilterParams, pair: &PricePair) -> Result<Vec<FilterOutput>> {
    run_filter(params, pair.x(), pair.y())
}
