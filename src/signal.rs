use serde::Serialize;

use crate::error::{PairTradeError, Result};
use crate::kalman::FilterOutput;

pub const DEFAULT_ENTRY_Z: f64 = 2.0;
pub const DEFAULT_EXIT_Z: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    #[default]
    Flat,
    /// Long the spread: long Y, short beta units of X.
    Long,
    Short,
}

impl PositionState {
    pub fn as_position(self) -> i8 {
        match self {
            PositionState::Flat => 0,
            PositionState::Long => 1,
            PositionState::Short => -1,
        }
    }

    pub fn from_position(position: i8) -> Option<Self> {
        match position {
            0 => Some(PositionState::Flat),
            1 => Some(PositionState::Long),
            -1 => Some(PositionState::Short),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PositionState::Flat => "flat",
            PositionState::Long => "long_spread",
            PositionState::Short => "short_spread",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalThresholds {
    pub entry_z: f64,
    pub exit_z: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            entry_z: DEFAULT_ENTRY_Z,
            exit_z: DEFAULT_EXIT_Z,
        }
    }
}

impl SignalThresholds {
    pub fn new(entry_z: f64, exit_z: f64) -> Self {
        Self { entry_z, exit_z }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.entry_z.is_finite() || self.entry_z <= 0.0 {
            return Err(PairTradeError::config(format!(
                "entry threshold must be finite and > 0 (got {})",
                self.entry_z
            )));
        }
        if !self.exit_z.is_finite() {
            return Err(PairTradeError::config("exit threshold must be finite"));
        }
        // exit >= entry closes every position on the step after it opens
        if self.exit_z >= self.entry_z {
            return Err(PairTradeError::config(format!(
                "exit threshold {} must be below entry threshold {}",
                self.exit_z, self.entry_z
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalRecord {
    pub z_score: f64,
    pub position: i8,
}

impl SignalRecord {
    pub fn state(&self) -> PositionState {
        PositionState::from_position(self.position).unwrap_or_default()
    }
}

pub fn next_state(state: PositionState, z: f64, thresholds: &SignalThresholds) -> PositionState {
    match state {
        PositionState::Flat if z < -thresholds.entry_z => PositionState::Long,
        PositionState::Flat if z > thresholds.entry_z => PositionState::Short,
        PositionState::Long if z >= -thresholds.exit_z => PositionState::Flat,
        PositionState::Short if z <= thresholds.exit_z => PositionState::Flat,
        unchanged => unchanged,
    }
}

pub fn z_score(step: usize, output: &FilterOutput) -> Result<f64> {
    let var = output.spread_variance;
    if !var.is_finite() || var <= 0.0 {
        return Err(PairTradeError::numeric(
            step,
            format!("spread variance {} cannot normalize a z-score", var),
        ));
    }
    Ok(output.spread / var.sqrt())
}

pub fn generate_signals(
    outputs: &[FilterOutput],
    thresholds: &SignalThresholds,
) -> Result<Vec<SignalRecord>> {
    generate_signals_from(PositionState::Flat, outputs, thresholds)
}

pub fn generate_signals_from(
    initial: PositionState,
    outputs: &[FilterOutput],
    thresholds: &SignalThresholds,
) -> Result<Vec<SignalRecord>> {
    thresholds.validate()?;
    let mut records = Vec::with_capacity(outputs.len());
    let mut state = initial;
    for (t, output) in outputs.iter().enumerate() {
        let z = z_score(t, output)?;
        let next = next_state(state, z, thresholds);
        if next != state {
            log::debug!(
                "[SIGNAL] step {} z={:.3}: {} -> {}",
                t,
                z,
                state.label(),
                next.label()
            );
        }
        state = next;
        records.push(SignalRecord {
            z_score: z,
            position: state.as_position(),
        });
    }
    Ok(records)
}
