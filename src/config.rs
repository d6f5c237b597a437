use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs::File;
use std::path::Path;

use crate::backtest::{CostModel, DEFAULT_PERIODS_PER_YEAR, DEFAULT_TRANSACTION_COST_BPS};
use crate::error::PairTradeError;
use crate::kalman::{
    FilterParams, DEFAULT_DELTA, DEFAULT_INITIAL_BETA, DEFAULT_INITIAL_COVARIANCE,
    DEFAULT_OBSERVATION_NOISE,
};
use crate::signal::{SignalThresholds, DEFAULT_ENTRY_Z, DEFAULT_EXIT_Z};

const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
const DEFAULT_PAIR: &str = "PEP/KO";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct PairTradeYaml {
    pair: Option<String>,
    delta: Option<f64>,
    observation_noise: Option<f64>,
    initial_beta: Option<f64>,
    initial_covariance: Option<f64>,
    entry_z_score: Option<f64>,
    exit_z_score: Option<f64>,
    transaction_cost_bps: Option<f64>,
    initial_capital: Option<f64>,
    periods_per_year: Option<f64>,
    backtest_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairTradeConfig {
    pub pair: PairSpec,
    pub delta: f64,
    pub observation_noise: f64,
    pub initial_beta: f64,
    pub initial_covariance: f64,
    pub entry_z: f64,
    pub exit_z: f64,
    pub transaction_cost_bps: f64,
    // Reported only; PnL is measured per unit of spread
    pub initial_capital: f64,
    pub periods_per_year: f64,
    pub backtest_file: Option<String>,
}

/// `x` is the independent (hedge) leg, `y` the traded leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSpec {
    pub x: String,
    pub y: String,
}

impl fmt::Display for PairSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.x, self.y)
    }
}

impl std::str::FromStr for PairSpec {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let mut split = raw.trim().split('/');
        let x = split
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("invalid pair: {}", raw))?;
        let y = split
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("invalid pair: {}", raw))?;
        if split.next().is_some() {
            return Err(anyhow!("invalid pair: {}", raw));
        }
        if x == y {
            return Err(anyhow!("pair legs must differ: {}", raw));
        }
        Ok(PairSpec {
            x: x.to_string(),
            y: y.to_string(),
        })
    }
}

impl Default for PairTradeConfig {
    fn default() -> Self {
        Self {
            pair: PairSpec {
                x: "PEP".to_string(),
                y: "KO".to_string(),
            },
            delta: DEFAULT_DELTA,
            observation_noise: DEFAULT_OBSERVATION_NOISE,
            initial_beta: DEFAULT_INITIAL_BETA,
            initial_covariance: DEFAULT_INITIAL_COVARIANCE,
            entry_z: DEFAULT_ENTRY_Z,
            exit_z: DEFAULT_EXIT_Z,
            transaction_cost_bps: DEFAULT_TRANSACTION_COST_BPS,
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            backtest_file: None,
        }
    }
}

impl PairTradeConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRTRADE_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open PairTrade config {}", path_ref.display()))?;
        let yaml: PairTradeYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse PairTrade config {}", path_ref.display()))?;
        let mut cfg = Self::from_yaml(yaml)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Parses YAML text without consulting the environment.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let yaml: PairTradeYaml =
            serde_yaml::from_str(raw).context("failed to parse PairTrade config")?;
        Self::from_yaml(yaml)
    }

    fn from_yaml(yaml: PairTradeYaml) -> Result<Self> {
        let pair = yaml
            .pair
            .as_deref()
            .unwrap_or(DEFAULT_PAIR)
            .parse::<PairSpec>()?;
        Ok(PairTradeConfig {
            pair,
            delta: yaml.delta.unwrap_or(DEFAULT_DELTA),
            observation_noise: yaml.observation_noise.unwrap_or(DEFAULT_OBSERVATION_NOISE),
            initial_beta: yaml.initial_beta.unwrap_or(DEFAULT_INITIAL_BETA),
            initial_covariance: yaml
                .initial_covariance
                .unwrap_or(DEFAULT_INITIAL_COVARIANCE),
            entry_z: yaml.entry_z_score.unwrap_or(DEFAULT_ENTRY_Z),
            exit_z: yaml.exit_z_score.unwrap_or(DEFAULT_EXIT_Z),
            transaction_cost_bps: yaml
                .transaction_cost_bps
                .unwrap_or(DEFAULT_TRANSACTION_COST_BPS),
            initial_capital: yaml.initial_capital.unwrap_or(DEFAULT_INITIAL_CAPITAL),
            periods_per_year: yaml.periods_per_year.unwrap_or(DEFAULT_PERIODS_PER_YEAR),
            backtest_file: yaml.backtest_file.filter(|v| !v.trim().is_empty()),
        })
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies `KEY=value` overrides from `lookup`. Unparseable numbers are
    /// rejected rather than silently falling back to the previous value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse_f64 = |key: &str| -> Result<Option<f64>> {
            match get(key) {
                Some(raw) => raw
                    .parse::<f64>()
                    .map(Some)
                    .with_context(|| format!("{} must be a number (got '{}')", key, raw)),
                None => Ok(None),
            }
        };

        if let Some(value) = get("PAIR") {
            self.pair = value.parse()?;
        }
        if let Some(parsed) = parse_f64("KALMAN_DELTA")? {
            self.delta = parsed;
        }
        if let Some(parsed) = parse_f64("KALMAN_OBSERVATION_NOISE")? {
            self.observation_noise = parsed;
        }
        if let Some(parsed) = parse_f64("KALMAN_INITIAL_BETA")? {
            self.initial_beta = parsed;
        }
        if let Some(parsed) = parse_f64("KALMAN_INITIAL_COVARIANCE")? {
            self.initial_covariance = parsed;
        }
        if let Some(parsed) = parse_f64("ENTRY_Z_SCORE")? {
            self.entry_z = parsed;
        }
        if let Some(parsed) = parse_f64("EXIT_Z_SCORE")? {
            self.exit_z = parsed;
        }
        if let Some(parsed) = parse_f64("TRANSACTION_COST_BPS")? {
            self.transaction_cost_bps = parsed;
        }
        if let Some(parsed) = parse_f64("INITIAL_CAPITAL")? {
            self.initial_capital = parsed;
        }
        if let Some(parsed) = parse_f64("PERIODS_PER_YEAR")? {
            self.periods_per_year = parsed;
        }
        if let Some(value) = get("BACKTEST_FILE") {
            self.backtest_file = Some(value);
        }
        Ok(())
    }

    pub fn filter_params(&self) -> FilterParams {
        FilterParams::new(self.delta, self.observation_noise)
            .with_initial_state(self.initial_beta, self.initial_covariance)
    }

    pub fn signal_thresholds(&self) -> SignalThresholds {
        SignalThresholds::new(self.entry_z, self.exit_z)
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel {
            transaction_cost_bps: self.transaction_cost_bps,
            periods_per_year: self.periods_per_year,
        }
    }

    /// Checks every parameter group before a run starts.
    pub fn validate(&self) -> std::result::Result<(), PairTradeError> {
        self.filter_params().validate()?;
        self.signal_thresholds().validate()?;
        self.cost_model().validate()?;
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(PairTradeError::config(format!(
                "initial capital must be finite and > 0 (got {})",
                self.initial_capital
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_run() {
        let cfg = PairTradeConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg, PairTradeConfig::default());
        assert_eq!(cfg.pair.to_string(), "PEP/KO");
        assert_eq!(cfg.delta, 1e-4);
        assert_eq!(cfg.observation_noise, 1e-3);
        assert_eq!(cfg.entry_z, 2.0);
        assert_eq!(cfg.exit_z, 0.0);
        assert_eq!(cfg.transaction_cost_bps, 0.0005);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_yaml_fields() {
        let cfg = PairTradeConfig::from_yaml_str(
            r#"
pair: "GLD/GDX"
delta: 0.00001
observation_noise: 0.002
initial_beta: 1.0
entry_z_score: 1.5
exit_z_score: 0.25
transaction_cost_bps: 0.0
periods_per_year: 365
backtest_file: "dump.jsonl"
"#,
        )
        .unwrap();
        assert_eq!(cfg.pair.x, "GLD");
        assert_eq!(cfg.pair.y, "GDX");
        assert_eq!(cfg.delta, 1e-5);
        assert_eq!(cfg.filter_params().initial_beta, 1.0);
        assert_eq!(cfg.signal_thresholds(), SignalThresholds::new(1.5, 0.25));
        assert_eq!(cfg.cost_model().periods_per_year, 365.0);
        assert_eq!(cfg.backtest_file.as_deref(), Some("dump.jsonl"));
    }

    #[test]
    fn from_yaml_path_reports_missing_file() {
        let err = PairTradeConfig::from_yaml_path("/nonexistent/pairtrade.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to open PairTrade config"));
    }

    #[test]
    fn from_yaml_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "entry_z_score: 2.5\nexit_z_score: 0.5").unwrap();
        let cfg = PairTradeConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(cfg.signal_thresholds(), SignalThresholds::new(2.5, 0.5));
    }

    #[test]
    fn overrides_win_over_yaml() {
        let mut cfg = PairTradeConfig::from_yaml_str("entry_z_score: 1.5").unwrap();
        cfg.apply_overrides(lookup_from(&[
            ("ENTRY_Z_SCORE", "3.0"),
            ("KALMAN_DELTA", " 0.001 "),
            ("PAIR", "XOM/CVX"),
            ("BACKTEST_FILE", "replay.jsonl"),
            ("EXIT_Z_SCORE", ""),
        ]))
        .unwrap();
        assert_eq!(cfg.entry_z, 3.0);
        assert_eq!(cfg.delta, 0.001);
        assert_eq!(cfg.exit_z, 0.0);
        assert_eq!(cfg.pair.to_string(), "XOM/CVX");
        assert_eq!(cfg.backtest_file.as_deref(), Some("replay.jsonl"));
    }

    #[test]
    fn rejects_unparseable_override() {
        let mut cfg = PairTradeConfig::default();
        let err = cfg
            .apply_overrides(lookup_from(&[("TRANSACTION_COST_BPS", "five")]))
            .unwrap_err();
        assert!(err.to_string().contains("TRANSACTION_COST_BPS"));
    }

    #[test]
    fn pair_spec_parsing() {
        let spec: PairSpec = " PEP / KO ".parse().unwrap();
        assert_eq!(spec.x, "PEP");
        assert_eq!(spec.y, "KO");
        assert!("PEP".parse::<PairSpec>().is_err());
        assert!("PEP/".parse::<PairSpec>().is_err());
        assert!("A/B/C".parse::<PairSpec>().is_err());
        assert!("KO/KO".parse::<PairSpec>().is_err());
    }

    #[test]
    fn validate_surfaces_configuration_errors() {
        let cfg = PairTradeConfig {
            exit_z: 2.0,
            ..PairTradeConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PairTradeError::Configuration(_))
        ));
        let cfg = PairTradeConfig {
            observation_noise: 0.0,
            ..PairTradeConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PairTradeError::Configuration(_))
        ));
        let cfg = PairTradeConfig {
            initial_capital: 0.0,
            ..PairTradeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
