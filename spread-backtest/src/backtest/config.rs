//! Strategy configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes. See `config/default.toml` for the full set.

use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::slippage::FillModel;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Parameters of the rolling put-spread strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Target delta for the long put, in (-1, 0).
    pub target_delta: f64,

    /// Target days to expiry for the short put.
    pub short_dte: i64,

    /// Target days to expiry for the long put.
    pub long_dte: i64,

    /// Days between long-put rolls.
    pub roll_frequency_days: i64,

    /// Days between short-put rolls.
    pub short_frequency_days: i64,

    /// Continuously compounded annual rate.
    pub risk_free_rate: f64,

    pub initial_capital: Decimal,

    /// Shares per contract.
    pub contract_multiplier: Decimal,

    /// Volatility used when a quote has no usable IV.
    pub fallback_volatility: f64,

    /// First date to process (inclusive).
    pub start_date: Option<NaiveDate>,

    /// Last date to process (inclusive).
    pub end_date: Option<NaiveDate>,

    // Tables serialize last in TOML.
    pub fill: FillModel,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            target_delta: -0.25,
            short_dte: 15,
            long_dte: 365,
            roll_frequency_days: 30,
            short_frequency_days: 15,
            risk_free_rate: 0.05,
            initial_capital: Decimal::from(10_000),
            contract_multiplier: Decimal::from(100),
            fallback_volatility: 0.25,
            start_date: None,
            end_date: None,
            fill: FillModel::default(),
        }
    }
}

impl BacktestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_delta > -1.0 && self.target_delta < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "target_delta must be in (-1, 0), got {}",
                self.target_delta
            )));
        }
        for (name, value) in [
            ("short_dte", self.short_dte),
            ("long_dte", self.long_dte),
            ("roll_frequency_days", self.roll_frequency_days),
            ("short_frequency_days", self.short_frequency_days),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !self.risk_free_rate.is_finite() {
            return Err(ConfigError::Invalid("risk_free_rate must be finite".to_string()));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.contract_multiplier <= Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "contract_multiplier must be positive, got {}",
                self.contract_multiplier
            )));
        }
        if !(self.fallback_volatility.is_finite() && self.fallback_volatility > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "fallback_volatility must be positive, got {}",
                self.fallback_volatility
            )));
        }
        if !(0.0..1.0).contains(&self.fill.half_spread_pct) {
            return Err(ConfigError::Invalid(format!(
                "fill.half_spread_pct must be in [0, 1), got {}",
                self.fill.half_spread_pct
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "start_date {} is after end_date {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// Whether `date` falls inside the configured range.
    pub fn in_range(&self, date: NaiveDate) -> bool {
        self.start_date.map_or(true, |s| date >= s) && self.end_date.map_or(true, |e| date <= e)
    }
}
