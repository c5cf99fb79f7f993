//! Backtesting engine for the rolling put-spread strategy.
//!
//! - Strategy configuration (TOML-loadable)
//! - Position ledger with mark-to-market valuation
//! - Flat-spread fill model
//! - Day-stepping engine

pub mod config;
pub mod engine;
pub mod ledger;
pub mod slippage;

pub use config::{BacktestConfig, ConfigError};
pub use engine::{BacktestEngine, BacktestError, BacktestResult, EquityPoint, Progress};
pub use ledger::{
    Ledger, LedgerError, LegId, LegRole, LegSide, OptionLeg, TradeAction, TradeRecord,
};
pub use slippage::FillModel;
