//! Parallel parameter sweeps.
//!
//! Runs the backtest once per combination of a parameter grid and ranks
//! the results by Sharpe ratio.

pub mod optimizer;

pub use optimizer::{
    ParameterGrid, ParameterSet, ParameterSweep, SweepOutcome, SweepResult, SweepSummary,
};
