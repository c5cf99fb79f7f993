//! Validation of loaded price and option data.
//!
//! Checks the preconditions the backtest relies on: ordered positive
//! closes, well-formed quotes, and dates shared by both inputs.

pub mod data_integrity;

pub use data_integrity::{
    check_overlap, validate_prices, validate_snapshots, CheckResult, DataIntegrityReport,
    DataIntegrityValidator, ValidationError, ValidationResult,
};
