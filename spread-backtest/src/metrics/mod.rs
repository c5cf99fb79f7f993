//! Performance metrics module.
//!
//! Provides the end-of-run report:
//! - Daily, cumulative and benchmark returns
//! - Drawdown, Sharpe ratio, Sortino ratio, CAGR
//! - Win/loss statistics and rolling period summaries

pub mod report;

pub use report::{
    BenchmarkPoint, DailyPerformance, MetricsCalculator, PerformanceMetrics, PerformanceReport,
    PeriodSummary, DEFAULT_PERIOD_DAYS, TRADING_DAYS_PER_YEAR,
};
