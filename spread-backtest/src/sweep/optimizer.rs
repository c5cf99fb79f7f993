//! Parameter sweep over the strategy's tunable inputs.
//!
//! Every combination of the grid runs as an independent backtest over the
//! same pre-loaded data. Runs share nothing mutable, so they execute in
//! parallel on the rayon pool and are ranked by Sharpe ratio afterwards.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backtest::{BacktestConfig, BacktestEngine, BacktestError};
use crate::data::{PriceSeries, SnapshotMap};
use crate::metrics::{MetricsCalculator, PerformanceMetrics};

/// Parameter values to sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterGrid {
    /// Long-put target deltas.
    pub target_delta: Vec<f64>,
    /// Short-put target DTEs.
    pub short_dte: Vec<i64>,
    /// Days between long-put rolls.
    pub roll_frequency_days: Vec<i64>,
    /// Days between short-put rolls.
    pub short_frequency_days: Vec<i64>,
}

impl Default for ParameterGrid {
    fn default() -> Self {
        Self {
            target_delta: vec![-0.15, -0.25, -0.35],
            short_dte: vec![7, 15, 30],
            roll_frequency_days: vec![30, 60],
            short_frequency_days: vec![7, 15],
        }
    }
}

impl ParameterGrid {
    /// Calculate total number of parameter combinations.
    pub fn total_combinations(&self) -> usize {
        self.target_delta.len()
            * self.short_dte.len()
            * self.roll_frequency_days.len()
            * self.short_frequency_days.len()
    }

    /// Generate all parameter combinations.
    pub fn combinations(&self) -> Vec<ParameterSet> {
        let mut combos = Vec::with_capacity(self.total_combinations());

        for &target_delta in &self.target_delta {
            for &short_dte in &self.short_dte {
                for &roll_frequency_days in &self.roll_frequency_days {
                    for &short_frequency_days in &self.short_frequency_days {
                        combos.push(ParameterSet {
                            target_delta,
                            short_dte,
                            roll_frequency_days,
                            short_frequency_days,
                        });
                    }
                }
            }
        }

        combos
    }
}

/// A single parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub target_delta: f64,
    pub short_dte: i64,
    pub roll_frequency_days: i64,
    pub short_frequency_days: i64,
}

impl ParameterSet {
    /// Apply this parameter set to a backtest config.
    pub fn apply_to_config(&self, config: &mut BacktestConfig) {
        config.target_delta = self.target_delta;
        config.short_dte = self.short_dte;
        config.roll_frequency_days = self.roll_frequency_days;
        config.short_frequency_days = self.short_frequency_days;
    }

    /// Create a unique key for this parameter set.
    pub fn key(&self) -> String {
        format!(
            "delta{:.2}_dte{}_roll{}_short{}",
            self.target_delta, self.short_dte, self.roll_frequency_days, self.short_frequency_days
        )
    }
}

/// Summary of one run's performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub total_return: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub final_value: Decimal,
}

impl From<&PerformanceMetrics> for SweepSummary {
    fn from(metrics: &PerformanceMetrics) -> Self {
        Self {
            total_return: metrics.total_return,
            cagr: metrics.cagr,
            max_drawdown: metrics.max_drawdown,
            sharpe_ratio: metrics.sharpe_ratio,
            sortino_ratio: metrics.sortino_ratio,
            win_rate: metrics.win_rate,
            total_trades: metrics.total_trades,
            final_value: metrics.final_value,
        }
    }
}

/// Result of running one parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub params: ParameterSet,
    pub summary: Option<SweepSummary>,
    /// Why the run failed, when it did.
    pub error: Option<String>,
}

impl SweepOutcome {
    fn sharpe(&self) -> Option<f64> {
        self.summary.as_ref().map(|s| s.sharpe_ratio)
    }
}

/// All outcomes, best Sharpe first. Failed runs sort last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub outcomes: Vec<SweepOutcome>,
}

impl SweepResult {
    pub fn best(&self) -> Option<&SweepOutcome> {
        self.outcomes.first().filter(|o| o.summary.is_some())
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.summary.is_none()).count()
    }

    /// Get summary string.
    pub fn summary(&self, top: usize) -> String {
        let mut out = format!(
            "Parameter Sweep: {} runs ({} failed)\n\
             ----------------------------------------\n",
            self.outcomes.len(),
            self.failed()
        );
        for outcome in self.outcomes.iter().take(top) {
            match &outcome.summary {
                Some(s) => out.push_str(&format!(
                    "{:<32} sharpe {:>6.2}  return {:>7.2}%  max dd {:>7.2}%  trades {}\n",
                    outcome.params.key(),
                    s.sharpe_ratio,
                    s.total_return * 100.0,
                    s.max_drawdown * 100.0,
                    s.total_trades
                )),
                None => out.push_str(&format!(
                    "{:<32} failed: {}\n",
                    outcome.params.key(),
                    outcome.error.as_deref().unwrap_or("unknown error")
                )),
            }
        }
        out
    }
}

/// Grid search with parallel execution.
pub struct ParameterSweep {
    base_config: BacktestConfig,
    grid: ParameterGrid,
}

impl ParameterSweep {
    pub fn new(base_config: BacktestConfig, grid: ParameterGrid) -> Self {
        Self { base_config, grid }
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    /// Run every combination and rank the outcomes.
    pub fn run(&self, prices: &PriceSeries, snapshots: &SnapshotMap) -> SweepResult {
        self.run_with_progress(prices, snapshots, |_, _| {})
    }

    /// Run every combination, calling `on_done(done, total)` as runs finish.
    pub fn run_with_progress<F>(
        &self,
        prices: &PriceSeries,
        snapshots: &SnapshotMap,
        on_done: F,
    ) -> SweepResult
    where
        F: Fn(usize, usize) + Sync,
    {
        let combinations = self.grid.combinations();
        let total = combinations.len();
        info!("Parameter combinations: {}", total);

        let progress = AtomicUsize::new(0);

        let mut outcomes: Vec<SweepOutcome> = combinations
            .par_iter()
            .map(|params| {
                let outcome = match self.run_one(params, prices, snapshots) {
                    Ok(metrics) => SweepOutcome {
                        params: *params,
                        summary: Some(SweepSummary::from(&metrics)),
                        error: None,
                    },
                    Err(e) => {
                        warn!(params = %params.key(), error = %e, "sweep run failed");
                        SweepOutcome {
                            params: *params,
                            summary: None,
                            error: Some(e.to_string()),
                        }
                    }
                };

                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % (total / 10).max(1) == 0 || done == total {
                    info!(
                        "  {:.0}% ({}/{} combinations)",
                        done as f64 / total as f64 * 100.0,
                        done,
                        total
                    );
                }
                on_done(done, total);

                outcome
            })
            .collect();

        // Stable sort keeps grid order among equal Sharpe ratios
        outcomes.sort_by(|a, b| match (a.sharpe(), b.sharpe()) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(CmpOrdering::Equal),
            (Some(_), None) => CmpOrdering::Less,
            (None, Some(_)) => CmpOrdering::Greater,
            (None, None) => CmpOrdering::Equal,
        });

        if let Some(best) = outcomes.first().filter(|o| o.summary.is_some()) {
            info!(
                "Best params = {}, Sharpe = {:.2}",
                best.params.key(),
                best.sharpe().unwrap_or(0.0)
            );
        }

        SweepResult { outcomes }
    }

    fn run_one(
        &self,
        params: &ParameterSet,
        prices: &PriceSeries,
        snapshots: &SnapshotMap,
    ) -> Result<PerformanceMetrics, BacktestError> {
        let mut config = self.base_config.clone();
        params.apply_to_config(&mut config);

        let engine = BacktestEngine::new(config)?;
        let result = engine.run(prices, snapshots)?;
        Ok(MetricsCalculator::calculate(&result, prices))
    }
}
