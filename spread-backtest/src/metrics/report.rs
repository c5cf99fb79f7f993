//! Performance report.
//!
//! Derives returns, drawdowns, risk-adjusted ratios and trade statistics from
//! a backtest's equity curve and trade log, and aligns a buy-and-hold
//! benchmark to the same dates. All returns are fractions (0.05 = 5%).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestResult, EquityPoint, TradeRecord};
use crate::data::{to_f64, PriceSeries};

/// Trading days per year used to annualize.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Default window for period summaries, in calendar days.
pub const DEFAULT_PERIOD_DAYS: i64 = 15;

/// Headline statistics for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_capital: Decimal,
    pub final_value: Decimal,

    // Return metrics
    pub total_return: f64,
    pub cagr: f64,

    // Risk metrics
    /// Most negative drawdown (e.g. -0.12).
    pub max_drawdown: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,

    // Benchmark
    pub benchmark_total_return: f64,
    pub benchmark_sharpe_ratio: f64,

    // Trade statistics
    /// Every trade record, opens included.
    pub total_trades: usize,
    /// Records that realized P&L.
    pub trades_with_pnl: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Winners over `trades_with_pnl`.
    pub win_rate: f64,
    pub realized_pnl: Decimal,

    pub trading_days: usize,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::ZERO,
            final_value: Decimal::ZERO,
            total_return: 0.0,
            cagr: 0.0,
            max_drawdown: 0.0,
            max_drawdown_date: None,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            benchmark_total_return: 0.0,
            benchmark_sharpe_ratio: 0.0,
            total_trades: 0,
            trades_with_pnl: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            realized_pnl: Decimal::ZERO,
            trading_days: 0,
        }
    }
}

impl PerformanceMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Initial Capital: ${:.2}\n\
             Final Value: ${:.2}\n\
             Total Return: {:.2}% (benchmark {:.2}%)\n\
             CAGR: {:.2}%\n\
             \n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {:.2} (benchmark {:.2})\n\
             Sortino Ratio: {:.2}\n\
             \n\
             Trades: {} ({} with P&L, W: {}, L: {})\n\
             Win Rate: {:.1}%\n\
             Realized P&L: ${:.2}\n\
             Trading Days: {}",
            self.initial_capital,
            self.final_value,
            self.total_return * 100.0,
            self.benchmark_total_return * 100.0,
            self.cagr * 100.0,
            self.max_drawdown * 100.0,
            self.sharpe_ratio,
            self.benchmark_sharpe_ratio,
            self.sortino_ratio,
            self.total_trades,
            self.trades_with_pnl,
            self.winning_trades,
            self.losing_trades,
            self.win_rate * 100.0,
            self.realized_pnl,
            self.trading_days,
        )
    }
}

/// Per-day strategy performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    pub portfolio_value: Decimal,
    /// Change from the previous point; `None` on the first day.
    pub daily_return: Option<f64>,
    /// Value over initial capital, minus one.
    pub cumulative_return: f64,
    /// Value over running peak, minus one. Zero or negative.
    pub drawdown: f64,
}

/// Buy-and-hold benchmark aligned to the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPoint {
    pub date: NaiveDate,
    pub close: Decimal,
    pub daily_return: Option<f64>,
    /// Close over first aligned close, minus one.
    pub cumulative_return: f64,
    /// Initial capital invested at the first aligned close.
    pub equity: Decimal,
}

/// Realized activity over one window of the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub start: NaiveDate,
    /// Date of the last record in the window.
    pub end: NaiveDate,
    pub trades: usize,
    pub pnl: Decimal,
    pub starting_capital: Decimal,
    pub ending_capital: Decimal,
    /// `pnl` over `starting_capital`.
    pub period_return: f64,
}

/// Everything derived from one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub metrics: PerformanceMetrics,
    pub daily: Vec<DailyPerformance>,
    pub benchmark: Vec<BenchmarkPoint>,
    pub periods: Vec<PeriodSummary>,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Build the full report. `benchmark` is usually the underlying's closes.
    pub fn report(
        result: &BacktestResult,
        benchmark: &PriceSeries,
        period_days: i64,
    ) -> PerformanceReport {
        let initial = result.config.initial_capital;
        let daily = Self::daily_performance(&result.equity_curve, initial);
        let benchmark = Self::benchmark_series(&result.equity_curve, benchmark, initial);
        let periods = Self::period_summaries(&result.trades, initial, period_days);
        let metrics = Self::metrics_from(result, &daily, &benchmark);

        PerformanceReport {
            metrics,
            daily,
            benchmark,
            periods,
        }
    }

    /// Calculate headline metrics only.
    pub fn calculate(result: &BacktestResult, benchmark: &PriceSeries) -> PerformanceMetrics {
        let initial = result.config.initial_capital;
        let daily = Self::daily_performance(&result.equity_curve, initial);
        let benchmark = Self::benchmark_series(&result.equity_curve, benchmark, initial);
        Self::metrics_from(result, &daily, &benchmark)
    }

    fn metrics_from(
        result: &BacktestResult,
        daily: &[DailyPerformance],
        benchmark: &[BenchmarkPoint],
    ) -> PerformanceMetrics {
        let initial = result.config.initial_capital;
        let final_value = daily.last().map(|d| d.portfolio_value).unwrap_or(initial);

        let returns: Vec<f64> = daily.iter().filter_map(|d| d.daily_return).collect();
        let benchmark_returns: Vec<f64> = benchmark.iter().filter_map(|b| b.daily_return).collect();

        let (max_drawdown, max_drawdown_date) = daily
            .iter()
            .fold((0.0_f64, None), |(worst, at), d| {
                if d.drawdown < worst {
                    (d.drawdown, Some(d.date))
                } else {
                    (worst, at)
                }
            });

        let (trades_with_pnl, winning_trades, losing_trades) = Self::trade_counts(&result.trades);
        let win_rate = if trades_with_pnl > 0 {
            winning_trades as f64 / trades_with_pnl as f64
        } else {
            0.0
        };

        PerformanceMetrics {
            initial_capital: initial,
            final_value,
            total_return: daily.last().map_or(0.0, |d| d.cumulative_return),
            cagr: Self::cagr(initial, final_value, daily.len()),
            max_drawdown,
            max_drawdown_date,
            sharpe_ratio: Self::sharpe_ratio(&returns),
            sortino_ratio: Self::sortino_ratio(&returns),
            benchmark_total_return: benchmark.last().map_or(0.0, |b| b.cumulative_return),
            benchmark_sharpe_ratio: Self::sharpe_ratio(&benchmark_returns),
            total_trades: result.trades.len(),
            trades_with_pnl,
            winning_trades,
            losing_trades,
            win_rate,
            realized_pnl: result.trades.iter().filter_map(|t| t.pnl).sum(),
            trading_days: daily.len(),
        }
    }

    /// (with pnl, winners, losers). Zero-pnl records count in neither bucket.
    pub fn trade_counts(trades: &[TradeRecord]) -> (usize, usize, usize) {
        trades
            .iter()
            .filter_map(|t| t.pnl)
            .fold((0, 0, 0), |(n, w, l), pnl| {
                if pnl > Decimal::ZERO {
                    (n + 1, w + 1, l)
                } else if pnl < Decimal::ZERO {
                    (n + 1, w, l + 1)
                } else {
                    (n + 1, w, l)
                }
            })
    }

    /// Returns, cumulative returns and drawdowns along the equity curve.
    pub fn daily_performance(curve: &[EquityPoint], initial_capital: Decimal) -> Vec<DailyPerformance> {
        let initial = to_f64(initial_capital);
        let mut peak = f64::NEG_INFINITY;
        let mut previous: Option<f64> = None;

        curve
            .iter()
            .map(|point| {
                let value = to_f64(point.portfolio_value);
                peak = peak.max(value);
                let daily = DailyPerformance {
                    date: point.date,
                    portfolio_value: point.portfolio_value,
                    daily_return: previous.map(|prev| Self::pct_change(prev, value)),
                    cumulative_return: if initial != 0.0 { value / initial - 1.0 } else { 0.0 },
                    drawdown: if peak > 0.0 { value / peak - 1.0 } else { 0.0 },
                };
                previous = Some(value);
                daily
            })
            .collect()
    }

    /// Benchmark closes on the equity curve's dates. Dates without a close
    /// are dropped.
    pub fn benchmark_series(
        curve: &[EquityPoint],
        prices: &PriceSeries,
        initial_capital: Decimal,
    ) -> Vec<BenchmarkPoint> {
        let aligned: Vec<(NaiveDate, Decimal)> = curve
            .iter()
            .filter_map(|p| prices.close_on(p.date).map(|close| (p.date, close)))
            .collect();

        let Some(&(_, first)) = aligned.first() else {
            return Vec::new();
        };
        let first_f = to_f64(first);

        let mut previous: Option<f64> = None;
        aligned
            .into_iter()
            .map(|(date, close)| {
                let close_f = to_f64(close);
                let point = BenchmarkPoint {
                    date,
                    close,
                    daily_return: previous.map(|prev| Self::pct_change(prev, close_f)),
                    cumulative_return: close_f / first_f - 1.0,
                    equity: initial_capital * close / first,
                };
                previous = Some(close_f);
                point
            })
            .collect()
    }

    /// Group the trade log into consecutive windows.
    ///
    /// A window opens at the first record at least `window_days` calendar
    /// days after the current window's start date. The distance is measured
    /// from the window start, not from the previous record, so a steady
    /// stream of trades still splits every `window_days`. Capital starts at
    /// `initial_capital` and accumulates realized P&L across windows.
    /// `period_return` is the window's P&L over its starting capital, not
    /// over its ending capital.
    pub fn period_summaries(
        trades: &[TradeRecord],
        initial_capital: Decimal,
        window_days: i64,
    ) -> Vec<PeriodSummary> {
        let mut periods: Vec<PeriodSummary> = Vec::new();
        let mut capital = initial_capital;

        for trade in trades {
            let needs_new = periods
                .last()
                .map_or(true, |p| (trade.date - p.start).num_days() >= window_days);
            if needs_new {
                periods.push(PeriodSummary {
                    start: trade.date,
                    end: trade.date,
                    trades: 0,
                    pnl: Decimal::ZERO,
                    starting_capital: capital,
                    ending_capital: capital,
                    period_return: 0.0,
                });
            }

            if let Some(period) = periods.last_mut() {
                period.end = trade.date;
                period.trades += 1;
                if let Some(pnl) = trade.pnl {
                    period.pnl += pnl;
                    capital += pnl;
                    period.ending_capital = capital;
                }
                period.period_return = if period.starting_capital > Decimal::ZERO {
                    to_f64(period.pnl / period.starting_capital)
                } else {
                    0.0
                };
            }
        }

        periods
    }

    /// Annualized Sharpe ratio of daily returns, zero risk-free rate.
    /// Uses the sample standard deviation; zero when it is zero or undefined.
    pub fn sharpe_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean = Self::mean(returns);
        let std_dev = Self::sample_std(returns, mean);
        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }
        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Calculate Sortino ratio (downside deviation).
    pub fn sortino_ratio(returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }

        let mean = Self::mean(returns);

        // Downside deviation (only negative returns)
        let downside_variance = returns
            .iter()
            .filter(|&&r| r < 0.0)
            .map(|r| r.powi(2))
            .sum::<f64>()
            / returns.len() as f64;
        let downside_dev = downside_variance.sqrt();

        if downside_dev == 0.0 {
            return 0.0;
        }

        mean * TRADING_DAYS_PER_YEAR.sqrt() / downside_dev
    }

    /// Calculate CAGR (Compound Annual Growth Rate).
    pub fn cagr(initial: Decimal, final_value: Decimal, trading_days: usize) -> f64 {
        let init = to_f64(initial);
        let fin = to_f64(final_value);

        if init <= 0.0 || fin <= 0.0 || trading_days == 0 {
            return 0.0;
        }

        let years = trading_days as f64 / TRADING_DAYS_PER_YEAR;
        (fin / init).powf(1.0 / years) - 1.0
    }

    fn pct_change(previous: f64, current: f64) -> f64 {
        if previous == 0.0 {
            0.0
        } else {
            current / previous - 1.0
        }
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn sample_std(values: &[f64], mean: f64) -> f64 {
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        variance.sqrt()
    }
}
