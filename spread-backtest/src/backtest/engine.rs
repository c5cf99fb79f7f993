//! Core backtesting engine.
//!
//! Runs the rolling put-spread strategy one trading day at a time. For each
//! day that has both a close and a non-empty quote snapshot:
//! 1. Roll the long put (closest to target delta, ~`long_dte` out)
//! 2. Roll the short put (at the money, ~`short_dte` out), only while a
//!    long put is held
//! 3. Expire the short put once its expiry date is reached
//! 4. Mark the ledger to market and record an equity point
//!
//! A rule that finds no qualifying contract is skipped for that day.
//! Legs still open at the end of the run stay open and are reflected in the
//! last equity point at their mark-to-market value.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, trace, warn};

use crate::data::{OptionType, OptionsSnapshot, PriceSeries, SnapshotMap};
use crate::pricing::BlackScholes;
use crate::selection::{ContractSelector, Selection};

use super::config::{BacktestConfig, ConfigError};
use super::ledger::{Ledger, LedgerError, LegId, LegSide, OptionLeg, TradeRecord};

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("No data available: {0}")]
    NoDataAvailable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Portfolio state at the close of one processed day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    /// Cash plus unrealized P&L of open legs.
    pub portfolio_value: Decimal,
    pub cash: Decimal,
    pub spot: Decimal,
    pub long_strike: Option<Decimal>,
    pub short_strike: Option<Decimal>,
}

/// Per-day progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub date: NaiveDate,
    /// Days processed so far, including `date`.
    pub processed: usize,
    pub total: usize,
}

/// Result of a completed backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Configuration used.
    pub config: BacktestConfig,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    /// Daily equity curve, one point per processed day.
    pub equity_curve: Vec<EquityPoint>,

    /// Every ledger event in order.
    pub trades: Vec<TradeRecord>,

    /// Legs still open when the run ended.
    pub open_legs: Vec<OptionLeg>,

    pub final_cash: Decimal,
    pub final_value: Decimal,
}

impl BacktestResult {
    pub fn trading_days(&self) -> usize {
        self.equity_curve.len()
    }

    /// Total return as a fraction of initial capital.
    pub fn total_return(&self) -> f64 {
        if self.config.initial_capital.is_zero() {
            return 0.0;
        }
        ((self.final_value - self.config.initial_capital) / self.config.initial_capital)
            .try_into()
            .unwrap_or(0.0)
    }

    /// Records that realized P&L.
    pub fn realized(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(|t| t.pnl.is_some())
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.realized().filter_map(|t| t.pnl).sum()
    }

    /// Generate summary string.
    pub fn summary(&self) -> String {
        format!(
            "Backtest Results ({} to {})\n\
             ----------------------------------------\n\
             Trading Days: {}\n\
             Final Value: ${:.2}\n\
             Final Cash: ${:.2}\n\
             Total Return: {:.2}%\n\
             Trade Events: {} ({} realized, ${:.2})\n\
             Open Legs: {}",
            self.start_date,
            self.end_date,
            self.trading_days(),
            self.final_value,
            self.final_cash,
            self.total_return() * 100.0,
            self.trades.len(),
            self.realized().count(),
            self.total_realized_pnl(),
            self.open_legs.len(),
        )
    }
}

/// Mutable state of one run. The engine itself is never mutated, so one
/// engine can serve many runs.
struct RunState {
    ledger: Ledger,
    long_leg: Option<LegId>,
    short_leg: Option<LegId>,
    last_roll_date: Option<NaiveDate>,
    last_short_date: Option<NaiveDate>,
    equity_curve: Vec<EquityPoint>,
}

impl RunState {
    fn new(config: &BacktestConfig) -> Self {
        Self {
            ledger: Ledger::new(config.initial_capital, config.contract_multiplier),
            long_leg: None,
            short_leg: None,
            last_roll_date: None,
            last_short_date: None,
            equity_curve: Vec::new(),
        }
    }

    fn strike_of(&self, id: Option<LegId>) -> Option<Decimal> {
        id.and_then(|id| self.ledger.leg(id)).map(|l| l.strike)
    }
}

/// Whether a roll is due given the last roll date and its frequency.
fn roll_due(last: Option<NaiveDate>, date: NaiveDate, frequency_days: i64) -> bool {
    last.map_or(true, |last| (date - last).num_days() >= frequency_days)
}

/// The rolling put-spread backtester.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
    bs: BlackScholes,
    selector: ContractSelector,
}

impl BacktestEngine {
    /// Create a new engine. Fails if the configuration is invalid.
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self {
            bs: BlackScholes::new(config.risk_free_rate),
            selector: ContractSelector::new(config.risk_free_rate, config.fallback_volatility),
            config,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Dates with both a close and a non-empty snapshot inside the
    /// configured range, ascending.
    pub fn trading_days(&self, prices: &PriceSeries, snapshots: &SnapshotMap) -> Vec<NaiveDate> {
        prices
            .dates()
            .filter(|d| self.config.in_range(*d))
            .filter(|d| snapshots.get(d).map_or(false, |s| !s.is_empty()))
            .collect()
    }

    /// Run the backtest over pre-loaded data.
    pub fn run(
        &self,
        prices: &PriceSeries,
        snapshots: &SnapshotMap,
    ) -> Result<BacktestResult, BacktestError> {
        self.run_with_progress(prices, snapshots, |_| {})
    }

    /// Run the backtest, reporting progress after each processed day.
    pub fn run_with_progress<F>(
        &self,
        prices: &PriceSeries,
        snapshots: &SnapshotMap,
        mut on_progress: F,
    ) -> Result<BacktestResult, BacktestError>
    where
        F: FnMut(Progress),
    {
        let span = info_span!(
            "backtest",
            target_delta = self.config.target_delta,
            short_dte = self.config.short_dte,
            roll_frequency_days = self.config.roll_frequency_days,
            short_frequency_days = self.config.short_frequency_days,
        );
        let _enter = span.enter();

        let days = self.checked_trading_days(prices, snapshots)?;
        let total = days.len();
        info!(days = total, "starting backtest");

        let mut state = RunState::new(&self.config);
        for (idx, &date) in days.iter().enumerate() {
            // Both lookups are guaranteed by trading_days
            if let (Some(spot), Some(snapshot)) = (prices.close_on(date), snapshots.get(&date)) {
                self.process_day(&mut state, date, spot, snapshot)?;
            }
            on_progress(Progress {
                date,
                processed: idx + 1,
                total,
            });
        }

        let result = self.build_result(state, &days);
        info!(
            final_value = %result.final_value,
            trades = result.trades.len(),
            "backtest complete"
        );
        Ok(result)
    }

    fn checked_trading_days(
        &self,
        prices: &PriceSeries,
        snapshots: &SnapshotMap,
    ) -> Result<Vec<NaiveDate>, BacktestError> {
        let range = format!(
            "{}..{}",
            self.config
                .start_date
                .map_or_else(|| "start".to_string(), |d| d.to_string()),
            self.config
                .end_date
                .map_or_else(|| "end".to_string(), |d| d.to_string()),
        );

        if !prices.dates().any(|d| self.config.in_range(d)) {
            return Err(BacktestError::NoDataAvailable(format!(
                "no price data in {}",
                range
            )));
        }
        if !snapshots
            .iter()
            .any(|(d, s)| self.config.in_range(*d) && !s.is_empty())
        {
            return Err(BacktestError::NoDataAvailable(format!(
                "no option quotes in {}",
                range
            )));
        }

        let days = self.trading_days(prices, snapshots);
        if days.is_empty() {
            return Err(BacktestError::NoDataAvailable(format!(
                "price and option dates do not overlap in {}",
                range
            )));
        }
        Ok(days)
    }

    /// Process a single trading day.
    fn process_day(
        &self,
        state: &mut RunState,
        date: NaiveDate,
        spot: Decimal,
        snapshot: &OptionsSnapshot,
    ) -> Result<(), BacktestError> {
        // 1. Long put roll
        if state.long_leg.is_none()
            || roll_due(state.last_roll_date, date, self.config.roll_frequency_days)
        {
            self.roll_long(state, date, spot, snapshot)?;
        }

        // 2. Short put roll, only while hedged
        if state.long_leg.is_some()
            && (state.short_leg.is_none()
                || roll_due(state.last_short_date, date, self.config.short_frequency_days))
        {
            self.roll_short(state, date, spot, snapshot)?;
        }

        // 3. Short put expiry
        if let Some(id) = state.short_leg {
            let expired = state
                .ledger
                .leg(id)
                .map_or(false, |leg| date >= leg.expiration);
            if expired {
                state.ledger.expire(id, spot, date)?;
                state.short_leg = None;
            }
        }

        // 4. Valuation
        let portfolio_value = state.ledger.mark_to_market(date, spot, &self.bs);
        state.equity_curve.push(EquityPoint {
            date,
            portfolio_value,
            cash: state.ledger.cash(),
            spot,
            long_strike: state.strike_of(state.long_leg),
            short_strike: state.strike_of(state.short_leg),
        });
        Ok(())
    }

    fn roll_long(
        &self,
        state: &mut RunState,
        date: NaiveDate,
        spot: Decimal,
        snapshot: &OptionsSnapshot,
    ) -> Result<(), BacktestError> {
        let selection = match self.selector.closest_delta_near_dte(
            snapshot,
            OptionType::Put,
            self.config.long_dte,
            self.config.target_delta,
            spot,
        ) {
            Ok(Some(selection)) => selection,
            Ok(None) => {
                trace!(%date, "no long put candidate");
                return Ok(());
            }
            Err(e) => {
                warn!(%date, error = %e, "long put selection failed");
                return Ok(());
            }
        };

        if let Some(id) = state.long_leg.take() {
            self.close_at_market(state, id, date, spot)?;
        }
        state.long_leg = Some(self.open_from(state, LegSide::Long, &selection, date, spot));
        state.last_roll_date = Some(date);
        Ok(())
    }

    fn roll_short(
        &self,
        state: &mut RunState,
        date: NaiveDate,
        spot: Decimal,
        snapshot: &OptionsSnapshot,
    ) -> Result<(), BacktestError> {
        let Some(selection) =
            self.selector
                .at_the_money_near_dte(snapshot, OptionType::Put, self.config.short_dte, spot)
        else {
            trace!(%date, "no short put candidate");
            return Ok(());
        };

        if let Some(id) = state.short_leg.take() {
            self.close_at_market(state, id, date, spot)?;
        }
        state.short_leg = Some(self.open_from(state, LegSide::Short, &selection, date, spot));
        state.last_short_date = Some(date);
        Ok(())
    }

    /// Close a leg at its mark-to-market value through the fill model.
    fn close_at_market(
        &self,
        state: &mut RunState,
        id: LegId,
        date: NaiveDate,
        spot: Decimal,
    ) -> Result<Decimal, BacktestError> {
        let leg = state.ledger.leg(id).ok_or(LedgerError::LegNotFound(id))?;
        let value = leg.value(date, spot, &self.bs);
        let exit_price = match leg.side {
            LegSide::Long => self.config.fill.sell_fill(value),
            LegSide::Short => self.config.fill.buy_fill(value),
        };
        let pnl = state.ledger.close(id, exit_price, date, spot)?;
        debug!(%date, leg = id, pnl = %pnl, "rolled out of leg");
        Ok(pnl)
    }

    fn open_from(
        &self,
        state: &mut RunState,
        side: LegSide,
        selection: &Selection<'_>,
        date: NaiveDate,
        spot: Decimal,
    ) -> LegId {
        let quote = selection.quote;
        let entry_price = match side {
            LegSide::Long => self.config.fill.buy_fill(quote.last_price),
            LegSide::Short => self.config.fill.sell_fill(quote.last_price),
        };
        let leg = OptionLeg::new(
            side,
            quote.option_type,
            quote.strike,
            quote.expiration,
            date,
            entry_price,
            quote.volatility_or(self.config.fallback_volatility),
        );
        state.ledger.open(leg, spot, selection.delta())
    }

    /// Build the final backtest result.
    fn build_result(&self, state: RunState, days: &[NaiveDate]) -> BacktestResult {
        let final_value = state
            .equity_curve
            .last()
            .map(|p| p.portfolio_value)
            .unwrap_or(self.config.initial_capital);
        let final_cash = state.ledger.cash();
        let open_legs = state.ledger.legs().to_vec();
        let trades = state.ledger.trades().to_vec();

        BacktestResult {
            config: self.config.clone(),
            start_date: days.first().copied().unwrap_or_default(),
            end_date: days.last().copied().unwrap_or_default(),
            equity_curve: state.equity_curve,
            trades,
            open_legs,
            final_cash,
            final_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::ledger::{LegRole, TradeAction};
    use crate::data::{OptionQuote, OptionsSnapshot};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snapshot(trade: NaiveDate, expiries: Vec<(NaiveDate, Vec<(i64, Decimal)>)>) -> OptionsSnapshot {
        let mut snapshot = OptionsSnapshot::new(trade);
        for (expiry, strikes) in expiries {
            for (strike, price) in strikes {
                snapshot.add_quote(OptionQuote::new(
                    trade,
                    expiry,
                    OptionType::Put,
                    Decimal::from(strike),
                    price,
                    0.2,
                ));
            }
        }
        snapshot
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            risk_free_rate: 0.03,
            short_dte: 30,
            roll_frequency_days: 60,
            short_frequency_days: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_data_is_an_error() {
        let engine = BacktestEngine::new(config()).unwrap();
        let prices = PriceSeries::default();
        let snapshots = SnapshotMap::new();
        assert!(matches!(
            engine.run(&prices, &snapshots),
            Err(BacktestError::NoDataAvailable(_))
        ));
    }

    #[test]
    fn test_disjoint_dates_are_an_error() {
        let engine = BacktestEngine::new(config()).unwrap();
        let prices = PriceSeries::new(vec![(date(2024, 1, 2), dec!(100))]).unwrap();
        let mut snapshots = SnapshotMap::new();
        let d = date(2024, 1, 3);
        snapshots.insert(d, snapshot(d, vec![(date(2024, 2, 2), vec![(100, dec!(2))])]));

        let err = engine.run(&prices, &snapshots).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_empty_snapshot_counts_as_missing() {
        let engine = BacktestEngine::new(config()).unwrap();
        let d = date(2024, 1, 2);
        let prices = PriceSeries::new(vec![(d, dec!(100))]).unwrap();
        let mut snapshots = SnapshotMap::new();
        snapshots.insert(d, OptionsSnapshot::new(d));

        assert!(matches!(
            engine.run(&prices, &snapshots),
            Err(BacktestError::NoDataAvailable(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = BacktestConfig {
            target_delta: 0.3,
            ..Default::default()
        };
        assert!(matches!(BacktestEngine::new(bad), Err(BacktestError::Config(_))));
    }

    #[test]
    fn test_short_put_requires_long_put() {
        // Calls only: no long put can be selected, so no short put either
        let engine = BacktestEngine::new(config()).unwrap();
        let d = date(2024, 1, 2);
        let prices = PriceSeries::new(vec![(d, dec!(100))]).unwrap();
        let mut snap = OptionsSnapshot::new(d);
        snap.add_quote(OptionQuote::new(
            d,
            date(2024, 2, 2),
            OptionType::Call,
            dec!(100),
            dec!(2),
            0.2,
        ));
        let mut snapshots = SnapshotMap::new();
        snapshots.insert(d, snap);

        let result = engine.run(&prices, &snapshots).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.equity_curve.len(), 1);
        assert_eq!(result.final_value, dec!(10000));
    }

    #[test]
    fn test_short_put_assigned_at_expiry() {
        let engine = BacktestEngine::new(BacktestConfig {
            short_frequency_days: 60,
            ..config()
        })
        .unwrap();
        let long_expiry = date(2025, 1, 17);
        let short_expiry = date(2024, 1, 5);
        let next_short_expiry = date(2024, 2, 2);

        let d1 = date(2024, 1, 2);
        let d2 = date(2024, 1, 5);
        let prices = PriceSeries::new(vec![(d1, dec!(100)), (d2, dec!(95))]).unwrap();

        let mut snapshots = SnapshotMap::new();
        snapshots.insert(
            d1,
            snapshot(
                d1,
                vec![
                    (short_expiry, vec![(95, dec!(0.5)), (100, dec!(2.0))]),
                    (long_expiry, vec![(85, dec!(3.0)), (90, dec!(4.5)), (100, dec!(8.0))]),
                ],
            ),
        );
        snapshots.insert(
            d2,
            snapshot(
                d2,
                vec![
                    (next_short_expiry, vec![(95, dec!(2.2))]),
                    (long_expiry, vec![(90, dec!(5.0))]),
                ],
            ),
        );

        let result = engine.run(&prices, &snapshots).unwrap();

        let expiry = result
            .trades
            .iter()
            .find(|t| t.action == TradeAction::Expiry)
            .unwrap();
        assert_eq!(expiry.role, LegRole::ShortPutExpiry);
        assert_eq!(expiry.date, d2);
        assert_eq!(expiry.assigned, Some(true));
        assert_eq!(expiry.pnl, Some(dec!(-300)));

        // Expiry is evaluated after the short roll, so the slot is empty
        // at the close of d2 and no new short is opened until the next day.
        let last = result.equity_curve.last().unwrap();
        assert_eq!(last.short_strike, None);
        assert!(last.long_strike.is_some());
    }

    #[test]
    fn test_short_put_skips_chain_expiring_today() {
        let engine = BacktestEngine::new(BacktestConfig {
            short_dte: 15,
            ..config()
        })
        .unwrap();
        let d = date(2024, 1, 19);
        let prices = PriceSeries::new(vec![(d, dec!(100))]).unwrap();

        // 0 and 30 days out are equally far from the 15-day target
        let mut snapshots = SnapshotMap::new();
        snapshots.insert(
            d,
            snapshot(
                d,
                vec![
                    (d, vec![(100, dec!(0.1))]),
                    (date(2024, 2, 18), vec![(100, dec!(2.0))]),
                    (date(2025, 1, 17), vec![(90, dec!(4.5)), (100, dec!(8.0))]),
                ],
            ),
        );

        let result = engine.run(&prices, &snapshots).unwrap();

        assert!(result.trades.iter().all(|t| t.action == TradeAction::Open));
        let short = result.open_legs.iter().find(|l| !l.is_long()).unwrap();
        assert_eq!(short.expiration, date(2024, 2, 18));
        assert_eq!(short.entry_price, dec!(2.0));
        assert_eq!(result.equity_curve[0].short_strike, Some(dec!(100)));
    }

    #[test]
    fn test_long_roll_survives_unpriceable_strike() {
        let engine = BacktestEngine::new(config()).unwrap();
        let d = date(2024, 1, 2);
        let prices = PriceSeries::new(vec![(d, dec!(100))]).unwrap();
        let mut snapshots = SnapshotMap::new();
        snapshots.insert(
            d,
            snapshot(
                d,
                vec![(
                    date(2025, 1, 1),
                    vec![(0, dec!(0)), (90, dec!(4.5)), (100, dec!(8.0))],
                )],
            ),
        );

        let result = engine.run(&prices, &snapshots).unwrap();

        let long = result.open_legs.iter().find(|l| l.is_long()).unwrap();
        assert_eq!(long.strike, dec!(90));
        assert_eq!(result.trades[0].role, LegRole::LongPutRoll);
    }

    #[test]
    fn test_long_roll_closes_previous_leg() {
        let engine = BacktestEngine::new(BacktestConfig {
            roll_frequency_days: 1,
            ..config()
        })
        .unwrap();
        let long_expiry = date(2025, 1, 17);
        let short_expiry = date(2024, 2, 2);
        let d1 = date(2024, 1, 2);
        let d2 = date(2024, 1, 3);
        let prices = PriceSeries::new(vec![(d1, dec!(100)), (d2, dec!(101))]).unwrap();

        let mut snapshots = SnapshotMap::new();
        for d in [d1, d2] {
            snapshots.insert(
                d,
                snapshot(
                    d,
                    vec![
                        (short_expiry, vec![(100, dec!(2.0))]),
                        (long_expiry, vec![(90, dec!(4.5)), (100, dec!(8.0))]),
                    ],
                ),
            );
        }

        let result = engine.run(&prices, &snapshots).unwrap();
        let long_events: Vec<_> = result
            .trades
            .iter()
            .filter(|t| t.role == LegRole::LongPutRoll)
            .map(|t| t.action)
            .collect();
        assert_eq!(
            long_events,
            vec![TradeAction::Open, TradeAction::Close, TradeAction::Open]
        );
        assert_eq!(result.open_legs.len(), 2);
    }

    #[test]
    fn test_progress_reports_each_day() {
        let engine = BacktestEngine::new(config()).unwrap();
        let d1 = date(2024, 1, 2);
        let d2 = date(2024, 1, 3);
        let prices = PriceSeries::new(vec![(d1, dec!(100)), (d2, dec!(101))]).unwrap();
        let mut snapshots = SnapshotMap::new();
        for d in [d1, d2] {
            snapshots.insert(d, snapshot(d, vec![(date(2025, 1, 17), vec![(90, dec!(4.5))])]));
        }

        let mut seen = Vec::new();
        engine
            .run_with_progress(&prices, &snapshots, |p| seen.push((p.processed, p.total)))
            .unwrap();
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_date_range_limits_days() {
        let engine = BacktestEngine::new(BacktestConfig {
            start_date: Some(date(2024, 1, 3)),
            ..config()
        })
        .unwrap();
        let d1 = date(2024, 1, 2);
        let d2 = date(2024, 1, 3);
        let prices = PriceSeries::new(vec![(d1, dec!(100)), (d2, dec!(101))]).unwrap();
        let mut snapshots = SnapshotMap::new();
        for d in [d1, d2] {
            snapshots.insert(d, snapshot(d, vec![(date(2025, 1, 17), vec![(90, dec!(4.5))])]));
        }

        assert_eq!(engine.trading_days(&prices, &snapshots), vec![d2]);
        let result = engine.run(&prices, &snapshots).unwrap();
        assert_eq!(result.start_date, d2);
        assert_eq!(result.equity_curve.len(), 1);
    }

    #[test]
    fn test_roll_due() {
        let d = date(2024, 1, 31);
        assert!(roll_due(None, d, 30));
        assert!(roll_due(Some(date(2024, 1, 1)), d, 30));
        assert!(!roll_due(Some(date(2024, 1, 2)), d, 30));
    }
}
