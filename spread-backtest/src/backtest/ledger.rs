//! Position ledger: cash, open option legs, and the append-only trade log.
//!
//! Cash accounting:
//! - Opening a long leg pays the premium, opening a short leg receives it.
//! - Closing a leg credits the realized P&L.
//! - Expiry settles at intrinsic value. Short legs pay it out (assignment),
//!   long legs receive it.
//!
//! Every mutation appends exactly one [`TradeRecord`].

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::data::{to_decimal, to_f64, OptionType};
use crate::pricing::{year_fraction, BlackScholes};

pub type LegId = u64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("No open leg with id {0}")]
    LegNotFound(LegId),
}

/// Direction of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSide {
    /// Bought premium.
    Long,
    /// Sold premium.
    Short,
}

/// Kind of ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Open,
    Close,
    Expiry,
}

/// Strategy role of a leg at the time of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRole {
    LongPutRoll,
    ShortPutRoll,
    LongCallRoll,
    ShortCallRoll,
    LongPutExpiry,
    ShortPutExpiry,
    LongCallExpiry,
    ShortCallExpiry,
}

impl LegRole {
    /// Opens and closes are part of a roll; expiries have their own role.
    pub fn for_event(side: LegSide, option_type: OptionType, action: TradeAction) -> Self {
        let expiry = action == TradeAction::Expiry;
        match (side, option_type, expiry) {
            (LegSide::Long, OptionType::Put, false) => Self::LongPutRoll,
            (LegSide::Short, OptionType::Put, false) => Self::ShortPutRoll,
            (LegSide::Long, OptionType::Call, false) => Self::LongCallRoll,
            (LegSide::Short, OptionType::Call, false) => Self::ShortCallRoll,
            (LegSide::Long, OptionType::Put, true) => Self::LongPutExpiry,
            (LegSide::Short, OptionType::Put, true) => Self::ShortPutExpiry,
            (LegSide::Long, OptionType::Call, true) => Self::LongCallExpiry,
            (LegSide::Short, OptionType::Call, true) => Self::ShortCallExpiry,
        }
    }
}

/// An open option position of one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    /// Assigned by the ledger on open.
    pub id: LegId,
    pub side: LegSide,
    pub option_type: OptionType,
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub entry_date: NaiveDate,
    /// Fill price per share.
    pub entry_price: Decimal,
    /// Volatility used for every later valuation of this leg.
    pub entry_iv: f64,
}

impl OptionLeg {
    pub fn new(
        side: LegSide,
        option_type: OptionType,
        strike: Decimal,
        expiration: NaiveDate,
        entry_date: NaiveDate,
        entry_price: Decimal,
        entry_iv: f64,
    ) -> Self {
        Self {
            id: 0,
            side,
            option_type,
            strike,
            expiration,
            entry_date,
            entry_price,
            entry_iv,
        }
    }

    pub fn is_long(&self) -> bool {
        self.side == LegSide::Long
    }

    /// Intrinsic value per share at `spot`.
    pub fn intrinsic(&self, spot: Decimal) -> Decimal {
        match self.option_type {
            OptionType::Call => (spot - self.strike).max(Decimal::ZERO),
            OptionType::Put => (self.strike - spot).max(Decimal::ZERO),
        }
    }

    /// P&L per share if the leg were closed at `price`.
    pub fn pnl_per_share(&self, price: Decimal) -> Decimal {
        match self.side {
            LegSide::Long => price - self.entry_price,
            LegSide::Short => self.entry_price - price,
        }
    }

    /// Theoretical value per share on `date`.
    ///
    /// Uses the remaining time to expiry and the entry IV. Once no time
    /// remains, or the kernel rejects its inputs, the value is intrinsic.
    pub fn value(&self, date: NaiveDate, spot: Decimal, bs: &BlackScholes) -> Decimal {
        let time = year_fraction(date, self.expiration);
        if time <= 0.0 {
            return self.intrinsic(spot);
        }
        match bs.price(
            to_f64(spot),
            to_f64(self.strike),
            time,
            self.entry_iv,
            self.option_type,
        ) {
            Ok(price) => to_decimal(price),
            Err(e) => {
                trace!(leg = self.id, error = %e, "valuing leg at intrinsic");
                self.intrinsic(spot)
            }
        }
    }
}

/// Immutable audit entry for one ledger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: NaiveDate,
    pub leg_id: LegId,
    pub role: LegRole,
    pub action: TradeAction,
    pub strike: Decimal,
    /// Fill price per share (open and close).
    pub price: Option<Decimal>,
    /// Realized P&L in currency (close and expiry).
    pub pnl: Option<Decimal>,
    pub spot: Decimal,
    /// Theoretical delta at selection time, when known.
    pub delta: Option<f64>,
    /// Set on expiry events only.
    pub assigned: Option<bool>,
}

/// Cash, open legs and trade log for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    cash: Decimal,
    multiplier: Decimal,
    legs: Vec<OptionLeg>,
    trades: Vec<TradeRecord>,
    next_id: LegId,
}

impl Ledger {
    pub fn new(initial_capital: Decimal, multiplier: Decimal) -> Self {
        Self {
            cash: initial_capital,
            multiplier,
            legs: Vec::new(),
            trades: Vec::new(),
            next_id: 1,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn multiplier(&self) -> Decimal {
        self.multiplier
    }

    pub fn legs(&self) -> &[OptionLeg] {
        &self.legs
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn leg(&self, id: LegId) -> Option<&OptionLeg> {
        self.legs.iter().find(|l| l.id == id)
    }

    /// First open leg with the given side and type.
    pub fn find_leg(&self, side: LegSide, option_type: OptionType) -> Option<&OptionLeg> {
        self.legs
            .iter()
            .find(|l| l.side == side && l.option_type == option_type)
    }

    /// Open a leg at its entry price. Returns the assigned id.
    pub fn open(&mut self, mut leg: OptionLeg, spot: Decimal, delta: Option<f64>) -> LegId {
        let id = self.next_id;
        self.next_id += 1;
        leg.id = id;

        let premium = leg.entry_price * self.multiplier;
        match leg.side {
            LegSide::Long => self.cash -= premium,
            LegSide::Short => self.cash += premium,
        }

        debug!(
            leg = id,
            side = ?leg.side,
            strike = %leg.strike,
            expiration = %leg.expiration,
            price = %leg.entry_price,
            "opened leg"
        );

        self.trades.push(TradeRecord {
            date: leg.entry_date,
            leg_id: id,
            role: LegRole::for_event(leg.side, leg.option_type, TradeAction::Open),
            action: TradeAction::Open,
            strike: leg.strike,
            price: Some(leg.entry_price),
            pnl: None,
            spot,
            delta,
            assigned: None,
        });
        self.legs.push(leg);
        id
    }

    /// Close a leg at `exit_price` and credit the realized P&L.
    pub fn close(
        &mut self,
        id: LegId,
        exit_price: Decimal,
        date: NaiveDate,
        spot: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let leg = self.take_leg(id)?;
        let pnl = leg.pnl_per_share(exit_price) * self.multiplier;
        self.cash += pnl;

        debug!(leg = id, price = %exit_price, pnl = %pnl, "closed leg");

        self.trades.push(TradeRecord {
            date,
            leg_id: id,
            role: LegRole::for_event(leg.side, leg.option_type, TradeAction::Close),
            action: TradeAction::Close,
            strike: leg.strike,
            price: Some(exit_price),
            pnl: Some(pnl),
            spot,
            delta: None,
            assigned: None,
        });
        Ok(pnl)
    }

    /// Settle a leg at intrinsic value.
    ///
    /// A short leg in the money is assigned: cash pays out the intrinsic
    /// value and the P&L is the entry premium less that payout. An
    /// out-of-the-money short keeps its whole premium with no cash movement.
    /// Long legs receive the intrinsic value.
    pub fn expire(&mut self, id: LegId, spot: Decimal, date: NaiveDate) -> Result<Decimal, LedgerError> {
        let leg = self.take_leg(id)?;
        let intrinsic = leg.intrinsic(spot);
        let settlement = intrinsic * self.multiplier;
        let pnl = leg.pnl_per_share(intrinsic) * self.multiplier;
        let assigned = intrinsic > Decimal::ZERO;

        match leg.side {
            LegSide::Long => self.cash += settlement,
            LegSide::Short => self.cash -= settlement,
        }

        debug!(leg = id, spot = %spot, assigned, pnl = %pnl, "expired leg");

        self.trades.push(TradeRecord {
            date,
            leg_id: id,
            role: LegRole::for_event(leg.side, leg.option_type, TradeAction::Expiry),
            action: TradeAction::Expiry,
            strike: leg.strike,
            price: None,
            pnl: Some(pnl),
            spot,
            delta: None,
            assigned: Some(assigned),
        });
        Ok(pnl)
    }

    /// Unrealized P&L of one leg in currency.
    pub fn unrealized(&self, leg: &OptionLeg, date: NaiveDate, spot: Decimal, bs: &BlackScholes) -> Decimal {
        leg.pnl_per_share(leg.value(date, spot, bs)) * self.multiplier
    }

    /// Portfolio value: cash plus unrealized P&L of every open leg.
    pub fn mark_to_market(&self, date: NaiveDate, spot: Decimal, bs: &BlackScholes) -> Decimal {
        self.cash
            + self
                .legs
                .iter()
                .map(|leg| self.unrealized(leg, date, spot, bs))
                .sum::<Decimal>()
    }

    fn take_leg(&mut self, id: LegId) -> Result<OptionLeg, LedgerError> {
        let idx = self
            .legs
            .iter()
            .position(|l| l.id == id)
            .ok_or(LedgerError::LegNotFound(id))?;
        Ok(self.legs.remove(idx))
    }
}
