//! Core data types for options backtesting.
//!
//! Quotes are immutable once observed. Snapshots group them by expiration
//! with each side kept in ascending strike order, so every scan over a side
//! is deterministic.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decimal places kept when a kernel output crosses into money.
const MONEY_DP: u32 = 8;

/// Convert a kernel output into money. Non-finite values become zero.
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp(MONEY_DP))
        .unwrap_or(Decimal::ZERO)
}

/// Convert money into a kernel input.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "C" | "CALL" | "CALLS" => Some(Self::Call),
            "P" | "PUT" | "PUTS" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

/// A single option quote observed on a trade date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Date of the quote (trade date)
    pub trade_date: NaiveDate,

    /// Option expiration date
    pub expiration: NaiveDate,

    pub strike: Decimal,

    pub option_type: OptionType,

    /// Last traded price, used as the fill reference
    pub last_price: Decimal,

    /// Implied volatility as a decimal (0.25 = 25%). Zero when unknown.
    pub implied_volatility: f64,

    // Informational only, never used for fills.
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<i64>,
    #[serde(default)]
    pub open_interest: Option<i64>,

    // Greeks as published with the quote. Theta is per calendar day.
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub theta: Option<f64>,
    #[serde(default)]
    pub vega: Option<f64>,
}

impl OptionQuote {
    pub fn new(
        trade_date: NaiveDate,
        expiration: NaiveDate,
        option_type: OptionType,
        strike: Decimal,
        last_price: Decimal,
        implied_volatility: f64,
    ) -> Self {
        Self {
            trade_date,
            expiration,
            strike,
            option_type,
            last_price,
            implied_volatility,
            bid: None,
            ask: None,
            volume: None,
            open_interest: None,
            delta: None,
            gamma: None,
            theta: None,
            vega: None,
        }
    }

    /// Calendar days from the trade date to expiration.
    pub fn dte(&self) -> i64 {
        (self.expiration - self.trade_date).num_days()
    }

    /// The quote's IV, or `fallback` when it is missing or non-positive.
    pub fn volatility_or(&self, fallback: f64) -> f64 {
        if self.implied_volatility.is_finite() && self.implied_volatility > 0.0 {
            self.implied_volatility
        } else {
            fallback
        }
    }

    /// Positive strike, expiry after the trade date, non-negative price.
    pub fn is_well_formed(&self) -> bool {
        self.strike > Decimal::ZERO
            && self.expiration > self.trade_date
            && self.last_price >= Decimal::ZERO
    }
}

/// All options for a single expiration date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptionsChain {
    /// Expiration date for this chain
    pub expiration: NaiveDate,

    /// Calls in ascending strike order
    pub calls: Vec<OptionQuote>,

    /// Puts in ascending strike order
    pub puts: Vec<OptionQuote>,
}

impl OptionsChain {
    pub fn new(expiration: NaiveDate) -> Self {
        Self {
            expiration,
            calls: Vec::new(),
            puts: Vec::new(),
        }
    }

    /// Add a quote to the appropriate side, keeping strike order.
    /// Equal strikes keep their insertion order.
    pub fn add_quote(&mut self, quote: OptionQuote) {
        let side = match quote.option_type {
            OptionType::Call => &mut self.calls,
            OptionType::Put => &mut self.puts,
        };
        let idx = side.partition_point(|q| q.strike <= quote.strike);
        side.insert(idx, quote);
    }

    pub fn side(&self, option_type: OptionType) -> &[OptionQuote] {
        match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        }
    }

    /// Days to expiration as seen from `date`.
    pub fn dte_from(&self, date: NaiveDate) -> i64 {
        (self.expiration - date).num_days()
    }

    /// All strikes available in this chain.
    pub fn strikes(&self) -> Vec<Decimal> {
        let mut strikes: Vec<_> = self
            .calls
            .iter()
            .chain(self.puts.iter())
            .map(|q| q.strike)
            .collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }

    pub fn call_at_strike(&self, strike: Decimal) -> Option<&OptionQuote> {
        self.calls.iter().find(|q| q.strike == strike)
    }

    pub fn put_at_strike(&self, strike: Decimal) -> Option<&OptionQuote> {
        self.puts.iter().find(|q| q.strike == strike)
    }

    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }
}

/// Every quote observed for one underlying on one date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    /// Trading date
    pub date: NaiveDate,

    /// Chains in ascending expiration order
    pub chains: Vec<OptionsChain>,
}

impl OptionsSnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            chains: Vec::new(),
        }
    }

    /// Add a quote to the chain for its expiration, creating it if needed.
    pub fn add_quote(&mut self, quote: OptionQuote) {
        let idx = self
            .chains
            .partition_point(|c| c.expiration < quote.expiration);
        match self.chains.get_mut(idx) {
            Some(chain) if chain.expiration == quote.expiration => chain.add_quote(quote),
            _ => {
                let mut chain = OptionsChain::new(quote.expiration);
                chain.add_quote(quote);
                self.chains.insert(idx, chain);
            }
        }
    }

    /// Get chain for a specific expiration.
    pub fn chain_at_expiration(&self, expiration: NaiveDate) -> Option<&OptionsChain> {
        self.chains.iter().find(|c| c.expiration == expiration)
    }

    /// Chain whose DTE is closest to `target_dte` among unexpired chains
    /// with at least one quote of `option_type`. Chains expiring on or
    /// before the snapshot date are skipped. Ties go to the earlier
    /// expiration.
    pub fn nearest_expiry(&self, option_type: OptionType, target_dte: i64) -> Option<&OptionsChain> {
        let mut best: Option<(&OptionsChain, i64)> = None;
        for chain in &self.chains {
            let dte = chain.dte_from(self.date);
            if dte <= 0 || chain.side(option_type).is_empty() {
                continue;
            }
            let distance = (dte - target_dte).abs();
            match best {
                Some((_, best_distance)) if best_distance <= distance => {}
                _ => best = Some((chain, distance)),
            }
        }
        best.map(|(chain, _)| chain)
    }

    /// All quotes of one side across every expiration.
    pub fn quotes(&self, option_type: OptionType) -> impl Iterator<Item = &OptionQuote> {
        self.chains.iter().flat_map(move |c| c.side(option_type).iter())
    }

    /// Total number of option quotes in this snapshot.
    pub fn total_quotes(&self) -> usize {
        self.chains.iter().map(OptionsChain::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_quotes() == 0
    }
}

/// Snapshots keyed by trade date.
pub type SnapshotMap = BTreeMap<NaiveDate, OptionsSnapshot>;

/// Build a snapshot map from loose quotes, grouping by trade date.
pub fn group_quotes(quotes: impl IntoIterator<Item = OptionQuote>) -> SnapshotMap {
    let mut snapshots = SnapshotMap::new();
    for quote in quotes {
        snapshots
            .entry(quote.trade_date)
            .or_insert_with(|| OptionsSnapshot::new(quote.trade_date))
            .add_quote(quote);
    }
    snapshots
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    #[error("Dates must be strictly increasing: {previous} then {next}")]
    NotIncreasing { previous: NaiveDate, next: NaiveDate },

    #[error("Non-positive close {close} on {date}")]
    NonPositive { date: NaiveDate, close: Decimal },
}

/// One daily close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: Decimal,
}

/// Daily closes of the underlying, strictly increasing by date.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    closes: BTreeMap<NaiveDate, Decimal>,
}

impl PriceSeries {
    /// Build a series from points given in date order.
    pub fn new(points: impl IntoIterator<Item = (NaiveDate, Decimal)>) -> Result<Self, SeriesError> {
        let mut closes = BTreeMap::new();
        let mut previous: Option<NaiveDate> = None;
        for (date, close) in points {
            if let Some(prev) = previous {
                if date <= prev {
                    return Err(SeriesError::NotIncreasing {
                        previous: prev,
                        next: date,
                    });
                }
            }
            if close <= Decimal::ZERO {
                return Err(SeriesError::NonPositive { date, close });
            }
            closes.insert(date, close);
            previous = Some(date);
        }
        Ok(Self { closes })
    }

    pub fn close_on(&self, date: NaiveDate) -> Option<Decimal> {
        self.closes.get(&date).copied()
    }

    pub fn first(&self) -> Option<PricePoint> {
        self.closes
            .iter()
            .next()
            .map(|(&date, &close)| PricePoint { date, close })
    }

    pub fn last(&self) -> Option<PricePoint> {
        self.closes
            .iter()
            .next_back()
            .map(|(&date, &close)| PricePoint { date, close })
    }

    pub fn iter(&self) -> impl Iterator<Item = PricePoint> + '_ {
        self.closes
            .iter()
            .map(|(&date, &close)| PricePoint { date, close })
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.closes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}
