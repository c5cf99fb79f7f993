//! Calendar and diagonal call-spread analysis.
//!
//! A long call on the later expiration financed by a short call on the
//! earlier one. The analysis prices both legs at the valuation date, nets
//! their Greeks, and projects P/L at the short expiration: the short leg
//! settles at intrinsic while the long leg keeps its remaining time value.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{to_decimal, to_f64, OptionQuote, OptionType, OptionsSnapshot};
use crate::pricing::{
    intrinsic_value, year_fraction, BlackScholes, PricingError, ThetaConvention,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("Short leg expiring {expiration} is not after the valuation date {date}")]
    Expired {
        expiration: NaiveDate,
        date: NaiveDate,
    },

    #[error("Long expiration {long} must be after short expiration {short}")]
    LongNotAfterShort { short: NaiveDate, long: NaiveDate },

    #[error("Invalid price grid: {0}")]
    InvalidGrid(String),

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSpreadConfig {
    pub risk_free_rate: f64,

    /// Volatility used for a leg without a usable IV.
    pub fallback_volatility: f64,

    /// Points in the default P/L grid.
    pub grid_points: usize,

    /// Default grid spans `spot * (1 ± grid_range)`.
    pub grid_range: f64,
}

impl Default for CalendarSpreadConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.03,
            fallback_volatility: 0.25,
            grid_points: 200,
            grid_range: 0.3,
        }
    }
}

/// One call leg as chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpreadLeg {
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub implied_volatility: Option<f64>,
}

impl SpreadLeg {
    pub fn new(strike: Decimal, expiration: NaiveDate) -> Self {
        Self {
            strike,
            expiration,
            implied_volatility: None,
        }
    }

    pub fn with_iv(mut self, implied_volatility: f64) -> Self {
        self.implied_volatility = Some(implied_volatility);
        self
    }

    pub fn from_quote(quote: &OptionQuote) -> Self {
        Self {
            strike: quote.strike,
            expiration: quote.expiration,
            implied_volatility: Some(quote.implied_volatility),
        }
    }

    fn volatility_or(&self, fallback: f64) -> f64 {
        self.implied_volatility
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(fallback)
    }
}

/// Priced leg. Theta is annual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegAnalysis {
    pub strike: Decimal,
    pub expiration: NaiveDate,
    /// Years to expiration from the valuation date.
    pub time: f64,
    pub volatility: f64,
    pub premium: Decimal,
    pub delta: f64,
    pub theta: f64,
    pub vega: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSpreadAnalysis {
    pub valuation_date: NaiveDate,
    pub spot: Decimal,
    pub short: LegAnalysis,
    pub long: LegAnalysis,

    /// Long premium minus short premium, per share.
    pub net_debit: Decimal,
    pub net_delta: f64,
    pub net_theta: f64,
    pub net_vega: f64,
    pub theta_convention: ThetaConvention,
}

impl CalendarSpreadAnalysis {
    /// Strikes differ (diagonal) rather than match (calendar).
    pub fn is_diagonal(&self) -> bool {
        self.short.strike != self.long.strike
    }

    /// Years the long leg has left once the short leg expires.
    pub fn remaining_time(&self) -> f64 {
        year_fraction(self.short.expiration, self.long.expiration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PayoffPoint {
    pub underlying: Decimal,
    pub pnl: Decimal,
}

#[derive(Debug, Clone)]
pub struct CalendarSpreadAnalyzer {
    config: CalendarSpreadConfig,
    bs: BlackScholes,
}

impl Default for CalendarSpreadAnalyzer {
    fn default() -> Self {
        Self::new(CalendarSpreadConfig::default())
    }
}

impl CalendarSpreadAnalyzer {
    pub fn new(config: CalendarSpreadConfig) -> Self {
        let bs = BlackScholes::new(config.risk_free_rate);
        Self { config, bs }
    }

    pub fn config(&self) -> &CalendarSpreadConfig {
        &self.config
    }

    pub fn analyze(
        &self,
        spot: Decimal,
        valuation_date: NaiveDate,
        short: &SpreadLeg,
        long: &SpreadLeg,
    ) -> AnalyzerResult<CalendarSpreadAnalysis> {
        if short.expiration <= valuation_date {
            return Err(AnalyzerError::Expired {
                expiration: short.expiration,
                date: valuation_date,
            });
        }
        if long.expiration <= short.expiration {
            return Err(AnalyzerError::LongNotAfterShort {
                short: short.expiration,
                long: long.expiration,
            });
        }

        let short = self.price_leg(spot, valuation_date, short)?;
        let long = self.price_leg(spot, valuation_date, long)?;

        Ok(CalendarSpreadAnalysis {
            valuation_date,
            spot,
            net_debit: long.premium - short.premium,
            net_delta: long.delta - short.delta,
            net_theta: long.theta - short.theta,
            net_vega: long.vega - short.vega,
            theta_convention: ThetaConvention::Annual,
            short,
            long,
        })
    }

    fn price_leg(
        &self,
        spot: Decimal,
        date: NaiveDate,
        leg: &SpreadLeg,
    ) -> AnalyzerResult<LegAnalysis> {
        let time = year_fraction(date, leg.expiration);
        let volatility = leg.volatility_or(self.config.fallback_volatility);
        let greeks = self.bs.greeks(
            to_f64(spot),
            to_f64(leg.strike),
            time,
            volatility,
            OptionType::Call,
            ThetaConvention::Annual,
        )?;

        Ok(LegAnalysis {
            strike: leg.strike,
            expiration: leg.expiration,
            time,
            volatility,
            premium: to_decimal(greeks.price),
            delta: greeks.delta,
            theta: greeks.theta,
            vega: greeks.vega,
        })
    }

    /// P/L per share if the underlying is at `underlying` when the short leg
    /// expires.
    pub fn pnl_at_short_expiry(
        &self,
        analysis: &CalendarSpreadAnalysis,
        underlying: Decimal,
    ) -> AnalyzerResult<Decimal> {
        let price = to_f64(underlying);
        let short_payoff = intrinsic_value(price, to_f64(analysis.short.strike), OptionType::Call);
        let long_value = self.bs.price(
            price,
            to_f64(analysis.long.strike),
            analysis.remaining_time(),
            analysis.long.volatility,
            OptionType::Call,
        )?;
        Ok(to_decimal(long_value - short_payoff) - analysis.net_debit)
    }

    /// P/L at short expiry over `points` evenly spaced prices in `[low, high]`.
    pub fn payoff_curve(
        &self,
        analysis: &CalendarSpreadAnalysis,
        low: Decimal,
        high: Decimal,
        points: usize,
    ) -> AnalyzerResult<Vec<PayoffPoint>> {
        if points < 2 || low <= Decimal::ZERO || high <= low {
            return Err(AnalyzerError::InvalidGrid(format!(
                "need at least 2 points over a positive increasing range, got {} over [{}, {}]",
                points, low, high
            )));
        }

        let step = (high - low) / Decimal::from(points - 1);
        (0..points)
            .map(|i| {
                let underlying = low + step * Decimal::from(i);
                let pnl = self.pnl_at_short_expiry(analysis, underlying)?;
                Ok(PayoffPoint { underlying, pnl })
            })
            .collect()
    }

    /// Payoff curve over the configured range around spot.
    pub fn default_payoff_curve(
        &self,
        analysis: &CalendarSpreadAnalysis,
    ) -> AnalyzerResult<Vec<PayoffPoint>> {
        let range = to_decimal(self.config.grid_range);
        let low = analysis.spot * (Decimal::ONE - range);
        let high = analysis.spot * (Decimal::ONE + range);
        self.payoff_curve(analysis, low, high, self.config.grid_points)
    }

    /// Default legs from a snapshot: calls at the strike nearest spot on each
    /// expiration, carrying their quoted IV.
    pub fn legs_from_snapshot(
        &self,
        snapshot: &OptionsSnapshot,
        short_expiration: NaiveDate,
        long_expiration: NaiveDate,
        spot: Decimal,
    ) -> Option<(SpreadLeg, SpreadLeg)> {
        let pick = |expiration: NaiveDate| -> Option<SpreadLeg> {
            let chain = snapshot.chain_at_expiration(expiration)?;
            let strikes: Vec<Decimal> = chain.calls.iter().map(|q| q.strike).collect();
            let strike = closest_strike(&strikes, spot)?;
            chain.call_at_strike(strike).map(SpreadLeg::from_quote)
        };
        Some((pick(short_expiration)?, pick(long_expiration)?))
    }
}

/// Strike nearest to `price`; the first one wins a tie.
pub fn closest_strike(strikes: &[Decimal], price: Decimal) -> Option<Decimal> {
    let mut best: Option<(Decimal, Decimal)> = None;
    for &strike in strikes {
        let distance = (strike - price).abs();
        match best {
            Some((_, best_distance)) if best_distance <= distance => {}
            _ => best = Some((strike, distance)),
        }
    }
    best.map(|(strike, _)| strike)
}
