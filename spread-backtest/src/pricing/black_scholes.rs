//! Black-Scholes pricing and Greeks for European options.
//!
//! All functions take spot `S`, strike `K`, time to expiry `T` in years,
//! volatility `sigma` and use the risk-free rate carried by [`BlackScholes`].
//!
//! Boundary policy: when `T <= 0` or `sigma <= 0` there is no time value.
//! Prices collapse to intrinsic value, delta to a step function, and
//! gamma/vega/theta/rho to zero. This is a defined result, not an error.
//! Non-positive spot or strike is rejected with [`PricingError::InvalidInput`].

use std::f64::consts::PI;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::data::OptionType;

/// Calendar days per year used for every year-fraction conversion.
pub const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type PricingResult<T> = Result<T, PricingError>;

/// Unit in which theta is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThetaConvention {
    /// Value change per year of elapsed time (the raw partial derivative).
    #[default]
    Annual,
    /// Value change per calendar day (annual / 365).
    Daily,
}

impl ThetaConvention {
    fn scale(self, annual_theta: f64) -> f64 {
        match self {
            Self::Annual => annual_theta,
            Self::Daily => annual_theta / DAYS_PER_YEAR,
        }
    }
}

/// Year fraction between two dates. Negative when `to` is before `from`.
pub fn year_fraction(from: NaiveDate, to: NaiveDate) -> f64 {
    (to - from).num_days() as f64 / DAYS_PER_YEAR
}

/// Intrinsic value of an option.
pub fn intrinsic_value(spot: f64, strike: f64, opt_type: OptionType) -> f64 {
    match opt_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

/// Price and Greeks of one contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub price: f64,
    pub delta: f64,
    pub gamma: f64,
    /// Theta in the unit named by `theta_convention`.
    pub theta: f64,
    /// Vega per 1.00 change in volatility.
    pub vega: f64,
    /// Rho per 1.00 change in the risk-free rate.
    pub rho: f64,
    pub theta_convention: ThetaConvention,
}

/// Black-Scholes calculator for options pricing and Greeks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlackScholes {
    /// Risk-free interest rate (continuously compounded, annual).
    pub rate: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self { rate: 0.05 }
    }
}

impl BlackScholes {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    fn validate(spot: f64, strike: f64, time: f64, vol: f64) -> PricingResult<()> {
        if !(spot.is_finite() && spot > 0.0) {
            return Err(PricingError::InvalidInput(format!(
                "spot must be positive, got {}",
                spot
            )));
        }
        if !(strike.is_finite() && strike > 0.0) {
            return Err(PricingError::InvalidInput(format!(
                "strike must be positive, got {}",
                strike
            )));
        }
        if time.is_nan() || vol.is_nan() {
            return Err(PricingError::InvalidInput(
                "time and volatility must not be NaN".to_string(),
            ));
        }
        Ok(())
    }

    /// No time value remains.
    fn at_boundary(time: f64, vol: f64) -> bool {
        time <= 0.0 || vol <= 0.0
    }

    /// Calculate d1 parameter. Requires `time > 0` and `vol > 0`.
    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator = (spot / strike).ln() + (self.rate + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    /// Calculate d2 parameter. Requires `time > 0` and `vol > 0`.
    fn d2(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        self.d1(spot, strike, time, vol) - vol * time.sqrt()
    }

    /// Standard normal CDF.
    fn norm_cdf(x: f64) -> f64 {
        Normal::standard().cdf(x)
    }

    /// Standard normal PDF.
    fn norm_pdf(x: f64) -> f64 {
        (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
    }

    /// Theoretical premium, never negative.
    pub fn price(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        vol: f64,
        opt_type: OptionType,
    ) -> PricingResult<f64> {
        Self::validate(spot, strike, time, vol)?;
        if Self::at_boundary(time, vol) {
            return Ok(intrinsic_value(spot, strike, opt_type));
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);
        let discount = (-self.rate * time).exp();

        let price = match opt_type {
            OptionType::Call => spot * Self::norm_cdf(d1) - strike * discount * Self::norm_cdf(d2),
            OptionType::Put => strike * discount * Self::norm_cdf(-d2) - spot * Self::norm_cdf(-d1),
        };
        Ok(price.max(0.0))
    }

    pub fn call_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> PricingResult<f64> {
        self.price(spot, strike, time, vol, OptionType::Call)
    }

    pub fn put_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> PricingResult<f64> {
        self.price(spot, strike, time, vol, OptionType::Put)
    }

    /// Delta: calls in [0, 1], puts in [-1, 0].
    pub fn delta(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        vol: f64,
        opt_type: OptionType,
    ) -> PricingResult<f64> {
        Self::validate(spot, strike, time, vol)?;
        if Self::at_boundary(time, vol) {
            return Ok(match opt_type {
                OptionType::Call if spot > strike => 1.0,
                OptionType::Put if spot < strike => -1.0,
                _ => 0.0,
            });
        }

        let call_delta = Self::norm_cdf(self.d1(spot, strike, time, vol));
        Ok(match opt_type {
            OptionType::Call => call_delta,
            OptionType::Put => call_delta - 1.0,
        })
    }

    /// Gamma (same for calls and puts).
    pub fn gamma(&self, spot: f64, strike: f64, time: f64, vol: f64) -> PricingResult<f64> {
        Self::validate(spot, strike, time, vol)?;
        if Self::at_boundary(time, vol) {
            return Ok(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        Ok(Self::norm_pdf(d1) / (spot * vol * time.sqrt()))
    }

    /// Vega per 1.00 change in volatility (same for calls and puts).
    /// Divide by 100 for the change per volatility point.
    pub fn vega(&self, spot: f64, strike: f64, time: f64, vol: f64) -> PricingResult<f64> {
        Self::validate(spot, strike, time, vol)?;
        if Self::at_boundary(time, vol) {
            return Ok(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        Ok(spot * Self::norm_pdf(d1) * time.sqrt())
    }

    /// Theta in the requested convention.
    pub fn theta(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        vol: f64,
        opt_type: OptionType,
        convention: ThetaConvention,
    ) -> PricingResult<f64> {
        Self::validate(spot, strike, time, vol)?;
        if Self::at_boundary(time, vol) {
            return Ok(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);
        let discount = (-self.rate * time).exp();

        let decay = -spot * Self::norm_pdf(d1) * vol / (2.0 * time.sqrt());
        let annual = match opt_type {
            OptionType::Call => decay - self.rate * strike * discount * Self::norm_cdf(d2),
            OptionType::Put => decay + self.rate * strike * discount * Self::norm_cdf(-d2),
        };
        Ok(convention.scale(annual))
    }

    /// Rho per 1.00 change in the risk-free rate.
    pub fn rho(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        vol: f64,
        opt_type: OptionType,
    ) -> PricingResult<f64> {
        Self::validate(spot, strike, time, vol)?;
        if Self::at_boundary(time, vol) {
            return Ok(0.0);
        }

        let d2 = self.d2(spot, strike, time, vol);
        let discount = (-self.rate * time).exp();
        Ok(match opt_type {
            OptionType::Call => strike * time * discount * Self::norm_cdf(d2),
            OptionType::Put => -strike * time * discount * Self::norm_cdf(-d2),
        })
    }

    /// Price plus every Greek in one call.
    pub fn greeks(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        vol: f64,
        opt_type: OptionType,
        convention: ThetaConvention,
    ) -> PricingResult<Greeks> {
        Ok(Greeks {
            price: self.price(spot, strike, time, vol, opt_type)?,
            delta: self.delta(spot, strike, time, vol, opt_type)?,
            gamma: self.gamma(spot, strike, time, vol)?,
            theta: self.theta(spot, strike, time, vol, opt_type, convention)?,
            vega: self.vega(spot, strike, time, vol)?,
            rho: self.rho(spot, strike, time, vol, opt_type)?,
            theta_convention: convention,
        })
    }

    /// Calculate implied volatility from option price using Newton-Raphson.
    pub fn implied_vol(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        price: f64,
        opt_type: OptionType,
    ) -> Option<f64> {
        if time <= 0.0 || price <= 0.0 || Self::validate(spot, strike, time, 0.0).is_err() {
            return None;
        }

        // Initial guess using Brenner-Subrahmanyam approximation
        let mut vol = ((price / spot) * (2.0 * PI / time).sqrt()).clamp(0.01, 5.0);

        let max_iter = 100;
        let tolerance = 1e-6;

        for _ in 0..max_iter {
            let diff = self.price(spot, strike, time, vol, opt_type).ok()? - price;
            if diff.abs() < tolerance {
                return Some(vol);
            }

            let vega = self.vega(spot, strike, time, vol).ok()?;
            if vega.abs() < 1e-10 {
                break;
            }

            vol = (vol - diff / vega).clamp(0.001, 10.0);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_black_scholes_call_price() {
        let bs = BlackScholes::new(0.05);
        let price = bs.call_price(100.0, 100.0, 1.0, 0.20).unwrap();
        // Textbook value for S=K=100, T=1, r=5%, vol=20%
        assert_relative_eq!(price, 10.4506, epsilon = 1e-3);
    }

    #[test]
    fn test_black_scholes_put_price() {
        let bs = BlackScholes::new(0.05);
        let price = bs.put_price(100.0, 100.0, 1.0, 0.20).unwrap();
        assert_relative_eq!(price, 5.5735, epsilon = 1e-3);
    }

    #[test]
    fn test_put_call_parity() {
        let bs = BlackScholes::new(0.03);
        for &(spot, strike, time, vol) in &[
            (100.0, 100.0, 1.0, 0.20),
            (95.0, 110.0, 0.25, 0.35),
            (120.0, 90.0, 2.0, 0.15),
        ] {
            let call = bs.call_price(spot, strike, time, vol).unwrap();
            let put = bs.put_price(spot, strike, time, vol).unwrap();
            let parity_rhs = spot - strike * (-bs.rate * time).exp();
            assert_relative_eq!(call - put, parity_rhs, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_boundary_is_intrinsic() {
        let bs = BlackScholes::default();
        assert_eq!(bs.call_price(105.0, 100.0, 0.0, 0.2).unwrap(), 5.0);
        assert_eq!(bs.put_price(105.0, 100.0, -0.1, 0.2).unwrap(), 0.0);
        assert_eq!(bs.put_price(95.0, 100.0, 0.5, 0.0).unwrap(), 5.0);
        assert_eq!(bs.call_price(95.0, 100.0, 0.5, -0.3).unwrap(), 0.0);
    }

    #[test]
    fn test_boundary_convergence() {
        let bs = BlackScholes::new(0.03);
        let call = bs.call_price(110.0, 100.0, 1e-8, 0.2).unwrap();
        let put = bs.put_price(90.0, 100.0, 1e-8, 0.2).unwrap();
        assert_relative_eq!(call, 10.0, epsilon = 1e-4);
        assert_relative_eq!(put, 10.0, epsilon = 1e-4);

        let call = bs.call_price(110.0, 100.0, 0.5, 1e-9).unwrap();
        let put = bs.put_price(90.0, 100.0, 0.5, 1e-9).unwrap();
        // With zero vol the forward intrinsic is discounted: S - K e^{-rT}
        assert_relative_eq!(call, 110.0 - 100.0 * (-0.015f64).exp(), epsilon = 1e-6);
        assert_relative_eq!(put, 100.0 * (-0.015f64).exp() - 90.0, epsilon = 1e-6);
    }

    #[test]
    fn test_boundary_delta_step() {
        let bs = BlackScholes::default();
        assert_eq!(bs.delta(105.0, 100.0, 0.0, 0.2, OptionType::Call).unwrap(), 1.0);
        assert_eq!(bs.delta(95.0, 100.0, 0.0, 0.2, OptionType::Call).unwrap(), 0.0);
        assert_eq!(bs.delta(95.0, 100.0, 0.0, 0.2, OptionType::Put).unwrap(), -1.0);
        assert_eq!(bs.delta(105.0, 100.0, 0.0, 0.2, OptionType::Put).unwrap(), 0.0);
    }

    #[test]
    fn test_delta_bounds() {
        let bs = BlackScholes::default();
        let call_delta = bs.delta(100.0, 100.0, 0.5, 0.25, OptionType::Call).unwrap();
        let put_delta = bs.delta(100.0, 100.0, 0.5, 0.25, OptionType::Put).unwrap();

        assert!(call_delta > 0.0 && call_delta < 1.0);
        assert!(put_delta > -1.0 && put_delta < 0.0);
        assert_relative_eq!(call_delta - put_delta, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_spot_and_strike_fail_fast() {
        let bs = BlackScholes::default();
        assert!(matches!(
            bs.price(0.0, 100.0, 1.0, 0.2, OptionType::Call),
            Err(PricingError::InvalidInput(_))
        ));
        assert!(matches!(
            bs.delta(100.0, -5.0, 1.0, 0.2, OptionType::Put),
            Err(PricingError::InvalidInput(_))
        ));
        assert!(bs.gamma(f64::NAN, 100.0, 1.0, 0.2).is_err());
    }

    #[test]
    fn test_gamma_and_vega_positive() {
        let bs = BlackScholes::default();
        assert!(bs.gamma(100.0, 100.0, 0.5, 0.25).unwrap() > 0.0);
        assert!(bs.vega(100.0, 100.0, 0.5, 0.25).unwrap() > 0.0);
    }

    #[test]
    fn test_theta_conventions() {
        let bs = BlackScholes::new(0.03);
        let annual = bs
            .theta(100.0, 100.0, 0.5, 0.2, OptionType::Call, ThetaConvention::Annual)
            .unwrap();
        let daily = bs
            .theta(100.0, 100.0, 0.5, 0.2, OptionType::Call, ThetaConvention::Daily)
            .unwrap();
        assert!(annual < 0.0);
        assert_relative_eq!(daily * DAYS_PER_YEAR, annual, epsilon = 1e-12);
    }

    #[test]
    fn test_theta_matches_finite_difference() {
        let bs = BlackScholes::new(0.03);
        let h = 1e-5;
        let t = 0.75;
        let theta = bs
            .theta(100.0, 95.0, t, 0.3, OptionType::Put, ThetaConvention::Annual)
            .unwrap();
        let up = bs.put_price(100.0, 95.0, t + h, 0.3).unwrap();
        let down = bs.put_price(100.0, 95.0, t - h, 0.3).unwrap();
        // Theta is the derivative with respect to calendar time, i.e. -dV/dT
        assert_relative_eq!(theta, -(up - down) / (2.0 * h), epsilon = 1e-4);
    }

    #[test]
    fn test_greeks_bundle() {
        let bs = BlackScholes::new(0.03);
        let g = bs
            .greeks(100.0, 100.0, 1.0, 0.2, OptionType::Put, ThetaConvention::Daily)
            .unwrap();
        assert_eq!(g.theta_convention, ThetaConvention::Daily);
        assert_relative_eq!(g.price, bs.put_price(100.0, 100.0, 1.0, 0.2).unwrap());
        assert!(g.rho < 0.0);
    }

    #[test]
    fn test_implied_vol() {
        let bs = BlackScholes::new(0.05);
        let vol = 0.25;
        let price = bs.call_price(100.0, 100.0, 0.5, vol).unwrap();

        let iv = bs
            .implied_vol(100.0, 100.0, 0.5, price, OptionType::Call)
            .unwrap();
        assert_relative_eq!(iv, vol, epsilon = 0.001);
    }

    #[test]
    fn test_year_fraction() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_relative_eq!(year_fraction(a, b), 365.0 / 365.0);
        assert!(year_fraction(b, a) < 0.0);
    }
}
