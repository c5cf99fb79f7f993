//! Synthetic option chains priced from a daily close series.
//!
//! Each day gets a strike ladder around spot and a fixed expiration
//! schedule (weekly, monthly, quarterly and one roughly a year out), with
//! every contract priced by Black-Scholes at the series' trailing
//! historical volatility. Each quote also carries its delta, gamma, vega
//! and a per-day theta. Output is deterministic for a given series.

use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{
    to_decimal, to_f64, OptionQuote, OptionType, OptionsSnapshot, PriceSeries, SnapshotMap,
};
use crate::pricing::{year_fraction, BlackScholes, Greeks, PricingResult, ThetaConvention};
use crate::metrics::TRADING_DAYS_PER_YEAR;

const FRIDAY: i64 = 4;
const MIN_SPREAD: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub risk_free_rate: f64,

    /// Strikes sampled before rounding; duplicates collapse.
    pub strike_count: usize,

    /// Half-width of the strike ladder as a fraction of spot.
    pub strike_range: f64,

    /// Strikes are rounded to a multiple of this.
    pub strike_step: Decimal,

    /// Trailing window of daily log returns for historical volatility.
    pub vol_window: usize,

    /// Used when no historical volatility can be computed.
    pub fallback_volatility: f64,

    /// Add an expiration about a year out.
    pub include_leaps: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.05,
            strike_count: 20,
            strike_range: 0.3,
            strike_step: Decimal::from(5),
            vol_window: 30,
            fallback_volatility: 0.25,
            include_leaps: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticChainGenerator {
    config: SyntheticConfig,
    bs: BlackScholes,
}

impl SyntheticChainGenerator {
    pub fn new(config: SyntheticConfig) -> Self {
        let bs = BlackScholes::new(config.risk_free_rate);
        Self { config, bs }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Annualised rolling volatility for every point of `prices`.
    ///
    /// Points without a full window take the mean of the computed values,
    /// or the fallback when the series is too short for any window.
    pub fn historical_volatility(&self, prices: &PriceSeries) -> Vec<f64> {
        let closes: Vec<f64> = prices.iter().map(|p| to_f64(p.close)).collect();
        let window = self.config.vol_window.max(2);

        let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();

        // vols[i] covers returns ending at close i
        let mut vols: Vec<Option<f64>> = vec![None; closes.len()];
        if returns.len() >= window {
            for end in window..=returns.len() {
                let slice = &returns[end - window..end];
                vols[end] = Some(sample_std(slice) * TRADING_DAYS_PER_YEAR.sqrt());
            }
        }

        let computed: Vec<f64> = vols.iter().flatten().copied().collect();
        let fill = if computed.is_empty() {
            self.config.fallback_volatility
        } else {
            computed.iter().sum::<f64>() / computed.len() as f64
        };

        vols.into_iter()
            .map(|v| {
                let v = v.unwrap_or(fill);
                if v.is_finite() && v > 0.0 {
                    v
                } else {
                    self.config.fallback_volatility
                }
            })
            .collect()
    }

    /// Strike ladder around `spot`: three equal sample bands below, around
    /// and above the money, rounded to `strike_step`, sorted and unique.
    pub fn strikes(&self, spot: Decimal) -> Vec<Decimal> {
        let spot_f = to_f64(spot);
        let step = to_f64(self.config.strike_step);
        let per_band = (self.config.strike_count / 3).max(2);
        let range = self.config.strike_range;

        let bands = [
            (spot_f * (1.0 - range), spot_f * 0.95),
            (spot_f * 0.95, spot_f * 1.05),
            (spot_f * 1.05, spot_f * (1.0 + range)),
        ];

        let mut strikes: Vec<Decimal> = bands
            .iter()
            .flat_map(|&(lo, hi)| linspace(lo, hi, per_band))
            .map(|k| {
                if step > 0.0 {
                    Decimal::from((k / step).round_ties_even() as i64) * self.config.strike_step
                } else {
                    to_decimal(k)
                }
            })
            .filter(|k| *k > Decimal::ZERO)
            .collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }

    /// Expirations listed on `date`, ascending and strictly after it.
    pub fn expirations(&self, date: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();

        for i in 1..=3 {
            dates.push(next_friday(date + Duration::days(7 * i)));
        }
        for i in 1..=3 {
            let d = date + Duration::days(30 * i);
            dates.extend(third_friday(d.year(), d.month()));
        }
        for i in 1..=2 {
            let d = date + Duration::days(90 * i);
            let quarter_month = (d.month() - 1) / 3 * 3 + 1;
            dates.extend(third_friday(d.year(), quarter_month));
        }
        if self.config.include_leaps {
            let d = date + Duration::days(365);
            dates.extend(third_friday(d.year(), d.month()));
        }

        dates.retain(|exp| *exp > date);
        dates.sort();
        dates.dedup();
        dates
    }

    /// Full snapshot for one day.
    pub fn snapshot(&self, date: NaiveDate, spot: Decimal, vol: f64) -> PricingResult<OptionsSnapshot> {
        let spot_f = to_f64(spot);
        let mut snapshot = OptionsSnapshot::new(date);

        for expiration in self.expirations(date) {
            let time = year_fraction(date, expiration);
            for strike in self.strikes(spot) {
                let strike_f = to_f64(strike);
                for option_type in [OptionType::Call, OptionType::Put] {
                    let greeks = self.bs.greeks(
                        spot_f,
                        strike_f,
                        time,
                        vol,
                        option_type,
                        ThetaConvention::Daily,
                    )?;
                    let quote = self.quote(date, expiration, option_type, strike, &greeks, vol);
                    snapshot.add_quote(quote);
                }
            }
        }

        Ok(snapshot)
    }

    fn quote(
        &self,
        date: NaiveDate,
        expiration: NaiveDate,
        option_type: OptionType,
        strike: Decimal,
        greeks: &Greeks,
        vol: f64,
    ) -> OptionQuote {
        let last = to_decimal(greeks.price).round_dp(4);
        let half_spread = (last * Decimal::new(2, 2)).max(MIN_SPREAD) / Decimal::TWO;

        let mut quote = OptionQuote::new(date, expiration, option_type, strike, last, vol);
        quote.bid = Some((last - half_spread).max(Decimal::ZERO));
        quote.ask = Some(last + half_spread);
        quote.delta = Some(greeks.delta);
        quote.gamma = Some(greeks.gamma);
        quote.theta = Some(greeks.theta);
        quote.vega = Some(greeks.vega);
        quote
    }

    /// Chains for every day of `prices`.
    pub fn generate(&self, prices: &PriceSeries) -> PricingResult<SnapshotMap> {
        let vols = self.historical_volatility(prices);
        let mut snapshots = SnapshotMap::new();

        for (point, vol) in prices.iter().zip(vols) {
            let snapshot = self.snapshot(point.date, point.close, vol)?;
            debug!(date = %point.date, vol, quotes = snapshot.total_quotes(), "generated chain");
            snapshots.insert(point.date, snapshot);
        }

        info!(days = snapshots.len(), "generated synthetic option chains");
        Ok(snapshots)
    }
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

fn linspace(lo: f64, hi: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (hi - lo) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |i| lo + step * i as f64)
}

/// First Friday strictly after `date`.
fn next_friday(date: NaiveDate) -> NaiveDate {
    let weekday = date.weekday().num_days_from_monday() as i64;
    let mut days = (FRIDAY - weekday).rem_euclid(7);
    if days == 0 {
        days = 7;
    }
    date + Duration::days(days)
}

pub fn third_friday(year: i32, month: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let weekday = first.weekday().num_days_from_monday() as i64;
    let offset = (FRIDAY - weekday).rem_euclid(7);
    Some(first + Duration::days(offset + 14))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Weekday;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn series(closes: &[f64]) -> PriceSeries {
        let start = date(2024, 1, 1);
        PriceSeries::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, c)| (start + Duration::days(i as i64), to_decimal(*c))),
        )
        .unwrap()
    }

    #[test]
    fn test_third_friday() {
        assert_eq!(third_friday(2024, 1), Some(date(2024, 1, 19)));
        assert_eq!(third_friday(2024, 3), Some(date(2024, 3, 15)));
        // Month starting on a Friday
        assert_eq!(third_friday(2024, 11), Some(date(2024, 11, 15)));
        assert_eq!(third_friday(2024, 13), None);
    }

    #[test]
    fn test_next_friday_skips_same_day() {
        assert_eq!(next_friday(date(2024, 1, 5)), date(2024, 1, 12));
        assert_eq!(next_friday(date(2024, 1, 8)), date(2024, 1, 12));
    }

    #[test]
    fn test_expirations_schedule() {
        let generator = SyntheticChainGenerator::default();
        let today = date(2024, 1, 2);
        let expirations = generator.expirations(today);

        assert!(expirations.windows(2).all(|w| w[0] < w[1]));
        assert!(expirations.iter().all(|e| *e > today));
        assert!(expirations.iter().all(|e| e.weekday() == Weekday::Fri));
        assert_eq!(expirations[0], date(2024, 1, 12));
        assert!(expirations.contains(&date(2024, 2, 16)));
        assert!(expirations.contains(&date(2024, 4, 19)));
        assert_eq!(*expirations.last().unwrap(), date(2025, 1, 17));

        let without_leaps = SyntheticChainGenerator::new(SyntheticConfig {
            include_leaps: false,
            ..Default::default()
        });
        assert!(without_leaps.expirations(today).last().unwrap() < &date(2024, 12, 31));
    }

    #[test]
    fn test_strikes_around_spot() {
        let generator = SyntheticChainGenerator::default();
        let strikes = generator.strikes(dec!(100));

        assert_eq!(strikes.first(), Some(&dec!(70)));
        assert_eq!(strikes.last(), Some(&dec!(130)));
        assert!(strikes.contains(&dec!(100)));
        assert!(strikes.windows(2).all(|w| w[0] < w[1]));
        assert!(strikes.iter().all(|k| k % dec!(5) == Decimal::ZERO));
    }

    #[test]
    fn test_historical_volatility_short_series_uses_fallback() {
        let generator = SyntheticChainGenerator::default();
        let vols = generator.historical_volatility(&series(&[100.0, 101.0, 99.0]));
        assert_eq!(vols, vec![0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_historical_volatility_fills_warmup_with_mean() {
        let generator = SyntheticChainGenerator::new(SyntheticConfig {
            vol_window: 2,
            ..Default::default()
        });
        let closes = [100.0, 102.0, 100.0, 103.0];
        let vols = generator.historical_volatility(&series(&closes));
        assert_eq!(vols.len(), 4);

        let r: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let v2 = sample_std(&r[0..2]) * 252f64.sqrt();
        let v3 = sample_std(&r[1..3]) * 252f64.sqrt();
        assert_relative_eq!(vols[2], v2, epsilon = 1e-12);
        assert_relative_eq!(vols[3], v3, epsilon = 1e-12);
        assert_relative_eq!(vols[0], (v2 + v3) / 2.0, epsilon = 1e-12);
        assert_relative_eq!(vols[1], vols[0], epsilon = 1e-12);
    }

    #[test]
    fn test_flat_series_falls_back() {
        let generator = SyntheticChainGenerator::new(SyntheticConfig {
            vol_window: 2,
            ..Default::default()
        });
        let vols = generator.historical_volatility(&series(&[100.0; 5]));
        assert!(vols.iter().all(|v| *v == 0.25));
    }

    #[test]
    fn test_snapshot_prices_match_kernel() {
        let generator = SyntheticChainGenerator::default();
        let today = date(2024, 1, 2);
        let snapshot = generator.snapshot(today, dec!(100), 0.2).unwrap();

        let n_strikes = generator.strikes(dec!(100)).len();
        let n_exp = generator.expirations(today).len();
        assert_eq!(snapshot.total_quotes(), n_strikes * n_exp * 2);

        let chain = snapshot.chain_at_expiration(date(2024, 2, 16)).unwrap();
        let put = chain.put_at_strike(dec!(100)).unwrap();
        let expected = BlackScholes::new(0.05)
            .put_price(100.0, 100.0, year_fraction(today, date(2024, 2, 16)), 0.2)
            .unwrap();
        assert_relative_eq!(to_f64(put.last_price), expected, epsilon = 1e-4);
        assert_eq!(put.implied_volatility, 0.2);
        assert!(put.bid.unwrap() < put.last_price);
        assert!(put.ask.unwrap() > put.last_price);
    }

    #[test]
    fn test_snapshot_quotes_carry_daily_greeks() {
        let generator = SyntheticChainGenerator::default();
        let today = date(2024, 1, 2);
        let expiry = date(2024, 2, 16);
        let snapshot = generator.snapshot(today, dec!(100), 0.2).unwrap();
        let put = snapshot
            .chain_at_expiration(expiry)
            .and_then(|c| c.put_at_strike(dec!(100)))
            .unwrap();

        let bs = BlackScholes::new(0.05);
        let time = year_fraction(today, expiry);
        let annual = bs
            .theta(100.0, 100.0, time, 0.2, OptionType::Put, ThetaConvention::Annual)
            .unwrap();

        assert_relative_eq!(put.theta.unwrap(), annual / 365.0, epsilon = 1e-12);
        assert!(put.theta.unwrap() < 0.0);
        assert_relative_eq!(
            put.delta.unwrap(),
            bs.delta(100.0, 100.0, time, 0.2, OptionType::Put).unwrap(),
            epsilon = 1e-12
        );
        assert!(put.gamma.unwrap() > 0.0);
        assert!(put.vega.unwrap() > 0.0);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let generator = SyntheticChainGenerator::default();
        let prices = series(&[100.0, 101.0, 99.5]);
        let a = generator.generate(&prices).unwrap();
        let b = generator.generate(&prices).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a, b);
        assert!(a.values().all(|s| s.nearest_expiry(OptionType::Put, 365).is_some()));
    }
}
