//! Contract selection rules used by the strategy.
//!
//! Both rules scan quotes in the order given and keep the first quote that
//! reaches the minimum distance, so callers that pass strike-ordered quotes
//! get the lowest strike on ties.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::trace;

use crate::data::{to_f64, OptionQuote, OptionType, OptionsSnapshot};
use crate::pricing::{BlackScholes, PricingError, PricingResult, DAYS_PER_YEAR};

/// Basis on which a quote was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMetric {
    /// Theoretical delta of the chosen quote.
    Delta(f64),
    /// Absolute distance between strike and spot.
    StrikeDistance(Decimal),
}

/// A chosen quote together with the metric that selected it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Selection<'a> {
    pub quote: &'a OptionQuote,
    pub metric: SelectionMetric,
}

impl Selection<'_> {
    pub fn delta(&self) -> Option<f64> {
        match self.metric {
            SelectionMetric::Delta(delta) => Some(delta),
            SelectionMetric::StrikeDistance(_) => None,
        }
    }
}

/// Picks contracts by theoretical delta or moneyness.
#[derive(Debug, Clone, Copy)]
pub struct ContractSelector {
    bs: BlackScholes,
    fallback_volatility: f64,
}

impl ContractSelector {
    pub fn new(risk_free_rate: f64, fallback_volatility: f64) -> Self {
        Self {
            bs: BlackScholes::new(risk_free_rate),
            fallback_volatility,
        }
    }

    /// Quote whose theoretical delta is closest to `target_delta`.
    ///
    /// Delta is computed with each quote's own IV (the fallback when it is
    /// missing) and `dte` calendar days to expiry. Quotes the kernel rejects
    /// (non-positive strike) are skipped. Returns `Ok(None)` when no quote
    /// is usable. A non-positive spot is an error.
    pub fn closest_delta<'a>(
        &self,
        quotes: &'a [OptionQuote],
        target_delta: f64,
        spot: Decimal,
        dte: i64,
    ) -> PricingResult<Option<Selection<'a>>> {
        let spot = to_f64(spot);
        if !(spot.is_finite() && spot > 0.0) {
            return Err(PricingError::InvalidInput(format!(
                "spot must be positive, got {}",
                spot
            )));
        }
        let time = dte as f64 / DAYS_PER_YEAR;

        let mut best: Option<(Selection<'a>, f64)> = None;
        for quote in quotes {
            let vol = quote.volatility_or(self.fallback_volatility);
            let delta = match self
                .bs
                .delta(spot, to_f64(quote.strike), time, vol, quote.option_type)
            {
                Ok(delta) => delta,
                Err(e) => {
                    trace!(strike = %quote.strike, error = %e, "skipping quote");
                    continue;
                }
            };
            let distance = (delta - target_delta).abs();

            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((
                    Selection {
                        quote,
                        metric: SelectionMetric::Delta(delta),
                    },
                    distance,
                ));
            }
        }

        Ok(best.map(|(selection, _)| selection))
    }

    /// Quote whose strike is closest to `spot`.
    pub fn at_the_money<'a>(&self, quotes: &'a [OptionQuote], spot: Decimal) -> Option<Selection<'a>> {
        let mut best: Option<Selection<'a>> = None;
        for quote in quotes {
            let distance = (quote.strike - spot).abs();
            let better = match best.map(|s| s.metric) {
                Some(SelectionMetric::StrikeDistance(d)) => distance < d,
                _ => true,
            };
            if better {
                best = Some(Selection {
                    quote,
                    metric: SelectionMetric::StrikeDistance(distance),
                });
            }
        }
        best
    }

    /// Closest-delta selection within the expiry group nearest `target_dte`.
    /// Delta uses that group's actual days to expiry.
    pub fn closest_delta_near_dte<'a>(
        &self,
        snapshot: &'a OptionsSnapshot,
        option_type: OptionType,
        target_dte: i64,
        target_delta: f64,
        spot: Decimal,
    ) -> PricingResult<Option<Selection<'a>>> {
        match snapshot.nearest_expiry(option_type, target_dte) {
            Some(chain) => self.closest_delta(
                chain.side(option_type),
                target_delta,
                spot,
                chain.dte_from(snapshot.date),
            ),
            None => Ok(None),
        }
    }

    /// At-the-money selection within the expiry group nearest `target_dte`.
    pub fn at_the_money_near_dte<'a>(
        &self,
        snapshot: &'a OptionsSnapshot,
        option_type: OptionType,
        target_dte: i64,
        spot: Decimal,
    ) -> Option<Selection<'a>> {
        snapshot
            .nearest_expiry(option_type, target_dte)
            .map(|chain| chain.side(option_type))
            .and_then(|quotes| self.at_the_money(quotes, spot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn trade_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn puts(strikes: &[i64], days_out: i64, iv: f64) -> Vec<OptionQuote> {
        let trade = trade_date();
        let expiry = trade + chrono::Duration::days(days_out);
        strikes
            .iter()
            .map(|&k| OptionQuote::new(trade, expiry, OptionType::Put, Decimal::from(k), dec!(1), iv))
            .collect()
    }

    #[test]
    fn test_closest_delta_is_argmin() {
        let selector = ContractSelector::new(0.03, 0.25);
        let strikes: Vec<i64> = (90..=110).collect();
        let quotes = puts(&strikes, 365, 0.2);
        let target = -0.25;

        let selection = selector
            .closest_delta(&quotes, target, dec!(100), 365)
            .unwrap()
            .unwrap();

        let bs = BlackScholes::new(0.03);
        let chosen = selection.delta().unwrap();
        for quote in &quotes {
            let d = bs
                .delta(100.0, to_f64(quote.strike), 1.0, 0.2, OptionType::Put)
                .unwrap();
            assert!((chosen - target).abs() <= (d - target).abs());
        }
        assert_eq!(selection.quote.strike, dec!(92));
    }

    #[test]
    fn test_closest_delta_on_five_point_ladder() {
        let selector = ContractSelector::new(0.03, 0.25);
        let quotes = puts(&[90, 95, 100, 105, 110], 365, 0.2);

        let selection = selector
            .closest_delta(&quotes, -0.25, dec!(100), 365)
            .unwrap()
            .unwrap();

        // Deltas run about -0.22, -0.31, -0.40, ... so 90 is nearest
        assert_eq!(selection.quote.strike, dec!(90));
        assert!((selection.delta().unwrap() + 0.2187).abs() < 1e-3);
    }

    #[test]
    fn test_closest_delta_skips_unpriceable_strike() {
        let selector = ContractSelector::new(0.03, 0.25);
        let quotes = puts(&[0, 90, 100], 365, 0.2);

        let selection = selector
            .closest_delta(&quotes, -0.25, dec!(100), 365)
            .unwrap()
            .unwrap();
        assert_eq!(selection.quote.strike, dec!(90));

        let only_bad = puts(&[0], 365, 0.2);
        assert!(selector
            .closest_delta(&only_bad, -0.25, dec!(100), 365)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_closest_delta_tie_goes_to_first() {
        let selector = ContractSelector::new(0.03, 0.25);
        let mut quotes = puts(&[100, 100], 30, 0.2);
        quotes[1].last_price = dec!(2);

        let selection = selector
            .closest_delta(&quotes, -0.5, dec!(100), 30)
            .unwrap()
            .unwrap();
        assert_eq!(selection.quote.last_price, dec!(1));
    }

    #[test]
    fn test_closest_delta_uses_fallback_iv() {
        let selector = ContractSelector::new(0.03, 0.25);
        let with_zero = puts(&[95], 90, 0.0);
        let with_fallback = puts(&[95], 90, 0.25);

        let a = selector.closest_delta(&with_zero, -0.25, dec!(100), 90).unwrap().unwrap();
        let b = selector.closest_delta(&with_fallback, -0.25, dec!(100), 90).unwrap().unwrap();
        assert_eq!(a.delta(), b.delta());
    }

    #[test]
    fn test_closest_delta_empty_is_none() {
        let selector = ContractSelector::new(0.03, 0.25);
        assert!(selector.closest_delta(&[], -0.25, dec!(100), 30).unwrap().is_none());
    }

    #[test]
    fn test_closest_delta_rejects_bad_spot() {
        let selector = ContractSelector::new(0.03, 0.25);
        let quotes = puts(&[100], 30, 0.2);
        assert!(selector.closest_delta(&quotes, -0.25, dec!(0), 30).is_err());
    }

    #[test]
    fn test_at_the_money() {
        let selector = ContractSelector::new(0.03, 0.25);
        let quotes = puts(&[90, 95, 100, 105, 110], 30, 0.2);

        let selection = selector.at_the_money(&quotes, dec!(101)).unwrap();
        assert_eq!(selection.quote.strike, dec!(100));
        assert_eq!(selection.metric, SelectionMetric::StrikeDistance(dec!(1)));

        // 102.5 is equidistant from 100 and 105; the first wins
        let selection = selector.at_the_money(&quotes, dec!(102.5)).unwrap();
        assert_eq!(selection.quote.strike, dec!(100));

        assert!(selector.at_the_money(&[], dec!(100)).is_none());
    }

    #[test]
    fn test_near_dte_uses_group_dte() {
        let selector = ContractSelector::new(0.03, 0.25);
        let mut snapshot = OptionsSnapshot::new(trade_date());
        for q in puts(&[80, 90, 100], 14, 0.2).into_iter().chain(puts(&[80, 90, 100], 360, 0.2)) {
            snapshot.add_quote(q);
        }

        let long = selector
            .closest_delta_near_dte(&snapshot, OptionType::Put, 365, -0.25, dec!(100))
            .unwrap()
            .unwrap();
        assert_eq!(long.quote.dte(), 360);

        let short = selector
            .at_the_money_near_dte(&snapshot, OptionType::Put, 15, dec!(99))
            .unwrap();
        assert_eq!(short.quote.dte(), 14);
        assert_eq!(short.quote.strike, dec!(100));

        assert!(selector
            .at_the_money_near_dte(&snapshot, OptionType::Call, 15, dec!(99))
            .is_none());
    }
}
