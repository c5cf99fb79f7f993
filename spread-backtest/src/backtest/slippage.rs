//! Flat-spread fill model.
//!
//! Quotes carry a single reference price. Fills are placed a fixed fraction
//! of that price away from it: buys pay `price * (1 + h)`, sells receive
//! `price * (1 - h)` floored at zero. With `h = 0` fills equal the
//! reference price.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::to_decimal;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FillModel {
    /// Half of the assumed bid/ask spread as a fraction of price (0.01 = 1%).
    #[serde(default)]
    pub half_spread_pct: f64,
}

impl FillModel {
    pub fn new(half_spread_pct: f64) -> Self {
        Self { half_spread_pct }
    }

    /// Fill at the reference price.
    pub fn mid() -> Self {
        Self::default()
    }

    fn half_spread(&self) -> Decimal {
        to_decimal(self.half_spread_pct)
    }

    /// Price paid when buying.
    pub fn buy_fill(&self, price: Decimal) -> Decimal {
        price * (Decimal::ONE + self.half_spread())
    }

    /// Price received when selling.
    pub fn sell_fill(&self, price: Decimal) -> Decimal {
        (price * (Decimal::ONE - self.half_spread())).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mid_fill_is_identity() {
        let model = FillModel::mid();
        assert_eq!(model.buy_fill(dec!(2.50)), dec!(2.50));
        assert_eq!(model.sell_fill(dec!(2.50)), dec!(2.50));
    }

    #[test]
    fn test_spread_fills() {
        let model = FillModel::new(0.02);
        assert_eq!(model.buy_fill(dec!(5.00)), dec!(5.10));
        assert_eq!(model.sell_fill(dec!(5.00)), dec!(4.90));
    }

    #[test]
    fn test_sell_fill_never_negative() {
        let model = FillModel::new(1.5);
        assert_eq!(model.sell_fill(dec!(1.00)), Decimal::ZERO);
    }
}
