pub mod black_scholes;

pub use black_scholes::{
    intrinsic_value, year_fraction, BlackScholes, Greeks, PricingError, PricingResult,
    ThetaConvention, DAYS_PER_YEAR,
};
