//! Options analytics module.
//!
//! Provides calendar and diagonal call-spread analysis: leg pricing, net
//! Greeks and the P/L profile at the short expiration.

pub mod calendar_spread;

pub use calendar_spread::{
    closest_strike, AnalyzerError, AnalyzerResult, CalendarSpreadAnalysis, CalendarSpreadAnalyzer,
    CalendarSpreadConfig, LegAnalysis, PayoffPoint, SpreadLeg,
};
