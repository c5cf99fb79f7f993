pub mod analytics;
pub mod backtest;
pub mod data;
pub mod metrics;
pub mod pricing;
pub mod selection;
pub mod sweep;
pub mod validation;

// Re-export commonly used types
pub use analytics::{CalendarSpreadAnalysis, CalendarSpreadAnalyzer, SpreadLeg};
pub use backtest::{
    BacktestConfig, BacktestEngine, BacktestError, BacktestResult, EquityPoint, FillModel, Ledger,
    OptionLeg, TradeRecord,
};
pub use data::{
    DataLoader, OptionQuote, OptionType, OptionsChain, OptionsSnapshot, PriceSeries, SnapshotMap,
    SyntheticChainGenerator,
};
pub use metrics::{MetricsCalculator, PerformanceMetrics, PerformanceReport};
pub use pricing::{BlackScholes, Greeks, PricingError, ThetaConvention};
pub use selection::{ContractSelector, Selection};
pub use sweep::{ParameterGrid, ParameterSweep, SweepResult};
pub use validation::{DataIntegrityReport, DataIntegrityValidator};
