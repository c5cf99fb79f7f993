pub mod loader;
pub mod synthetic;
pub mod types;

pub use loader::{
    read_price_points, read_prices_csv, read_quote_rows, read_quotes_csv, write_prices_csv,
    write_quotes_csv, DataLoader, LoaderError,
};
pub use synthetic::{SyntheticChainGenerator, SyntheticConfig};
pub use types::{
    group_quotes, to_decimal, to_f64, OptionQuote, OptionType, OptionsChain, OptionsSnapshot,
    PricePoint, PriceSeries, SeriesError, SnapshotMap,
};
