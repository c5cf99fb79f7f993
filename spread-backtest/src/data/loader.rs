//! CSV data loader for price series and option quotes.
//!
//! Layout under the data directory:
//! - `stocks/<SYMBOL>.csv` with columns `date,close` (header match is
//!   case-insensitive, so `Date,Close` exports load as-is; extra columns
//!   are ignored)
//! - `options/<SYMBOL>.csv` with one row per contract:
//!   `trade_date,expiration,option_type,strike,last_price,implied_volatility`
//!   and optional `bid,ask,volume,open_interest,delta,gamma,theta,vega`
//!
//! Quote rows that cannot be traded (non-positive strike, expiry on or
//! before the trade date, negative last price) are dropped when snapshots
//! are loaded. [`read_quote_rows`] keeps them for validation.
//!
//! Dates are read from the first ten characters, so timestamped exports
//! (`2024-01-02 00:00:00-05:00`) load as their calendar date.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{
    group_quotes, to_decimal, to_f64, OptionQuote, OptionType, PricePoint, PriceSeries,
    SeriesError, SnapshotMap,
};

/// Columns every options file must have.
pub const QUOTE_COLUMNS: &[&str] = &[
    "trade_date",
    "expiration",
    "option_type",
    "strike",
    "last_price",
    "implied_volatility",
];

/// Informational columns read when present.
pub const OPTIONAL_QUOTE_COLUMNS: &[&str] = &[
    "bid",
    "ask",
    "volume",
    "open_interest",
    "delta",
    "gamma",
    "theta",
    "vega",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid price series: {0}")]
    Series(#[from] SeriesError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// CSV loader rooted at a data directory.
#[derive(Debug, Clone)]
pub struct DataLoader {
    data_dir: PathBuf,
    fallback_volatility: f64,
}

impl DataLoader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            fallback_volatility: 0.25,
        }
    }

    /// Volatility substituted for missing or non-positive IVs at load time.
    pub fn with_fallback_volatility(mut self, fallback_volatility: f64) -> Self {
        self.fallback_volatility = fallback_volatility;
        self
    }

    pub fn fallback_volatility(&self) -> f64 {
        self.fallback_volatility
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn prices_path(&self, symbol: &str) -> PathBuf {
        self.data_dir.join("stocks").join(format!("{}.csv", symbol))
    }

    pub fn options_path(&self, symbol: &str) -> PathBuf {
        self.data_dir.join("options").join(format!("{}.csv", symbol))
    }

    /// Symbols that have a price file.
    pub fn available_symbols(&self) -> Result<Vec<String>, LoaderError> {
        let dir = self.data_dir.join("stocks");
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut symbols = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "csv") {
                if let Some(stem) = path.file_stem() {
                    symbols.push(stem.to_string_lossy().to_string());
                }
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    pub fn load_prices(&self, symbol: &str) -> Result<PriceSeries, LoaderError> {
        let prices = read_prices_csv(self.prices_path(symbol))?;
        info!(symbol, points = prices.len(), "loaded prices");
        Ok(prices)
    }

    pub fn load_snapshots(&self, symbol: &str) -> Result<SnapshotMap, LoaderError> {
        let snapshots = read_quotes_csv(self.options_path(symbol), self.fallback_volatility)?;
        info!(symbol, days = snapshots.len(), "loaded option snapshots");
        Ok(snapshots)
    }

    pub fn save_prices(&self, symbol: &str, prices: &PriceSeries) -> Result<PathBuf, LoaderError> {
        let path = self.prices_path(symbol);
        write_prices_csv(&path, prices)?;
        Ok(path)
    }

    pub fn save_snapshots(&self, symbol: &str, snapshots: &SnapshotMap) -> Result<PathBuf, LoaderError> {
        let path = self.options_path(symbol);
        write_quotes_csv(&path, snapshots)?;
        Ok(path)
    }
}

fn read_csv(path: &Path) -> Result<DataFrame, LoaderError> {
    if !path.exists() {
        return Err(LoaderError::FileNotFound(path.display().to_string()));
    }
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    debug!(path = %path.display(), rows = df.height(), "read csv");
    Ok(df)
}

/// Actual column name matching `wanted` case-insensitively.
fn find_column(df: &DataFrame, wanted: &str) -> Option<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .find(|name| name.eq_ignore_ascii_case(wanted))
}

fn require_column(df: &DataFrame, wanted: &str) -> Result<String, LoaderError> {
    find_column(df, wanted)
        .ok_or_else(|| LoaderError::InvalidData(format!("missing column '{}'", wanted)))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, LoaderError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

fn float_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, LoaderError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn int_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, LoaderError> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    Ok(column.i64()?.into_iter().collect())
}

fn date_at(values: &[Option<String>], idx: usize, column: &str) -> Result<NaiveDate, LoaderError> {
    values[idx]
        .as_deref()
        .and_then(parse_date)
        .ok_or_else(|| LoaderError::InvalidData(format!("row {}: invalid {}", idx + 1, column)))
}

fn float_at(values: &[Option<f64>], idx: usize, column: &str) -> Result<f64, LoaderError> {
    values[idx]
        .filter(|v| v.is_finite())
        .ok_or_else(|| LoaderError::InvalidData(format!("row {}: invalid {}", idx + 1, column)))
}

/// Rows of a `date,close` file in file order, without series checks.
pub fn read_price_points(path: impl AsRef<Path>) -> Result<Vec<PricePoint>, LoaderError> {
    let df = read_csv(path.as_ref())?;
    let dates = string_values(&df, &require_column(&df, "date")?)?;
    let closes = float_values(&df, &require_column(&df, "close")?)?;

    (0..df.height())
        .map(|idx| -> Result<PricePoint, LoaderError> {
            Ok(PricePoint {
                date: date_at(&dates, idx, "date")?,
                close: to_decimal(float_at(&closes, idx, "close")?),
            })
        })
        .collect()
}

/// Read a `date,close` file. Rows may be in any order; duplicate dates
/// or non-positive closes are rejected.
pub fn read_prices_csv(path: impl AsRef<Path>) -> Result<PriceSeries, LoaderError> {
    let mut points = read_price_points(path)?;
    points.sort_by_key(|p| p.date);
    Ok(PriceSeries::new(points.into_iter().map(|p| (p.date, p.close)))?)
}

/// Read every quote row in file order, well formed or not.
///
/// Missing or non-positive IVs are replaced by `fallback_volatility`.
pub fn read_quote_rows(
    path: impl AsRef<Path>,
    fallback_volatility: f64,
) -> Result<Vec<OptionQuote>, LoaderError> {
    let df = read_csv(path.as_ref())?;

    let trade_dates = string_values(&df, &require_column(&df, "trade_date")?)?;
    let expirations = string_values(&df, &require_column(&df, "expiration")?)?;
    let option_types = string_values(&df, &require_column(&df, "option_type")?)?;
    let strikes = float_values(&df, &require_column(&df, "strike")?)?;
    let last_prices = float_values(&df, &require_column(&df, "last_price")?)?;
    let ivs = float_values(&df, &require_column(&df, "implied_volatility")?)?;

    let optional_float = |name: &str| -> Result<Option<Vec<Option<f64>>>, LoaderError> {
        find_column(&df, name).map(|c| float_values(&df, &c)).transpose()
    };
    let optional_int = |name: &str| -> Result<Option<Vec<Option<i64>>>, LoaderError> {
        find_column(&df, name).map(|c| int_values(&df, &c)).transpose()
    };
    let bids = optional_float("bid")?;
    let asks = optional_float("ask")?;
    let volumes = optional_int("volume")?;
    let open_interests = optional_int("open_interest")?;
    let deltas = optional_float("delta")?;
    let gammas = optional_float("gamma")?;
    let thetas = optional_float("theta")?;
    let vegas = optional_float("vega")?;

    let mut quotes = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let option_type = option_types[idx]
            .as_deref()
            .and_then(OptionType::from_str)
            .ok_or_else(|| {
                LoaderError::InvalidData(format!("row {}: invalid option_type", idx + 1))
            })?;

        let iv = ivs[idx].filter(|v| v.is_finite() && *v > 0.0);

        quotes.push(OptionQuote {
            trade_date: date_at(&trade_dates, idx, "trade_date")?,
            expiration: date_at(&expirations, idx, "expiration")?,
            strike: to_decimal(float_at(&strikes, idx, "strike")?),
            option_type,
            last_price: to_decimal(float_at(&last_prices, idx, "last_price")?),
            implied_volatility: iv.unwrap_or(fallback_volatility),
            bid: bids.as_ref().and_then(|v| v[idx]).map(to_decimal),
            ask: asks.as_ref().and_then(|v| v[idx]).map(to_decimal),
            volume: volumes.as_ref().and_then(|v| v[idx]),
            open_interest: open_interests.as_ref().and_then(|v| v[idx]),
            delta: deltas.as_ref().and_then(|v| v[idx]),
            gamma: gammas.as_ref().and_then(|v| v[idx]),
            theta: thetas.as_ref().and_then(|v| v[idx]),
            vega: vegas.as_ref().and_then(|v| v[idx]),
        });
    }

    Ok(quotes)
}

/// Read an options file into per-day snapshots of well-formed quotes.
pub fn read_quotes_csv(
    path: impl AsRef<Path>,
    fallback_volatility: f64,
) -> Result<SnapshotMap, LoaderError> {
    let path = path.as_ref();
    let rows = read_quote_rows(path, fallback_volatility)?;
    let total = rows.len();

    let quotes: Vec<OptionQuote> = rows.into_iter().filter(OptionQuote::is_well_formed).collect();
    if quotes.len() < total {
        warn!(
            path = %path.display(),
            dropped = total - quotes.len(),
            "dropped malformed quote rows"
        );
    }

    Ok(group_quotes(quotes))
}

fn ensure_parent(path: &Path) -> Result<(), LoaderError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn write_prices_csv(path: impl AsRef<Path>, prices: &PriceSeries) -> Result<(), LoaderError> {
    let path = path.as_ref();
    let dates: Vec<String> = prices.iter().map(|p| p.date.to_string()).collect();
    let closes: Vec<f64> = prices.iter().map(|p| to_f64(p.close)).collect();

    let mut df = DataFrame::new(vec![
        Column::new("date".into(), dates),
        Column::new("close".into(), closes),
    ])?;

    ensure_parent(path)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    Ok(())
}

/// Write every quote of every snapshot, one row per contract.
pub fn write_quotes_csv(path: impl AsRef<Path>, snapshots: &SnapshotMap) -> Result<(), LoaderError> {
    let path = path.as_ref();
    let quotes: Vec<&OptionQuote> = snapshots
        .values()
        .flat_map(|s| s.chains.iter())
        .flat_map(|c| c.puts.iter().chain(c.calls.iter()))
        .collect();

    let decimal_opt = |v: Option<Decimal>| v.map(to_f64);

    let mut df = DataFrame::new(vec![
        Column::new(
            "trade_date".into(),
            quotes.iter().map(|q| q.trade_date.to_string()).collect::<Vec<_>>(),
        ),
        Column::new(
            "expiration".into(),
            quotes.iter().map(|q| q.expiration.to_string()).collect::<Vec<_>>(),
        ),
        Column::new(
            "option_type".into(),
            quotes.iter().map(|q| q.option_type.as_str().to_string()).collect::<Vec<_>>(),
        ),
        Column::new(
            "strike".into(),
            quotes.iter().map(|q| to_f64(q.strike)).collect::<Vec<_>>(),
        ),
        Column::new(
            "last_price".into(),
            quotes.iter().map(|q| to_f64(q.last_price)).collect::<Vec<_>>(),
        ),
        Column::new(
            "implied_volatility".into(),
            quotes.iter().map(|q| q.implied_volatility).collect::<Vec<_>>(),
        ),
        Column::new(
            "bid".into(),
            quotes.iter().map(|q| decimal_opt(q.bid)).collect::<Vec<_>>(),
        ),
        Column::new(
            "ask".into(),
            quotes.iter().map(|q| decimal_opt(q.ask)).collect::<Vec<_>>(),
        ),
        Column::new(
            "volume".into(),
            quotes.iter().map(|q| q.volume).collect::<Vec<_>>(),
        ),
        Column::new(
            "open_interest".into(),
            quotes.iter().map(|q| q.open_interest).collect::<Vec<_>>(),
        ),
        Column::new("delta".into(), quotes.iter().map(|q| q.delta).collect::<Vec<_>>()),
        Column::new("gamma".into(), quotes.iter().map(|q| q.gamma).collect::<Vec<_>>()),
        Column::new("theta".into(), quotes.iter().map(|q| q.theta).collect::<Vec<_>>()),
        Column::new("vega".into(), quotes.iter().map(|q| q.vega).collect::<Vec<_>>()),
    ])?;

    ensure_parent(path)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    info!(path = %path.display(), rows = quotes.len(), "wrote option quotes");
    Ok(())
}
