//! Data integrity validation for price and option quote files.
//!
//! Validates:
//! - Price dates strictly increasing in file order
//! - Closes positive
//! - Date continuity (no gaps longer than a week)
//! - Strikes positive, expirations after the trade date
//! - Last prices non-negative, IVs in a plausible range
//! - Overlap between price dates and quote dates

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::data::{
    group_quotes, read_price_points, read_quote_rows, DataLoader, LoaderError, OptionType,
    PricePoint, SnapshotMap,
};

/// Gaps longer than this between consecutive dates are flagged.
const MAX_GAP_DAYS: i64 = 7;

/// IVs above this are treated as data errors.
const MAX_IV: f64 = 5.0;

/// Offending rows listed in a failure's details.
const MAX_DETAILS: usize = 5;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Result of a single validation check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn fail(name: &str, message: &str, details: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.to_string(),
            details,
        }
    }

    /// Pass when `issues` is empty, otherwise fail listing the first few.
    fn from_issues(name: &str, pass_message: &str, what: &str, issues: Vec<String>) -> Self {
        if issues.is_empty() {
            return Self::pass(name, pass_message);
        }
        let mut details = issues
            .iter()
            .take(MAX_DETAILS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if issues.len() > MAX_DETAILS {
            details.push_str(&format!(", ... ({} more)", issues.len() - MAX_DETAILS));
        }
        Self::fail(name, &format!("{} {}", issues.len(), what), Some(details))
    }
}

/// Complete data integrity report for a symbol.
#[derive(Debug, Clone, Serialize)]
pub struct DataIntegrityReport {
    pub symbol: String,
    pub price_points: usize,
    pub quote_count: usize,
    /// Dates present in both the prices and the quotes.
    pub trading_days: usize,
    pub checks: Vec<CheckResult>,
}

impl DataIntegrityReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        let total = self.checks.len();
        format!(
            "{} ({} prices, {} quotes, {} trading days): {}/{} checks passed",
            self.symbol, self.price_points, self.quote_count, self.trading_days, passed, total
        )
    }
}

/// Validator for a symbol's price and option files.
pub struct DataIntegrityValidator {
    loader: DataLoader,
}

impl DataIntegrityValidator {
    pub fn new(loader: DataLoader) -> Self {
        Self { loader }
    }

    /// Run all validation checks on a symbol.
    pub fn validate(&self, symbol: &str) -> ValidationResult<DataIntegrityReport> {
        let points = read_price_points(self.loader.prices_path(symbol))?;
        let rows = read_quote_rows(
            self.loader.options_path(symbol),
            self.loader.fallback_volatility(),
        )?;
        let snapshots = group_quotes(rows);

        let mut checks = validate_prices(&points);
        checks.extend(validate_snapshots(&snapshots));

        let (overlap_check, trading_days) = check_overlap(&points, &snapshots);
        checks.push(overlap_check);

        Ok(DataIntegrityReport {
            symbol: symbol.to_string(),
            price_points: points.len(),
            quote_count: snapshots.values().map(|s| s.total_quotes()).sum(),
            trading_days,
            checks,
        })
    }

    /// Validate every symbol with a price file.
    pub fn validate_all(&self) -> ValidationResult<Vec<DataIntegrityReport>> {
        let symbols = self.loader.available_symbols()?;
        if symbols.is_empty() {
            return Err(ValidationError::ValidationFailed(format!(
                "no price files under {}",
                self.loader.data_dir().display()
            )));
        }
        symbols.iter().map(|s| self.validate(s)).collect()
    }
}

/// Checks on raw price rows in file order.
pub fn validate_prices(points: &[PricePoint]) -> Vec<CheckResult> {
    if points.is_empty() {
        return vec![CheckResult::fail("price_data", "No price rows", None)];
    }

    let ordering: Vec<String> = points
        .windows(2)
        .filter(|w| w[1].date <= w[0].date)
        .map(|w| format!("{} then {}", w[0].date, w[1].date))
        .collect();

    let non_positive: Vec<String> = points
        .iter()
        .filter(|p| p.close <= Decimal::ZERO)
        .map(|p| format!("{} ({})", p.date, p.close))
        .collect();

    let dates: BTreeSet<NaiveDate> = points.iter().map(|p| p.date).collect();

    vec![
        CheckResult::from_issues(
            "price_dates_increasing",
            &format!("{} dates strictly increasing", points.len()),
            "out-of-order or duplicate dates",
            ordering,
        ),
        CheckResult::from_issues(
            "price_positive",
            "All closes positive",
            "non-positive closes",
            non_positive,
        ),
        check_date_continuity("price_continuity", &dates),
    ]
}

/// Checks on loaded quote snapshots.
pub fn validate_snapshots(snapshots: &SnapshotMap) -> Vec<CheckResult> {
    let total: usize = snapshots.values().map(|s| s.total_quotes()).sum();
    if total == 0 {
        return vec![CheckResult::fail("quote_data", "No option quotes", None)];
    }

    let mut strike_issues = Vec::new();
    let mut expiry_issues = Vec::new();
    let mut price_issues = Vec::new();
    let mut iv_issues = Vec::new();

    let quotes = snapshots.values().flat_map(|s| {
        s.quotes(OptionType::Call).chain(s.quotes(OptionType::Put))
    });
    for quote in quotes {
        let label = || {
            format!(
                "{} {} {} {}",
                quote.trade_date,
                quote.expiration,
                quote.option_type.as_str(),
                quote.strike
            )
        };
        if quote.strike <= Decimal::ZERO {
            strike_issues.push(label());
        }
        if quote.expiration <= quote.trade_date {
            expiry_issues.push(label());
        }
        if quote.last_price < Decimal::ZERO {
            price_issues.push(label());
        }
        let iv = quote.implied_volatility;
        if !(iv.is_finite() && iv > 0.0 && iv <= MAX_IV) {
            iv_issues.push(format!("{} (iv {})", label(), iv));
        }
    }

    let dates: BTreeSet<NaiveDate> = snapshots.keys().copied().collect();

    vec![
        CheckResult::from_issues(
            "strike_positive",
            &format!("{} quotes with positive strikes", total),
            "quotes with non-positive strikes",
            strike_issues,
        ),
        CheckResult::from_issues(
            "expiry_after_trade_date",
            "All expirations after their trade date",
            "quotes expiring on or before their trade date",
            expiry_issues,
        ),
        CheckResult::from_issues(
            "last_price_non_negative",
            "All last prices non-negative",
            "quotes with negative last price",
            price_issues,
        ),
        CheckResult::from_issues(
            "iv_range",
            &format!("All IVs in (0, {}]", MAX_IV),
            "quotes with IV out of range",
            iv_issues,
        ),
        check_date_continuity("quote_continuity", &dates),
    ]
}

fn check_date_continuity(name: &str, dates: &BTreeSet<NaiveDate>) -> CheckResult {
    let dates: Vec<NaiveDate> = dates.iter().copied().collect();
    let gaps: Vec<String> = dates
        .windows(2)
        .filter_map(|w| {
            let gap_days = (w[1] - w[0]).num_days();
            (gap_days > MAX_GAP_DAYS).then(|| format!("{} to {} ({} days)", w[0], w[1], gap_days))
        })
        .collect();

    CheckResult::from_issues(
        name,
        &format!("{} dates, no major gaps", dates.len()),
        "major gaps found",
        gaps,
    )
}

/// Dates present in both inputs. The backtest needs at least one.
pub fn check_overlap(points: &[PricePoint], snapshots: &SnapshotMap) -> (CheckResult, usize) {
    let overlap = points
        .iter()
        .filter(|p| snapshots.get(&p.date).map_or(false, |s| !s.is_empty()))
        .map(|p| p.date)
        .collect::<BTreeSet<_>>()
        .len();

    let check = if overlap > 0 {
        CheckResult::pass(
            "price_quote_overlap",
            &format!("{} dates with both prices and quotes", overlap),
        )
    } else {
        CheckResult::fail(
            "price_quote_overlap",
            "No date has both a price and option quotes",
            None,
        )
    };
    (check, overlap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{group_quotes, OptionQuote, OptionType};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn point(date: NaiveDate, close: Decimal) -> PricePoint {
        PricePoint { date, close }
    }

    fn check<'a>(checks: &'a [CheckResult], name: &str) -> &'a CheckResult {
        checks.iter().find(|c| c.name == name).unwrap()
    }

    #[test]
    fn test_check_result() {
        let pass = CheckResult::pass("test", "passed");
        assert!(pass.passed);
        assert!(pass.details.is_none());

        let fail = CheckResult::fail("test", "failed", Some("details".to_string()));
        assert!(!fail.passed);
        assert_eq!(fail.details, Some("details".to_string()));
    }

    #[test]
    fn test_from_issues_truncates_details() {
        let issues: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let result = CheckResult::from_issues("n", "ok", "bad rows", issues);
        assert!(!result.passed);
        assert_eq!(result.message, "8 bad rows");
        assert_eq!(result.details.unwrap(), "0, 1, 2, 3, 4, ... (3 more)");
    }

    #[test]
    fn test_validate_clean_prices() {
        let points = vec![
            point(date(2024, 1, 2), dec!(100)),
            point(date(2024, 1, 3), dec!(101)),
            point(date(2024, 1, 8), dec!(99)),
        ];
        let checks = validate_prices(&points);
        assert_eq!(checks.len(), 3);
        assert!(checks.iter().all(|c| c.passed));
    }

    #[test]
    fn test_validate_bad_prices() {
        let points = vec![
            point(date(2024, 1, 3), dec!(100)),
            point(date(2024, 1, 2), dec!(0)),
            point(date(2024, 2, 1), dec!(101)),
        ];
        let checks = validate_prices(&points);
        assert!(!check(&checks, "price_dates_increasing").passed);
        assert!(!check(&checks, "price_positive").passed);
        assert!(!check(&checks, "price_continuity").passed);

        assert!(!validate_prices(&[])[0].passed);
    }

    #[test]
    fn test_validate_snapshots() {
        let trade = date(2024, 1, 2);
        let bad_iv = OptionQuote::new(trade, date(2024, 2, 16), OptionType::Put, dec!(95), dec!(1), 9.0);
        let snapshots = group_quotes(vec![
            OptionQuote::new(trade, date(2024, 2, 16), OptionType::Put, dec!(100), dec!(2), 0.2),
            OptionQuote::new(trade, trade, OptionType::Call, dec!(100), dec!(-1), 0.2),
            bad_iv,
        ]);

        let checks = validate_snapshots(&snapshots);
        assert!(check(&checks, "strike_positive").passed);
        assert!(!check(&checks, "expiry_after_trade_date").passed);
        assert!(!check(&checks, "last_price_non_negative").passed);
        assert!(!check(&checks, "iv_range").passed);
        assert!(check(&checks, "quote_continuity").passed);

        assert!(!validate_snapshots(&SnapshotMap::new())[0].passed);
    }

    #[test]
    fn test_overlap() {
        let trade = date(2024, 1, 2);
        let snapshots = group_quotes(vec![OptionQuote::new(
            trade,
            date(2024, 2, 16),
            OptionType::Put,
            dec!(100),
            dec!(2),
            0.2,
        )]);

        let (result, days) = check_overlap(&[point(trade, dec!(100))], &snapshots);
        assert!(result.passed);
        assert_eq!(days, 1);

        let (result, days) = check_overlap(&[point(date(2024, 1, 3), dec!(100))], &snapshots);
        assert!(!result.passed);
        assert_eq!(days, 0);
    }

    #[test]
    fn test_validator_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("stocks")).unwrap();
        std::fs::create_dir_all(dir.path().join("options")).unwrap();
        std::fs::write(
            dir.path().join("stocks/SPY.csv"),
            "date,close\n2024-01-03,101\n2024-01-02,100\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("options/SPY.csv"),
            "trade_date,expiration,option_type,strike,last_price,implied_volatility\n\
             2024-01-02,2024-02-16,put,100,2.5,0.2\n\
             2024-01-02,2024-01-02,put,95,0.5,0.2\n",
        )
        .unwrap();

        let validator = DataIntegrityValidator::new(DataLoader::new(dir.path()));
        let report = validator.validate("SPY").unwrap();
        assert_eq!(report.price_points, 2);
        assert_eq!(report.quote_count, 2);
        assert_eq!(report.trading_days, 1);
        assert!(!report.all_passed());
        // Rows the loader would drop are still reported
        let failed: Vec<&str> = report.failed_checks().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["price_dates_increasing", "expiry_after_trade_date"]);
        assert!(report.summary().starts_with("SPY (2 prices, 2 quotes, 1 trading days)"));

        assert_eq!(validator.validate_all().unwrap().len(), 1);
    }
}
