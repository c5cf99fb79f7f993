//! Spread backtester CLI
//!
//! # Usage
//!
//! ```bash
//! # Run the rolling put-spread backtest
//! spread-backtest run --symbol SPY --config config/default.toml --output results/spy.json
//!
//! # Sweep strategy parameters in parallel
//! spread-backtest sweep --symbol SPY --grid config/grid.toml
//!
//! # Analyze a calendar call spread
//! spread-backtest analyze --spot 600 --date 2024-06-03 \
//!     --short-expiry 2024-06-21 --long-expiry 2024-09-20 \
//!     --short-strike 600 --long-strike 600
//!
//! # Generate synthetic option chains from data/stocks/SPY.csv
//! spread-backtest generate --symbol SPY
//!
//! # Check data files before a run
//! spread-backtest validate --symbol SPY
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use spread_backtest::analytics::{CalendarSpreadAnalyzer, CalendarSpreadConfig, SpreadLeg};
use spread_backtest::backtest::{BacktestConfig, BacktestEngine, BacktestResult};
use spread_backtest::data::{DataLoader, SyntheticChainGenerator, SyntheticConfig};
use spread_backtest::metrics::{MetricsCalculator, PerformanceReport, DEFAULT_PERIOD_DAYS};
use spread_backtest::sweep::{ParameterGrid, ParameterSweep};
use spread_backtest::validation::DataIntegrityValidator;

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "spread-backtest")]
#[command(about = "Black-Scholes option analytics and rolling put-spread backtesting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory with stocks/ and options/ subdirectories
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest
    Run {
        #[arg(long, default_value = "SPY")]
        symbol: String,

        #[command(flatten)]
        strategy: StrategyArgs,

        /// Window for period summaries, in calendar days
        #[arg(long, default_value_t = DEFAULT_PERIOD_DAYS)]
        period_days: i64,

        /// Write result and report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a parameter sweep
    Sweep {
        #[arg(long, default_value = "SPY")]
        symbol: String,

        #[command(flatten)]
        strategy: StrategyArgs,

        /// TOML file with the parameter grid
        #[arg(long)]
        grid: Option<PathBuf>,

        /// Outcomes to print
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Write all outcomes as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze a calendar or diagonal call spread
    Analyze {
        /// Load spot and default legs from this symbol's data
        #[arg(long)]
        symbol: Option<String>,

        /// Valuation date
        #[arg(long)]
        date: NaiveDate,

        /// Spot price (defaults to the symbol's close on --date)
        #[arg(long)]
        spot: Option<Decimal>,

        #[arg(long)]
        short_expiry: NaiveDate,

        #[arg(long)]
        long_expiry: NaiveDate,

        #[arg(long)]
        short_strike: Option<Decimal>,

        #[arg(long)]
        long_strike: Option<Decimal>,

        #[arg(long)]
        short_iv: Option<f64>,

        #[arg(long)]
        long_iv: Option<f64>,

        #[arg(long, default_value_t = 0.03)]
        rate: f64,

        /// Points in the P/L grid
        #[arg(long, default_value_t = 200)]
        points: usize,

        /// Write the analysis and P/L curve as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate synthetic option chains from a price file
    Generate {
        #[arg(long, default_value = "SPY")]
        symbol: String,

        #[arg(long, default_value_t = 0.05)]
        rate: f64,

        /// Strike rounding step
        #[arg(long, default_value = "5")]
        strike_step: Decimal,

        /// Skip the roughly one-year expiration
        #[arg(long)]
        no_leaps: bool,
    },

    /// Validate data files
    Validate {
        /// Symbol to check (all symbols when omitted)
        #[arg(long)]
        symbol: Option<String>,
    },
}

/// Strategy configuration: a TOML file plus per-flag overrides.
#[derive(Args)]
struct StrategyArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, allow_hyphen_values = true)]
    target_delta: Option<f64>,

    #[arg(long)]
    short_dte: Option<i64>,

    #[arg(long)]
    long_dte: Option<i64>,

    #[arg(long)]
    roll_frequency: Option<i64>,

    #[arg(long)]
    short_frequency: Option<i64>,

    #[arg(long)]
    capital: Option<Decimal>,

    #[arg(long)]
    rate: Option<f64>,

    #[arg(long)]
    start: Option<NaiveDate>,

    #[arg(long)]
    end: Option<NaiveDate>,

    /// Half of the bid/ask spread as a fraction of price
    #[arg(long)]
    half_spread: Option<f64>,
}

impl StrategyArgs {
    fn resolve(&self) -> Result<BacktestConfig> {
        let mut config = match &self.config {
            Some(path) => BacktestConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => BacktestConfig::default(),
        };

        if let Some(v) = self.target_delta {
            config.target_delta = v;
        }
        if let Some(v) = self.short_dte {
            config.short_dte = v;
        }
        if let Some(v) = self.long_dte {
            config.long_dte = v;
        }
        if let Some(v) = self.roll_frequency {
            config.roll_frequency_days = v;
        }
        if let Some(v) = self.short_frequency {
            config.short_frequency_days = v;
        }
        if let Some(v) = self.capital {
            config.initial_capital = v;
        }
        if let Some(v) = self.rate {
            config.risk_free_rate = v;
        }
        if self.start.is_some() {
            config.start_date = self.start;
        }
        if self.end.is_some() {
            config.end_date = self.end;
        }
        if let Some(v) = self.half_spread {
            config.fill.half_spread_pct = v;
        }

        config.validate().context("Invalid strategy configuration")?;
        Ok(config)
    }
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    info!("Wrote {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct RunOutput<'a> {
    result: &'a BacktestResult,
    report: &'a PerformanceReport,
}

fn run_backtest(
    loader: &DataLoader,
    symbol: &str,
    strategy: &StrategyArgs,
    period_days: i64,
    output: Option<&Path>,
) -> Result<()> {
    let config = strategy.resolve()?;
    let loader = loader.clone().with_fallback_volatility(config.fallback_volatility);

    let prices = loader
        .load_prices(symbol)
        .with_context(|| format!("Failed to load prices for {}", symbol))?;
    let snapshots = loader
        .load_snapshots(symbol)
        .with_context(|| format!("Failed to load options for {}", symbol))?;

    let engine = BacktestEngine::new(config)?;
    let pb = progress_bar(engine.trading_days(&prices, &snapshots).len() as u64)?;
    let result = engine.run_with_progress(&prices, &snapshots, |p| {
        pb.set_position(p.processed as u64);
        pb.set_message(p.date.to_string());
    })?;
    pb.finish_and_clear();

    let report = MetricsCalculator::report(&result, &prices, period_days);

    println!("{}", SEPARATOR);
    println!("{}", result.summary());
    println!("{}", SEPARATOR);
    println!("{}", report.metrics.summary());

    if !report.periods.is_empty() {
        println!("\n{}-day periods:", period_days);
        for p in &report.periods {
            println!(
                "  {} to {}  trades {:>3}  pnl {:>10.2}  capital {:>10.2}  return {:>6.2}%",
                p.start,
                p.end,
                p.trades,
                p.pnl,
                p.ending_capital,
                p.period_return * 100.0
            );
        }
    }
    println!("{}", SEPARATOR);

    if let Some(path) = output {
        write_json(
            path,
            &RunOutput {
                result: &result,
                report: &report,
            },
        )?;
    }
    Ok(())
}

fn run_sweep(
    loader: &DataLoader,
    symbol: &str,
    strategy: &StrategyArgs,
    grid_path: Option<&Path>,
    top: usize,
    output: Option<&Path>,
) -> Result<()> {
    let config = strategy.resolve()?;
    let grid = match grid_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read grid {}", path.display()))?;
            toml::from_str::<ParameterGrid>(&text)
                .with_context(|| format!("Failed to parse grid {}", path.display()))?
        }
        None => ParameterGrid::default(),
    };

    let loader = loader.clone().with_fallback_volatility(config.fallback_volatility);
    let prices = loader.load_prices(symbol)?;
    let snapshots = loader.load_snapshots(symbol)?;

    let pb = progress_bar(grid.total_combinations() as u64)?;
    pb.set_message(symbol.to_string());
    let sweep = ParameterSweep::new(config, grid);
    let result = sweep.run_with_progress(&prices, &snapshots, |done, _| {
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();

    println!("{}", result.summary(top));

    if let Some(path) = output {
        write_json(path, &result)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_analyze(
    loader: &DataLoader,
    symbol: Option<&str>,
    date: NaiveDate,
    spot: Option<Decimal>,
    short_expiry: NaiveDate,
    long_expiry: NaiveDate,
    short_strike: Option<Decimal>,
    long_strike: Option<Decimal>,
    short_iv: Option<f64>,
    long_iv: Option<f64>,
    rate: f64,
    points: usize,
    output: Option<&Path>,
) -> Result<()> {
    let analyzer = CalendarSpreadAnalyzer::new(CalendarSpreadConfig {
        risk_free_rate: rate,
        grid_points: points,
        ..Default::default()
    });

    let (spot, defaults) = match symbol {
        Some(symbol) => {
            let prices = loader.load_prices(symbol)?;
            let snapshots = loader.load_snapshots(symbol)?;
            let spot = match spot.or_else(|| prices.close_on(date)) {
                Some(spot) => spot,
                None => bail!("No close for {} on {}; pass --spot", symbol, date),
            };
            let defaults = snapshots
                .get(&date)
                .and_then(|s| analyzer.legs_from_snapshot(s, short_expiry, long_expiry, spot));
            (spot, defaults)
        }
        None => match spot {
            Some(spot) => (spot, None),
            None => bail!("--spot is required without --symbol"),
        },
    };

    let leg = |default: Option<SpreadLeg>,
               expiry: NaiveDate,
               strike: Option<Decimal>,
               iv: Option<f64>,
               name: &str|
     -> Result<SpreadLeg> {
        let mut leg = match (strike, default) {
            (Some(strike), Some(d)) if d.strike == strike => d,
            (Some(strike), _) => SpreadLeg::new(strike, expiry),
            (None, Some(d)) => d,
            (None, None) => bail!("--{}-strike is required without quotes for {}", name, expiry),
        };
        if let Some(iv) = iv {
            leg = leg.with_iv(iv);
        }
        Ok(leg)
    };

    let short = leg(defaults.map(|d| d.0), short_expiry, short_strike, short_iv, "short")?;
    let long = leg(defaults.map(|d| d.1), long_expiry, long_strike, long_iv, "long")?;

    let analysis = analyzer.analyze(spot, date, &short, &long)?;
    let curve = analyzer.default_payoff_curve(&analysis)?;

    println!("{}", SEPARATOR);
    println!(
        "{} spread @ spot {} on {}",
        if analysis.is_diagonal() { "Diagonal" } else { "Calendar" },
        analysis.spot,
        analysis.valuation_date
    );
    println!("{}", SEPARATOR);
    for (name, leg) in [("Short", &analysis.short), ("Long", &analysis.long)] {
        println!(
            "{:<5} {} C{}  iv {:.3}  premium {:.2}  delta {:.3}  theta {:.3}  vega {:.3}",
            name,
            leg.expiration,
            leg.strike,
            leg.volatility,
            leg.premium,
            leg.delta,
            leg.theta,
            leg.vega
        );
    }
    println!("\nNet Debit (Cost): ${:.2}", analysis.net_debit);
    println!("Net Delta: {:.3}", analysis.net_delta);
    println!("Net Theta (per year): {:.3}", analysis.net_theta);
    println!("Net Vega: {:.3}", analysis.net_vega);

    if let (Some(best), Some(worst)) = (
        curve.iter().max_by_key(|p| p.pnl),
        curve.iter().min_by_key(|p| p.pnl),
    ) {
        println!(
            "\nP/L at short expiry: max {:.2} @ {:.2}, min {:.2} @ {:.2}",
            best.pnl, best.underlying, worst.pnl, worst.underlying
        );
    }

    if let Some(path) = output {
        write_json(path, &serde_json::json!({ "analysis": analysis, "payoff": curve }))?;
    }
    Ok(())
}

fn run_generate(
    loader: &DataLoader,
    symbol: &str,
    rate: f64,
    strike_step: Decimal,
    no_leaps: bool,
) -> Result<()> {
    let prices = loader
        .load_prices(symbol)
        .with_context(|| format!("Failed to load prices for {}", symbol))?;

    let generator = SyntheticChainGenerator::new(SyntheticConfig {
        risk_free_rate: rate,
        strike_step,
        include_leaps: !no_leaps,
        ..Default::default()
    });

    info!("Generating chains for {} over {} days", symbol, prices.len());
    let snapshots = generator.generate(&prices)?;

    let path = loader.save_snapshots(symbol, &snapshots)?;
    let quotes: usize = snapshots.values().map(|s| s.total_quotes()).sum();
    println!(
        "Generated {} quotes over {} days -> {}",
        quotes,
        snapshots.len(),
        path.display()
    );
    Ok(())
}

fn run_validate(loader: &DataLoader, symbol: Option<&str>) -> Result<()> {
    let validator = DataIntegrityValidator::new(loader.clone());
    let reports = match symbol {
        Some(symbol) => vec![validator.validate(symbol)?],
        None => validator.validate_all()?,
    };

    let mut failed = 0;
    for report in &reports {
        println!("{}", report.summary());
        for check in &report.checks {
            let mark = if check.passed { "PASS" } else { "FAIL" };
            println!("  [{}] {}: {}", mark, check.name, check.message);
            if let Some(details) = &check.details {
                println!("         {}", details);
            }
        }
        failed += report.failed_checks().len();
    }

    if failed > 0 {
        bail!("{} checks failed", failed);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spread_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let loader = DataLoader::new(&cli.data_dir);

    match cli.command {
        Commands::Run {
            symbol,
            strategy,
            period_days,
            output,
        } => run_backtest(&loader, &symbol, &strategy, period_days, output.as_deref()),
        Commands::Sweep {
            symbol,
            strategy,
            grid,
            top,
            output,
        } => run_sweep(
            &loader,
            &symbol,
            &strategy,
            grid.as_deref(),
            top,
            output.as_deref(),
        ),
        Commands::Analyze {
            symbol,
            date,
            spot,
            short_expiry,
            long_expiry,
            short_strike,
            long_strike,
            short_iv,
            long_iv,
            rate,
            points,
            output,
        } => run_analyze(
            &loader,
            symbol.as_deref(),
            date,
            spot,
            short_expiry,
            long_expiry,
            short_strike,
            long_strike,
            short_iv,
            long_iv,
            rate,
            points,
            output.as_deref(),
        ),
        Commands::Generate {
            symbol,
            rate,
            strike_step,
            no_leaps,
        } => run_generate(&loader, &symbol, rate, strike_step, no_leaps),
        Commands::Validate { symbol } => run_validate(&loader, symbol.as_deref()),
    }
}
