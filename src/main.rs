//! Trigger Rebalancer - Main Entry Point
//!
//! Backtests a configured rebalance strategy over historical bars, validates
//! configuration files and previews calendar schedules.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use trigger_rebalancer::backtest::{BacktestEngine, CsvDataLoader, DataLoader};
use trigger_rebalancer::config::Config;
use trigger_rebalancer::strategy::RebalanceStrategy;

/// Trigger Rebalancer CLI
#[derive(Parser)]
#[command(name = "trigger-rebalancer")]
#[command(version, about = "Trigger-driven portfolio rebalancing backtester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest simulation on historical bars
    Backtest {
        /// Path to the strategy configuration file
        #[arg(short, long, default_value = "config")]
        config: String,

        /// Path to CSV bar data file
        #[arg(short, long)]
        data: String,

        /// Start date (YYYY-MM-DD), defaults to the first bar
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), defaults to the last bar
        #[arg(short, long)]
        end: Option<String>,

        /// Override the configured initial cash
        #[arg(short = 'b', long)]
        initial_cash: Option<Decimal>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Validate a strategy configuration file
    Validate {
        /// Path to the strategy configuration file
        #[arg(short, long, default_value = "config")]
        config: String,
    },

    /// Print the calendar dates each scheduled trigger will check
    Schedule {
        /// Path to the strategy configuration file
        #[arg(short, long, default_value = "config")]
        config: String,

        /// Last date to expand open-ended schedules to (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<String>,
    },
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize comprehensive logging
    init_logging()?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            start,
            end,
            initial_cash,
            output,
        } => run_backtest(
            &config,
            &data,
            start.as_deref(),
            end.as_deref(),
            initial_cash,
            output.as_deref(),
        ),
        Commands::Validate { config } => validate(&config),
        Commands::Schedule { config, end } => show_schedule(&config, end.as_deref()),
    }
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::daily("logs", "rebalancer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("trigger_rebalancer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn parse_date(value: &str, label: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid {} date '{}': {}", label, value, e))
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let strategy = &config.strategy;
    info!("📋 Configuration:");
    info!("   Strategy: {}", strategy.name);
    info!(
        "   Window: {} to {}",
        strategy.open_date,
        strategy
            .close_date
            .map_or_else(|| "end of data".to_string(), |d| d.to_string())
    );
    info!("   Dividends: {:?}", strategy.dividend_method);
    for entry in strategy.target_weights.iter().flatten() {
        info!("   Target {}: {:.2}%", entry.symbol, entry.weight * dec!(100));
    }
    if let Some(triggers) = &strategy.triggers {
        info!(
            "   Triggers: calendar={} deviation={} ranking={} pairwise={}",
            triggers.calendar.is_some(),
            triggers.deviation.is_some(),
            triggers.ranking.is_some(),
            triggers.pairwise.is_some()
        );
    }
    for leg in &config.financing.legs {
        info!(
            "   Financing {}: ratio {:.2}%, rate {:.2}%",
            leg.symbol,
            leg.ratio * dec!(100),
            leg.annual_rate * dec!(100)
        );
    }
    info!("   Initial Cash: {:.2}", config.backtest.initial_cash);
    info!("   Commission: {:.4}%", config.backtest.commission_rate * dec!(100));
}

/// Run a single backtest.
fn run_backtest(
    config_path: &str,
    data_path: &str,
    start: Option<&str>,
    end: Option<&str>,
    initial_cash: Option<Decimal>,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let mut config = Config::load(config_path)?;
    if let Some(cash) = initial_cash {
        config.backtest.initial_cash = cash;
    }
    log_config(&config);

    info!("📊 Loading data from: {}", data_path);
    let data_loader = CsvDataLoader::new(data_path)?;
    let (data_start, data_end) = data_loader
        .available_range()
        .context("Data file has no bars")?;
    info!("   Data range: {} to {}", data_start, data_end);
    info!("   Symbols: {}", data_loader.available_symbols().len());
    info!("   Bars: {}", data_loader.len());

    let start = start.map(|s| parse_date(s, "start")).transpose()?.unwrap_or(data_start);
    let end = end.map(|s| parse_date(s, "end")).transpose()?.unwrap_or(data_end);
    info!("📅 Period: {} to {}", start, end);

    let mut engine = BacktestEngine::new(data_loader, config);
    let result = engine.run(start, end)?;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let snapshots_path = format!("{}/snapshots.csv", dir);
        result.snapshots_to_csv(&snapshots_path)?;
        info!("📁 Daily snapshots saved to: {}", snapshots_path);

        let result_path = format!("{}/result.json", dir);
        let file = std::fs::File::create(&result_path)
            .with_context(|| format!("Failed to create {}", result_path))?;
        serde_json::to_writer_pretty(file, &result)?;
        info!("📁 Full result saved to: {}", result_path);
    }

    Ok(())
}

/// Load and validate a configuration file.
fn validate(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    log_config(&config);

    match config.validate() {
        Ok(()) => {
            info!("✅ Configuration is valid");
            Ok(())
        }
        Err(e) => {
            warn!("❌ Configuration is invalid: {}", e);
            Err(e.into())
        }
    }
}

/// Print every scheduled date of the calendar and ranking triggers.
fn show_schedule(config_path: &str, end: Option<&str>) -> Result<()> {
    let config = Config::load(config_path)?;
    let end = match end {
        Some(value) => parse_date(value, "end")?,
        None => config
            .strategy
            .close_date
            .context("No close date configured, pass --end")?,
    };

    let strategy = RebalanceStrategy::new(&config, config.schedule_end(end))?;
    for trigger in strategy.triggers() {
        let dates = trigger.scheduled_dates();
        if dates.is_empty() {
            continue;
        }
        println!("{} ({} dates)", trigger.name(), dates.len());
        for date in dates {
            println!("  {}", date);
        }
    }

    Ok(())
}
