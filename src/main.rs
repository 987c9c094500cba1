//! Option Buying Power - Main Entry Point
//!
//! Evaluates margin, buying power and target order sizes for portfolios
//! described in JSON scenario files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use option_buying_power::config::Config;
use option_buying_power::fees;
use option_buying_power::margin::{BuyingPowerAggregator, MarginModel, MarginModelRegistry, OrderQuantitySolver};
use option_buying_power::scenario::Scenario;
use option_buying_power::securities::OrderDirection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Option Buying Power CLI
#[derive(Parser)]
#[command(name = "option-buying-power")]
#[command(version, about = "Margin and buying power for option portfolios")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Maintenance and initial margin of every security in a scenario
    Margin {
        /// Path to the scenario JSON file
        #[arg(short, long)]
        scenario: PathBuf,
    },

    /// Buying power available to trade one security
    BuyingPower {
        /// Path to the scenario JSON file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Symbol to trade
        #[arg(long)]
        symbol: String,

        /// Order direction
        #[arg(short, long, value_enum, default_value = "buy")]
        direction: DirectionArg,
    },

    /// Order quantity reaching a target share of portfolio value
    Target {
        /// Path to the scenario JSON file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Symbol to trade
        #[arg(long)]
        symbol: String,

        /// Signed target fraction of portfolio value (negative = short)
        #[arg(short, long, allow_hyphen_values = true)]
        target: Decimal,

        /// Skip orders whose margin change is below this fraction of portfolio value
        #[arg(short, long, default_value = "0")]
        minimum_order_margin: Decimal,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Buy,
    Sell,
}

impl From<DirectionArg> for OrderDirection {
    fn from(direction: DirectionArg) -> Self {
        match direction {
            DirectionArg::Buy => OrderDirection::Buy,
            DirectionArg::Sell => OrderDirection::Sell,
        }
    }
}

#[derive(Serialize)]
struct MarginRow {
    symbol: String,
    quantity: Decimal,
    maintenance_margin: Decimal,
    initial_margin: Decimal,
    currency: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let registry = MarginModelRegistry::with_defaults(config.option_margin.clone());

    match cli.command {
        Commands::Margin { scenario } => run_margin(&config, &registry, &scenario, cli.json),
        Commands::BuyingPower {
            scenario,
            symbol,
            direction,
        } => run_buying_power(&config, &registry, &scenario, &symbol, direction.into(), cli.json),
        Commands::Target {
            scenario,
            symbol,
            target,
            minimum_order_margin,
        } => run_target(
            &config,
            &registry,
            &scenario,
            &symbol,
            target,
            minimum_order_margin,
            cli.json,
        ),
    }
}

fn run_margin(config: &Config, registry: &MarginModelRegistry, path: &Path, json: bool) -> Result<()> {
    let portfolio = Scenario::from_file(path)?.build_portfolio(&config.account.account_currency, registry)?;
    let snapshot = portfolio.snapshot();

    let mut rows = Vec::new();
    for position in snapshot.positions.values() {
        let model = registry.model_for(position.security_type)?;
        let maintenance_margin = model
            .maintenance_margin(position)
            .with_context(|| format!("Failed to compute maintenance margin for {}", position.symbol))?;
        let initial_margin = model
            .initial_margin(position)
            .with_context(|| format!("Failed to compute initial margin for {}", position.symbol))?;
        rows.push(MarginRow {
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            maintenance_margin,
            initial_margin,
            currency: position.quote_currency.clone(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            println!(
                "{:<24} qty {:>10}  maintenance {:>14} {}  initial {:>14} {}",
                row.symbol,
                row.quantity,
                row.maintenance_margin.round_dp(2),
                row.currency,
                row.initial_margin.round_dp(2),
                row.currency
            );
        }
    }

    Ok(())
}

fn run_buying_power(
    config: &Config,
    registry: &MarginModelRegistry,
    path: &Path,
    symbol: &str,
    direction: OrderDirection,
    json: bool,
) -> Result<()> {
    let portfolio = Scenario::from_file(path)?.build_portfolio(&config.account.account_currency, registry)?;

    let buying_power = BuyingPowerAggregator::new(registry, config.account.required_free_buying_power_percent)
        .buying_power(&portfolio.snapshot(), symbol, direction)
        .with_context(|| format!("Failed to compute buying power for {symbol}"))?;

    for diagnostic in &buying_power.diagnostics {
        warn!(%diagnostic, "Incomplete valuation");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&buying_power)?);
    } else {
        println!(
            "Buying power for {symbol} ({direction:?}): {} {}",
            buying_power.value.round_dp(2),
            buying_power.currency
        );
    }

    Ok(())
}

fn run_target(
    config: &Config,
    registry: &MarginModelRegistry,
    path: &Path,
    symbol: &str,
    target: Decimal,
    minimum_order_margin: Decimal,
    json: bool,
) -> Result<()> {
    let portfolio = Scenario::from_file(path)?.build_portfolio(&config.account.account_currency, registry)?;
    let fee_model = fees::from_config(&config.fees);

    let result = OrderQuantitySolver::new(
        registry,
        fee_model.as_ref(),
        config.solver.clone(),
        config.account.required_free_buying_power_percent,
    )
    .maximum_order_quantity_for_target_buying_power(&portfolio.snapshot(), symbol, target, minimum_order_margin)
    .with_context(|| format!("Failed to size order for {symbol}"))?;

    if !result.is_exact() {
        warn!(symbol = %symbol, quantity = %result.quantity, "Order size is approximate");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Order {symbol}: {} (target margin {} {}, {:?})",
            result.quantity,
            result.amount.round_dp(2),
            result.currency,
            result.convergence
        );
        if let Some(reason) = &result.reason {
            println!("  {reason}");
        }
    }

    Ok(())
}

/// Initialize logging to stderr and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "option-buying-power.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("option_buying_power=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Account currency: {}", config.account.account_currency);
    info!(
        "   Required free buying power: {}%",
        config.account.required_free_buying_power_percent * Decimal::ONE_HUNDRED
    );
    info!(
        "   Naked option rate: {}% of underlying, floor {}%",
        config.option_margin.naked_underlying_rate * Decimal::ONE_HUNDRED,
        config.option_margin.naked_otm_floor_rate * Decimal::ONE_HUNDRED
    );
    info!(
        "   Solver: {} iterations, tolerance {}",
        config.solver.max_iterations, config.solver.margin_tolerance
    );
    info!(
        "   Fees: flat {}, notional rate {}",
        config.fees.flat_fee, config.fees.notional_rate
    );
}
