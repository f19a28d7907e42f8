//! Polymarket Copy-Trading Bot
//!
//! Watches one wallet's activity feed and mirrors its trades from a follower
//! wallet, sized to the follower's balance.

mod api;
mod bot;
mod config;
mod db;
mod error;
mod executor;
mod models;
mod monitor;
mod portfolio;
mod queue;
#[cfg(test)]
mod testing;
mod trading;

use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{AccountData, DataClient, DATA_API_BASE, DEFAULT_RPC_URL, USDC_CONTRACT};
use crate::bot::Bot;
use crate::config::RunArgs;
use crate::db::Database;
use crate::portfolio::{truncate, PortfolioSummary};
use crate::queue::{wallet_key, TradeQueue};

/// Polymarket copy-trading bot CLI.
#[derive(Parser)]
#[command(name = "copytrader")]
#[command(about = "Mirror a Polymarket wallet's trades from your own wallet", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./copytrade.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start copying trades until Ctrl+C
    Run(RunArgs),

    /// Show queue statistics and recent records for the target wallet
    Status(StatusArgs),

    /// Show the effective configuration
    Config(RunArgs),

    /// Summarize a wallet's current positions
    Portfolio(PortfolioArgs),
}

#[derive(Args)]
struct StatusArgs {
    /// Wallet whose queue to show
    #[arg(long, env = "USER_ADDRESS")]
    target_wallet: String,

    #[arg(long, env = "RETRY_LIMIT", default_value = "3")]
    retry_limit: u32,

    /// Number of recent records to list
    #[arg(short, long, default_value = "10")]
    recent: usize,
}

#[derive(Args)]
struct PortfolioArgs {
    /// Wallet address
    address: String,

    #[arg(long, env = "DATA_API_URL", default_value = DATA_API_BASE)]
    data_api_url: String,

    #[arg(long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    #[arg(long, env = "USDC_CONTRACT_ADDRESS", default_value = USDC_CONTRACT)]
    usdc_contract: String,

    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "10")]
    request_timeout: u64,

    /// Number of largest positions to list
    #[arg(short, long, default_value = "10")]
    top: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Run(args) => {
            let config = args.validate()?;
            let db = Database::new(&cli.database).await?;

            println!("\n=== Polymarket Copy-Trading Bot ===");
            println!("Target wallet:    {}", config.target_wallet);
            println!("Follower wallet:  {}", config.follower_wallet);
            println!("Fetch interval:   {}s", config.fetch_interval.as_secs());
            println!("Retry limit:      {}", config.retry_limit);
            println!(
                "Mode:             {}",
                if config.dry_run { "DRY RUN (no real trades)" } else { "LIVE TRADING" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            let bot = Bot::new(config, db)?;
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
                return Err(e);
            }
        }

        Commands::Status(args) => {
            let db = Database::new(&cli.database).await?;
            let queue = TradeQueue::new(db, args.retry_limit);
            let wallet = wallet_key(&args.target_wallet);

            let stats = queue.stats(&wallet).await?;
            let records = queue.all_records(&wallet).await;

            println!("\n=== Queue: {} ===", wallet);
            println!("Total:            {}", stats.total);
            println!("Succeeded:        {}", stats.succeeded);
            println!("Pending:          {}", stats.pending);
            println!("Exhausted:        {}", stats.exhausted);

            if !records.is_empty() {
                println!("\n=== Recent Records ===");
                for record in records.iter().rev().take(args.recent) {
                    let when = record
                        .occurred_at()
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| record.timestamp.to_string());
                    println!(
                        "  {} {:<5} {:<4} {:>10.2} @ {:.3}  {:<9} ({}/{})  {}",
                        when,
                        record.kind.as_str(),
                        record.side.map(|s| s.as_str()).unwrap_or("-"),
                        record.notional,
                        record.price,
                        record.effective_status(args.retry_limit).as_str(),
                        record.attempt_count,
                        args.retry_limit,
                        truncate(&record.title, 40),
                    );
                }
            }
        }

        Commands::Config(args) => {
            let config = args.validate()?;
            println!("\n{}", config);
        }

        Commands::Portfolio(args) => {
            info!(address = %args.address, "Fetching positions");

            let client = DataClient::new(
                &args.data_api_url,
                &args.rpc_url,
                &args.usdc_contract,
                Duration::from_secs(args.request_timeout),
            )?;
            let positions = client.positions(&args.address).await?;
            let summary = PortfolioSummary::from_positions(&args.address, &positions, args.top);
            println!("\n{}", summary);

            match client.balance(&args.address).await {
                Ok(balance) => println!("USDC Balance:     ${:.2}", balance),
                Err(e) => tracing::warn!(error = %e, "Could not read USDC balance"),
            }
        }
    }

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder().with_target(false);
    if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )?;
    } else {
        tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?;
    }

    Ok(())
}
