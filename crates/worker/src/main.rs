//! Airdrop worker.
//!
//! Subcommands:
//! - `run`: mint to confirmed recipients every tick until interrupted (default)
//! - `confirm`: move every unconfirmed recipient to pending
//! - `stats`: print recipient counts per status as JSON
//! - `register`: add recipients by wallet address

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use airdrop_core::WalletAddress;
use airdrop_infra::recipients::{
    schema, PostgresConnector, PostgresRecipientStore, RecipientStore, StoreError,
};
use airdrop_infra::{AirdropConfig, AirdropScheduler, HttpMinter};
use airdrop_observability::LogFormat;

#[derive(Parser)]
#[command(name = "airdrop-worker")]
#[command(about = "NFT airdrop claim-and-mint worker", long_about = None)]
struct Cli {
    /// Log output format (`json` or `pretty`)
    #[arg(long, env = "LOG_FORMAT", default_value = "json", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Run {
        /// Process a single batch and exit
        #[arg(long)]
        once: bool,
    },

    /// Confirm all unconfirmed recipients
    Confirm,

    /// Print airdrop statistics as JSON
    Stats,

    /// Register recipients (created unconfirmed)
    Register {
        /// Wallet addresses
        #[arg(required = true)]
        wallets: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal in production.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    airdrop_observability::init_with_format(LogFormat::from_name(&cli.log_format));

    let config = AirdropConfig::from_env().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Run { once: false }) {
        Command::Run { once } => run(config, once).await,
        Command::Confirm => {
            let store = open_store(&config).await?;
            let confirmed = store.confirm_all().await;
            store.close().await;
            let confirmed = confirmed.context("confirm failed")?;
            tracing::info!(confirmed, "recipients confirmed");
            println!("{}", serde_json::json!({ "confirmed": confirmed }));
            Ok(())
        }
        Command::Stats => {
            let store = open_store(&config).await?;
            let stats = store.statistics().await;
            store.close().await;
            let stats = stats.context("statistics query failed")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Register { wallets } => {
            let wallets = wallets
                .into_iter()
                .map(|raw| {
                    WalletAddress::parse(raw.as_str())
                        .with_context(|| format!("invalid wallet {raw:?}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let store = open_store(&config).await?;
            let result = register_all(&store, wallets).await;
            store.close().await;
            let (registered, duplicates) = result?;
            println!(
                "{}",
                serde_json::json!({ "registered": registered, "duplicates": duplicates })
            );
            Ok(())
        }
    }
}

async fn run(config: AirdropConfig, once: bool) -> Result<()> {
    let database = config.require_database()?;
    let minter = HttpMinter::new(config.require_mint()?.clone())
        .context("failed to build mint client")?;
    let connector = PostgresConnector::new(database.url.clone(), database.max_connections);
    let scheduler = AirdropScheduler::new(connector, Arc::new(minter), config.scheduler.clone());

    if once {
        let report = scheduler.run_once().await;
        scheduler.stop().await;
        println!("{}", serde_json::to_string_pretty(&report?)?);
        return Ok(());
    }

    scheduler.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!(in_flight = scheduler.in_flight(), "shutdown requested");
    scheduler.stop().await;
    tracing::info!("airdrop worker stopped");
    Ok(())
}

async fn open_store(config: &AirdropConfig) -> Result<PostgresRecipientStore> {
    let database = config.require_database()?;
    let store = PostgresRecipientStore::connect(&database.url, database.max_connections)
        .await
        .context("failed to connect to database")?;
    schema::ensure_schema(store.pool()).await?;
    Ok(store)
}

async fn register_all(
    store: &PostgresRecipientStore,
    wallets: Vec<WalletAddress>,
) -> Result<(usize, usize)> {
    let mut registered = 0;
    let mut duplicates = 0;
    for wallet in wallets {
        match store.register(wallet).await {
            Ok(recipient) => {
                tracing::info!(
                    recipient_id = %recipient.id,
                    wallet = %recipient.wallet,
                    "recipient registered"
                );
                registered += 1;
            }
            Err(StoreError::DuplicateWallet(wallet)) => {
                tracing::warn!(%wallet, "wallet already registered");
                duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((registered, duplicates))
}
