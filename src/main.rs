mod auth;
mod config;
mod error;
mod exchange;
mod model;
mod storage;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, Credentials};
use exchange::Exchange;
use exchange::bingx::BingxExchange;
use exchange::gate::GateExchange;
use model::ExchangeKind;
use storage::Storage;
use storage::json_file::JsonFileStorage;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("exchange error")]
    Exchange,
}

#[derive(Parser)]
#[command(name = "cex-logger", about = "Exchange price and balance logger")]
struct Cli {
    /// Exchange to query: "bingx" or "gate"
    exchange: String,
    /// Token ticker to price, e.g. "BTC"
    token: String,
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    // .env is optional; real environment always wins
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let kind = ExchangeKind::from_str(&cli.exchange.to_lowercase()).ok_or_else(|| {
        Report::new(AppError::Config)
            .attach(format!("unknown exchange selector: {}", cli.exchange))
    })?;

    if !config.exchange_enabled(kind) {
        return Err(Report::new(AppError::Config)
            .attach(format!("exchange \"{kind}\" is disabled in the config")));
    }

    let token = cli.token.to_uppercase();

    // ── Storage ───────────────────────────────────────────────────────────────
    let storage: Arc<dyn Storage> = Arc::new(
        JsonFileStorage::open(Path::new(&config.general.data_dir))
            .change_context(AppError::Storage)?,
    );

    // ── Exchange client ───────────────────────────────────────────────────────
    let credentials = config::load_credentials(kind).change_context(AppError::Config)?;
    let exchange = build_exchange(&config, credentials);

    // ── Fetch and log, one awaited call at a time ─────────────────────────────
    let observation = exchange
        .fetch_price(&token)
        .await
        .change_context(AppError::Exchange)?;

    storage
        .append_price(&observation)
        .await
        .change_context(AppError::Storage)?;

    info!(
        exchange = %kind,
        token = %observation.token,
        price = observation.price,
        datetime = %model::format_log_time(observation.taken_at),
        "price observation logged"
    );

    let snapshot = exchange
        .fetch_balances()
        .await
        .change_context(AppError::Exchange)?;

    storage
        .append_balances(&snapshot)
        .await
        .change_context(AppError::Storage)?;

    info!(
        exchange = %kind,
        accounts = snapshot.entries.len(),
        datetime = %model::format_log_time(snapshot.taken_at),
        "balance snapshot logged"
    );

    println!("{token} price: {}", observation.price);
    for (account, balance) in &snapshot.entries {
        println!("{account}: {balance}");
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_exchange(config: &AppConfig, credentials: Credentials) -> Box<dyn Exchange> {
    match credentials {
        Credentials::Bingx(api) => match config.base_url_override(ExchangeKind::Bingx) {
            Some(base) => Box::new(BingxExchange::with_base_url(api, base)),
            None => Box::new(BingxExchange::new(api)),
        },
        Credentials::Gate { cookie } => match config.base_url_override(ExchangeKind::Gate) {
            Some(base) => Box::new(GateExchange::with_base_url(cookie, base)),
            None => Box::new(GateExchange::new(cookie)),
        },
    }
}
