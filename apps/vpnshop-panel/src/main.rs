use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vpnshop_db::Stores;
use vpnshop_db::db::init_db;

use vpnshop_panel::cli::{Cli, Commands};
use vpnshop_panel::config::Config;
use vpnshop_panel::services::messenger::TelegramMessenger;
use vpnshop_panel::services::payment::crypto_pay::{CryptoInvoiceApi, CryptoPayClient};
use vpnshop_panel::services::provisioning::RemnawaveClient;
use vpnshop_panel::{AppState, bot, router};

const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DB_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = dotenvy::dotenv() {
        println!("Warning: failed to load .env file: {}", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vpnshop_panel=info,tower_http=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command() {
        Commands::Migrate => {
            let database_url =
                std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
            init_db(&database_url, 1).await?;
            info!("Migrations applied");
            Ok(())
        }
        Commands::Serve => {
            let config = Config::from_env().context("Failed to load configuration")?;
            let pool = init_db(&config.database_url, DB_MAX_CONNECTIONS).await?;
            run_server(config, pool).await
        }
    }
}

async fn run_server(config: Config, pool: sqlx::PgPool) -> Result<()> {
    let bot = teloxide::Bot::new(&config.bot_token);
    let provisioner = Arc::new(RemnawaveClient::new(&config.remnawave)?);
    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));
    let crypto_api = match &config.crypto_pay {
        Some(crypto) => Some(Arc::new(CryptoPayClient::new(crypto)?) as Arc<dyn CryptoInvoiceApi>),
        None => None,
    };
    let listen_port = config.listen_port;

    let state = AppState::new(
        config,
        Stores::postgres(pool),
        provisioner,
        messenger,
        crypto_api,
    );
    info!(
        "Payment providers enabled: {:?}",
        state.pay_service.providers().enabled_types()
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweep = tokio::spawn(
        state
            .pay_service
            .clone()
            .run_stale_sweep(STALE_SWEEP_INTERVAL, shutdown_rx.clone()),
    );
    let bot_task = tokio::spawn(bot::run_bot(bot, state.clone(), shutdown_rx.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    let message_cache = state.message_cache.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    for (name, task) in [("stale sweep", sweep), ("bot", bot_task)] {
        if let Err(e) = task.await {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }
    message_cache.close().await;
    info!("Shutdown complete");
    Ok(())
}
