//! Coinforge API Server
//!
//! Serves the HTTP API on top of the entitlement ledger. Uses Postgres when
//! built with the `postgres` feature and a database URL is configured, and
//! the in-memory store otherwise.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coinforge_core::api::{create_router, AppState};
use coinforge_core::config::AppConfig;
use coinforge_core::confirmation::{ConfirmationWatcher, SolanaRpcClient};
use coinforge_core::ledger::{Ledger, LedgerStore, MemoryLedgerStore};
use coinforge_core::telegram::BotApiSender;

/// Coinforge API server
#[derive(Parser, Debug)]
#[command(name = "coinforge-server")]
#[command(author = "COINFORGE LABS")]
#[command(version)]
#[command(about = "Coinforge payments, entitlements and site generation API")]
struct Args {
    /// Config file (.toml, .yaml or .yml)
    #[arg(short, long, env = "COINFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address, overrides the config file
    #[arg(long)]
    bind: Option<String>,

    /// Log level, overrides the config file (RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("coinforge_core={level},coinforge_server={level},tower_http={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database.url {
        let store = coinforge_core::ledger::PgLedgerStore::connect(url, config.database.max_connections)
            .await
            .context("Failed to connect to Postgres")?;
        info!("🗄️ Ledger store: Postgres ({} connections)", config.database.max_connections);
        return Ok(Arc::new(store));
    }

    if config.database.url.is_some() {
        warn!("database.url is set but this build has no Postgres support; using the in-memory store");
    } else {
        warn!("⚠️ Ledger store: in-memory, payments are lost on restart");
    }
    Ok(Arc::new(MemoryLedgerStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    init_logging(&config.server.log_level);

    info!("🪙 Coinforge API v{}", coinforge_core::VERSION);

    let store = build_store(&config).await?;
    let ledger = Arc::new(Ledger::new(store, config.ledger_settings()));

    let mut state = AppState::new(ledger)
        .with_pricing(config.pricing.clone(), config.solana.merchant_address.clone())
        .with_rate_limit(config.rate_limit.clone());

    if config.solana.require_confirmation {
        // validate() guarantees the URL when confirmation is required
        let rpc_url = config
            .solana
            .rpc_url
            .clone()
            .context("solana.rpc_url is required for payment confirmation")?;
        info!(
            "🔗 Payment confirmation: {:?} via {} (timeout {}s)",
            config.solana.commitment, rpc_url, config.solana.confirmation_timeout_secs
        );
        let source = Arc::new(SolanaRpcClient::new(rpc_url));
        state = state.with_watcher(ConfirmationWatcher::new(source, config.watcher_settings()));
    } else {
        warn!("Payment confirmation disabled; client-reported signatures are trusted");
    }

    match &config.telegram.bot_token {
        Some(token) => {
            let sender = Arc::new(BotApiSender::new(config.telegram.api_base.clone(), token.clone()));
            state = state.with_broadcaster(sender, config.broadcast_settings());
            info!(
                "📨 Telegram broadcasting enabled ({} ms between messages)",
                config.telegram.message_delay_ms
            );
        }
        None => info!("Telegram broadcasting disabled (no bot token)"),
    }

    let state = Arc::new(state);

    // Keep the advisory rate-limit map from growing without bound
    if state.rate_limiter.config().enabled {
        let sweeper = state.clone();
        let every = std::time::Duration::from_secs(sweeper.rate_limiter.config().window_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                sweeper.rate_limiter.sweep();
            }
        });
    }

    let app = create_router(state);
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🌐 HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
