use std::net::SocketAddr;
use std::sync::Arc;

use bridge_relayer::adapters::{ChainAdapter, EvmAdapter};
use bridge_relayer::api::{self, AppState};
use bridge_relayer::config::Config;
use bridge_relayer::db::{self, PgStore};
use bridge_relayer::watchers::WatcherManager;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting bridge relayer");

    let config = Config::load()?;
    tracing::info!(
        eth_bridge = %config.eth.bridge_address,
        base_bridge = %config.base.bridge_address,
        relayer = ?config.relayer,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    for checkpoint in db::list_checkpoints(&pool).await? {
        tracing::info!(
            chain = %checkpoint.chain,
            block = checkpoint.last_processed_block,
            updated_at = %checkpoint.updated_at,
            "Resuming from checkpoint"
        );
    }

    let store = Arc::new(PgStore::new(pool));

    let adapters: Vec<Arc<dyn ChainAdapter>> = vec![
        Arc::new(EvmAdapter::eth(&config)?),
        Arc::new(EvmAdapter::base(&config)?),
    ];

    let watcher_manager =
        WatcherManager::new(&config.relayer, adapters, store.clone(), store.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let api_state = AppState::new(watcher_manager.statuses(), store.clone());
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Pipelines initialized, starting processing");

    if let Err(e) = watcher_manager.run(shutdown_rx).await {
        tracing::error!(error = %e, "Watcher manager error");
        return Err(e);
    }

    tracing::info!("Bridge relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
///
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_relayer=debug"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
