use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

mod cli;
mod data_dir;
mod dsn;
mod request_log_sink;
mod startup_check;

use cswitch_common::{Clock, SystemClock};
use cswitch_core::{
    BlacklistTracker, RecoverySweeper, RelayEngine, UpstreamClientConfig, WreqUpstreamClient,
};
use cswitch_provider_core::ProviderStore;
use cswitch_router::relay_router;
use cswitch_storage::{RelayStorage, StorageBus, StorageBusConfig};

use crate::cli::Cli;
use crate::data_dir::resolve_data_dir;
use crate::dsn::resolve_dsn;
use crate::request_log_sink::StorageRequestLogSink;

const BUS_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("cswitch failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir.as_deref());
    tokio::fs::create_dir_all(&data_dir).await?;
    let dsn = resolve_dsn(cli.dsn.as_deref(), &data_dir)?;
    let config = cli.into_patch(data_dir, dsn).into_config()?;
    info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir,
        dsn = %config.dsn,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        admin = config.admin_key.is_some(),
        sweep_interval_secs = config.sweep_interval_secs,
        "config loaded"
    );

    let storage = RelayStorage::connect(&config.dsn).await?;
    storage.sync().await?;
    storage.ensure_default_settings().await?;
    info!("db ready");

    let registry = Arc::new(ProviderStore::new(&config.data_dir));
    let warnings = startup_check::check_providers(&registry).await;
    startup_check::log_warnings(&warnings);

    let bus = StorageBus::spawn(storage.clone(), StorageBusConfig::default());
    let request_log = Arc::new(StorageRequestLogSink::new(&bus));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tracker = Arc::new(BlacklistTracker::new(storage, clock.clone()));
    let sweeper = RecoverySweeper::spawn(
        tracker.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    );

    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))?;
    let engine = RelayEngine::new(
        registry.clone(),
        tracker.clone(),
        Arc::new(client),
        request_log,
        clock,
    );

    let mut app = relay_router(Arc::new(engine));
    if let Some(admin_key) = config.admin_key.as_deref() {
        app = app.nest(
            "/admin",
            cswitch_admin::router(registry, tracker, admin_key),
        );
    }

    let bind = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    sweeper.stop().await;
    if tokio::time::timeout(BUS_SHUTDOWN_TIMEOUT, bus.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(event = "storage_bus.shutdown_timeout", "pending request logs were not flushed");
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cswitch=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(event = "shutdown.signal_failed", error = %err);
        std::future::pending::<()>().await;
    }
}
