//! ferryd: runs the ferry pipeline workers.

use anyhow::{Context, Result};
use clap::Parser;
use ferry_core::config::{AppConfig, BrokerBackend, LogFormat, LoggingConfig, WorkerKind};
use ferry_drive::HttpDriveClient;
use ferry_queue::Publisher;
use ferry_worker::routes::{OpsState, create_router};
use ferry_worker::{WorkerContext, metrics, spawn_workers};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Ferry - drive extraction and upload pipeline workers
#[derive(Parser, Debug)]
#[command(name = "ferryd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "FERRY_CONFIG", default_value = "config/ferry.toml")]
    config: String,

    /// Workers to run, overriding the configured list
    #[arg(short, long, value_delimiter = ',')]
    workers: Option<Vec<WorkerKind>>,
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .filter
            .as_deref()
            .unwrap_or("info,tower_http=info")
            .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        figment = figment.merge(Toml::file(path));
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("FERRY_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    init_tracing(&config.logging);
    tracing::info!("Ferry v{}", env!("CARGO_PKG_VERSION"));
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loaded configuration file");
    } else {
        tracing::debug!("No config file found at {}, using defaults and environment", args.config);
    }

    metrics::register_metrics();

    let storage = ferry_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata = ferry_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!(backend = metadata.backend_name(), "Metadata store initialized");

    let broker = ferry_queue::from_config(&config.broker)
        .await
        .context("failed to connect to broker")?;
    let bindings = ferry_queue::bindings_for(config.broker.backend);
    ferry_queue::declare_topology(broker.as_ref(), &bindings)
        .await
        .context("failed to declare queue topology")?;
    tracing::info!(backend = broker.backend_name(), "Broker topology declared");
    if config.broker.backend == BrokerBackend::Memory && config.ops.bind.is_none() {
        tracing::warn!("memory broker without an ops endpoint: no messages can arrive");
    }

    let drive = Arc::new(HttpDriveClient::new(&config.drive).context("failed to build drive client")?);

    let shutdown = CancellationToken::new();

    if let Some(bind) = config.ops.bind.as_deref() {
        let addr: SocketAddr = bind.parse().context("invalid ops bind address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind to {addr}"))?;
        let app = create_router(OpsState {
            metadata: metadata.clone(),
            storage: storage.clone(),
            broker: broker.clone(),
            publisher: Publisher::new(broker.clone()).with_app_id("ferryd"),
        });
        let token = shutdown.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "ops endpoint failed");
            }
        });
        tracing::info!("Ops endpoint listening on {}", addr);
    }

    let workers = config.workers.clone();
    let ctx = WorkerContext::new(
        config,
        metadata.clone(),
        storage,
        broker.clone(),
        drive.clone(),
        drive,
    );
    let mut set = spawn_workers(&ctx, &workers, &shutdown);

    let mut failed = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested, draining workers");
                shutdown.cancel();
                break;
            }
            joined = set.join_next() => match joined {
                Some(Ok((kind, Ok(())))) => {
                    tracing::info!(worker = kind.as_str(), "worker exited");
                }
                Some(Ok((kind, Err(e)))) => {
                    tracing::error!(worker = kind.as_str(), error = %e, "worker failed");
                    failed = true;
                    shutdown.cancel();
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "worker task panicked");
                    failed = true;
                    shutdown.cancel();
                    break;
                }
                None => break,
            },
        }
    }

    while let Some(joined) = set.join_next().await {
        if let Ok((kind, Err(e))) = joined {
            tracing::warn!(worker = kind.as_str(), error = %e, "worker stopped with error");
        }
    }

    broker.shutdown().await;
    metadata.close().await;
    tracing::info!("Shutdown complete");

    if failed {
        anyhow::bail!("a worker exited with an error");
    }
    Ok(())
}
