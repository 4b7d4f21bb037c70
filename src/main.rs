use clap::Parser;
use dotenvy::dotenv;
use image_slot_backend::config::StoreConfig;
use image_slot_backend::infrastructure::storage;
use image_slot_backend::services::sweeper::BackgroundWorker;
use image_slot_backend::{AppState, create_app};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_slot_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Image Slot Backend...");

    // 2. Configuration & Store
    let config = StoreConfig::from_env();
    info!(
        "🛡️  Store Config: Max Size={}MB, Field='{}', Serialized Replaces={}",
        config.max_file_size / 1024 / 1024,
        config.upload_field,
        config.serialize_replaces
    );

    let store = storage::setup_store(&config).await?;

    // 3. Graceful Shutdown Channel & Staging Sweeper
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let worker = BackgroundWorker::new(
        Arc::new(store.staging().clone()),
        Duration::from_secs(config.sweep_interval_secs),
        Duration::from_secs(config.staging_cleanup_age_secs),
        shutdown_rx,
    );
    let worker_handle = tokio::spawn(worker.run());

    // 4. API Service
    let state = AppState {
        store,
        config: config.clone(),
    };
    let app = create_app(state);

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://{}", addr);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 5. Stop the sweeper
    info!("🛑 Shutting down backend services...");
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
