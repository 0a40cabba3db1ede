mod config;
mod demo;
mod telemetry;

use clap::Parser;
use config::{CliArgs, DemoConfig};
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DemoConfig::try_from(args)?;

    init_telemetry(config.log_json)?;
    log_startup_info(&config);

    let pool = demo::build_pool(&config)?;

    let summary = tokio::select! {
        summary = demo::run(&pool, &config) => summary?,
        () = shutdown_signal() => {
            pool.close();
            tracing::info!("Pipeline interrupted, workers terminated");
            return Ok(());
        }
    };

    pool.close();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    tracing::info!("Pipeline finished");
    Ok(())
}

fn log_startup_info(config: &DemoConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting pipeline with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting pipeline over {} elements with {} workers",
            config.length,
            config.pool.size
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
