#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use kvpool::{EchoHandler, Master};
use server::config::{CliArgs, ServerConfig};
use server::connection::{Connections, response_handler, serve};
use server::telemetry::init_tracing;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_tracing()?;

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let connections = Connections::new();
    let master = Master::with_config(config.pool_config())?;
    master.start(
        &Handle::current(),
        response_handler(connections.clone()),
        EchoHandler,
    )?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        listener,
        master.clone(),
        connections,
        config.read_buffer_size,
        shutdown.clone(),
    ));

    shutdown_signal().await;

    // 1. Stop accepting and close open connections
    shutdown.cancel();
    server.await?;

    // 2. Stop the pool. Joining worker threads blocks, so keep it off the
    //    async workers.
    tokio::task::spawn_blocking(move || master.stop()).await??;

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(_config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting kvpool server on {} with full config: {:#?}",
            _config.server_addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting kvpool server on {} with {} workers",
            _config.server_addr,
            _config.num_workers
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
