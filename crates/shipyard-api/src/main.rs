//! Shipyard controller entry point.
//!
//! Binary name: `shipyard-controller`
//!
//! Parses CLI arguments, then either validates a shipyard file or starts
//! the REST API together with the dispatcher loops.

mod cli;
mod http;
mod state;
mod worker;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, ServeArgs};
use shipyard_infra::config::{load_controller_config, resolve_data_dir, shipyard_dir};
use shipyard_observe::tracing_setup::{init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { ref file } => {
            init_tracing(cli.log_filter(), cli.log_json, false)
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
            cli::validate::validate(file).await?;
        }
        Commands::Serve(ref args) => {
            serve(&cli, args).await?;
        }
    }

    Ok(())
}

async fn serve(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    let data_dir = args.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let mut config = load_controller_config(&data_dir).await;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.shipyard_dir.is_some() {
        config.shipyard_dir = args.shipyard_dir.clone();
    }
    config.read_only |= args.read_only;
    config.enable_otel |= args.otel;

    init_tracing(cli.log_filter(), cli.log_json, config.enable_otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let shipyards = shipyard_dir(&config, &data_dir);
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::init(config, &data_dir, shipyards.clone()).await?;

    let cancel = CancellationToken::new();
    let workers = worker::spawn_background(&state, &cancel);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        data_dir = %data_dir.display(),
        shipyard_dir = %shipyards.display(),
        read_only = state.config.read_only,
        "shipyard controller listening"
    );

    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::warn!(error = %err, "background task ended abnormally");
        }
    }
    tracing::info!("server stopped");
    shutdown_tracing();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
