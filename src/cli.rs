use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use crate::app_state::AppState;
use crate::audit::EventType;
use crate::auditweb::build_router;
use crate::config_loader::{load_config, AggregatorConfig};
use crate::log_sink::init_tracing;
use crate::scheduler::{BackgroundWorkers, ShutdownSignal};

/// Top-level CLI interface for the audit aggregator
#[derive(Parser)]
#[command(
    name = "audit_aggregator",
    version,
    about = "Centralized audit aggregation and compliance reporting service"
)]
pub struct Cli {
    /// TOML configuration file (defaults to ./audit_aggregator.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API and run the background workers
    Serve {
        /// Host/IP to bind, overrides the configured host
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

pub fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::ShowConfig => {
            let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.validate()?;
            init_tracing(config.log_format, &config.log_filter);

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build Tokio runtime")?;
            rt.block_on(serve(config))
        }
    }
}

/// Binds the configured address and runs until a termination signal or a
/// fatal worker error.
pub async fn serve(config: AggregatorConfig) -> anyhow::Result<ExitCode> {
    let addr = config.bind_addr();
    let state = Arc::new(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        termination_signal().await;
        tracing::info!("termination signal received");
        signal.trigger();
    });

    run(state, listener, shutdown).await
}

/// Registers the aggregator, starts the workers and serves on `listener`
/// until `shutdown` fires. A fatal error yields a failing exit code and no
/// stop entry.
pub async fn run(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: ShutdownSignal,
) -> anyhow::Result<ExitCode> {
    state.register_self()?;
    state.record_lifecycle(EventType::ServiceStart)?;

    let workers = BackgroundWorkers::start(state.clone(), shutdown.clone())?;

    let addr = listener
        .local_addr()
        .context("listener has no local address")?;
    tracing::info!(
        addr = %addr,
        service = %state.config.service_name,
        version = %state.config.service_version,
        "audit aggregator listening"
    );

    let graceful = shutdown.clone();
    let served = axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(async move { graceful.wait().await })
        .await;

    shutdown.trigger();
    workers.join().await;

    if shutdown.is_fatal() {
        tracing::error!("stopped after a fatal error");
        return Ok(ExitCode::FAILURE);
    }

    if let Err(e) = state.record_lifecycle(EventType::ServiceStop) {
        tracing::warn!(error = %e, "could not record service stop");
    }
    served.context("HTTP server error")?;
    tracing::info!("audit aggregator stopped");
    Ok(ExitCode::SUCCESS)
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
