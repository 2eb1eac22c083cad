// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::serve;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunefetch_api::router;
use tunefetch_application::{
    AppState, AudioResolutionPipeline, DirectApiProber, DownloadService, Fetcher, JobTracker,
};
use tunefetch_config::{load as load_config, HttpConfig, TelemetryConfig};
use tunefetch_infrastructure::{http_client, ChromiumLauncher};
use tunefetch_scheduler::Scheduler;

const CONFIG_PATH_ENV: &str = "TUNEFETCH_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;
    init_tracing(&config.telemetry);

    let shutdown = CancellationToken::new();
    let client = http_client(&config)?;

    let prober = DirectApiProber::new(
        client.clone(),
        &config.prober,
        config.pipeline.quality_ladder.clone(),
    );
    let pipeline = Arc::new(AudioResolutionPipeline::new(
        Arc::new(ChromiumLauncher::new()),
        Arc::new(prober),
        &config,
    ));
    let tracker = JobTracker::new();
    let downloads = Arc::new(DownloadService::new(
        pipeline,
        Fetcher::new(client, &config.fetcher),
        tracker.clone(),
        &config.fetcher,
        shutdown.clone(),
    ));

    let state = AppState::new(config.clone(), downloads);
    state.on_start();

    let scheduler = Scheduler::new(config.clone(), tracker);
    scheduler.register_jobs().await;
    let scheduler_handle = scheduler.start(shutdown.clone());

    let listener = TcpListener::bind(bind_addr(&config.http)?).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    let server_shutdown = shutdown.clone();
    serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    match scheduler_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(target: "cli", error = %err, "scheduler stopped with an error"),
        Err(err) => warn!(target: "cli", error = %err, "scheduler task panicked"),
    }
    info!(target: "cli", "shutdown complete");
    Ok(())
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(telemetry.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    if telemetry.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true).with_level(true))
            .init();
    }
}

fn bind_addr(http: &HttpConfig) -> Result<SocketAddr> {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse()
        .with_context(|| format!("invalid listen address {addr}"))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => {},
                    _ = terminate.recv() => {},
                }
            }
            _ => {
                warn!(target: "cli", "could not install unix signal handlers, falling back to ctrl-c");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(target: "cli", error = %err, "ctrl-c handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "cli", error = %err, "ctrl-c handler failed");
        }
    }

    info!(target: "cli", "shutdown signal received");
}
