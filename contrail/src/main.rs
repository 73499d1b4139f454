//! contrail binary: proxy, cook, and viewer subcommands.

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ractor::Actor;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use contrail::capture::{CaptureStoreActor, CaptureStoreArguments};
use contrail::config::ProxyConfig;
use contrail::{cook, proxy, viewer};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contrail=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Command::Proxy {
            port,
            host,
            target,
            output,
        } => run_proxy(&host, port, &target, output).await,
        Command::Cook { input, output } => run_cook(&input, &output),
        Command::Viewer { input, port, host } => run_viewer(&input, &host, port).await,
    }
}

async fn run_proxy(host: &str, port: u16, target: &str, output: PathBuf) -> ExitCode {
    let config = match ProxyConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let (capture_store, _capture_handle) = match Actor::spawn(
        None,
        CaptureStoreActor,
        CaptureStoreArguments {
            path: output.clone(),
        },
    )
    .await
    {
        Ok(spawned) => spawned,
        Err(e) => {
            error!(path = %output.display(), error = %e, "failed to open capture log");
            return ExitCode::from(1);
        }
    };

    let state = match proxy::AppState::new(target, capture_store.clone(), &config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to build upstream client");
            return ExitCode::from(1);
        }
    };

    let addr = format!("{host}:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            return ExitCode::from(1);
        }
    };

    info!(
        addr = %addr,
        target = %target,
        output = %output.display(),
        "contrail proxy listening"
    );

    let app = proxy::router(Arc::new(state));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    capture_store.stop(None);

    match result {
        Ok(()) => {
            info!("proxy shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "proxy server failed");
            ExitCode::from(1)
        }
    }
}

fn run_cook(input: &Path, output: &Path) -> ExitCode {
    match cook::cook_file(input, output) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(input = %input.display(), error = %e, "cook failed");
            ExitCode::from(1)
        }
    }
}

async fn run_viewer(input: &Path, host: &str, port: u16) -> ExitCode {
    let artifact_path = match viewer::ensure_artifact(input) {
        Ok(path) => path,
        Err(e) => {
            error!(input = %input.display(), error = %e, "cannot prepare artifact");
            return ExitCode::from(1);
        }
    };

    let addr = format!("{host}:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            return ExitCode::from(1);
        }
    };

    info!(
        addr = %addr,
        artifact = %artifact_path.display(),
        "contrail viewer listening"
    );

    let app = viewer::router(Arc::new(viewer::ViewerState { artifact_path }));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "viewer server failed");
            ExitCode::from(1)
        }
    }
}

/// Resolve on ctrl-c or SIGTERM so `axum::serve` can drain and exit 0.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
