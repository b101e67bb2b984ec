use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use clap::Parser;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use llmapi::config::{load_config, AppConfig};
use llmapi::observability::init_tracing;
use llmapi::routing::dispatch::{dispatch_request, normalize_base_path};
use llmapi::state::AppState;
use tokio::net::{TcpListener, TcpStream};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Multi-provider LLM gateway.
#[derive(Debug, Parser)]
#[command(name = "llmapi", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {}: {e}", cli.config.display());
        eprintln!("Copy 'config.example.yaml' to 'config.yaml' or pass --config <path>.");
        std::process::exit(1);
    });

    init_tracing(&config.log.level, config.log.format);

    let runtime = build_runtime(config.server.runtime_worker_threads).unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    });
    if let Err(message) = runtime.block_on(run(config)) {
        tracing::error!("{message}");
        eprintln!("{message}");
        std::process::exit(1);
    }
}

/// `Some(1)` selects the current-thread scheduler, anything else a worker pool.
fn build_runtime(worker_threads: Option<usize>) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = match worker_threads {
        Some(1) => tokio::runtime::Builder::new_current_thread(),
        Some(threads) => {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            builder.worker_threads(threads);
            builder
        }
        None => tokio::runtime::Builder::new_multi_thread(),
    };
    builder.enable_all().build()
}

async fn run(config: AppConfig) -> Result<(), String> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let base_path: Arc<str> = Arc::from(normalize_base_path(&config.server.base_path));

    let state = AppState::new(config)
        .map(Arc::new)
        .map_err(|err| format!("Failed to initialize providers: {err}"))?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| format!("Failed to bind to {addr}: {err}"))?;

    tracing::info!(
        addr = %addr,
        base_path = %base_path,
        providers = state.model_router.provider_count(),
        models = state.model_router.models().len(),
        "llmapi listening"
    );

    let server = Server {
        conn_builder: AutoBuilder::new(TokioExecutor::new()),
        graceful: GracefulShutdown::new(),
        state,
        base_path,
    };
    server.serve(listener).await;
    Ok(())
}

struct Server {
    conn_builder: AutoBuilder<TokioExecutor>,
    graceful: GracefulShutdown,
    state: Arc<AppState>,
    base_path: Arc<str>,
}

impl Server {
    /// Accept until SIGINT/SIGTERM, then let open connections drain.
    async fn serve(self, listener: TcpListener) {
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => self.spawn_connection(stream, remote_addr),
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
                () = &mut shutdown => break,
            }
        }
        drop(listener);

        tokio::select! {
            () = self.graceful.shutdown() => tracing::info!("all connections closed"),
            () = tokio::time::sleep(DRAIN_TIMEOUT) => {
                tracing::warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "drain timed out, exiting with open connections");
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, remote_addr: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(%remote_addr, error = %err, "failed to enable TCP_NODELAY");
        }

        let state = Arc::clone(&self.state);
        let base_path = Arc::clone(&self.base_path);
        let service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(
                Arc::clone(&state),
                Arc::clone(&base_path),
                request.map(Body::new),
            )
        });

        let connection = self
            .conn_builder
            .serve_connection_with_upgrades(TokioIo::new(stream), service)
            .into_owned();
        let connection = self.graceful.watch(connection);
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(%remote_addr, "connection closed with error: {err:#}");
            }
        });
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for Ctrl+C");
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
                tracing::warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
