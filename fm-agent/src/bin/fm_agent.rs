//! File Monitor Agent - tracks scheduled file deliveries across S3 zones.
//!
//! Each cycle lists the input, archive and error zones, reconciles them against
//! the day's expected-file manifest, and reports lifecycle events to New Relic.

use anyhow::{Context, Result};
use fm_agent::config::Config;
use fm_agent::runner;
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path =
        std::env::var("FM_AGENT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    if let Some(addr) = config.metrics_addr() {
        tokio::spawn(start_metrics_server(addr));
    }

    runner::poll_mode::run(&config).await
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Serves the default Prometheus registry at GET /metrics until Ctrl+C.
async fn start_metrics_server(addr: SocketAddr) {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::Encoder;
    use tokio::net::TcpListener;

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Failed to bind metrics server to {}: {}", addr, err);
            return;
        }
    };

    info!(
        "Prometheus metrics server listening on http://{}/metrics",
        addr
    );

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_signal => {
                tracing::info!("Metrics server shutting down");
                break;
            }
            accept_result = listener.accept() => {
                let (stream, _) = match accept_result {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::warn!("Failed to accept metrics connection: {}", err);
                        continue;
                    }
                };

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                        if req.uri().path() != "/metrics" {
                            let mut response = Response::new(Full::new(Bytes::from("Not Found")));
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            return Ok::<_, hyper::Error>(response);
                        }

                        let encoder = prometheus::TextEncoder::new();
                        let mut buffer = Vec::new();
                        if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
                            let body = Full::new(Bytes::from(err.to_string()));
                            let mut response = Response::new(body);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            return Ok(response);
                        }

                        // Content-Type for Prometheus compatibility
                        let mut response = Response::new(Full::new(Bytes::from(buffer)));
                        if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                            response.headers_mut().insert(CONTENT_TYPE, value);
                        }
                        Ok(response)
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::debug!("Error serving metrics connection: {}", err);
                    }
                });
            }
        }
    }
}
