//! HEIF converter - an image to JPEG conversion service.
//!
//! This binary starts the HTTP server and wires the worker pool and the
//! admission gates together.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use heif_converter::{
    admission::{Admission, ConcurrencyLimiter, RateLimiter, DEFAULT_SWEEP_INTERVAL},
    config::Config,
    convert::{Converter, WorkerPool},
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!(
        "  Target size: {}KB, max upload: {}MB, default scale: {}",
        config.target_size_kb, config.max_upload_mb, config.default_scale
    );
    info!(
        "  Workers: {} (queue {}), max concurrent: {}",
        config.workers,
        config.workers * heif_converter::convert::QUEUE_MULTIPLIER,
        config.max_concurrent
    );
    info!(
        "  Rate limit: {}/sec per client, burst {}",
        config.rate_limit, config.rate_limit_burst
    );
    if cfg!(feature = "heif") {
        info!("  Decoders: HEIF, JPEG, PNG");
    } else {
        info!("  Decoders: JPEG, PNG (built without the `heif` feature)");
    }
    if cfg!(feature = "turbojpeg") {
        info!("  Encoder: libjpeg-turbo, falling back to image");
    } else {
        info!("  Encoder: image");
    }

    let pool = Arc::new(WorkerPool::new(
        config.workers,
        Converter::new(config.target_size_kb),
    ));
    pool.start();

    let rate_limiter = Arc::new(RateLimiter::new(
        f64::from(config.rate_limit),
        config.rate_limit_burst,
    ));
    let sweeper = rate_limiter.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
    let admission = Admission::new(rate_limiter, ConcurrencyLimiter::new(config.max_concurrent));

    let router = create_router(pool.clone(), admission, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);
    info!("  curl http://{}/health", addr);
    info!("  curl -F file=@photo.heic http://{}/convert -o photo.jpg", addr);

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    // Finish whatever is still queued before exiting.
    pool.stop().await;
    sweeper.abort();

    match served {
        Ok(()) => {
            info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "heif_converter=debug,tower_http=debug"
    } else {
        "heif_converter=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    RouterConfig::new()
        .with_default_scale(config.default_scale)
        .with_request_timeout(config.request_timeout())
        .with_max_upload_bytes(config.max_upload_bytes())
        .with_tracing(!config.no_tracing)
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received, draining worker pool");
}
