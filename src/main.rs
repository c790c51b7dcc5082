// =============================================================================
// market-sim-harness — Main Entry Point
// =============================================================================

mod api;
mod app;
mod auth;
mod broadcaster;
mod catalog;
mod chat;
mod clock;
mod config;
mod error;
mod mode;
mod portfolio;
mod price_engine;
mod registry;
mod save_store;
mod scheduler;
mod session;
mod trader;
mod user_store;

use std::time::Duration;

use axum::routing::get;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::Application;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    let config = ServerConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("market-sim-harness starting up");

    let app = Application::new(&config);

    let router = api::rest::router()
        .route("/ws", get(api::ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app.clone());

    let mut listener = None;
    for port in &config.bind_ports {
        let addr = format!("0.0.0.0:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => {
                info!(addr = %addr, "listening");
                listener = Some(l);
                break;
            }
            Err(e) => warn!(addr = %addr, error = %e, "bind failed, trying next candidate"),
        }
    }

    let Some(listener) = listener else {
        error!(ports = ?config.bind_ports, "every candidate port failed to bind");
        std::process::exit(2);
    };

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());

    let result = server.await;

    info!("stopping session schedulers");
    app.stop_all_schedulers();

    info!("closing push connections");
    app.broadcaster.close_all();

    info!("draining in-flight work, up to 10s");
    tokio::time::sleep(Duration::from_secs(10)).await;

    match result {
        Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "server exited with an error");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping new order intake");
}
