pub mod handlers;

mod error;

use crate::config::ControlConfig;
use crate::controller::Controller;
use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub use error::ServerError;
use handlers::control_handler;

/// Runs the control unit HTTP server until Ctrl-C.
pub async fn run_server(config: &ControlConfig, controller: Arc<Controller>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid bind address {}:{}",
                config.server.bind_address, config.server.port
            )
        })?;

    let service = make_service_fn(move |_| {
        let controller = controller.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| control_handler(req, controller.clone())))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind {}", addr))?
        .serve(service);

    info!(%addr, "Control unit listening.");
    server
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
        })
        .await
        .context("Server error")?;

    Ok(())
}
