//! HTTP service for wherenow.
//!
//! One endpoint, `/`, dispatched by method:
//! - `GET /?ping=1`: unauthenticated liveness probe
//! - `GET /?ping=auth`: authenticated liveness probe
//! - `GET /?limit=N`: most recent upload entries, newest first
//! - `POST /`: append a location
//! - `PATCH /`: update label, note and category of a stored location
//!
//! Everything except the plain ping requires `Authorization: Bearer <token>`.

mod error;
mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::BearerAuth;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::LocationLog;

pub use error::ApiError;
pub use handlers::MAX_BODY_BYTES;

/// Shared state of the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The location log.
    pub log: LocationLog,
    /// Bearer token gate.
    pub auth: BearerAuth,
}

impl AppState {
    /// Create state from its parts.
    #[must_use]
    pub fn new(log: LocationLog, auth: BearerAuth) -> Self {
        Self { log, auth }
    }

    /// Create state from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be created.
    pub fn from_config(config: &Config) -> Result<Self> {
        let log = LocationLog::open(config.log_path())?;
        Ok(Self::new(log, BearerAuth::new(config.auth.token.clone())))
    }
}

/// Build the router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(handlers::list_locations)
                .post(handlers::create_location)
                .patch(handlers::patch_location)
                // HEAD would otherwise be served by the GET handler
                .head(handlers::method_not_allowed)
                .fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created, the address
/// cannot be bound, or the server fails.
pub async fn serve(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;
    let addr = config.bind_addr();

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| Error::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!("wherenow listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("wherenow stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C, running until killed: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
