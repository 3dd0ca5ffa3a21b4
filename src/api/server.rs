//! API server setup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::routes;
use crate::config::Config;
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;
use crate::{Error, Result};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<JobRegistry>,
    pub scheduler: Arc<Scheduler>,
    /// Server start time, for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, registry: Arc<JobRegistry>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            config,
            registry,
            scheduler,
            start_time: Instant::now(),
        }
    }
}

/// API server.
pub struct ApiServer {
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            state,
            cancel_token,
        }
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        // Outermost first on the request path: recover panics, assign a
        // request id, log, then CORS, then the routes.
        routes::create_router(self.state.clone())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(CatchPanicLayer::new())
    }

    /// Bind and serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr = listen_addr(&self.state.config.http.port)?;
        let router = self.build_router();

        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "API server listening");

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("API server shutting down");
            })
            .await
            .map_err(|e| Error::other(format!("server error: {e}")))?;

        Ok(())
    }
}

/// Resolve the configured port into a bindable socket address. A bare
/// `":8080"` binds all interfaces.
fn listen_addr(port: &str) -> Result<SocketAddr> {
    let candidate = if port.starts_with(':') {
        format!("0.0.0.0{port}")
    } else {
        port.to_string()
    };

    candidate
        .parse()
        .map_err(|e| Error::config(format!("invalid listen address {port:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        assert_eq!(
            listen_addr(":8080").unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn full_addresses_pass_through() {
        assert_eq!(
            listen_addr("127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn invalid_addresses_error() {
        assert!(listen_addr("not-an-addr").is_err());
    }
}
