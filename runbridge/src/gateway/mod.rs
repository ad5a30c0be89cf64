//! WebSocket gateway.
//!
//! Accepts one connection per program run: the first message carries the
//! source, every later message is a line of input, and every outbound text
//! message is one [`Frame`](crate::bridge::Frame).

mod routes;

pub use routes::router;

use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;

use crate::bridge::Bridge;

/// Shared state handed to every connection.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub route: String,
}

impl AppState {
    /// State serving `bridge` at `route`.
    pub fn new(bridge: Bridge, route: impl Into<String>) -> Self {
        let route = route.into();
        let route = if route.starts_with('/') {
            route
        } else {
            format!("/{}", route)
        };
        Self {
            bridge: Arc::new(bridge),
            route,
        }
    }
}

/// Serve the gateway until ctrl-c.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("listening on ws://{}{}", addr, state.route);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
