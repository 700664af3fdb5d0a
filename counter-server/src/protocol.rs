//! WebSocket accept handler for `/socket`.

use crate::service::CounterService;
use crate::session::Session;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::sync::Arc;

/// Path the browser client connects to.
pub const SOCKET_PATH: &str = "/socket";

/// Upgrade handler. Refuses with 503 when full or shutting down.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(service): Extension<Arc<CounterService>>,
) -> Response {
    if !service.is_accepting() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    // Reject if at connection capacity
    if service.registry().is_full() {
        tracing::warn!(
            "Connection limit reached ({}), rejecting upgrade",
            service.config().limits.max_connections
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    ws.on_upgrade(move |socket| accept(service, socket))
}

async fn accept(service: Arc<CounterService>, socket: WebSocket) {
    // Capacity or shutdown may have changed since the upgrade was granted.
    let (id, outbound) = match service.connect().await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Dropping upgraded socket: {}", e);
            return;
        }
    };

    Session::new(service, id, outbound).run(socket).await;
}
