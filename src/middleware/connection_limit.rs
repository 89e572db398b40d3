//! WebSocket connection limits for `/chatstream`.
//!
//! Upgrade requests reserve a slot in [`AppState`] before reaching the handler:
//! 503 when the global limit is reached, 429 when the caller's IP is at its
//! limit. Plain HTTP requests pass through uncounted.
//!
//! # Example
//!
//! ```ignore
//! use realtime_chat_gateway::middleware::connection_limit_middleware;
//!
//! let app = routes::chat::create_chat_router()
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

use crate::state::{AppState, ConnectionLimitError};

/// IP whose slot the chat handler must release when its socket closes.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let ip = addr.ip();
    match state.try_acquire_connection(ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(ip));
            next.run(request).await
        }
        Err(e) => {
            warn!(ip = %ip, reason = %e, "Rejecting chat WebSocket connection");
            match e {
                ConnectionLimitError::GlobalLimitReached => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Server at capacity. Please try again later.",
                )
                    .into_response(),
                ConnectionLimitError::PerIpLimitReached => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Too many connections from your IP address.",
                )
                    .into_response(),
            }
        }
    }
}

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}
