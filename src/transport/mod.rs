// SPDX-License-Identifier: MIT

//! Transport layer: the single device WebSocket route.

pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::BrokerState;

/// Build the axum `Router` serving the device listener.
pub fn build_router(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
