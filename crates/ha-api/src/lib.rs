//! Home Assistant auth HTTP API
//!
//! Serves the login flow endpoints of the trusted networks provider using axum.
//! Based on: https://developers.home-assistant.io/docs/auth_api

pub mod auth;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use auth::AuthState;

/// Build the router for the auth endpoints.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// login flow handlers need the peer address.
pub fn create_router(state: AuthState) -> Router {
    Router::new()
        .route("/auth/providers", get(auth::get_providers))
        .route("/auth/login_flow", post(auth::create_login_flow))
        .route("/auth/login_flow/:flow_id", post(auth::submit_login_flow))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
