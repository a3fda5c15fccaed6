//! Gateway: HTTP surface for session management.
//!
//! Lifecycle:
//! 1. Start the sidecar (optional) and build the lifecycle manager
//! 2. Resolve the admin token
//! 3. Serve `/health`, `/api/auth/*` and `/sessions/*`
//! 4. Reap sessions stuck pairing until shutdown, then stop live sessions

pub mod auth;
pub mod auth_middleware;
pub mod auth_routes;
pub mod error;
pub mod server;
pub mod session_routes;
pub mod state;

pub use {
    error::ApiError,
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
