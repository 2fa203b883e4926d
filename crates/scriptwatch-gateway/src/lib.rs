//! Scriptwatch Gateway - REST API, static files, and HTTP Basic auth

pub mod api;
pub mod auth;
pub mod server;

pub use api::ApiError;
pub use auth::BasicAuth;
pub use server::{build_router, start_gateway, AppState, GatewayConfig, DEFAULT_PORT};
