//! HTTP Basic authentication

use crate::server::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::debug;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() { return false; }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Debug)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Enabled only when both a username and a password are set.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Self::new(u, p)),
            _ => None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> bool {
        let Some(encoded) = header.and_then(|h| h.strip_prefix("Basic ")) else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Some(colon) = decoded.iter().position(|&b| b == b':') else {
            return false;
        };
        let (user, pass) = (&decoded[..colon], &decoded[colon + 1..]);
        // no early exit between the two comparisons
        let user_ok = constant_time_eq(self.username.as_bytes(), user);
        let pass_ok = constant_time_eq(self.password.as_bytes(), pass);
        user_ok & pass_ok
    }
}

pub async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = &state.auth else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if auth.verify(provided) {
        return next.run(request).await;
    }
    debug!("Rejected unauthenticated request to {}", request.uri().path());
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="scriptwatch""#)],
        "Unauthorized",
    )
        .into_response()
}
