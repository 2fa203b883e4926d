//! REST handlers over `WatchService`

use crate::server::AppState;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use scriptwatch_core::{Error, NotificationConfig, TargetConfig, TargetStatus, TargetUrl};
use scriptwatch_store::RevisionId;
use scriptwatch_watch::{TargetView, DEFAULT_HISTORY_LIMIT};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Core error carried to an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidUrl(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::TargetNotFound(_) | Error::RevisionNotFound(_) => StatusCode::NOT_FOUND,
            Error::TargetExists(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Add/edit payload. `interval` is whole seconds, `timeout` a failure count.
/// A missing `status` means active on add and unchanged on edit.
#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub url: String,
    pub interval: u64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timeout: u32,
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl TargetRequest {
    fn into_config(self) -> ApiResult<TargetConfig> {
        let url = TargetUrl::parse(&self.url)?;
        let status = match self.status.as_deref() {
            None | Some("") => TargetStatus::Active,
            Some(s) => s.parse()?,
        };
        Ok(TargetConfig {
            url,
            interval: Duration::from_secs(self.interval),
            status,
            failure_threshold: self.timeout,
            notification: self.notification,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    pub url: String,
    #[serde(default)]
    pub start: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub url: String,
    pub commit: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub url: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CommitEntry {
    pub hash: RevisionId,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CommitsResponse {
    pub commits: Vec<CommitEntry>,
    pub total: usize,
}

pub async fn list_urls(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TargetView>>> {
    Ok(Json(state.service.list_targets()?))
}

pub async fn list_commits(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CommitsQuery>,
) -> ApiResult<Json<CommitsResponse>> {
    let page = state
        .service
        .list_history(
            &TargetUrl::new(&q.url),
            q.start.unwrap_or(0),
            q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        )
        .await?;
    Ok(Json(CommitsResponse {
        commits: page
            .revisions
            .into_iter()
            .map(|r| CommitEntry { hash: r.id, date: r.date })
            .collect(),
        total: page.total,
    }))
}

pub async fn get_diff(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DiffQuery>,
) -> ApiResult<Response> {
    let patch = state
        .service
        .get_diff(&TargetUrl::new(&q.url), &RevisionId::new(&q.commit))
        .await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], patch).into_response())
}

pub async fn add_url(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TargetRequest>,
) -> ApiResult<Json<TargetConfig>> {
    let config = state.service.add_target(body.into_config()?).await?;
    Ok(Json(config))
}

pub async fn edit_url(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TargetRequest>,
) -> ApiResult<Json<TargetConfig>> {
    let keep_status = body.status.as_deref().map_or(true, |s| s.trim().is_empty());
    let config = body.into_config()?;
    let config = if keep_status {
        state.service.edit_target_keep_status(config).await?
    } else {
        state.service.edit_target(config).await?
    };
    Ok(Json(config))
}

pub async fn delete_url(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UrlQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let url = TargetUrl::new(&q.url);
    state.service.remove_target(&url).await?;
    Ok(Json(json!({ "deleted": url })))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<StatusQuery>,
) -> ApiResult<Json<TargetConfig>> {
    let status: TargetStatus = q.status.parse()?;
    let config = state
        .service
        .set_status(&TargetUrl::new(&q.url), status)
        .await?;
    Ok(Json(config))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let targets = state.service.list_targets().map(|t| t.len()).unwrap_or(0);
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "targets": targets,
        "running": state.service.registry().len(),
    }))
}
