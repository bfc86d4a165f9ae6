use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use conflux_config::{BackendConfig, HttpBackend, ServiceBackend, StdioBackend};
use conflux_core::{CallContext, HttpError};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::UpstreamError;
use crate::proxy::ToolSummary;
use crate::tracking::{RequestStatus, RequestTracker, Statistics};
use crate::{RefreshReport, ServerInfo, UpstreamState};

/// Build the upstream router: tool listing and calls, server management,
/// and the request tracking API
pub fn upstream_router(state: Arc<UpstreamState>) -> Router {
    Router::new()
        .route("/mcp/tools/list", post(list_tools))
        .route("/mcp/tools/call", post(call_tool))
        .route("/api/servers", get(list_servers))
        .route("/api/servers/http", post(add_http))
        .route("/api/servers/stdio", post(add_stdio))
        .route("/api/servers/service", post(add_service))
        .route("/api/servers/{name}", delete(remove_server))
        .route("/api/requests", get(list_requests))
        .route("/api/requests/{id}", get(get_request))
        .route("/api/statistics", get(statistics))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct ListToolsRequest {
    /// Only tools of this backend
    #[serde(default)]
    server: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListToolsResponse {
    tools: Vec<ToolSummary>,
}

async fn list_tools(
    State(state): State<Arc<UpstreamState>>,
    Json(req): Json<ListToolsRequest>,
) -> Json<ListToolsResponse> {
    Json(ListToolsResponse {
        tools: state.list_tools(req.server.as_deref()).await,
    })
}

#[derive(Debug, Deserialize)]
struct CallToolRequest {
    /// Exposed tool name (`backend_tool`)
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct CallToolResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
}

async fn call_tool(
    State(state): State<Arc<UpstreamState>>,
    headers: HeaderMap,
    Json(req): Json<CallToolRequest>,
) -> Result<Json<CallToolResponse>, UpstreamErrorResponse> {
    let context = CallContext::from_headers(&headers);
    let text = state
        .invoke_tool(&req.name, req.arguments.unwrap_or_default(), &context)
        .await?;

    Ok(Json(CallToolResponse {
        content: vec![ContentBlock::Text { text }],
    }))
}

#[derive(Debug, Serialize)]
struct ListServersResponse {
    servers: Vec<ServerInfo>,
}

async fn list_servers(State(state): State<Arc<UpstreamState>>) -> Json<ListServersResponse> {
    Json(ListServersResponse {
        servers: state.list_servers().await,
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddHttpRequest {
    name: String,
    url: Url,
    #[serde(default)]
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddStdioRequest {
    name: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddServiceRequest {
    name: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    port: u16,
    #[serde(default)]
    health_check_path: Option<String>,
    #[serde(default)]
    startup_timeout: Option<u64>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddServerResponse {
    name: String,
    refresh: RefreshReport,
}

async fn add_http(
    State(state): State<Arc<UpstreamState>>,
    Json(req): Json<AddHttpRequest>,
) -> Result<(StatusCode, Json<AddServerResponse>), UpstreamErrorResponse> {
    let config = BackendConfig::Http(HttpBackend {
        url: req.url,
        auth_token: req.auth_token.filter(|t| !t.is_empty()).map(SecretString::from),
    });
    add_server(&state, req.name, config).await
}

async fn add_stdio(
    State(state): State<Arc<UpstreamState>>,
    Json(req): Json<AddStdioRequest>,
) -> Result<(StatusCode, Json<AddServerResponse>), UpstreamErrorResponse> {
    if req.command.trim().is_empty() {
        return Err(UpstreamError::config("Command must not be empty").into());
    }

    let config = BackendConfig::Stdio(StdioBackend {
        command: req.command,
        args: req.args,
        env: req.env,
        working_directory: req.working_directory,
    });
    add_server(&state, req.name, config).await
}

async fn add_service(
    State(state): State<Arc<UpstreamState>>,
    Json(req): Json<AddServiceRequest>,
) -> Result<(StatusCode, Json<AddServerResponse>), UpstreamErrorResponse> {
    if req.command.trim().is_empty() {
        return Err(UpstreamError::config("Command must not be empty").into());
    }

    let mut service = ServiceBackend::new(req.command, req.args, req.port);
    if let Some(path) = req.health_check_path {
        if !path.starts_with('/') {
            return Err(UpstreamError::config("Health check path must start with '/'").into());
        }
        service.health_check_path = path;
    }
    if let Some(timeout) = req.startup_timeout {
        service.startup_timeout = timeout;
    }
    service.env = req.env;
    service.working_directory = req.working_directory;
    service.description = req.description;

    add_server(&state, req.name, BackendConfig::Service(service)).await
}

async fn add_server(
    state: &UpstreamState,
    name: String,
    config: BackendConfig,
) -> Result<(StatusCode, Json<AddServerResponse>), UpstreamErrorResponse> {
    let refresh = state.add_server(&name, config).await?;
    Ok((StatusCode::CREATED, Json(AddServerResponse { name, refresh })))
}

#[derive(Debug, Serialize)]
struct RemoveServerResponse {
    removed: bool,
}

async fn remove_server(
    State(state): State<Arc<UpstreamState>>,
    Path(name): Path<String>,
) -> Json<RemoveServerResponse> {
    Json(RemoveServerResponse {
        removed: state.remove_server(&name).await,
    })
}

#[derive(Debug, Deserialize)]
struct ListRequestsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    status: Option<RequestStatus>,
    #[serde(default)]
    server: Option<String>,
}

const fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct ListRequestsResponse {
    requests: Vec<RequestTracker>,
}

async fn list_requests(
    State(state): State<Arc<UpstreamState>>,
    Query(query): Query<ListRequestsQuery>,
) -> Json<ListRequestsResponse> {
    let requests = state
        .tracking()
        .list(query.limit, query.status, query.server.as_deref())
        .await;

    Json(ListRequestsResponse { requests })
}

async fn get_request(
    State(state): State<Arc<UpstreamState>>,
    Path(id): Path<String>,
) -> Result<Json<RequestTracker>, UpstreamErrorResponse> {
    state
        .tracking()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| UpstreamErrorResponse::not_found(format!("Request not found: {id}")))
}

async fn statistics(State(state): State<Arc<UpstreamState>>) -> Json<Statistics> {
    Json(state.tracking().statistics().await)
}

/// Error response wrapper that implements `IntoResponse`
enum UpstreamErrorResponse {
    Upstream(UpstreamError),
    NotFound(String),
}

impl UpstreamErrorResponse {
    const fn not_found(message: String) -> Self {
        Self::NotFound(message)
    }
}

impl From<UpstreamError> for UpstreamErrorResponse {
    fn from(e: UpstreamError) -> Self {
        Self::Upstream(e)
    }
}

impl IntoResponse for UpstreamErrorResponse {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Upstream(e) => (e.status_code(), Json(e.to_body())).into_response(),
            Self::NotFound(message) => {
                let body = serde_json::json!({
                    "error": {
                        "type": "not_found",
                        "message": message,
                    }
                });
                (StatusCode::NOT_FOUND, Json(body)).into_response()
            }
        }
    }
}
