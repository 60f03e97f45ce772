//! Request/response surface
//!
//! The `/v1` route table. Reader indexes are resolved against a fresh
//! enumeration inside each request, never cached across requests. Error
//! bodies are always `{error, kind}` with the canonical kind token; the
//! kind decides the status code.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use nfc_agent_core::{Error, ErrorKind, Result};
use nfc_agent_tags::{list_readers, DataType};

use crate::logring::{Category, Level};
use crate::state::AppState;
use crate::supported::supported_readers;
use crate::version::version_info;
use crate::ws::{self, decode_write_data, parse_pack, parse_password};

/// Build the full router for both surfaces.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/readers", get(get_readers))
        .route(
            "/v1/readers/{index}/card",
            get(get_card).post(post_card).delete(delete_card),
        )
        .route("/v1/readers/{index}/lock", post(post_lock))
        .route(
            "/v1/readers/{index}/password",
            post(post_password).delete(delete_password),
        )
        .route("/v1/version", get(get_version))
        .route("/v1/health", get(get_health))
        .route("/v1/supported-readers", get(get_supported_readers))
        .route("/v1/logs", get(get_logs).delete(delete_logs))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// An error response carrying the canonical kind token
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Validation
            | ErrorKind::NoCard
            | ErrorKind::AuthFailed
            | ErrorKind::Bounds
            | ErrorKind::Unsupported => StatusCode::BAD_REQUEST,
            ErrorKind::Transport
            | ErrorKind::Timeout
            | ErrorKind::Parse
            | ErrorKind::VerifyFailed
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.message(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Resolve a reader index against the current enumeration. Resolution and
/// use happen within one request, so ids cannot go stale in between.
async fn resolve_index(state: &AppState, index: usize) -> Result<String> {
    let readers = list_readers(state.service.lab()).await;
    readers
        .get(index)
        .map(|r| r.name.clone())
        .ok_or_else(|| Error::validation(format!("reader index {index} out of range")))
}

async fn get_readers(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let readers = list_readers(state.service.lab()).await;
    state.logs.debug(
        Category::Http,
        "readers enumerated",
        Some(json!({ "count": readers.len() })),
    );
    Ok(Json(json!({ "readers": readers })))
}

async fn get_card(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> ApiResult<Json<serde_json::Value>> {
    let reader = resolve_index(&state, index).await?;
    let card = state.service.identify(&reader).await?;
    state.logs.info(
        Category::Card,
        "card read",
        Some(json!({ "reader": reader, "uid": card.uid })),
    );
    Ok(Json(json!({ "card": card })))
}

#[derive(Debug, Deserialize)]
struct WriteCardBody {
    #[serde(rename = "dataType")]
    data_type: String,
    data: Option<String>,
    url: Option<String>,
}

async fn post_card(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<WriteCardBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let reader = resolve_index(&state, index).await?;
    let data_type: DataType = body.data_type.parse()?;
    let data = decode_write_data(data_type, body.data.as_deref(), body.url.as_deref())?;
    state
        .service
        .write(&reader, data_type, &data, body.url.as_deref())
        .await?;
    state.logs.info(
        Category::Card,
        "card written",
        Some(json!({ "reader": reader })),
    );
    Ok(Json(json!({ "success": true })))
}

async fn delete_card(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> ApiResult<Json<serde_json::Value>> {
    let reader = resolve_index(&state, index).await?;
    state.service.erase(&reader).await?;
    state.logs.info(
        Category::Card,
        "card erased",
        Some(json!({ "reader": reader })),
    );
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct LockBody {
    #[serde(default)]
    confirm: bool,
}

async fn post_lock(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<LockBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if !body.confirm {
        return Err(Error::validation(
            "locking is irreversible; pass confirm=true to proceed",
        )
        .into());
    }
    let reader = resolve_index(&state, index).await?;
    state.service.lock(&reader).await?;
    state.logs.warn(
        Category::Card,
        "card permanently locked",
        Some(json!({ "reader": reader })),
    );
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct PasswordBody {
    password: String,
    pack: Option<String>,
}

async fn post_password(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<PasswordBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let reader = resolve_index(&state, index).await?;
    let password = parse_password(&body.password)?;
    let pack = parse_pack(body.pack.as_deref())?;
    state.service.set_password(&reader, password, pack).await?;
    Ok(Json(json!({ "success": true })))
}

async fn delete_password(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<PasswordBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let reader = resolve_index(&state, index).await?;
    let password = parse_password(&body.password)?;
    state.service.clear_password(&reader, password).await?;
    Ok(Json(json!({ "success": true })))
}

async fn get_version() -> Json<serde_json::Value> {
    Json(json!(version_info()))
}

async fn get_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_supported_readers() -> Json<serde_json::Value> {
    Json(json!({ "readers": supported_readers() }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
    level: Option<String>,
    category: Option<String>,
}

async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let level = match query.level.as_deref() {
        Some(s) => Some(
            s.parse::<Level>()
                .map_err(|()| Error::validation(format!("unknown level: {s}")))?,
        ),
        None => None,
    };
    let category = match query.category.as_deref() {
        Some(s) => Some(
            s.parse::<Category>()
                .map_err(|()| Error::validation(format!("unknown category: {s}")))?,
        ),
        None => None,
    };
    let entries = state
        .logs
        .snapshot(query.limit.unwrap_or(0), level, category);
    Ok(Json(json!({
        "entries": entries,
        "stats": state.logs.stats(),
    })))
}

async fn delete_logs(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.logs.clear();
    Json(json!({ "success": true }))
}
