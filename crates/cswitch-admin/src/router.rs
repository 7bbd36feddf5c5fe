use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;

use cswitch_common::ClientKind;
use cswitch_core::BlacklistTracker;
use cswitch_provider_core::{GeminiProvider, Provider, ProviderId, ProviderStore, RegistryError};
use cswitch_storage::{BlacklistSettings, StorageError};

const DEFAULT_LOG_LIMIT: u64 = 100;
const MAX_LOG_LIMIT: u64 = 1000;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<ProviderStore>,
    pub tracker: Arc<BlacklistTracker>,
    pub admin_key: Arc<str>,
}

/// Operator surface. Mount it under `/admin`; every route requires the key.
pub fn router(
    registry: Arc<ProviderStore>,
    tracker: Arc<BlacklistTracker>,
    admin_key: impl Into<Arc<str>>,
) -> Router {
    let state = AdminState {
        registry,
        tracker,
        admin_key: admin_key.into(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/providers/{kind}", get(list_providers).put(save_providers))
        .route("/providers/{kind}/{id}/duplicate", post(duplicate_provider))
        .route("/blacklist/{platform}", get(blacklist_status))
        .route("/blacklist/{platform}/{provider}/unblock", post(unblock))
        .route("/blacklist/{platform}/{provider}/reset-level", post(reset_level))
        .route(
            "/settings/blacklist",
            get(get_blacklist_settings).put(put_blacklist_settings),
        )
        .route("/logs", get(recent_logs))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = extract_admin_key(&headers, req.uri()).ok_or(StatusCode::UNAUTHORIZED)?;
    if key != *state.admin_key {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap, uri: &axum::http::Uri) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(auth) = value.to_str()
    {
        let auth = auth.trim();
        let prefix = "Bearer ";
        if auth.len() > prefix.len() && auth[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = auth[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let query = uri.query()?;
    let parsed: std::collections::HashMap<String, String> =
        serde_urlencoded::from_str(query).ok()?;
    let key = parsed.get("admin_key")?.trim();
    if key.is_empty() {
        return None;
    }
    Some(key.to_string())
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn parse_kind(raw: &str) -> Result<ClientKind, Response> {
    raw.parse::<ClientKind>()
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.to_string()))
}

fn registry_error(err: RegistryError) -> Response {
    match err {
        RegistryError::Invalid(report) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "error": "provider configuration rejected",
                "report": report,
            })),
        )
            .into_response(),
        RegistryError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, format!("no provider with id {id}"))
        }
        RegistryError::UnsupportedKind(kind) => json_error(
            StatusCode::BAD_REQUEST,
            format!("operation not supported for {kind}"),
        ),
        other => {
            tracing::warn!(event = "admin.registry_failed", error = %other);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn db_error(err: impl std::fmt::Display) -> Response {
    tracing::warn!(event = "admin.storage_failed", error = %err);
    json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

async fn health(State(state): State<AdminState>) -> Response {
    match state.tracker.storage().health().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
        Err(err) => {
            tracing::warn!(event = "admin.health_failed", error = %err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "ok": false, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn list_providers(State(state): State<AdminState>, Path(kind): Path<String>) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let listed = match kind {
        ClientKind::Gemini => state
            .registry
            .load_gemini()
            .await
            .map(|providers| serde_json::json!({ "providers": providers })),
        _ => state
            .registry
            .load(kind)
            .await
            .map(|providers| serde_json::json!({ "providers": providers })),
    };
    match listed {
        Ok(body) => Json(body).into_response(),
        Err(err) => registry_error(err),
    }
}

async fn save_providers(
    State(state): State<AdminState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    let saved = match kind {
        ClientKind::Gemini => match serde_json::from_slice::<Vec<GeminiProvider>>(&body) {
            Ok(providers) => state.registry.save_gemini(&providers).await,
            Err(err) => return json_error(StatusCode::BAD_REQUEST, err.to_string()),
        },
        _ => match serde_json::from_slice::<Vec<Provider>>(&body) {
            Ok(providers) => state.registry.save(kind, &providers).await,
            Err(err) => return json_error(StatusCode::BAD_REQUEST, err.to_string()),
        },
    };
    match saved {
        Ok(()) => {
            tracing::info!(event = "admin.providers_saved", kind = %kind);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => registry_error(err),
    }
}

async fn duplicate_provider(
    State(state): State<AdminState>,
    Path((kind, id)): Path<(String, ProviderId)>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    match state.registry.duplicate(kind, id).await {
        Ok(cloned) => {
            tracing::info!(event = "admin.provider_duplicated", kind = %kind, source = id, id = cloned.id);
            (StatusCode::CREATED, Json(cloned)).into_response()
        }
        Err(err) => registry_error(err),
    }
}

async fn blacklist_status(
    State(state): State<AdminState>,
    Path(platform): Path<String>,
) -> Response {
    let kind = match parse_kind(&platform) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    match state.tracker.status(kind.as_str()).await {
        Ok(status) => Json(serde_json::json!({ "providers": status })).into_response(),
        Err(err) => db_error(err),
    }
}

async fn unblock(
    State(state): State<AdminState>,
    Path((platform, provider)): Path<(String, String)>,
) -> Response {
    let kind = match parse_kind(&platform) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    match state
        .tracker
        .manual_unblock_and_reset(kind.as_str(), &provider)
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(
            StatusCode::NOT_FOUND,
            format!("no blacklist record for {provider}"),
        ),
        Err(err) => db_error(err),
    }
}

async fn reset_level(
    State(state): State<AdminState>,
    Path((platform, provider)): Path<(String, String)>,
) -> Response {
    let kind = match parse_kind(&platform) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };
    match state.tracker.manual_reset_level(kind.as_str(), &provider).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(
            StatusCode::NOT_FOUND,
            format!("no blacklist record for {provider}"),
        ),
        Err(err) => db_error(err),
    }
}

async fn get_blacklist_settings(State(state): State<AdminState>) -> Response {
    match state.tracker.storage().load_blacklist_settings().await {
        Ok(settings) => Json(settings).into_response(),
        Err(err) => db_error(err),
    }
}

async fn put_blacklist_settings(
    State(state): State<AdminState>,
    Json(settings): Json<BlacklistSettings>,
) -> Response {
    match state.tracker.storage().save_blacklist_settings(&settings).await {
        Ok(()) => {
            tracing::info!(
                event = "admin.blacklist_settings_saved",
                enabled = settings.enabled,
                failure_threshold = settings.failure_threshold,
                duration_minutes = settings.duration_minutes,
                level_blacklist = settings.level_config.enable_level_blacklist,
            );
            Json(settings).into_response()
        }
        Err(StorageError::Setting(err)) => json_error(StatusCode::BAD_REQUEST, err.to_string()),
        Err(err) => db_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<u64>,
}

async fn recent_logs(State(state): State<AdminState>, Query(query): Query<LogsQuery>) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    match state.tracker.storage().recent_request_logs(limit).await {
        Ok(entries) => Json(serde_json::json!({ "logs": entries })).into_response(),
        Err(err) => db_error(err),
    }
}
