use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use klaxon_core::alert::Alert;
use klaxon_core::incident::Incident;
use klaxon_core::schedule::OnCall;
use klaxon_ports::types::IngestReport;

use crate::error::ApiError;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/{key}", post(receive_webhook))
        .route("/webhooks/{key}/{vendor}", post(receive_vendor_webhook))
        .route("/incidents/{id}", get(get_incident))
        .route("/incidents/{id}/acknowledge", post(acknowledge_incident))
        .route("/incidents/{id}/resolve", post(resolve_incident))
        .route("/alerts/{id}", get(get_alert))
        .route("/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/alerts/{id}/resolve", post(resolve_alert))
        .route("/schedules/{id}/on-call", get(who_is_on_call))
        .route("/on-call", get(who_is_on_call_many))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct Accepted {
    status: &'static str,
    #[serde(flatten)]
    report: IngestReport,
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    accept(&state, &key, None, &headers, &body).await
}

async fn receive_vendor_webhook(
    State(state): State<AppState>,
    Path((key, vendor)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    accept(&state, &key, Some(&vendor), &headers, &body).await
}

async fn accept(
    state: &AppState,
    key: &str,
    vendor: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let report = state
        .receiver
        .receive(key, vendor, body, &header_map(headers))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            status: "accepted",
            report,
        }),
    ))
}

/// Header names lowercased; values that are not visible ASCII are dropped.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorBody {
    user_id: Option<String>,
}

/// The acting user from an optional JSON body.
fn actor(body: &[u8]) -> Result<Option<String>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let parsed: ActorBody =
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(parsed.user_id.filter(|id| !id.trim().is_empty()))
}

fn required_actor(body: &[u8]) -> Result<String, ApiError> {
    actor(body)?.ok_or_else(|| ApiError::BadRequest("userId is required".to_string()))
}

#[derive(Debug, Serialize)]
struct IncidentView {
    incident: Incident,
    alerts: Vec<Alert>,
}

async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IncidentView>, ApiError> {
    let (incident, alerts) = state.incidents.get_incident(&id).await?;
    Ok(Json(IncidentView { incident, alerts }))
}

async fn acknowledge_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Incident>, ApiError> {
    let user_id = required_actor(&body)?;
    Ok(Json(state.incidents.acknowledge(&id, &user_id).await?))
}

async fn resolve_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Incident>, ApiError> {
    let user_id = required_actor(&body)?;
    Ok(Json(state.incidents.resolve(&id, &user_id).await?))
}

async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Alert>, ApiError> {
    Ok(Json(state.alerts.get_alert(&id).await?))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Alert>, ApiError> {
    let user_id = required_actor(&body)?;
    Ok(Json(state.alerts.acknowledge(&id, &user_id).await?))
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Alert>, ApiError> {
    let resolved_by = actor(&body)?;
    Ok(Json(state.alerts.resolve(&id, resolved_by.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
struct OnCallQuery {
    at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OnCallView {
    schedule_id: String,
    at: DateTime<Utc>,
    on_call: Option<OnCall>,
}

async fn who_is_on_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OnCallQuery>,
) -> Result<Json<OnCallView>, ApiError> {
    let at = query.at.unwrap_or_else(Utc::now);
    let on_call = state.oncall.who_is_on_call(&id, at).await?;
    Ok(Json(OnCallView {
        schedule_id: id,
        at,
        on_call,
    }))
}

#[derive(Debug, Deserialize)]
struct ManyOnCallQuery {
    /// Comma-separated schedule ids.
    schedules: String,
    at: Option<DateTime<Utc>>,
}

async fn who_is_on_call_many(
    State(state): State<AppState>,
    Query(query): Query<ManyOnCallQuery>,
) -> Result<Json<Vec<OnCallView>>, ApiError> {
    let ids: Vec<String> = query
        .schedules
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(ApiError::BadRequest("schedules is required".to_string()));
    }
    let at = query.at.unwrap_or_else(Utc::now);
    let views = state
        .oncall
        .who_is_on_call_many(&ids, at)
        .await?
        .into_iter()
        .map(|(schedule_id, on_call)| OnCallView {
            schedule_id,
            at,
            on_call,
        })
        .collect();
    Ok(Json(views))
}
