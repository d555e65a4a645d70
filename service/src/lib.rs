use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod api_error;
pub mod config;
pub mod notifications;
pub mod observability;
pub mod registry;

use crate::api_error::{
    ApiErrorTuple, bad_request, internal_error, map_store_error, not_found, not_found_with_key,
};
use crate::config::Config;
use crate::notifications::{Notifier, WebhookNotifier};
use crate::observability::{AuditEvent, Observability};
use crate::registry::{
    AlertPreference, CreateSponsoredRequestInput, NotificationChannel, RegistryStore,
    RegistryStoreError, RequestDirection, RequestStatus, sponsored_request_key,
};

const SERVICE_NAME: &str = "coincast-service";
const FID_HEADER: &str = "x-farcaster-fid";
const ALERT_NOTIFICATION_TITLE: &str = "Coincast Alert";
const SPONSORED_REQUEST_NOTIFICATION_TITLE: &str = "New Sponsored Post Request";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    registry: RegistryStore,
    notifier: Arc<dyn Notifier>,
    observability: Observability,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    store: String,
}

/// Fids arrive as JSON numbers from some clients and strings from others;
/// both normalize to the trimmed string form used in store keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FidValue {
    Text(String),
    Number(i64),
}

impl FidValue {
    fn into_string(self) -> String {
        match self {
            Self::Text(value) => value.trim().to_string(),
            Self::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetAlertPayload {
    enabled: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    token_address: Option<String>,
    #[serde(default)]
    token_name: Option<String>,
    #[serde(default)]
    market_cap_target: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearAlertPayload {
    #[serde(default)]
    token_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertStatusQuery {
    #[serde(default)]
    token_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSponsoredRequestPayload {
    #[serde(default)]
    target_fid: Option<FidValue>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    requester_username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SponsoredRequestListQuery {
    #[serde(default)]
    fid: Option<String>,
    #[serde(default)]
    direction: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondPayload {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    fid: Option<FidValue>,
    #[serde(default)]
    cast_hash: Option<String>,
}

pub fn build_router(config: Config) -> Router {
    let registry = RegistryStore::from_config(&config);
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::from_config(&config));
    build_router_with_parts(config, registry, notifier, Observability::default())
}

/// Router assembly with every collaborator injectable, used directly by tests
/// to substitute the store and the notifier.
pub fn build_router_with_parts(
    config: Config,
    registry: RegistryStore,
    notifier: Arc<dyn Notifier>,
    observability: Observability,
) -> Router {
    let request_timeout = Duration::from_secs(config.request_timeout_seconds);
    let state = AppState {
        config: Arc::new(config),
        registry,
        notifier,
        observability,
        started_at: SystemTime::now(),
    };

    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .route(
            "/market-cap-alert",
            get(list_alerts).post(set_alert).delete(clear_alert),
        )
        .route(
            "/market-cap-alert/status",
            get(alert_status).delete(clear_alert),
        )
        .route("/sponsored-content", post(create_sponsored_request))
        .route("/sponsored-content/requests", get(list_sponsored_requests))
        .route(
            "/sponsored-content/request/:request_id",
            get(show_sponsored_request),
        )
        .route(
            "/sponsored-content/respond",
            post(respond_to_sponsored_request),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

async fn readiness(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let store = match state.config.store_path.as_ref() {
        Some(path) => path.display().to_string(),
        None => "memory".to_string(),
    };

    Json(ReadinessResponse {
        status: "ready",
        store,
    })
}

async fn set_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SetAlertPayload>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);
    let fid = fid_from_headers(&headers).ok_or_else(|| bad_request("FID is required"))?;

    let token_address = payload
        .token_address
        .and_then(non_empty)
        .ok_or_else(|| bad_request("Token address is required"))?;
    let market_cap_target = payload.market_cap_target.and_then(non_empty);
    if payload.enabled && market_cap_target.is_none() {
        return Err(bad_request(
            "Marketcap Target is required when enabling alerts",
        ));
    }
    let token_name = payload.token_name.and_then(non_empty).unwrap_or_default();

    let mut preference = AlertPreference {
        enabled: payload.enabled,
        token: None,
        url: None,
        token_address: token_address.clone(),
        token_name: token_name.clone(),
        market_cap_target: market_cap_target.unwrap_or_default(),
    };

    // A channel supplied alongside an enabled alert also registers the user's
    // notification details for later sponsored-request delivery.
    let channel = match (
        payload.token.and_then(non_empty),
        payload.url.and_then(non_empty),
    ) {
        (Some(token), Some(url)) if payload.enabled => Some(NotificationChannel { token, url }),
        _ => None,
    };

    if let Some(channel) = &channel {
        preference.token = Some(channel.token.clone());
        preference.url = Some(channel.url.clone());
        state
            .registry
            .set_notification_channel(&fid, channel.clone())
            .await
            .map_err(map_store_error)?;
    }

    let stored = state
        .registry
        .set_alert(&fid, preference)
        .await
        .map_err(map_store_error)?;

    if let (Some(token), Some(url)) = (stored.token.as_deref(), stored.url.as_deref()) {
        let body = if stored.enabled {
            format!("${token_name} alert has been set")
        } else {
            format!("${token_name} alert has been disabled")
        };
        let delivered = state
            .notifier
            .send(token, url, ALERT_NOTIFICATION_TITLE, &body)
            .await;
        if !delivered {
            tracing::warn!(
                target: "coincast.alerts",
                fid = %fid,
                token_address = %token_address,
                "alert confirmation notification failed",
            );
        }
    }

    state.observability.audit(
        AuditEvent::new("alert.set", request_id.clone())
            .with_fid(fid)
            .with_attribute("token_address", token_address)
            .with_attribute("enabled", stored.enabled.to_string()),
    );
    state.observability.increment_counter("alert.set", &request_id);

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "preference": stored })),
    ))
}

async fn clear_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ClearAlertPayload>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);
    let fid = fid_from_headers(&headers).ok_or_else(|| bad_request("FID is required"))?;
    let token_address = payload
        .token_address
        .and_then(non_empty)
        .ok_or_else(|| bad_request("Token address is required"))?;

    // Tell the user first; the record is deleted whether or not delivery
    // worked.
    if let Some(existing) = state.registry.alert(&fid, &token_address).await {
        if let (Some(token), Some(url)) = (existing.token.as_deref(), existing.url.as_deref()) {
            let body = format!("${} alert has been disabled", existing.token_name);
            let delivered = state
                .notifier
                .send(token, url, ALERT_NOTIFICATION_TITLE, &body)
                .await;
            if !delivered {
                tracing::warn!(
                    target: "coincast.alerts",
                    fid = %fid,
                    token_address = %token_address,
                    "alert disabled notification failed",
                );
            }
        }
    }

    state
        .registry
        .remove_alert(&fid, &token_address)
        .await
        .map_err(map_store_error)?;

    state.observability.audit(
        AuditEvent::new("alert.cleared", request_id.clone())
            .with_fid(fid)
            .with_attribute("token_address", token_address),
    );
    state
        .observability
        .increment_counter("alert.cleared", &request_id);

    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

/// Always answers 200: absent records, missing inputs, and store trouble all
/// degrade to the disabled shape.
async fn alert_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AlertStatusQuery>,
) -> Json<serde_json::Value> {
    let Some(fid) = fid_from_headers(&headers) else {
        return Json(json!({ "enabled": false, "error": "FID is required" }));
    };
    let Some(token_address) = query.token_address.and_then(non_empty) else {
        return Json(json!({ "enabled": false, "error": "tokenAddress is required" }));
    };

    match state.registry.alert(&fid, &token_address).await {
        Some(alert) => {
            let value = serde_json::to_value(&alert).unwrap_or_else(|error| {
                tracing::warn!(
                    target: "coincast.alerts",
                    fid = %fid,
                    error = %error,
                    "failed to encode alert preference",
                );
                json!({ "enabled": false })
            });
            Json(value)
        }
        None => Json(json!({ "enabled": false })),
    }
}

async fn list_alerts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let fid = fid_from_headers(&headers).ok_or_else(|| bad_request("FID is required"))?;

    let alerts = state.registry.enabled_alerts(&fid).await;
    Ok((StatusCode::OK, Json(json!({ "alerts": alerts }))))
}

async fn create_sponsored_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSponsoredRequestPayload>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);

    let target_fid = payload
        .target_fid
        .map(FidValue::into_string)
        .and_then(non_empty);
    let content = payload.content.and_then(non_empty);
    let amount = payload.amount.and_then(non_empty);
    let requester_username = payload.requester_username.and_then(non_empty);
    let (Some(target_fid), Some(content), Some(amount), Some(requester_username)) =
        (target_fid, content, amount, requester_username)
    else {
        return Err(bad_request("Missing required fields"));
    };

    let requester_fid =
        fid_from_headers(&headers).ok_or_else(|| bad_request("Requester FID is required"))?;

    let record = state
        .registry
        .create_sponsored_request(CreateSponsoredRequestInput {
            target_fid,
            requester_fid: requester_fid.clone(),
            content,
            amount,
            requester_username,
        })
        .await
        .map_err(map_store_error)?;

    // Delivery is a required side effect on this path: no channel on record is
    // a 404, a failed send is a 500. The stored record remains either way,
    // matching the original flow.
    let Some(channel) = state.registry.notification_channel(&record.target_fid).await else {
        return Err(not_found("Target user not found"));
    };

    let body = format!(
        "{} wants to sponsor a post from you for {} USDC",
        record.requester_username, record.amount
    );
    let delivered = state
        .notifier
        .send(
            &channel.token,
            &channel.url,
            SPONSORED_REQUEST_NOTIFICATION_TITLE,
            &body,
        )
        .await;
    if !delivered {
        return Err(internal_error("Failed to send notification"));
    }

    state.observability.audit(
        AuditEvent::new("sponsored.request_created", request_id.clone())
            .with_fid(requester_fid)
            .with_attribute("request_id", record.request_id.clone())
            .with_attribute("target_fid", record.target_fid.clone()),
    );
    state
        .observability
        .increment_counter("sponsored.request_created", &request_id);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Sponsored post request sent successfully",
            "data": {
                "requestId": record.request_id,
                "targetFid": record.target_fid,
                "content": record.content,
                "amount": record.amount,
                "requesterUsername": record.requester_username,
            },
        })),
    ))
}

async fn list_sponsored_requests(
    State(state): State<AppState>,
    Query(query): Query<SponsoredRequestListQuery>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let fid = query
        .fid
        .and_then(non_empty)
        .ok_or_else(|| bad_request("FID is required"))?;

    let direction = match query.direction.as_deref() {
        None | Some("incoming") => RequestDirection::Incoming,
        Some("sent") => RequestDirection::Sent,
        Some(_) => return Err(bad_request("direction must be incoming or sent")),
    };

    let requests = state.registry.requests_for_user(&fid, direction).await;
    Ok((StatusCode::OK, Json(json!({ "requests": requests }))))
}

async fn show_sponsored_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let record = state
        .registry
        .sponsored_request(&request_id)
        .await
        .ok_or_else(|| not_found("Request not found"))?;

    Ok((StatusCode::OK, Json(record)))
}

async fn respond_to_sponsored_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RespondPayload>,
) -> Result<impl IntoResponse, ApiErrorTuple> {
    let request_id = request_id(&headers);

    let sponsored_request_id = payload
        .request_id
        .and_then(non_empty)
        .ok_or_else(|| bad_request("requestId is required"))?;
    let action = payload
        .action
        .and_then(non_empty)
        .ok_or_else(|| bad_request("action is required"))?;
    let fid = payload
        .fid
        .map(FidValue::into_string)
        .and_then(non_empty)
        .ok_or_else(|| bad_request("fid is required"))?;

    let status = match action.as_str() {
        "accept" => RequestStatus::Posted,
        "reject" => RequestStatus::Rejected,
        _ => return Err(bad_request("action must be accept or reject")),
    };

    let updated = state
        .registry
        .respond_to_request(&sponsored_request_id, &fid, status, payload.cast_hash)
        .await
        .map_err(|error| match error {
            RegistryStoreError::NotFound => not_found_with_key(
                "Request not found",
                sponsored_request_key(&sponsored_request_id),
            ),
            other => map_store_error(other),
        })?;

    state.observability.audit(
        AuditEvent::new("sponsored.request_responded", request_id.clone())
            .with_fid(fid)
            .with_attribute("request_id", sponsored_request_id.clone())
            .with_attribute("status", updated.status.as_str()),
    );
    state
        .observability
        .increment_counter("sponsored.request_responded", &request_id);

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Request updated successfully",
            "updatedStatus": updated.status,
            "key": sponsored_request_key(&sponsored_request_id),
        })),
    ))
}

fn request_id(headers: &HeaderMap) -> String {
    header_string(headers, "x-request-id")
        .unwrap_or_else(|| format!("req_{}", uuid::Uuid::new_v4().simple()))
}

fn fid_from_headers(headers: &HeaderMap) -> Option<String> {
    header_string(headers, FID_HEADER)
}

fn header_string(headers: &HeaderMap, key: &str) -> Option<String> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
