//! Management API under `/api/*`: account CRUD and lifecycle, token
//! discovery, Kiro device-code and social login flows, flow-record
//! inspection, and config export/import.
//!
//! Runs on the same listener as the client-facing protocol surface — unlike
//! the donor service's separate admin port, a local gateway has one trust
//! boundary (the operator's own machine).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use common::Secret;
use kiro_auth::account::now_ms;
use kiro_auth::{AccountRecord, AuthKind, CredentialEnvelope, CredentialStore, Refresher};
use kiro_pool::Selector;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::flow::FlowLog;

/// Maximum age of a pending device-code login before it's swept away.
const LOGIN_SESSION_EXPIRY_SECS: u64 = 600;

/// State of an in-progress Kiro device-code login, between `start` and `poll`.
struct PendingLogin {
    device_code: String,
    client_id: String,
    client_secret: Secret<String>,
    region: String,
    created_at: Instant,
}

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<CredentialStore>,
    pub selector: Arc<Selector>,
    pub refresher: Arc<Refresher>,
    pub flow_log: Arc<FlowLog>,
    pub http_client: reqwest::Client,
    pub started_at: Instant,
    pub config_path: PathBuf,
    pub token_discovery_paths: Vec<String>,
}

/// `~`-expand a configured discovery path against `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

#[derive(Clone, Default)]
struct LoginSessions(Arc<Mutex<HashMap<String, PendingLogin>>>);

pub fn build_admin_router(state: AdminState) -> Router {
    let logins = LoginSessions::default();

    Router::new()
        .route("/api/status", get(status))
        .route("/api/stats", get(stats))
        .route("/api/stats/detailed", get(stats_detailed))
        .route("/api/quota", get(quota))
        .route("/api/logs", get(logs))
        .route("/api/accounts", get(list_accounts))
        .route("/api/accounts/{id}", delete(delete_account))
        .route("/api/accounts/{id}/toggle", post(toggle_account))
        .route("/api/accounts/{id}/refresh", post(refresh_account))
        .route("/api/accounts/{id}/restore", post(restore_account))
        .route("/api/accounts/{id}/usage", get(account_usage))
        .route("/api/accounts/refresh-all", post(refresh_all))
        .route("/api/token/scan", post(token_scan))
        .route("/api/token/add-from-scan", post(token_add_from_scan))
        .route("/api/token/refresh-check", post(token_refresh_check))
        .route("/api/kiro/login/start", post(login_start))
        .route("/api/kiro/login/poll", post(login_poll))
        .route("/api/kiro/login/cancel", post(login_cancel))
        .route("/api/kiro/social/start", post(social_start))
        .route("/api/kiro/social/exchange", post(social_exchange))
        .route("/api/flows", get(list_flows).delete(clear_flows))
        .route("/api/config/export", get(config_export))
        .route("/api/config/import", post(config_import))
        .with_state((state, logins))
}

type AppState = (AdminState, LoginSessions);

fn json_ok(body: serde_json::Value) -> impl IntoResponse {
    (StatusCode::OK, axum::Json(body))
}

fn json_err(status: StatusCode, message: impl Into<String>) -> impl IntoResponse {
    (status, axum::Json(serde_json::json!({ "error": message.into() })))
}

/// GET /api/status — liveness plus pool health summary.
async fn status(State((state, _)): State<AppState>) -> impl IntoResponse {
    let health = state.selector.health().await;
    json_ok(serde_json::json!({
        "status": "running",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pool": health,
    }))
}

/// GET /api/stats — per-account request/error counters.
async fn stats(State((state, _)): State<AppState>) -> impl IntoResponse {
    let accounts = state.store.list().await;
    let total_requests: u64 = accounts.iter().map(|a| a.request_count).sum();
    let total_errors: u64 = accounts.iter().map(|a| a.error_count).sum();
    json_ok(serde_json::json!({
        "accounts": accounts.len(),
        "requests_total": total_requests,
        "errors_total": total_errors,
    }))
}

/// GET /api/stats/detailed — same as `stats` but broken out per account.
async fn stats_detailed(State((state, _)): State<AppState>) -> impl IntoResponse {
    let accounts = state.store.list().await;
    let detail: Vec<_> = accounts
        .iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "label": a.label,
                "status": a.health.label(),
                "request_count": a.request_count,
                "error_count": a.error_count,
                "in_flight_count": a.in_flight_count,
                "last_used_at_ms": a.last_used_at_ms,
            })
        })
        .collect();
    json_ok(serde_json::json!({ "accounts": detail }))
}

/// GET /api/quota — cooldown/disabled breakdown, the closest this gateway
/// gets to an upstream quota signal since Kiro exposes no quota API.
async fn quota(State((state, _)): State<AppState>) -> impl IntoResponse {
    json_ok(state.selector.health().await)
}

/// GET /api/logs — most recent flow records, newest first.
async fn logs(State((state, _)): State<AppState>) -> impl IntoResponse {
    json_ok(serde_json::json!({ "flows": state.flow_log.recent(200).await }))
}

/// GET /api/accounts — list every account, tokens never included.
async fn list_accounts(State((state, _)): State<AppState>) -> impl IntoResponse {
    let accounts = state.store.list().await;
    let out: Vec<_> = accounts
        .iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "label": a.label,
                "provenance": a.provenance,
                "enabled": a.enabled,
                "status": a.health.label(),
                "region": a.credential.region,
            })
        })
        .collect();
    json_ok(serde_json::json!({ "accounts": out }))
}

/// DELETE /api/accounts/{id}
async fn delete_account(State((state, _)): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let removed = state.store.remove(&id).await.unwrap_or(None);
    if removed.is_none() {
        return json_err(StatusCode::NOT_FOUND, format!("account {id} not found")).into_response();
    }
    info!(account_id = id, "account removed");
    json_ok(serde_json::json!({ "account_id": id, "status": "removed" })).into_response()
}

#[derive(Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

/// POST /api/accounts/{id}/toggle
async fn toggle_account(
    State((state, _)): State<AppState>,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<ToggleRequest>,
) -> impl IntoResponse {
    match state.store.set_enabled(&id, body.enabled).await {
        Ok(()) => json_ok(serde_json::json!({ "account_id": id, "enabled": body.enabled })).into_response(),
        Err(e) => json_err(StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

/// POST /api/accounts/{id}/refresh — force an immediate refresh, bypassing
/// the Token Refresher's expiry threshold check via `refresh_account`.
async fn refresh_account(State((state, _)): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.refresher.refresh_account(&id).await {
        Ok(()) => json_ok(serde_json::json!({ "account_id": id, "status": "refreshed" })).into_response(),
        Err(e) => json_err(StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

/// POST /api/accounts/{id}/restore — clear an unhealthy/cooldown account
/// back to active without waiting out its cooldown.
async fn restore_account(State((state, _)): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.mark_active(&id).await {
        Ok(()) => json_ok(serde_json::json!({ "account_id": id, "status": "active" })).into_response(),
        Err(e) => json_err(StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

/// GET /api/accounts/{id}/usage
async fn account_usage(State((state, _)): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get(&id).await {
        Some(a) => json_ok(serde_json::json!({
            "account_id": id,
            "request_count": a.request_count,
            "error_count": a.error_count,
            "in_flight_count": a.in_flight_count,
            "last_used_at_ms": a.last_used_at_ms,
        }))
        .into_response(),
        None => json_err(StatusCode::NOT_FOUND, format!("account {id} not found")).into_response(),
    }
}

/// POST /api/accounts/refresh-all
async fn refresh_all(State((state, _)): State<AppState>) -> impl IntoResponse {
    let results = state.refresher.refresh_all().await;
    let body: Vec<_> = results
        .into_iter()
        .map(|(id, r)| serde_json::json!({ "account_id": id, "ok": r.is_ok(), "error": r.err().map(|e| e.to_string()) }))
        .collect();
    json_ok(serde_json::json!({ "results": body }))
}

/// POST /api/token/scan — look for AWS SSO cache files under the
/// configured discovery paths, without importing anything yet.
async fn token_scan(State((state, _)): State<AppState>) -> impl IntoResponse {
    let mut found = Vec::new();
    for configured in &state.token_discovery_paths {
        let dir = expand_home(configured);
        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    found.push(entry.path().display().to_string());
                }
            }
        }
    }
    json_ok(serde_json::json!({ "discovered": found }))
}

#[derive(Deserialize)]
struct AddFromScanRequest {
    path: String,
    label: String,
}

#[derive(Deserialize)]
struct ScannedCacheFile {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expiresAt")]
    expires_at: String,
    region: Option<String>,
}

/// POST /api/token/add-from-scan — import one scanned AWS SSO cache file as
/// a new account. The cache format stores an RFC 3339 expiry, not epoch
/// millis, so it's converted on the way in.
async fn token_add_from_scan(
    State((state, _)): State<AppState>,
    axum::Json(body): axum::Json<AddFromScanRequest>,
) -> impl IntoResponse {
    let raw = match tokio::fs::read_to_string(&body.path).await {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, format!("reading {}: {e}", body.path)).into_response(),
    };
    let parsed: ScannedCacheFile = match serde_json::from_str(&raw) {
        Ok(p) => p,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, format!("parsing {}: {e}", body.path)).into_response(),
    };
    let expires_at = chrono::DateTime::parse_from_rfc3339(&parsed.expires_at)
        .map(|dt| dt.timestamp_millis().max(0) as u64)
        .unwrap_or_else(|_| now_ms());

    let id = format!("scanned-{}", uuid::Uuid::new_v4());
    let credential = CredentialEnvelope {
        access_token: parsed.access_token,
        refresh_token: None,
        expires_at,
        auth_kind: AuthKind::ScannedLocalCache,
        region: parsed.region.unwrap_or_else(|| "us-east-1".to_string()),
        profile_arn: None,
        client_id: None,
        client_secret: None,
    };
    match state.store.add(id.clone(), body.label, credential).await {
        Ok(()) => json_ok(serde_json::json!({ "account_id": id, "status": "added" })).into_response(),
        Err(e) => json_err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// POST /api/token/refresh-check — report which accounts are within the
/// refresh threshold without actually refreshing them.
async fn token_refresh_check(State((state, _)): State<AppState>) -> impl IntoResponse {
    let accounts = state.store.list().await;
    let now = now_ms();
    let due: Vec<_> = accounts
        .iter()
        .filter(|a| a.credential.expires_at <= now + kiro_auth::constants::TOKEN_REFRESH_THRESHOLD_SECS * 1000)
        .map(|a| a.id.clone())
        .collect();
    json_ok(serde_json::json!({ "due_for_refresh": due }))
}

#[derive(Deserialize)]
struct LoginStartRequest {
    #[serde(default)]
    region: Option<String>,
}

/// Registers an OIDC client and starts a device authorization flow,
/// recording the pending session under a fresh `session_id`. Shared by the
/// device-code and social login entry points — the two differ only in
/// which `AuthKind` the completed account is tagged with.
async fn start_device_flow(state: &AdminState, logins: &LoginSessions, region: String) -> impl IntoResponse {
    let register_url = kiro_auth::constants::aws_sso_oidc_register_client_url(&region);
    let register_resp = match state
        .http_client
        .post(&register_url)
        .json(&serde_json::json!({ "clientName": "kiro-gateway", "clientType": "public" }))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_GATEWAY, format!("client registration failed: {e}")).into_response(),
    };
    let register_body: serde_json::Value = match register_resp.json().await {
        Ok(v) => v,
        Err(e) => return json_err(StatusCode::BAD_GATEWAY, format!("invalid registration response: {e}")).into_response(),
    };
    let client_id = register_body["clientId"].as_str().unwrap_or_default().to_string();
    let client_secret = register_body["clientSecret"].as_str().unwrap_or_default().to_string();

    let device_url = kiro_auth::constants::aws_sso_oidc_device_authorization_url(&region);
    let device_resp = match state
        .http_client
        .post(&device_url)
        .json(&serde_json::json!({ "clientId": client_id, "clientSecret": client_secret }))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_GATEWAY, format!("device authorization failed: {e}")).into_response(),
    };
    let device_body: serde_json::Value = match device_resp.json().await {
        Ok(v) => v,
        Err(e) => return json_err(StatusCode::BAD_GATEWAY, format!("invalid device authorization response: {e}")).into_response(),
    };

    let session_id = format!("login-{}", now_ms());
    let device_code = device_body["deviceCode"].as_str().unwrap_or_default().to_string();
    {
        let mut sessions = logins.0.lock().await;
        sessions.retain(|_, s| s.created_at.elapsed().as_secs() < LOGIN_SESSION_EXPIRY_SECS);
        sessions.insert(
            session_id.clone(),
            PendingLogin {
                device_code,
                client_id,
                client_secret: Secret::new(client_secret),
                region,
                created_at: Instant::now(),
            },
        );
    }

    json_ok(serde_json::json!({
        "session_id": session_id,
        "verification_uri": device_body["verificationUri"],
        "user_code": device_body["userCode"],
        "interval_secs": device_body.get("interval").and_then(|v| v.as_u64()).unwrap_or(5),
    }))
    .into_response()
}

/// POST /api/kiro/login/start — register an OIDC client and start a device
/// authorization flow, returning the `verification_uri`/`user_code` pair
/// the operator completes in a browser.
async fn login_start(
    State((state, logins)): State<AppState>,
    axum::Json(body): axum::Json<LoginStartRequest>,
) -> impl IntoResponse {
    let region = body.region.unwrap_or_else(|| "us-east-1".to_string());
    start_device_flow(&state, &logins, region).await.into_response()
}

#[derive(Deserialize)]
struct LoginPollRequest {
    session_id: String,
    label: String,
}

/// Attempts one token exchange against a pending device code. Shared by
/// the device-code poll and the social exchange endpoints; they differ
/// only in the `AuthKind` stamped on the resulting account.
async fn poll_device_token(
    state: &AdminState,
    logins: &LoginSessions,
    session_id: &str,
    label: String,
    auth_kind: AuthKind,
) -> impl IntoResponse {
    let pending = {
        let sessions = logins.0.lock().await;
        match sessions.get(session_id) {
            Some(p) => (p.device_code.clone(), p.client_id.clone(), p.client_secret.expose().clone(), p.region.clone()),
            None => return json_err(StatusCode::NOT_FOUND, "no pending login for this session_id").into_response(),
        }
    };
    let (device_code, client_id, client_secret, region) = pending;

    let token_url = kiro_auth::constants::aws_sso_oidc_url(&region);
    let resp = match state
        .http_client
        .post(&token_url)
        .json(&serde_json::json!({
            "grantType": "urn:ietf:params:oauth:grant-type:device_code",
            "deviceCode": device_code,
            "clientId": client_id,
            "clientSecret": client_secret,
        }))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_GATEWAY, format!("token poll failed: {e}")).into_response(),
    };

    if resp.status().as_u16() == 400 {
        // Authorization still pending — caller should poll again.
        return json_ok(serde_json::json!({ "status": "pending" })).into_response();
    }
    if !resp.status().is_success() {
        let body_text = resp.text().await.unwrap_or_default();
        return json_err(StatusCode::BAD_GATEWAY, format!("token exchange rejected: {body_text}")).into_response();
    }

    let token_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => return json_err(StatusCode::BAD_GATEWAY, format!("invalid token response: {e}")).into_response(),
    };
    let access_token = token_body["accessToken"].as_str().unwrap_or_default().to_string();
    let refresh_token = token_body["refreshToken"].as_str().map(|s| s.to_string());
    let expires_in = token_body.get("expiresIn").and_then(|v| v.as_u64()).unwrap_or(3600);

    let id = format!("aws-device-{}", now_ms());
    let credential = CredentialEnvelope {
        access_token,
        refresh_token,
        expires_at: now_ms() + expires_in * 1000,
        auth_kind,
        region,
        profile_arn: None,
        client_id: Some(client_id),
        client_secret: Some(client_secret),
    };
    if let Err(e) = state.store.add(id.clone(), label, credential).await {
        return json_err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    logins.0.lock().await.remove(session_id);
    info!(account_id = id, "device-code login completed");
    json_ok(serde_json::json!({ "status": "complete", "account_id": id })).into_response()
}

/// POST /api/kiro/login/poll — attempt one token exchange against the
/// pending device code; the caller re-polls until this returns `complete`.
async fn login_poll(
    State((state, logins)): State<AppState>,
    axum::Json(body): axum::Json<LoginPollRequest>,
) -> impl IntoResponse {
    poll_device_token(&state, &logins, &body.session_id, body.label, AuthKind::AwsDeviceCode)
        .await
        .into_response()
}

#[derive(Deserialize)]
struct LoginCancelRequest {
    session_id: String,
}

/// POST /api/kiro/login/cancel
async fn login_cancel(
    State((_, logins)): State<AppState>,
    axum::Json(body): axum::Json<LoginCancelRequest>,
) -> impl IntoResponse {
    let removed = logins.0.lock().await.remove(&body.session_id).is_some();
    json_ok(serde_json::json!({ "cancelled": removed }))
}

#[derive(Deserialize)]
struct SocialStartRequest {
    provider: String,
    #[serde(default)]
    region: Option<String>,
}

/// POST /api/kiro/social/start — social login shares the device-code
/// session bookkeeping; `provider` is only consulted again at exchange
/// time, once the session has actually produced tokens.
async fn social_start(
    State((state, logins)): State<AppState>,
    axum::Json(body): axum::Json<SocialStartRequest>,
) -> impl IntoResponse {
    if !matches!(body.provider.as_str(), "google" | "github") {
        return json_err(StatusCode::BAD_REQUEST, format!("unknown social provider: {}", body.provider)).into_response();
    }
    let region = body.region.unwrap_or_else(|| "us-east-1".to_string());
    start_device_flow(&state, &logins, region).await.into_response()
}

#[derive(Deserialize)]
struct SocialExchangeRequest {
    session_id: String,
    provider: String,
    label: String,
}

/// POST /api/kiro/social/exchange — identical token exchange to device-code
/// login, but tags the resulting account with the social provider's
/// `auth_kind` so the Token Refresher dispatches it through AWS SSO OIDC.
async fn social_exchange(
    State((state, logins)): State<AppState>,
    axum::Json(body): axum::Json<SocialExchangeRequest>,
) -> impl IntoResponse {
    let auth_kind = match body.provider.as_str() {
        "google" => AuthKind::SocialGoogle,
        "github" => AuthKind::SocialGithub,
        other => return json_err(StatusCode::BAD_REQUEST, format!("unknown social provider: {other}")).into_response(),
    };
    poll_device_token(&state, &logins, &body.session_id, body.label, auth_kind)
        .await
        .into_response()
}

/// GET /api/flows
async fn list_flows(State((state, _)): State<AppState>) -> impl IntoResponse {
    json_ok(serde_json::json!({ "flows": state.flow_log.recent(200).await }))
}

/// DELETE /api/flows
async fn clear_flows(State((state, _)): State<AppState>) -> impl IntoResponse {
    state.flow_log.clear().await;
    json_ok(serde_json::json!({ "status": "cleared" }))
}

/// GET /api/config/export — accounts plus governor config, same shape as
/// the on-disk document.
async fn config_export(State((state, _)): State<AppState>) -> impl IntoResponse {
    let accounts = state.store.export_snapshot().await;
    json_ok(serde_json::json!({ "schema_version": 1, "accounts": accounts }))
}

#[derive(Deserialize)]
struct ConfigImportRequest {
    accounts: Vec<AccountRecord>,
}

/// POST /api/config/import — replace the account set wholesale.
async fn config_import(
    State((state, _)): State<AppState>,
    axum::Json(body): axum::Json<ConfigImportRequest>,
) -> impl IntoResponse {
    match state.store.import_snapshot(body.accounts).await {
        Ok(()) => json_ok(serde_json::json!({ "status": "imported" })).into_response(),
        Err(e) => json_err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn envelope() -> CredentialEnvelope {
        CredentialEnvelope {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: 4_102_444_800_000,
            auth_kind: AuthKind::AwsDeviceCode,
            region: "us-east-1".into(),
            profile_arn: None,
            client_id: None,
            client_secret: None,
        }
    }

    async fn test_state(dir: &tempfile::TempDir) -> AdminState {
        let store = Arc::new(CredentialStore::from_records(dir.path().join("accounts.json"), vec![]));
        let selector = Arc::new(Selector::new(store.clone()));
        let http_client = reqwest::Client::new();
        let refresher = Arc::new(Refresher::new(store.clone(), http_client.clone()));
        AdminState {
            store,
            selector,
            refresher,
            flow_log: Arc::new(FlowLog::new()),
            http_client,
            started_at: Instant::now(),
            config_path: dir.path().join("config.json"),
            token_discovery_paths: vec!["~/.aws/sso/cache".to_string()],
        }
    }

    #[tokio::test]
    async fn list_accounts_is_empty_initially() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let app = build_admin_router(state);

        let response = app
            .oneshot(Request::builder().uri("/api/accounts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["accounts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn delete_nonexistent_account_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let app = build_admin_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/accounts/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggle_account_disables_and_enables() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        state.store.add("acct-1".into(), "A".into(), envelope()).await.unwrap();
        let app = build_admin_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/accounts/acct-1/toggle")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::json!({ "enabled": false }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_running() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let app = build_admin_router(state);

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "running");
    }

    #[tokio::test]
    async fn config_export_round_trips_account_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        state.store.add("acct-1".into(), "A".into(), envelope()).await.unwrap();
        let app = build_admin_router(state);

        let response = app
            .oneshot(Request::builder().uri("/api/config/export").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["accounts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flows_round_trip_through_log_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        state
            .flow_log
            .push(crate::flow::FlowRecord {
                id: "f1".into(),
                protocol: "openai".into(),
                account_id: None,
                upstream_model: "claude-sonnet-4".into(),
                status: 200,
                error_kind: None,
                duration_ms: 5,
                recorded_at_ms: 0,
            })
            .await;
        let app = build_admin_router(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/flows").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["flows"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(Request::builder().method("DELETE").uri("/api/flows").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
