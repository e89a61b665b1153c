//! Settings API: credentials, default hostname, run-on-startup.
//!
//! - `POST /api/change-password` — `{currentPassword, newPassword}`
//! - `POST /api/change-username` — `{newUsername, password}`
//! - `POST /api/change-hostname` — `{hostname}`
//! - `POST /api/startup`         — `{enabled}`

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::payload;
use crate::credentials;
use crate::error::GatewayError;
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeUsernameRequest {
    #[serde(default)]
    pub new_username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangeHostnameRequest {
    #[serde(default)]
    pub hostname: String,
}

#[derive(Deserialize)]
pub struct StartupRequest {
    pub enabled: bool,
}

/// `POST /api/change-password`.
pub async fn change_password(
    State(state): State<AppState>,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let req = payload(body)?;
    if req.new_password.is_empty() {
        return Err(GatewayError::Invalid("New password is required".into()));
    }
    let store = state.auth.credentials();
    if !store.verify_password(&req.current_password).await {
        return Err(GatewayError::Invalid("Current password is incorrect".into()));
    }
    let hash = credentials::hash_password_blocking(req.new_password)
        .await
        .map_err(|e| GatewayError::Persistence(e.to_string()))?;
    store.set_password(hash).await.map_err(GatewayError::Persistence)?;
    info!("Password changed");
    Ok(Json(json!({"success": true, "message": "Password updated successfully"})))
}

/// `POST /api/change-username`.
pub async fn change_username(
    State(state): State<AppState>,
    body: Result<Json<ChangeUsernameRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let req = payload(body)?;
    let username = req.new_username.trim().to_string();
    if username.is_empty() {
        return Err(GatewayError::Invalid("New username is required".into()));
    }
    let store = state.auth.credentials();
    if !store.verify_password(&req.password).await {
        return Err(GatewayError::Invalid("Password is incorrect".into()));
    }
    store
        .set_username(username)
        .await
        .map_err(GatewayError::Persistence)?;
    info!("Username changed");
    Ok(Json(json!({"success": true, "message": "Username updated successfully"})))
}

/// `POST /api/change-hostname`. Existing apps keep their host.
pub async fn change_hostname(
    State(state): State<AppState>,
    body: Result<Json<ChangeHostnameRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let req = payload(body)?;
    state
        .store
        .set_hostname(&req.hostname)
        .await
        .map_err(|e| GatewayError::Persistence(e.to_string()))?;
    let hostname = state.store.hostname().await;
    info!(hostname = %hostname, "Default hostname changed");
    Ok(Json(json!({
        "success": true,
        "message": "Hostname updated. New apps default to this host.",
        "hostname": hostname,
    })))
}

/// `POST /api/startup`. The flag is saved even if the service manager
/// refuses the change.
pub async fn set_startup(
    State(state): State<AppState>,
    body: Result<Json<StartupRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let req = payload(body)?;
    state
        .store
        .set_run_on_startup(req.enabled)
        .await
        .map_err(|e| GatewayError::Persistence(e.to_string()))?;
    state
        .startup
        .set_enabled(req.enabled)
        .await
        .map_err(GatewayError::Startup)?;
    Ok(Json(json!({"success": true, "enabled": req.enabled})))
}
