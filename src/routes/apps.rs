//! Route table management API.
//!
//! - `GET    /api/apps`        — `{apps, hostname}`
//! - `POST   /api/apps`        — add `{name, port, path, host?, icon?}`
//! - `PUT    /api/apps/{path}` — patch the app at the percent-encoded prefix
//! - `DELETE /api/apps/{path}` — remove it
//!
//! Mutations answer `{success, message, app?, warning?}`; `warning` is set
//! when the change is live but could not be written to disk. Failures use the
//! [`GatewayError`] body.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::payload;
use crate::error::GatewayError;
use crate::route_table::{Applied, RouteEntry, RoutePatch};
use crate::AppState;

/// `port` as sent by forms (string) or scripts (number).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PortField {
    Number(i64),
    Text(String),
}

impl PortField {
    fn parse(&self) -> Result<u16, GatewayError> {
        let port = match self {
            Self::Number(n) => u16::try_from(*n).ok(),
            Self::Text(s) => s.trim().parse::<u16>().ok(),
        };
        port.filter(|p| *p > 0)
            .ok_or_else(|| GatewayError::Invalid("Port must be between 1 and 65535".into()))
    }
}

/// Body of `POST` and `PUT`. Every field is optional for `PUT`.
#[derive(Debug, Deserialize)]
pub struct AppRequest {
    pub name: Option<String>,
    pub port: Option<PortField>,
    pub path: Option<String>,
    pub host: Option<String>,
    pub icon: Option<String>,
}

/// Trimmed, with empty strings treated as absent.
fn present(field: Option<&String>) -> Option<String> {
    field.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Path segments arrive without their leading slash when the client does not
/// encode it.
fn prefix_param(raw: String) -> String {
    if raw.starts_with('/') {
        raw
    } else {
        format!("/{raw}")
    }
}

fn applied(message: &str, result: Applied<RouteEntry>) -> Json<Value> {
    let mut body = json!({
        "success": true,
        "message": message,
        "app": result.value,
    });
    if let Some(warning) = result.warning {
        body["warning"] = json!(warning);
    }
    Json(body)
}

/// `GET /api/apps`.
pub async fn list_apps(State(state): State<AppState>) -> Json<Value> {
    let apps = state.routes.list().await;
    let hostname = state.store.hostname().await;
    Json(json!({ "apps": apps, "hostname": hostname }))
}

/// `POST /api/apps`.
pub async fn add_app(
    State(state): State<AppState>,
    body: Result<Json<AppRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let req = payload(body)?;
    let (Some(name), Some(port), Some(path)) = (present(req.name.as_ref()), req.port.as_ref(), present(req.path.as_ref()))
    else {
        return Err(GatewayError::Invalid("Name, port, and path are required".into()));
    };
    let target_host = match present(req.host.as_ref()) {
        Some(host) => host,
        None => state.store.hostname().await,
    };
    let entry = RouteEntry {
        name,
        path_prefix: path,
        target_host,
        target_port: port.parse()?,
        icon: present(req.icon.as_ref()),
    };
    let result = state.routes.add(entry).await?;
    Ok(applied("App added", result))
}

/// `PUT /api/apps/{path}`.
pub async fn update_app(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    body: Result<Json<AppRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let req = payload(body)?;
    let patch = RoutePatch {
        name: present(req.name.as_ref()),
        path_prefix: present(req.path.as_ref()),
        target_host: present(req.host.as_ref()),
        target_port: req.port.as_ref().map(PortField::parse).transpose()?,
        // Keep "" so the table can clear the icon.
        icon: req.icon.map(|s| s.trim().to_string()),
    };
    let result = state.routes.update(&prefix_param(prefix), patch).await?;
    Ok(applied("App updated", result))
}

/// `DELETE /api/apps/{path}`.
pub async fn delete_app(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let result = state.routes.remove(&prefix_param(prefix)).await?;
    Ok(applied("App removed", result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_field_forms() {
        let parse = |v: Value| serde_json::from_value::<PortField>(v).unwrap().parse();
        assert_eq!(parse(json!(8080)).unwrap(), 8080);
        assert_eq!(parse(json!(" 3001 ")).unwrap(), 3001);
        assert!(parse(json!(0)).is_err());
        assert!(parse(json!(65536)).is_err());
        assert!(parse(json!(-1)).is_err());
        assert!(parse(json!("http")).is_err());
    }

    #[test]
    fn test_prefix_param() {
        assert_eq!(prefix_param("/grafana".into()), "/grafana");
        assert_eq!(prefix_param("grafana".into()), "/grafana");
    }
}
