//! Gateway error taxonomy.
//!
//! Every failure a component can report is one of the [`GatewayError`]
//! variants. They are recovered at the component boundary: HTTP handlers turn
//! them into `{"success": false, "error": ..., "code": ...}` responses, the
//! WebSocket layer turns them into `*-error` events. Nothing here is fatal to
//! the process.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors surfaced by the route table, auth gate, proxy and bridges.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No ticket, or the ticket was revoked.
    #[error("Unauthorized")]
    Unauthorized,
    /// Login failed. Never says whether the user exists.
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// A route with the same path prefix already exists.
    #[error("{0}")]
    Conflict(String),
    /// Malformed route fields or request payload.
    #[error("{0}")]
    Invalid(String),
    /// A tunnel connect named no usable host or port.
    #[error("Host and port are required")]
    InvalidTarget,
    /// Route or session reference missing.
    #[error("{0}")]
    NotFound(String),
    /// The proxy could not reach a route's backend.
    #[error("Cannot reach {target}: {message}")]
    BackendUnreachable { target: String, message: String },
    /// The terminal bridge could not start a shell.
    #[error("Failed to start shell: {0}")]
    ProcessSpawnFailure(String),
    /// The tunnel bridge could not reach its target.
    #[error("Failed to connect to {target}: {message}")]
    TunnelConnectFailure { target: String, message: String },
    /// Writing the config document failed.
    #[error("Failed to save configuration: {0}")]
    Persistence(String),
    /// The service manager refused a run-on-startup change.
    #[error("{0}")]
    Startup(String),
}

impl GatewayError {
    /// Stable machine-readable code, echoed in JSON bodies and WS events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Conflict(_) => "CONFLICT",
            Self::Invalid(_) => "INVALID",
            Self::InvalidTarget => "INVALID_TARGET",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BackendUnreachable { .. } => "BACKEND_UNREACHABLE",
            Self::ProcessSpawnFailure(_) => "PROCESS_SPAWN_FAILURE",
            Self::TunnelConnectFailure { .. } => "TUNNEL_CONNECT_FAILURE",
            Self::Persistence(_) => "PERSISTENCE",
            Self::Startup(_) => "STARTUP_REGISTRATION",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Invalid(_) | Self::InvalidTarget => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BackendUnreachable { .. } | Self::TunnelConnectFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::ProcessSpawnFailure(_) | Self::Persistence(_) | Self::Startup(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({
                "success": false,
                "error": self.to_string(),
                "code": self.code(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_409() {
        let err = GatewayError::Conflict("Path already exists".into());
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(err.to_string(), "Path already exists");
    }

    #[test]
    fn test_invalid_credentials_is_generic() {
        let err = GatewayError::InvalidCredentials;
        assert_eq!(err.to_string(), "Invalid credentials");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_invalid_target_message_is_plain() {
        let err = GatewayError::InvalidTarget;
        assert_eq!(err.to_string(), "Host and port are required");
        assert_eq!(err.code(), "INVALID_TARGET");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
