//! Session-cookie authentication.
//!
//! A successful `POST /login` mints an [`AuthTicket`] (random UUID) that is
//! stored server-side and handed to the browser in the `portgate_sid` cookie.
//! Every gateway-facing request presents it back; [`require_session`] lets the
//! request through only when the ticket is known.
//!
//! Per-connection state machine: `Anonymous → Authenticated → LoggedOut`.
//! Logout deletes the ticket, so a replayed cookie is treated like any other
//! unknown ticket. Tickets live in memory only and die with the process.
//!
//! Unauthenticated callers are redirected to `/login` (or get a bare 401 on
//! `/api/*`), never an error that reveals whether a route exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::AppState;

/// Name of the cookie carrying the ticket.
pub const SESSION_COOKIE: &str = "portgate_sid";

/// Credential collaborator. Hashing and storage live behind it.
pub trait CredentialStore: Send + Sync {
    /// Check a username/password pair. Must not reveal which half was wrong.
    fn verify<'a>(&'a self, username: &'a str, password: &'a str) -> BoxFuture<'a, bool>;
    /// Check only the password of the stored credential.
    fn verify_password<'a>(&'a self, password: &'a str) -> BoxFuture<'a, bool>;
    /// Replace the stored password hash.
    fn set_password(&self, hash: String) -> BoxFuture<'_, Result<(), String>>;
    /// Replace the stored username.
    fn set_username(&self, name: String) -> BoxFuture<'_, Result<(), String>>;
}

/// Opaque server-side proof of a completed login.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthTicket(String);

impl AuthTicket {
    fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where a caller stands with respect to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated(AuthTicket),
}

struct TicketInfo {
    issued_at: Instant,
}

/// Ticket store plus the credential check. Cloneable handle.
#[derive(Clone)]
pub struct AuthGate {
    tickets: Arc<RwLock<HashMap<String, TicketInfo>>>,
    credentials: Arc<dyn CredentialStore>,
}

impl AuthGate {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            tickets: Arc::new(RwLock::new(HashMap::new())),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// `Anonymous → Authenticated`. Failure leaves the caller anonymous.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthTicket, GatewayError> {
        if !self.credentials.verify(username, password).await {
            warn!("Login failed");
            return Err(GatewayError::InvalidCredentials);
        }
        let ticket = AuthTicket::mint();
        self.tickets.write().await.insert(
            ticket.0.clone(),
            TicketInfo {
                issued_at: Instant::now(),
            },
        );
        info!("Login succeeded");
        Ok(ticket)
    }

    /// `Authenticated → LoggedOut`. Returns whether the ticket was live.
    pub async fn logout(&self, ticket: &str) -> bool {
        match self.tickets.write().await.remove(ticket) {
            Some(info) => {
                info!(age_secs = info.issued_at.elapsed().as_secs(), "Logged out");
                true
            }
            None => false,
        }
    }

    /// Classify a request by its cookie.
    pub async fn state(&self, headers: &HeaderMap) -> AuthState {
        let Some(raw) = session_cookie(headers) else {
            return AuthState::Anonymous;
        };
        if self.tickets.read().await.contains_key(raw) {
            AuthState::Authenticated(AuthTicket(raw.to_string()))
        } else {
            AuthState::Anonymous
        }
    }

    pub async fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        matches!(self.state(headers).await, AuthState::Authenticated(_))
    }

    pub async fn live_tickets(&self) -> usize {
        self.tickets.read().await.len()
    }
}

/// Extract the ticket value from the `Cookie` header(s).
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value carrying a fresh ticket.
pub fn ticket_cookie(ticket: &AuthTicket) -> HeaderValue {
    let cookie = format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
        ticket.as_str()
    );
    // UUIDs are plain ASCII.
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// `Set-Cookie` value that deletes the ticket cookie.
pub fn cleared_cookie() -> HeaderValue {
    HeaderValue::from_static("portgate_sid=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Response for a caller that failed the gate.
pub fn deny(path: &str) -> Response {
    if path.starts_with("/api/") {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "Unauthorized"})),
        )
            .into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

/// Axum middleware guarding every gateway-facing route.
pub async fn require_session(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.auth.is_authenticated(request.headers()).await {
        next.run(request).await
    } else {
        deny(request.uri().path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedCredentials;

    impl CredentialStore for FixedCredentials {
        fn verify<'a>(&'a self, username: &'a str, password: &'a str) -> BoxFuture<'a, bool> {
            Box::pin(async move { username == "admin" && password == "pw" })
        }
        fn verify_password<'a>(&'a self, password: &'a str) -> BoxFuture<'a, bool> {
            Box::pin(async move { password == "pw" })
        }
        fn set_password(&self, _hash: String) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async { Ok(()) })
        }
        fn set_username(&self, _name: String) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn gate() -> AuthGate {
        AuthGate::new(Arc::new(FixedCredentials))
    }

    fn with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_login_logout_cycle() {
        let gate = gate();
        assert_eq!(gate.state(&HeaderMap::new()).await, AuthState::Anonymous);

        let ticket = gate.login("admin", "pw").await.unwrap();
        let headers = with_cookie(&format!("{SESSION_COOKIE}={}", ticket.as_str()));
        assert_eq!(gate.state(&headers).await, AuthState::Authenticated(ticket.clone()));

        assert!(gate.logout(ticket.as_str()).await);
        assert_eq!(gate.state(&headers).await, AuthState::Anonymous);
        assert!(!gate.logout(ticket.as_str()).await);
    }

    #[tokio::test]
    async fn test_failed_login_is_generic_and_mints_nothing() {
        let gate = gate();
        let unknown_user = gate.login("nobody", "pw").await.unwrap_err();
        let wrong_pw = gate.login("admin", "nope").await.unwrap_err();
        assert_eq!(unknown_user.to_string(), wrong_pw.to_string());
        assert_eq!(gate.live_tickets().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_anonymous() {
        let gate = gate();
        let headers = with_cookie(&format!("{SESSION_COOKIE}=forged"));
        assert_eq!(gate.state(&headers).await, AuthState::Anonymous);
    }

    #[test]
    fn test_session_cookie_parsing() {
        let headers = with_cookie("theme=dark; portgate_sid=abc-123 ; other=1");
        assert_eq!(session_cookie(&headers), Some("abc-123"));
        assert_eq!(session_cookie(&with_cookie("portgate_sid=")), None);
        assert_eq!(session_cookie(&with_cookie("xportgate_sid=abc")), None);
        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }

    #[test]
    fn test_deny_redirects_pages_and_401s_api() {
        let page = deny("/grafana/dashboard");
        assert_eq!(page.status(), StatusCode::SEE_OTHER);
        assert_eq!(page.headers()[header::LOCATION], "/login");
        assert_eq!(deny("/api/apps").status(), StatusCode::UNAUTHORIZED);
    }
}
