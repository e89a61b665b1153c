//! Login and logout.
//!
//! - `GET  /login`  — login form (`?error=1` after a failed attempt)
//! - `POST /login`  — form post; sets the session cookie and redirects to `/`
//! - `GET  /logout` — drops the ticket, clears the cookie, redirects to `/login`

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;

use crate::auth::{cleared_cookie, session_cookie, ticket_cookie};
use crate::pages;
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// `GET /login`. Already signed-in callers go straight to the dashboard.
pub async fn login_page(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> Response {
    if state.auth.is_authenticated(&headers).await {
        return Redirect::to("/").into_response();
    }
    Html(pages::login_page(query.error.is_some())).into_response()
}

/// `POST /login`.
pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    match state.auth.login(&form.username, &form.password).await {
        Ok(ticket) => (
            [(header::SET_COOKIE, ticket_cookie(&ticket))],
            Redirect::to("/"),
        )
            .into_response(),
        Err(_) => Redirect::to("/login?error=1").into_response(),
    }
}

/// `GET /logout`.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(ticket) = session_cookie(&headers) {
        state.auth.logout(ticket).await;
    }
    ([(header::SET_COOKIE, cleared_cookie())], Redirect::to("/login")).into_response()
}
