//! HTTP route handlers.
//!
//! Each sub-module corresponds to an endpoint group. Everything except
//! [`login`] and [`health`] sits behind [`crate::auth::require_session`].

use axum::{extract::rejection::JsonRejection, Json};

use crate::error::GatewayError;

pub mod apps;
pub mod dashboard;
pub mod health;
pub mod icons;
pub mod login;
pub mod settings;

/// Unwrap a JSON body, turning axum's rejection into [`GatewayError::Invalid`]
/// so malformed payloads get the same JSON error shape as everything else.
pub(crate) fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| GatewayError::Invalid(rejection.body_text()))
}
