//! Icon upload and download.
//!
//! - `POST /api/upload-icon` — multipart, file in field `icon`
//! - `GET  /icons/{file}`    — stored icon

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::error::GatewayError;
use crate::AppState;

/// `POST /api/upload-icon`.
pub async fn upload_icon(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, GatewayError> {
    let invalid = |e: axum::extract::multipart::MultipartError| GatewayError::Invalid(e.body_text());
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        if field.name() != Some("icon") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(invalid)?;
        let path = state.icons.save(&file_name, &bytes).await?;
        return Ok(Json(json!({"success": true, "path": path})));
    }
    Err(GatewayError::Invalid("No file uploaded".into()))
}

/// `GET /icons/{file}`.
pub async fn serve_icon(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, GatewayError> {
    let (path, mime) = state.icons.locate(&file_name)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| GatewayError::NotFound("Icon not found".into()))?;
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (header::CACHE_CONTROL, "private, max-age=86400"),
        ],
        body,
    )
        .into_response())
}
