//! App icon storage under `<data_dir>/icons`.
//!
//! Uploads are renamed to `<uuid>.<ext>` so the client never picks a path.
//! The returned reference (`/icons/<file>`) is what goes into
//! [`RouteEntry::icon`](crate::route_table::RouteEntry::icon).

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::GatewayError;

/// Largest accepted upload.
pub const MAX_ICON_BYTES: usize = 2 * 1024 * 1024;

const ALLOWED: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
];

#[derive(Debug, Clone)]
pub struct IconStore {
    dir: PathBuf,
}

impl IconStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("icons"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store an upload and return its reference path.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String, GatewayError> {
        let ext = extension(original_name)
            .filter(|ext| content_type(ext).is_some())
            .ok_or_else(|| {
                GatewayError::Invalid(
                    "Only image files are allowed (png, jpg, jpeg, gif, svg, webp, ico)".into(),
                )
            })?;
        if bytes.is_empty() {
            return Err(GatewayError::Invalid("Icon file is empty".into()));
        }
        if bytes.len() > MAX_ICON_BYTES {
            return Err(GatewayError::Invalid("Icon exceeds the 2 MB limit".into()));
        }

        let file_name = format!("{}.{ext}", uuid::Uuid::new_v4());
        let persist = |e: std::io::Error| GatewayError::Persistence(format!("{}: {e}", self.dir.display()));
        tokio::fs::create_dir_all(&self.dir).await.map_err(persist)?;
        tokio::fs::write(self.dir.join(&file_name), bytes)
            .await
            .map_err(persist)?;

        info!(file = %file_name, bytes = bytes.len(), "Icon stored");
        Ok(format!("/icons/{file_name}"))
    }

    /// Resolve a stored icon to its path and content type.
    ///
    /// Names that could escape the directory are reported as missing.
    pub fn locate(&self, file_name: &str) -> Result<(PathBuf, &'static str), GatewayError> {
        let not_found = || GatewayError::NotFound("Icon not found".into());
        let safe = !file_name.is_empty()
            && !file_name.starts_with('.')
            && file_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
        if !safe {
            return Err(not_found());
        }
        let mime = extension(file_name)
            .and_then(|ext| content_type(&ext))
            .ok_or_else(not_found)?;
        Ok((self.dir.join(file_name), mime))
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn content_type(ext: &str) -> Option<&'static str> {
    ALLOWED
        .iter()
        .find(|(allowed, _)| *allowed == ext)
        .map(|(_, mime)| *mime)
}
