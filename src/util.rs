//! Small helpers shared across modules.

/// The operating user's home directory, from `$HOME`, or `/` when unset.
pub fn home_dir() -> String {
    std::env::var("HOME")
        .ok()
        .filter(|h| !h.is_empty() && std::path::Path::new(h).is_dir())
        .unwrap_or_else(|| "/".to_string())
}

/// Escape text for interpolation into HTML.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
