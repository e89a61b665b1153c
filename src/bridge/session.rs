//! State shared by every bridge session.

use std::time::SystemTime;

use uuid::Uuid;

/// Session lifecycle: `Idle → Active → Closing → Closed`.
///
/// The downstream resource exists only while `Active`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// Identity of a bridge session.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub session_id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl SessionMeta {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: now_ms(),
        }
    }

    /// First eight characters of the id, for log lines.
    pub fn short_id(&self) -> &str {
        &self.session_id[..8.min(self.session_id.len())]
    }
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
