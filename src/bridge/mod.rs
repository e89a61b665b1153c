//! Per-session bridges between a client channel and one downstream resource.
//!
//! - [`terminal::TerminalBridge`] owns a shell process on a PTY.
//! - [`tunnel::TunnelBridge`] owns an outbound TCP connection.
//!
//! Both follow the [`session::SessionState`] machine and push their output
//! into an `mpsc` channel that the client-facing transport drains. A bounded
//! channel means a slow client slows only its own session's reader.

pub mod session;
pub mod terminal;
pub mod tunnel;

pub use session::{SessionMeta, SessionState};
pub use terminal::TerminalBridge;
pub use tunnel::{TunnelBridge, TunnelSignal};

/// Capacity of each bridge's output channel, in chunks.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;
