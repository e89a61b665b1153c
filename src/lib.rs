#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! portgate library: the gateway's building blocks, wired together by
//! [`app::build_router`].
//!
//! - `route_table` — path-prefix registry of backend apps
//! - `auth` — credential check, login tickets, session middleware
//! - `proxy` — HTTP and WebSocket forwarding to the matched backend
//! - `bridge` — terminal (PTY) and tunnel (raw TCP) sessions behind `/api/ws`
//! - `store` — the persisted JSON config document
//! - `config` — TOML process settings
//! - `routes` — login, pages, settings and app management handlers
//! - `ws` — the browser WebSocket protocol

pub mod app;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod credentials;
pub mod error;
pub mod icons;
pub mod pages;
pub mod proxy;
pub mod route_table;
pub mod routes;
pub mod shell;
pub mod startup;
pub mod state;
pub mod store;
pub mod util;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use app::build_router;
pub use auth::AuthGate;
pub use config::Config;
pub use error::GatewayError;
pub use route_table::{RouteEntry, RouteTable};
pub use state::AppState;
pub use store::ConfigStore;
