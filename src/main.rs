#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # portgate
//!
//! Single-port gateway for a home server or lab box.
//!
//! One login guards everything. Registered apps are reverse-proxied by path
//! prefix, `/api/ws` carries a browser terminal and a raw TCP tunnel for VNC.
//!
//! ## Subcommands
//!
//! - `portgate serve` (default) — run the gateway
//! - `portgate hash-password <password>` — print a credential hash for the
//!   config document
//!
//! ## API surface
//!
//! | Method     | Path                    | Auth | Description                     |
//! |------------|-------------------------|------|---------------------------------|
//! | GET/POST   | `/login`                | No   | Login form / credential check   |
//! | GET        | `/logout`               | No   | Drop the ticket                 |
//! | GET        | `/api/health`           | No   | Liveness probe                  |
//! | GET        | `/`, `/settings`        | Yes  | Dashboard and settings pages    |
//! | GET/POST   | `/api/apps`             | Yes  | List / register apps            |
//! | PUT/DELETE | `/api/apps/{path}`      | Yes  | Edit / remove an app            |
//! | POST       | `/api/change-*`         | Yes  | Password, username, hostname    |
//! | POST       | `/api/startup`          | Yes  | Run-on-startup toggle           |
//! | POST       | `/api/upload-icon`      | Yes  | Store an app icon               |
//! | GET        | `/icons/{file}`         | Yes  | Serve an app icon               |
//! | GET        | `/api/ws`               | Yes  | Terminal and tunnel WebSocket   |
//! | any        | everything else         | Yes  | Proxied to the matched app      |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, graceful shutdown
//! app.rs           — router assembly
//! config.rs        — TOML + env-var process settings
//! store.rs         — JSON config document (credentials, apps, hostname)
//! route_table.rs   — longest-prefix app registry
//! auth.rs          — login tickets, cookie, session middleware
//! proxy.rs         — HTTP / WebSocket forwarding
//! bridge/
//!   terminal.rs    — PTY shell per connection
//!   tunnel.rs      — raw TCP link per connection
//! ws/
//!   mod.rs         — WebSocket protocol and dispatch
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use portgate::{credentials, AppState, Config, ConfigStore};

/// Single-port gateway: login once, then reach every local app.
#[derive(Parser)]
#[command(name = "portgate", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Print the stored form of a password.
    HashPassword {
        password: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::HashPassword { password }) => match credentials::hash_password(&password) {
            Ok(hash) => println!("{hash}"),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => run_server(None).await,
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().with_env_filter("info").init();
            error!("{e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("portgate v{} starting", env!("CARGO_PKG_VERSION"));

    let (store, created) = match ConfigStore::open(&config.server.state_file).await {
        Ok(opened) => opened,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    if created {
        warn!(
            "Created {} with default credentials admin/admin. Change them in Settings",
            config.server.state_file
        );
    }

    let listen = config.listen_addr(store.snapshot().await.port);
    let state = AppState::new(config, Arc::new(store)).await;
    info!("{} app(s) registered", state.routes.len().await);

    let app = portgate::build_router(state);

    let listener = match TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {listen}: {e}");
            std::process::exit(1);
        }
    };
    info!("Listening on {listen}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
    }

    info!("Goodbye");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
