//! Runtime settings and defaults.
//!
//! Settings are resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `PORTGATE_LISTEN`, `PORTGATE_STATE_FILE`,
//!    `PORTGATE_DATA_DIR`
//! 2. **Settings file** — path via `--config <path>`, or `portgate.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! These are the settings an operator edits by hand. Everything the gateway
//! changes at runtime (apps, credentials, hostname) lives in the JSON config
//! document instead, see [`crate::store`].
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:3000"        # default: 0.0.0.0:<config.json port or 3000>
//! state_file = "config.json"
//! data_dir = "./data"            # uploaded icons
//!
//! [shell]
//! program = "/bin/bash"          # default: $SHELL, else /bin/sh
//! term = "dumb"
//! cols = 80
//! rows = 30
//!
//! [proxy]
//! connect_timeout_ms = 5000
//! response_timeout_ms = 0        # 0 = wait as long as the backend takes
//!
//! [startup]
//! service = "proxy-server.service"
//! use_sudo = true
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level settings, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind. When unset, `0.0.0.0:<port>` with the port
    /// from the config document (default 3000).
    pub listen: Option<String>,
    /// Path of the JSON config document (default `config.json`).
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Directory for uploaded icons (default `./data`).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Terminal bridge shell settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary (default `$SHELL`, falling back to `/bin/sh`).
    #[serde(default = "default_shell")]
    pub program: String,
    /// `TERM` value for the shell. `dumb` keeps line editing off.
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

/// Proxy dispatcher timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// TCP connect timeout to a backend (default 5000 ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Time allowed for a backend to send response headers. `0` (the default)
    /// disables the limit so long-poll endpoints keep working. Bodies stream
    /// without a deadline either way.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Service-manager registration.
#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    /// systemd unit toggled by `POST /api/startup`.
    #[serde(default = "default_service")]
    pub service: String,
    /// Prefix `systemctl` with `sudo` (default true).
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_state_file() -> String {
    "config.json".to_string()
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}
fn default_term() -> String {
    "dumb".to_string()
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    30
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_response_timeout_ms() -> u64 {
    0
}
fn default_service() -> String {
    "proxy-server.service".to_string()
}
fn default_use_sudo() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            state_file: default_state_file(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_shell(),
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            use_sudo: default_use_sudo(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Failure to read or parse the settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load settings with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `portgate.toml` in
    /// the current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new("portgate.toml").exists() => Self::from_file("portgate.toml")?,
            None => Config::default(),
        };

        if let Ok(listen) = std::env::var("PORTGATE_LISTEN") {
            config.server.listen = Some(listen);
        }
        if let Ok(state_file) = std::env::var("PORTGATE_STATE_FILE") {
            config.server.state_file = state_file;
        }
        if let Ok(data_dir) = std::env::var("PORTGATE_DATA_DIR") {
            config.server.data_dir = data_dir;
        }

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Address to bind, falling back to the config document's port.
    pub fn listen_addr(&self, document_port: Option<u16>) -> String {
        self.server
            .listen
            .clone()
            .unwrap_or_else(|| format!("0.0.0.0:{}", document_port.unwrap_or(3000)))
    }
}
