//! Shell process management for the terminal bridge.
//!
//! [`pty`] allocates the pseudo-terminal and spawns the shell on its slave
//! side; [`ShellSpec`] describes what to spawn.

use std::collections::HashMap;

use crate::config::ShellConfig;

pub mod pty;

/// What the terminal bridge spawns for each session.
#[derive(Debug, Clone)]
pub struct ShellSpec {
    /// Shell binary.
    pub program: String,
    /// Working directory (the operating user's home).
    pub working_dir: String,
    /// Initial terminal geometry.
    pub cols: u16,
    pub rows: u16,
    /// Variables merged into the inherited environment.
    pub env: HashMap<String, String>,
}

impl ShellSpec {
    /// Build the spec from settings. `TERM` comes from the settings so line
    /// editing stays off and the output is plain text.
    pub fn from_config(config: &ShellConfig) -> Self {
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), config.term.clone());
        Self {
            program: config.program.clone(),
            working_dir: crate::util::home_dir(),
            cols: config.cols,
            rows: config.rows,
            env,
        }
    }
}
