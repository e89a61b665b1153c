//! Run-on-startup registration with the host's service manager.
//!
//! `POST /api/startup` calls [`StartupRegistrar::set_enabled`]; the default
//! implementation shells out to `[sudo] systemctl enable|disable <service>`.

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::config::StartupConfig;

/// Registers or unregisters the gateway as a boot-time service.
pub trait StartupRegistrar: Send + Sync {
    fn set_enabled(&self, enabled: bool) -> BoxFuture<'_, Result<(), String>>;
}

/// `systemctl` backed registrar.
pub struct SystemctlRegistrar {
    service: String,
    use_sudo: bool,
}

impl SystemctlRegistrar {
    pub fn new(config: &StartupConfig) -> Self {
        Self {
            service: config.service.clone(),
            use_sudo: config.use_sudo,
        }
    }

    /// Program and arguments for one toggle.
    fn argv(&self, enabled: bool) -> (&'static str, Vec<String>) {
        let action = if enabled { "enable" } else { "disable" };
        let mut args = vec![action.to_string(), self.service.clone()];
        if self.use_sudo {
            // -n: fail instead of prompting for a password.
            args.splice(0..0, ["-n".to_string(), "systemctl".to_string()]);
            ("sudo", args)
        } else {
            ("systemctl", args)
        }
    }
}

impl StartupRegistrar for SystemctlRegistrar {
    fn set_enabled(&self, enabled: bool) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            let (program, args) = self.argv(enabled);
            let action = if enabled { "enable" } else { "disable" };
            let output = tokio::process::Command::new(program)
                .args(&args)
                .output()
                .await
                .map_err(|e| format!("Failed to run {program}: {e}"))?;

            if output.status.success() {
                info!(service = %self.service, enabled, "Startup registration updated");
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(service = %self.service, "systemctl {action} failed: {}", stderr.trim());
                Err(format!(
                    "Failed to {action} service. Make sure systemd service is installed."
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registrar(use_sudo: bool) -> SystemctlRegistrar {
        SystemctlRegistrar::new(&StartupConfig {
            service: "portgate.service".into(),
            use_sudo,
        })
    }

    #[test]
    fn test_argv_with_sudo() {
        let (program, args) = registrar(true).argv(true);
        assert_eq!(program, "sudo");
        assert_eq!(args, ["-n", "systemctl", "enable", "portgate.service"]);
    }

    #[test]
    fn test_argv_without_sudo() {
        let (program, args) = registrar(false).argv(false);
        assert_eq!(program, "systemctl");
        assert_eq!(args, ["disable", "portgate.service"]);
    }
}
