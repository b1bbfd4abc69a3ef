//! External collaborators of the apply path
//!
//! Validation and service control are side effects outside this crate. They
//! sit behind traits so the orchestrator's rollback logic runs unchanged
//! against the real `haproxy` / `systemctl` binaries or against test fakes.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::Result;

/// Outcome of an external check: pass/fail plus the tool's own words
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Whether the step succeeded
    pub success: bool,
    /// Diagnostic text reported by the tool (stderr, falling back to stdout)
    pub diagnostic: String,
}

impl CheckReport {
    /// A passing report
    pub fn ok(diagnostic: impl Into<String>) -> Self {
        Self {
            success: true,
            diagnostic: diagnostic.into(),
        }
    }

    /// A failing report
    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: diagnostic.into(),
        }
    }

    fn from_output(output: &Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostic = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };

        Self {
            success: output.status.success(),
            diagnostic,
        }
    }
}

/// Checks a candidate configuration file
#[async_trait]
pub trait ConfigValidator: Send + Sync {
    /// Validate the config at `path`
    async fn validate(&self, path: &Path) -> Result<CheckReport>;
}

/// Restarts or reloads the proxy service
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Full restart of the service
    async fn restart(&self, service: &str) -> Result<CheckReport>;

    /// Graceful reload of the service
    async fn reload(&self, service: &str) -> Result<CheckReport>;
}

/// Validates with `haproxy -c -f <path>`
#[derive(Debug, Clone)]
pub struct HaproxyValidator {
    binary: String,
}

impl HaproxyValidator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ConfigValidator for HaproxyValidator {
    async fn validate(&self, path: &Path) -> Result<CheckReport> {
        debug!(binary = %self.binary, path = %path.display(), "Validating config");

        let output = Command::new(&self.binary)
            .arg("-c")
            .arg("-f")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CheckReport::from_output(&output))
    }
}

/// Controls the service with `[sudo] systemctl restart|reload <service>`
#[derive(Debug, Clone)]
pub struct SystemctlController {
    systemctl: String,
    use_sudo: bool,
}

impl SystemctlController {
    pub fn new(systemctl: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            systemctl: systemctl.into(),
            use_sudo,
        }
    }

    async fn run(&self, action: &str, service: &str) -> Result<CheckReport> {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(&self.systemctl);
            cmd
        } else {
            Command::new(&self.systemctl)
        };

        debug!(action, service, sudo = self.use_sudo, "Running systemctl");

        let output = cmd
            .arg(action)
            .arg(service)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CheckReport::from_output(&output))
    }
}

#[async_trait]
impl ServiceController for SystemctlController {
    async fn restart(&self, service: &str) -> Result<CheckReport> {
        self.run("restart", service).await
    }

    async fn reload(&self, service: &str) -> Result<CheckReport> {
        self.run("reload", service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_from_failing_command() {
        let validator = HaproxyValidator::new("false");
        let report = validator.validate(Path::new("/nonexistent")).await.unwrap();
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_report_from_passing_command() {
        let validator = HaproxyValidator::new("true");
        let report = validator.validate(Path::new("/nonexistent")).await.unwrap();
        assert!(report.success);
        assert!(report.diagnostic.is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let validator = HaproxyValidator::new("/nonexistent/haproxy-binary");
        assert!(validator.validate(Path::new("/tmp/x.cfg")).await.is_err());
    }

    #[tokio::test]
    async fn test_controller_without_sudo() {
        let controller = SystemctlController::new("true", false);
        assert!(controller.restart("haproxy").await.unwrap().success);
        assert!(controller.reload("haproxy").await.unwrap().success);
    }
}
