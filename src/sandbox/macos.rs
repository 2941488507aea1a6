//! macOS Seatbelt executor. Policy generation itself lives in
//! [`crate::sandbox::policy`]; this module only wraps and spawns the child
//! under `sandbox-exec`.

use crate::sandbox::policy::CompiledPolicy;
use crate::sandbox::traits::{ProcessSpec, Sandbox};
use crate::utils::errors::{CoreError, CoreResult};
use async_trait::async_trait;
use tokio::process::Child;

pub struct MacOSSandbox;

impl MacOSSandbox {
    pub fn new() -> Self {
        Self
    }

    fn sandbox_exec_path() -> &'static str {
        "/usr/bin/sandbox-exec"
    }
}

impl Default for MacOSSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for MacOSSandbox {
    async fn spawn(&self, spec: &ProcessSpec, policy: &CompiledPolicy) -> CoreResult<Child> {
        let profile = match policy {
            CompiledPolicy::Seatbelt { profile } => profile,
            other => {
                return Err(CoreError::SandboxFailure(format!(
                    "macOS sandbox requires a Seatbelt policy, got {:?}",
                    other
                )))
            }
        };

        if !self.is_available() {
            return Err(CoreError::SandboxFailure(
                "sandbox-exec is not available on this system".to_string(),
            ));
        }

        let mut cmd = tokio::process::Command::new(Self::sandbox_exec_path());
        cmd.arg("-p").arg(profile);
        cmd.arg(&spec.command);
        cmd.args(&spec.args);

        cmd.env_clear();
        cmd.env("PATH", "/usr/bin:/bin:/usr/local/bin");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        cmd.spawn()
            .map_err(|e| CoreError::SandboxFailure(format!("failed to spawn sandboxed process: {}", e)))
    }

    fn is_available(&self) -> bool {
        std::path::Path::new(Self::sandbox_exec_path()).exists()
    }
}
