use crate::sandbox::policy::CompiledPolicy;
use crate::sandbox::traits::{ProcessSpec, Sandbox};
use crate::utils::errors::CoreResult;
use async_trait::async_trait;
use tokio::process::{Child, Command};

/// Pass-through execution, used whenever the host platform has no sandbox
/// implementation or the policy came back as [`CompiledPolicy::PassThrough`].
pub struct NoSandbox;

impl NoSandbox {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for NoSandbox {
    async fn spawn(&self, spec: &ProcessSpec, _policy: &CompiledPolicy) -> CoreResult<Child> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        if !spec.env_inherit {
            cmd.env_clear();
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        Ok(cmd.spawn()?)
    }

    fn is_available(&self) -> bool {
        true
    }
}
