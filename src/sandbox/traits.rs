use crate::sandbox::policy::CompiledPolicy;
use crate::utils::errors::CoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Child;

/// A process to run, independent of the policy that wraps it.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Inherit the parent's environment in addition to `env`. The OS
    /// sandboxes always clear it regardless (§4.1 baseline allowances are
    /// the only environment the child gets); this only affects `NoSandbox`.
    pub env_inherit: bool,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
            env_inherit: false,
        }
    }
}

/// Platform sandbox: wraps a [`ProcessSpec`] with a [`CompiledPolicy`] and
/// spawns it. Implementations: `MacOSSandbox` (Seatbelt), `LinuxSandbox`
/// (bwrap+seccomp+proxy), `NoSandbox` (pass-through, used on unsupported
/// platforms per spec Non-goals).
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn spawn(&self, spec: &ProcessSpec, policy: &CompiledPolicy) -> CoreResult<Child>;

    /// Whether this implementation can actually enforce `policy` on the
    /// current host (e.g. `sandbox-exec` present, bwrap present).
    fn is_available(&self) -> bool;
}
