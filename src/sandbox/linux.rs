//! Linux sandbox executor: wraps a [`ProcessSpec`] with `bwrap` using the
//! argv, seccomp filter path, and proxy env produced by the Policy
//! Compiler.

use crate::sandbox::linux_seccomp;
use crate::sandbox::policy::CompiledPolicy;
use crate::sandbox::traits::{ProcessSpec, Sandbox};
use crate::utils::errors::{CoreError, CoreResult};
use async_trait::async_trait;
use std::os::unix::io::AsRawFd;
use tokio::process::Child;

pub struct LinuxSandbox;

impl LinuxSandbox {
    pub fn new() -> Self {
        Self
    }

    fn bwrap_path() -> &'static str {
        "/usr/bin/bwrap"
    }
}

impl Default for LinuxSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for LinuxSandbox {
    async fn spawn(&self, spec: &ProcessSpec, policy: &CompiledPolicy) -> CoreResult<Child> {
        let (argv, seccomp_filter_path, proxy_env) = match policy {
            CompiledPolicy::Bwrap {
                argv,
                seccomp_filter_path,
                env,
            } => (argv, seccomp_filter_path, env),
            other => {
                return Err(CoreError::SandboxFailure(format!(
                    "Linux sandbox requires a bwrap policy, got {:?}",
                    other
                )))
            }
        };

        if !self.is_available() {
            return Err(CoreError::SandboxFailure(
                "bwrap is not available on this system".to_string(),
            ));
        }

        let block_unix_sockets = seccomp_filter_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("no-unix-sockets"))
            .unwrap_or(false);
        linux_seccomp::ensure_filter(seccomp_filter_path, block_unix_sockets)?;

        let seccomp_file = std::fs::File::open(seccomp_filter_path)
            .map_err(|e| CoreError::SandboxFailure(format!("open seccomp filter: {}", e)))?;
        let seccomp_fd = seccomp_file.as_raw_fd();
        clear_cloexec(seccomp_fd);

        let mut cmd = tokio::process::Command::new(Self::bwrap_path());
        cmd.args(argv);
        cmd.arg("--seccomp").arg(seccomp_fd.to_string());
        cmd.arg("--");
        cmd.arg(&spec.command);
        cmd.args(&spec.args);

        cmd.env_clear();
        cmd.env("PATH", "/usr/bin:/bin:/usr/local/bin");
        for (key, value) in proxy_env {
            cmd.env(key, value);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| CoreError::SandboxFailure(format!("failed to spawn bwrap: {}", e)))?;

        // bwrap has the fd open via inheritance across fork/exec; our copy
        // is no longer needed once the child is running.
        drop(seccomp_file);

        Ok(child)
    }

    fn is_available(&self) -> bool {
        std::path::Path::new(Self::bwrap_path()).exists()
    }
}

fn clear_cloexec(fd: i32) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
        }
    }
}
