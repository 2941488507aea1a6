//! Sandbox Lifecycle (C2): directory provisioning for a vMCP's isolated
//! interpreter environment, keyed by a sanitized id under `~/.vmcp/`.

use crate::config::{VMCPConfigStore, VMCPMetadata};
use crate::utils::errors::{CoreError, CoreResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const LIST_TOOLS_HELPER: &str = include_str!("list_tools_helper.py");
const DEFAULT_PACKAGES: &[&str] = &["requests", "pydantic"];

#[derive(Debug, Clone, Serialize)]
struct VmcpDirConfig<'a> {
    vmcp_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct SandboxStatus {
    pub enabled: bool,
    pub path: PathBuf,
    pub venv_exists: bool,
    pub folder_exists: bool,
}

/// Replaces `/`, `\`, and `..` with `_`, then strips anything outside
/// `[A-Za-z0-9._-]`. The raw `vmcp_id` is preserved in `.vmcp-config.json`;
/// only the on-disk directory name is sanitized.
pub fn sanitize(vmcp_id: &str) -> String {
    let replaced = vmcp_id
        .replace(['/', '\\'], "_")
        .replace("..", "__")
        .replace('~', "_");
    replaced
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct SandboxLifecycle<S: VMCPConfigStore> {
    store: Arc<S>,
    vmcp_home: PathBuf,
    /// Per-id mutex so concurrent `enable`/`delete` on the same vMCP are
    /// serialized (spec §5 shared-resource policy).
    locks: Mutex<std::collections::HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: VMCPConfigStore> SandboxLifecycle<S> {
    pub fn new(store: Arc<S>, vmcp_home: impl Into<PathBuf>) -> Self {
        Self {
            store,
            vmcp_home: vmcp_home.into(),
            locks: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn dir_for(&self, vmcp_id: &str) -> PathBuf {
        self.vmcp_home.join(sanitize(vmcp_id))
    }

    async fn lock_for(&self, vmcp_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(vmcp_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Idempotent: if the directory, venv, and `sandbox_enabled` flag are
    /// already consistent, returns success without redoing work.
    pub async fn enable(&self, vmcp_id: &str) -> CoreResult<()> {
        let guard = self.lock_for(vmcp_id).await;
        let _permit = guard.lock().await;

        let dir = self.dir_for(vmcp_id);
        tokio::fs::create_dir_all(&dir).await?;

        let venv_path = dir.join(".venv");
        if !venv_path.exists() {
            create_venv(&venv_path).await?;
            install_default_packages(&venv_path).await?;
        }

        let config_path = dir.join(".vmcp-config.json");
        let payload = VmcpDirConfig { vmcp_id };
        tokio::fs::write(&config_path, serde_json::to_string_pretty(&payload)?).await?;

        let helper_path = dir.join("list_tools.py");
        tokio::fs::write(&helper_path, LIST_TOOLS_HELPER).await?;

        let registry_path = dir.join("vmcp_tool_registry.json");
        if !registry_path.exists() {
            tokio::fs::write(&registry_path, "{}").await?;
        }

        let mut config = self.store.get_vmcp(vmcp_id).await?;
        config.metadata.sandbox_enabled = true;
        self.store.put_vmcp(&config).await?;

        info!(vmcp_id, path = %dir.display(), "sandbox enabled");
        Ok(())
    }

    /// Flips the metadata flag off; the directory and its contents are left
    /// untouched so re-enabling is cheap.
    pub async fn disable(&self, vmcp_id: &str) -> CoreResult<()> {
        let guard = self.lock_for(vmcp_id).await;
        let _permit = guard.lock().await;

        let mut config = self.store.get_vmcp(vmcp_id).await?;
        config.metadata.sandbox_enabled = false;
        self.store.put_vmcp(&config).await?;
        Ok(())
    }

    pub async fn delete(&self, vmcp_id: &str) -> CoreResult<()> {
        let guard = self.lock_for(vmcp_id).await;
        let _permit = guard.lock().await;

        let dir = self.dir_for(vmcp_id);
        if dir.exists() {
            clear_readonly_recursive(&dir)?;
            tokio::fs::remove_dir_all(&dir).await?;
        }

        let mut config = self.store.get_vmcp(vmcp_id).await?;
        config.metadata.sandbox_enabled = false;
        self.store.put_vmcp(&config).await?;
        Ok(())
    }

    /// `enabled` reflects stored metadata only, never filesystem presence.
    pub async fn status(&self, vmcp_id: &str) -> CoreResult<SandboxStatus> {
        let dir = self.dir_for(vmcp_id);
        let config = self.store.get_vmcp(vmcp_id).await?;
        Ok(SandboxStatus {
            enabled: config.metadata.sandbox_enabled,
            venv_exists: dir.join(".venv").exists(),
            folder_exists: dir.exists(),
            path: dir,
        })
    }
}

async fn create_venv(path: &Path) -> CoreResult<()> {
    let fast_manager = which::which("uv").ok();
    let status = if let Some(uv) = fast_manager {
        tokio::process::Command::new(uv)
            .arg("venv")
            .arg(path)
            .status()
            .await
    } else {
        tokio::process::Command::new("python3")
            .arg("-m")
            .arg("venv")
            .arg(path)
            .status()
            .await
    };

    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(CoreError::SandboxFailure(format!(
            "venv creation exited with {}",
            s
        ))),
        Err(e) => {
            warn!("failed to create sandbox venv: {e}");
            Err(CoreError::SandboxFailure(format!("venv creation failed: {e}")))
        }
    }
}

async fn install_default_packages(venv_path: &Path) -> CoreResult<()> {
    let pip = venv_path.join("bin").join("pip");
    if !pip.exists() || DEFAULT_PACKAGES.is_empty() {
        return Ok(());
    }
    let status = tokio::process::Command::new(pip)
        .arg("install")
        .arg("--quiet")
        .args(DEFAULT_PACKAGES)
        .status()
        .await;
    if let Err(e) = status {
        warn!("failed to install default sandbox packages: {e}");
    }
    Ok(())
}

fn clear_readonly_recursive(dir: &Path) -> CoreResult<()> {
    for entry in walkdir(dir)? {
        let metadata = std::fs::metadata(&entry)?;
        let mut perms = metadata.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            std::fs::set_permissions(&entry, perms)?;
        }
    }
    Ok(())
}

fn walkdir(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    let mut out = vec![dir.to_path_buf()];
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                out.extend(walkdir(&path)?);
            } else {
                out.push(path);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_path_traversal() {
        assert_eq!(sanitize("my/unsafe..id"), "my_unsafe__id");
        assert_eq!(sanitize("a\\b"), "a_b");
        assert_eq!(sanitize("valid-id.1"), "valid-id.1");
    }

    #[test]
    fn sanitize_strips_other_special_chars() {
        assert_eq!(sanitize("a b!c"), "a_b_c");
    }
}
