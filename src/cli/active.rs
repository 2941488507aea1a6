//! Active-vMCP resolution (§6): `VMCP_ACTIVE` wins; else a `.vmcp-config.json`
//! found by walking up from the current directory under the vMCP home;
//! else the caller must pass an explicit `<vmcp>` argument.

use crate::utils::errors::{CoreError, CoreResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct VmcpConfigFile {
    vmcp_id: String,
}

/// Resolves which vMCP a CLI invocation targets, in priority order:
/// explicit argument, `VMCP_ACTIVE`, then cwd-detection under `vmcp_home`.
pub fn resolve(explicit: Option<String>, vmcp_home: &Path) -> CoreResult<String> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    if let Ok(id) = std::env::var("VMCP_ACTIVE") {
        if !id.is_empty() {
            return Ok(id);
        }
    }
    if let Some(id) = detect_from_cwd(vmcp_home)? {
        return Ok(id);
    }
    Err(CoreError::ConfigError(
        "no vMCP specified: pass <vmcp>, set VMCP_ACTIVE, or run from inside a vMCP's directory".to_string(),
    ))
}

fn detect_from_cwd(vmcp_home: &Path) -> CoreResult<Option<String>> {
    let cwd = std::env::current_dir()?;
    if !cwd.starts_with(vmcp_home) {
        return Ok(None);
    }

    let mut dir = cwd.as_path();
    loop {
        let marker = dir.join(".vmcp-config.json");
        if marker.is_file() {
            let content = std::fs::read_to_string(&marker)?;
            let parsed: VmcpConfigFile = serde_json::from_str(&content)
                .map_err(|e| CoreError::ConfigError(format!("malformed {}: {e}", marker.display())))?;
            return Ok(Some(parsed.vmcp_id));
        }
        match dir.parent() {
            Some(parent) if parent.starts_with(vmcp_home) || parent == vmcp_home => dir = parent,
            _ => return Ok(None),
        }
    }
}

pub fn default_vmcp_home() -> PathBuf {
    if let Ok(home) = std::env::var("VMCP_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir().map(|h| h.join(".vmcp")).unwrap_or_else(|| PathBuf::from(".vmcp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_argument_wins() {
        let home = PathBuf::from("/tmp/doesnotmatter");
        assert_eq!(resolve(Some("vmcp-1".to_string()), &home).unwrap(), "vmcp-1");
    }

    #[test]
    fn errors_with_no_signal() {
        std::env::remove_var("VMCP_ACTIVE");
        let home = PathBuf::from("/nonexistent-vmcp-home-for-test");
        assert!(resolve(None, &home).is_err());
    }
}
