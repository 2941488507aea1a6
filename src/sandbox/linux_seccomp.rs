//! Generates the vendored seccomp-BPF filters referenced by
//! [`crate::sandbox::policy::PolicyCompiler::compile_linux`]. Filters are
//! compiled once and cached on disk; `bwrap` is handed the path, not the
//! program, so compilation never happens on the hot path of spawning a
//! sandboxed process.

use crate::utils::errors::{CoreError, CoreResult};
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Build (or reuse) the BPF program at `path`. `block_unix_sockets`
/// corresponds to `allow_all_unix_sockets = false` in the policy input.
pub fn ensure_filter(path: &Path, block_unix_sockets: bool) -> CoreResult<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let program = build_filter(block_unix_sockets)?;
    let mut file = std::fs::File::create(path)?;
    for instruction in &program {
        file.write_all(&instruction.code.to_le_bytes())?;
        file.write_all(&[instruction.jt, instruction.jf])?;
        file.write_all(&instruction.k.to_le_bytes())?;
    }
    Ok(())
}

fn build_filter(block_unix_sockets: bool) -> CoreResult<BpfProgram> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();

    if block_unix_sockets {
        // arg0 of socket(2) is the address family; deny only AF_UNIX, fall
        // through to allow for everything else so TCP/UDP still work.
        let condition = SeccompCondition::new(
            0,
            SeccompCmpArgLen::Dword,
            SeccompCmpOp::Eq,
            libc::AF_UNIX as u64,
        )
        .map_err(|e| CoreError::SandboxFailure(format!("seccomp condition: {}", e)))?;
        let rule = SeccompRule::new(vec![condition])
            .map_err(|e| CoreError::SandboxFailure(format!("seccomp rule: {}", e)))?;
        rules.insert(libc::SYS_socket, vec![rule]);
    }

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Errno(libc::EPERM as u32),
        SeccompAction::Allow,
        TargetArch::x86_64,
    )
    .map_err(|e| CoreError::SandboxFailure(format!("seccomp filter: {}", e)))?;

    filter
        .try_into()
        .map_err(|e| CoreError::SandboxFailure(format!("seccomp compile: {}", e)))
}

pub fn is_seccomp_available() -> bool {
    cfg!(target_os = "linux")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_filter_writes_file_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("default.bpf");
        ensure_filter(&path, true).unwrap();
        assert!(path.exists());
        let len = std::fs::metadata(&path).unwrap().len();
        ensure_filter(&path, true).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
    }
}
