pub mod lifecycle;
pub mod none;
pub mod policy;
pub mod traits;
pub mod violation_monitor;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub mod linux_seccomp;

#[cfg(target_os = "macos")]
pub mod macos;

pub use lifecycle::{SandboxLifecycle, SandboxStatus};
pub use none::NoSandbox;
pub use policy::{CompiledPolicy, PolicyCompiler};
pub use traits::{ProcessSpec, Sandbox};
pub use violation_monitor::{Violation, ViolationMonitor};

#[cfg(target_os = "linux")]
pub use linux::LinuxSandbox;

#[cfg(target_os = "macos")]
pub use macos::MacOSSandbox;

/// Construct the sandbox implementation for the current platform. Never
/// fails: on an unsupported platform this returns [`NoSandbox`], matching
/// the pass-through fallback.
pub fn create_sandbox() -> Box<dyn Sandbox> {
    #[cfg(target_os = "linux")]
    {
        let sandbox = LinuxSandbox::new();
        if sandbox.is_available() {
            return Box::new(sandbox);
        }
        tracing::warn!("bwrap not available, falling back to pass-through execution");
    }

    #[cfg(target_os = "macos")]
    {
        let sandbox = MacOSSandbox::new();
        if sandbox.is_available() {
            return Box::new(sandbox);
        }
        tracing::warn!("sandbox-exec not available, falling back to pass-through execution");
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    tracing::warn!("no sandbox implementation for this platform, falling back to pass-through execution");

    Box::new(NoSandbox::new())
}
