//! Violation Monitor (C3): tails the macOS unified log for Seatbelt denies
//! tagged with a vMCP's log tags and pairs each with the command that
//! triggered it.

use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Violation {
    pub violation_line: String,
    pub command_line: String,
}

/// `{command_substring: [denial_substring, ...]}` plus an optional `"*"`
/// wildcard entry matched against every command.
pub type IgnoreList = HashMap<String, Vec<String>>;

enum State {
    Idle,
    PendingViolation(String),
}

fn is_noise(line: &str) -> bool {
    line.contains("mDNSResponder") || line.contains("diagnosticd") || line.contains("analyticsd")
}

fn is_ignored(violation_line: &str, command_line: &str, ignore: &IgnoreList) -> bool {
    for (command_substring, denial_substrings) in ignore {
        let command_matches = command_substring == "*" || command_line.contains(command_substring.as_str());
        if command_matches && denial_substrings.iter().any(|d| violation_line.contains(d.as_str())) {
            return true;
        }
    }
    false
}

fn feed_line(state: &mut State, line: &str, ignore: &IgnoreList) -> Option<Violation> {
    match state {
        State::Idle => {
            if line.contains("Sandbox:") && line.contains("deny") && !is_noise(line) {
                *state = State::PendingViolation(line.to_string());
            }
            None
        }
        State::PendingViolation(violation_line) => {
            if line.contains("CMD64_") {
                let violation = Violation {
                    violation_line: violation_line.clone(),
                    command_line: line.to_string(),
                };
                *state = State::Idle;
                if is_ignored(&violation.violation_line, &violation.command_line, ignore) {
                    return None;
                }
                return Some(violation);
            }
            // A new violation line supersedes an unmatched pending one.
            if line.contains("Sandbox:") && line.contains("deny") && !is_noise(line) {
                *state = State::PendingViolation(line.to_string());
            }
            None
        }
    }
}

pub struct ViolationMonitor {
    handle: JoinHandle<()>,
}

impl ViolationMonitor {
    /// Spawns the background `log stream` reader filtered by `session_suffix`
    /// (a vMCP's log-tag prefix). Returns the monitor (call [`Self::stop`] to
    /// terminate the reader) and a channel of emitted violations.
    #[cfg(target_os = "macos")]
    pub fn start(session_suffix: String, ignore: IgnoreList) -> (Self, mpsc::UnboundedReceiver<Violation>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let predicate = format!("eventMessage contains \"{session_suffix}\"");
            let mut child = match tokio::process::Command::new("log")
                .args(["stream", "--style", "syslog", "--predicate", &predicate])
                .stdout(std::process::Stdio::piped())
                .spawn()
            {
                Ok(c) => c,
                Err(e) => {
                    warn!("failed to start log stream: {e}");
                    return;
                }
            };

            let Some(stdout) = child.stdout.take() else {
                return;
            };
            let mut lines = BufReader::new(stdout).lines();
            let mut state = State::Idle;

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(violation) = feed_line(&mut state, &line, &ignore) {
                            debug!(?violation, "sandbox violation observed");
                            if tx.send(violation).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("log stream read error: {e}");
                        break;
                    }
                }
            }
            let _ = child.kill().await;
        });

        (Self { handle }, rx)
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(_session_suffix: String, _ignore: IgnoreList) -> (Self, mpsc::UnboundedReceiver<Violation>) {
        let (_tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async {});
        (Self { handle }, rx)
    }

    /// Terminates the background reader.
    pub fn stop(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_violation_with_following_cmd_line() {
        let mut state = State::Idle;
        let ignore = IgnoreList::new();
        assert!(feed_line(&mut state, "some unrelated line", &ignore).is_none());
        assert!(feed_line(&mut state, "Sandbox: foo(123) deny file-read-data /etc/passwd", &ignore).is_none());
        let violation = feed_line(&mut state, "CMD64_ABC123", &ignore).unwrap();
        assert!(violation.violation_line.contains("deny"));
        assert_eq!(violation.command_line, "CMD64_ABC123");
    }

    #[test]
    fn drops_mdnsresponder_noise_unconditionally() {
        let mut state = State::Idle;
        let ignore = IgnoreList::new();
        assert!(feed_line(
            &mut state,
            "Sandbox: mDNSResponder(1) deny mach-lookup",
            &ignore
        )
        .is_none());
        assert!(feed_line(&mut state, "CMD64_XYZ", &ignore).is_none());
    }

    #[test]
    fn respects_per_command_ignore_list() {
        let mut state = State::Idle;
        let mut ignore = IgnoreList::new();
        ignore.insert("mytool".to_string(), vec!["file-read-data".to_string()]);

        feed_line(&mut state, "Sandbox: foo(1) deny file-read-data /etc/passwd", &ignore);
        assert!(feed_line(&mut state, "CMD64_mytool_run", &ignore).is_none());
    }

    #[test]
    fn wildcard_ignore_matches_any_command() {
        let mut state = State::Idle;
        let mut ignore = IgnoreList::new();
        ignore.insert("*".to_string(), vec!["network-outbound".to_string()]);

        feed_line(&mut state, "Sandbox: foo(1) deny network-outbound", &ignore);
        assert!(feed_line(&mut state, "CMD64_anything", &ignore).is_none());
    }
}
