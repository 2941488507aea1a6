//! Policy Compiler: turns a [`PolicyInput`] into a platform-native sandbox
//! policy (Seatbelt profile on macOS, bwrap argv + seccomp filter reference
//! on Linux).

use crate::config::PolicyInput;
use crate::utils::errors::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Result of compiling a [`PolicyInput`] for a specific platform.
#[derive(Debug, Clone)]
pub enum CompiledPolicy {
    /// macOS: a complete Seatbelt profile, `sandbox-exec -p <profile>`.
    Seatbelt { profile: String },
    /// Linux: argv fragments for `bwrap`, a seccomp filter to load, and the
    /// environment the proxy ports must be exported under.
    Bwrap {
        argv: Vec<String>,
        seccomp_filter_path: PathBuf,
        env: HashMap<String, String>,
    },
    /// Unsupported platform: run the command unrestricted.
    PassThrough,
}

/// One read/write/network rule after glob expansion, ready to render.
#[derive(Debug, Clone)]
struct CompiledRule {
    /// Rendered as a Seatbelt `(subpath "...")` or `(regex #"...")` clause.
    matcher: String,
    log_tag: Option<String>,
}

static TMPDIR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(private/)?var/folders/([^/]+)/([^/]+)/T/?$").unwrap());

/// Translate a single glob pattern into a regex, gitignore-style:
/// `**/` -> `(.*/)?`, `**` -> `.*`, `*` -> `[^/]*`, `?` -> `[^/]`, character
/// classes are copied verbatim if terminated, escaped as a literal `[`
/// otherwise. Every other regex metacharacter is escaped.
pub fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    if i + 2 < chars.len() && chars[i + 2] == '/' {
                        out.push_str("(.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => match find_class_close(&chars, i) {
                Some(close) => {
                    let class: String = chars[i..=close].iter().collect();
                    out.push_str(&class);
                    i = close + 1;
                }
                None => {
                    out.push_str("\\[");
                    i += 1;
                }
            },
            c if is_regex_metachar(c) => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out.push('$');
    out
}

fn find_class_close(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}

fn is_regex_metachar(c: char) -> bool {
    matches!(c, '.' | '^' | '$' | '+' | '(' | ')' | '{' | '}' | '|' | '\\')
}

/// Static, non-wildcard prefix of a glob or literal path — the part a
/// bypass-via-rename attack could target.
fn static_prefix(pattern: &str) -> &str {
    let wildcard_at = pattern
        .char_indices()
        .find(|(_, c)| matches!(c, '*' | '?' | '['))
        .map(|(idx, _)| idx);
    let prefix = match wildcard_at {
        Some(idx) => &pattern[..idx],
        None => pattern,
    };
    prefix.trim_end_matches('/')
}

/// Every ancestor directory of `path`, from the path itself up to (but not
/// including) the filesystem root.
fn ancestors(path: &str) -> Vec<String> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::with_capacity(parts.len());
    for end in (1..=parts.len()).rev() {
        out.push(format!("/{}", parts[..end].join("/")));
    }
    out
}

/// If `tmpdir` matches the macOS temp-folder shape, return both the
/// `/var/...` and `/private/var/...` spellings to auto-allow for writes.
fn tmpdir_allowance(tmpdir: &str) -> Option<[String; 2]> {
    let caps = TMPDIR_PATTERN.captures(tmpdir)?;
    let xx = &caps[2];
    let yyy = &caps[3];
    Some([
        format!("/var/folders/{}/{}", xx, yyy),
        format!("/private/var/folders/{}/{}", xx, yyy),
    ])
}

pub struct PolicyCompiler;

impl PolicyCompiler {
    /// Compile `input` (augmented with `mandatory_deny` from the caller's
    /// collaborator) into the policy for the host platform.
    pub fn compile(input: &PolicyInput, mandatory_deny: &[String]) -> CoreResult<CompiledPolicy> {
        if cfg!(target_os = "macos") {
            Self::compile_macos(input, mandatory_deny).map(|profile| CompiledPolicy::Seatbelt { profile })
        } else if cfg!(target_os = "linux") {
            Self::compile_linux(input, mandatory_deny)
        } else {
            Ok(CompiledPolicy::PassThrough)
        }
    }

    fn read_denies<'a>(input: &'a PolicyInput, mandatory_deny: &'a [String]) -> Vec<&'a str> {
        input
            .read_deny
            .iter()
            .chain(mandatory_deny.iter())
            .map(String::as_str)
            .collect()
    }

    fn render_rule(pattern: &str) -> Result<CompiledRule, CoreError> {
        let is_glob = pattern.contains(['*', '?', '[']);
        let matcher = if is_glob {
            let regex = glob_to_regex(pattern);
            Regex::new(&regex)
                .map_err(|e| CoreError::PolicyCompileError(format!("invalid glob {}: {}", pattern, e)))?;
            format!("(regex #\"{}\")", escape_seatbelt_regex(&regex))
        } else {
            format!("(subpath {})", json_quote(pattern))
        };
        Ok(CompiledRule {
            matcher,
            log_tag: Some(format!("deny:{}", pattern)),
        })
    }

    fn compile_macos(input: &PolicyInput, mandatory_deny: &[String]) -> CoreResult<String> {
        let mut lines = Vec::new();
        lines.push("(version 1)".to_string());
        lines.push("(deny default)".to_string());

        // Baseline allowances every wrapped process needs.
        lines.push("(allow process-fork)".to_string());
        lines.push("(allow process-exec (subprocess))".to_string());
        lines.push("(allow signal (target self))".to_string());
        lines.push("(allow file-read-metadata)".to_string());
        lines.push("(allow file-read* (literal \"/dev/null\"))".to_string());
        lines.push("(allow file-write* (literal \"/dev/null\"))".to_string());
        lines.push("(allow user-preference-read)".to_string());
        lines.push(
            "(allow mach-lookup (global-name \"com.apple.system.notification_center\"))"
                .to_string(),
        );
        lines.push("(allow sysctl-read)".to_string());
        lines.push("(allow file-read* (subpath \"/usr/lib\"))".to_string());
        lines.push("(allow file-read* (subpath \"/System/Library\"))".to_string());

        let read_denies = Self::read_denies(input, mandatory_deny);
        if read_denies.is_empty() {
            lines.push("(allow file-read*)".to_string());
        } else {
            lines.push("(allow file-read*)".to_string());
            for pattern in &read_denies {
                let rule = Self::render_rule(pattern)?;
                lines.push(format!(
                    "(deny file-read* {} (with message \"{}\"))",
                    rule.matcher,
                    rule.log_tag.unwrap()
                ));
            }
        }

        if input.write_allow.is_empty() {
            lines.push("(allow file-write*)".to_string());
        } else {
            for pattern in &input.write_allow {
                let rule = Self::render_rule(pattern)?;
                lines.push(format!("(allow file-write* {})", rule.matcher));
            }
            for pattern in &input.write_deny_within_allow {
                let rule = Self::render_rule(pattern)?;
                lines.push(format!(
                    "(deny file-write* {} (with message \"{}\"))",
                    rule.matcher,
                    rule.log_tag.unwrap()
                ));
            }
            if let Ok(tmpdir) = std::env::var("TMPDIR") {
                if let Some(variants) = tmpdir_allowance(&tmpdir) {
                    for variant in variants {
                        lines.push(format!(
                            "(allow file-write* (subpath {}))",
                            json_quote(&variant)
                        ));
                    }
                }
            }
        }

        if input.allow_network {
            lines.push("(allow network-outbound)".to_string());
            if input.allow_local_binding {
                lines.push("(allow network-inbound (local ip))".to_string());
            }
        } else {
            lines.push("(deny network* (with message \"deny:network\"))".to_string());
        }

        if input.allow_unix_sockets.is_empty() {
            lines.push("(deny system-socket (with message \"deny:unix-socket\"))".to_string());
        } else {
            for socket in &input.allow_unix_sockets {
                lines.push(format!(
                    "(allow file-read* file-write* (literal {}))",
                    json_quote(socket)
                ));
            }
        }

        // Ancestor unlink-deny rules protect every denied path/glob's static
        // prefix from a rename-based bypass.
        let all_denies: Vec<&str> = read_denies
            .iter()
            .copied()
            .chain(input.write_deny_within_allow.iter().map(String::as_str))
            .collect();
        let mut seen = std::collections::HashSet::new();
        for pattern in all_denies {
            let prefix = static_prefix(pattern);
            for ancestor in ancestors(prefix) {
                if seen.insert(ancestor.clone()) {
                    lines.push(format!(
                        "(deny file-write-unlink (subpath {}) (with message \"deny:ancestor-unlink:{}\"))",
                        json_quote(&ancestor),
                        ancestor
                    ));
                }
            }
        }

        Ok(lines.join("\n"))
    }

    fn compile_linux(input: &PolicyInput, mandatory_deny: &[String]) -> CoreResult<CompiledPolicy> {
        let mut argv = vec![
            "--unshare-pid".to_string(),
            "--unshare-uts".to_string(),
            "--unshare-ipc".to_string(),
            "--die-with-parent".to_string(),
            "--proc".to_string(),
            "/proc".to_string(),
            "--dev".to_string(),
            "/dev".to_string(),
            "--ro-bind".to_string(),
            "/usr".to_string(),
            "/usr".to_string(),
            "--ro-bind".to_string(),
            "/lib".to_string(),
            "/lib".to_string(),
        ];

        for pattern in &input.write_allow {
            if pattern.contains(['*', '?', '[']) {
                return Err(CoreError::PolicyCompileError(format!(
                    "bwrap bind mounts require literal paths, got glob {}",
                    pattern
                )));
            }
            argv.push("--bind".to_string());
            argv.push(pattern.clone());
            argv.push(pattern.clone());
        }

        let all_denies = Self::read_denies(input, mandatory_deny);
        for pattern in &all_denies {
            Regex::new(&glob_to_regex(pattern))
                .map_err(|e| CoreError::PolicyCompileError(format!("invalid glob {}: {}", pattern, e)))?;
        }

        if !input.allow_network {
            argv.push("--unshare-net".to_string());
        }

        let mut env = HashMap::new();
        if input.allow_network {
            if let Some(port) = input.http_proxy_port {
                let proxy = format!("http://127.0.0.1:{}", port);
                env.insert("HTTP_PROXY".to_string(), proxy.clone());
                env.insert("HTTPS_PROXY".to_string(), proxy.clone());
                env.insert("ALL_PROXY".to_string(), proxy);
            }
            if let Some(port) = input.socks_proxy_port {
                env.insert("ALL_PROXY".to_string(), format!("socks5://127.0.0.1:{}", port));
            }
        }

        let seccomp_filter_path = seccomp_filter_for(input.allow_unix_sockets.is_empty());

        Ok(CompiledPolicy::Bwrap {
            argv,
            seccomp_filter_path,
            env,
        })
    }
}

/// Pick the vendored BPF filter matching the unix-socket policy. Whether the
/// filter actually enforces the block is a property of the vendored blob,
/// not of this compiler.
fn seccomp_filter_for(block_unix_sockets: bool) -> PathBuf {
    let name = if block_unix_sockets {
        "no-unix-sockets.bpf"
    } else {
        "default.bpf"
    };
    PathBuf::from("vendor/seccomp").join(name)
}

fn json_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

fn escape_seatbelt_regex(pattern: &str) -> String {
    pattern.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_to_regex_matches_scenario_corpus() {
        assert_eq!(glob_to_regex("src/**/*.ts"), r"^src/(.*/)?[^/]*\.ts$");
        assert_eq!(glob_to_regex("file[0-9].txt"), r"^file[0-9]\.txt$");
        assert_eq!(glob_to_regex("a[bc"), r"^a\[bc$");
    }

    #[test]
    fn star_never_matches_slash() {
        let re = Regex::new(&glob_to_regex("*.txt")).unwrap();
        assert!(re.is_match("a.txt"));
        assert!(!re.is_match("a/b.txt"));
    }

    #[test]
    fn doublestar_matches_slash() {
        let re = Regex::new(&glob_to_regex("a/**/b")).unwrap();
        assert!(re.is_match("a/b"));
        assert!(re.is_match("a/x/y/b"));
    }

    #[test]
    fn ancestors_stop_before_root() {
        assert_eq!(
            ancestors("/home/u/.ssh"),
            vec!["/home/u/.ssh", "/home/u", "/home"]
        );
    }

    #[test]
    fn static_prefix_strips_glob_suffix() {
        assert_eq!(static_prefix("/home/u/.ssh/**"), "/home/u/.ssh");
        assert_eq!(static_prefix("/Users/alice/.aws/**"), "/Users/alice/.aws");
    }

    #[test]
    fn tmpdir_allowance_matches_both_spellings() {
        let variants = tmpdir_allowance("/var/folders/ab/cdef/T/").unwrap();
        assert_eq!(variants[0], "/var/folders/ab/cdef");
        assert_eq!(variants[1], "/private/var/folders/ab/cdef");
        assert!(tmpdir_allowance("/tmp").is_none());
    }

    #[test]
    fn macos_policy_contains_ancestor_unlink_denies() {
        let input = PolicyInput {
            read_deny: vec![],
            write_allow: vec!["/Users/alice/project".to_string()],
            write_deny_within_allow: vec!["/Users/alice/.aws/**".to_string()],
            allow_network: false,
            allow_unix_sockets: vec![],
            allow_local_binding: false,
            http_proxy_port: None,
            socks_proxy_port: None,
        };
        let profile = PolicyCompiler::compile_macos(&input, &[]).unwrap();
        assert!(profile.contains("(version 1)"));
        assert!(profile.contains("(deny default)"));
        assert!(profile.contains("deny:ancestor-unlink:/Users/alice/.aws"));
        assert!(profile.contains("deny:ancestor-unlink:/Users/alice"));
        assert!(profile.contains("deny:ancestor-unlink:/Users"));
        assert!(profile.contains("/Users/alice/project"));

        // A write-only restriction must not also deny reads under the path.
        assert!(!profile.contains("(deny file-read* "));
    }
}
