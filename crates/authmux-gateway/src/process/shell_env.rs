//! Child environment for helper processes
//!
//! Helpers get a minimal environment: a fixed allow-list of inherited
//! variables, the user's login-shell `PATH`, then the invocation's own env on
//! top. Hosts launched from a desktop session inherit a truncated `PATH`
//! (`/usr/bin:/bin`), which hides `npx`, Homebrew and nvm installs, so the
//! login shell is asked once and the answer cached.

use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Inherited variables. `XDG_*` is matched by prefix.
const INHERITED_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "SHELL", "LANG", "LC_ALL", "TMPDIR", "TERM",
    // Windows
    "SYSTEMROOT", "APPDATA", "LOCALAPPDATA", "USERPROFILE", "PATHEXT", "COMSPEC", "TEMP", "TMP",
];

static LOGIN_PATH: OnceLock<Option<String>> = OnceLock::new();

/// Login-shell `PATH` merged with the current one; `None` when it could not
/// be resolved (and always on Windows, where GUI apps get the full PATH).
pub fn login_shell_path() -> Option<&'static str> {
    LOGIN_PATH
        .get_or_init(|| {
            #[cfg(unix)]
            {
                resolve_login_path()
            }
            #[cfg(not(unix))]
            {
                None
            }
        })
        .as_deref()
}

/// Environment for a helper: allow-listed parent vars, resolved `PATH`,
/// then `overrides`.
pub fn child_environment(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env = inherited_environment(std::env::vars());
    if let Some(path) = login_shell_path() {
        env.insert("PATH".to_string(), path.to_string());
    }
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn inherited_environment<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(key, _)| {
            INHERITED_VARS.iter().any(|v| key.eq_ignore_ascii_case(v)) || key.starts_with("XDG_")
        })
        .collect()
}

#[cfg(unix)]
fn resolve_login_path() -> Option<String> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    debug!("[ShellEnv] Asking login shell {} for PATH", shell);

    // -i picks up nvm/volta init from rc files; some shells refuse it without a tty
    let resolved = query_shell_path(&shell, &["-l", "-i", "-c"])
        .or_else(|| query_shell_path(&shell, &["-l", "-c"]));

    let Some(shell_path) = resolved else {
        warn!("[ShellEnv] Could not resolve login PATH, keeping process PATH");
        return None;
    };

    let merged = merge_paths(&shell_path, &std::env::var("PATH").unwrap_or_default());
    info!(
        "[ShellEnv] Resolved PATH with {} entries",
        merged.split(':').count()
    );
    Some(merged)
}

#[cfg(unix)]
fn query_shell_path(shell: &str, flags: &[&str]) -> Option<String> {
    use std::process::{Command, Stdio};

    let output = Command::new(shell)
        .args(flags)
        .arg(r#"printf "%s" "$PATH""#)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let path = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!path.is_empty()).then_some(path)
        }
        Ok(out) => {
            debug!("[ShellEnv] {} {:?} exited with {}", shell, flags, out.status);
            None
        }
        Err(e) => {
            debug!("[ShellEnv] Failed to run {}: {}", shell, e);
            None
        }
    }
}

/// Order-preserving union; `primary` entries come first.
#[cfg(unix)]
fn merge_paths(primary: &str, secondary: &str) -> String {
    let mut merged: Vec<&str> = Vec::new();
    for entry in primary.split(':').chain(secondary.split(':')) {
        if !entry.is_empty() && !merged.contains(&entry) {
            merged.push(entry);
        }
    }
    merged.join(":")
}
