//! Orchestrator settings
//!
//! Loaded from an optional JSON file, then overridden by `AUTHMUX_*`
//! environment variables. Every field has a default so an empty file (or no
//! file at all) yields a working configuration.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::DuplicatePolicy;
use crate::branding::ENV_PREFIX;

/// Well-known callback port for Linear's OAuth app registration
pub const LINEAR_CALLBACK_PORT: u16 = 8080;

/// Default loopback port the bridge tool binds for the OAuth redirect
pub const DEFAULT_CALLBACK_PORT: u16 = 3334;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OAuthSettings {
    /// Bounds the caller-facing wait for the first signal
    pub detection_timeout_secs: u64,
    /// Bounds total session lifetime before forced `TimedOut`
    pub session_timeout_secs: u64,
    /// Delay between a terminal transition and removal from the registry
    pub cleanup_delay_ms: u64,
    /// SIGTERM -> SIGKILL escalation window
    pub terminate_grace_ms: u64,
    /// Cap on captured helper output per session
    pub output_buffer_limit: usize,
    /// Rolling window the URL detector scans
    pub scan_window: usize,
    /// Idle time after which a trailing partial line is handed to the scanner
    pub partial_line_flush_ms: u64,
    /// Quiet time after which an unterminated line counts as complete. Helpers
    /// may pause mid-write, so this is well above `partial_line_flush_ms`.
    pub output_settle_ms: u64,
    /// Program names recognised as remote-MCP bridge tools
    pub bridge_tools: Vec<String>,
    /// Flag appended for servers that do OAuth natively
    pub auth_flag: String,
    pub default_callback_port: u16,
    /// Host (or parent domain) -> fixed callback port
    pub provider_ports: BTreeMap<String, u16>,
    /// Extra token regexes; the first capture group is the token
    pub token_patterns: Vec<String>,
    /// Extra completion-marker regexes (success without a token)
    pub completion_patterns: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
    pub sandbox: SandboxSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SandboxSettings {
    /// Backends allowed to run, in preference order; unknown names are ignored
    pub backends: Vec<String>,
    /// Paths the helper may write (token caches, package caches). `~` expands
    /// to the home directory.
    pub writable_paths: Vec<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            backends: vec!["bubblewrap".to_string(), "seatbelt".to_string()],
            writable_paths: vec![
                "~/.mcp-auth".to_string(),
                "~/.npm".to_string(),
                "~/.cache".to_string(),
            ],
        }
    }
}

impl Default for OAuthSettings {
    fn default() -> Self {
        let mut provider_ports = BTreeMap::new();
        provider_ports.insert("linear.app".to_string(), LINEAR_CALLBACK_PORT);

        Self {
            detection_timeout_secs: 30,
            session_timeout_secs: 600,
            cleanup_delay_ms: 5_000,
            terminate_grace_ms: 2_000,
            output_buffer_limit: 64 * 1024,
            scan_window: 4 * 1024,
            partial_line_flush_ms: 150,
            output_settle_ms: 1_500,
            bridge_tools: vec!["mcp-remote".to_string()],
            auth_flag: "--auth".to_string(),
            default_callback_port: DEFAULT_CALLBACK_PORT,
            provider_ports,
            token_patterns: Vec::new(),
            completion_patterns: Vec::new(),
            duplicate_policy: DuplicatePolicy::Reattach,
            sandbox: SandboxSettings::default(),
        }
    }
}

impl OAuthSettings {
    /// Load settings from `path` (if given and present), apply environment
    /// overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read settings file {}", p.display()))?;
                let parsed: Self = serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid settings file {}", p.display()))?;
                info!("[Settings] Loaded {}", p.display());
                parsed
            }
            Some(p) => {
                warn!("[Settings] {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };

        settings.apply_env_overrides(std::env::vars());
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `AUTHMUX_*` overrides from an iterator of environment pairs.
    /// Unparseable values are logged and skipped.
    pub fn apply_env_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let applied = match name {
                "DETECTION_TIMEOUT_SECS" => parse_into(&value, &mut self.detection_timeout_secs),
                "SESSION_TIMEOUT_SECS" => parse_into(&value, &mut self.session_timeout_secs),
                "CLEANUP_DELAY_MS" => parse_into(&value, &mut self.cleanup_delay_ms),
                "TERMINATE_GRACE_MS" => parse_into(&value, &mut self.terminate_grace_ms),
                "OUTPUT_SETTLE_MS" => parse_into(&value, &mut self.output_settle_ms),
                "DEFAULT_CALLBACK_PORT" => parse_into(&value, &mut self.default_callback_port),
                "AUTH_FLAG" => {
                    self.auth_flag = value.clone();
                    true
                }
                "BRIDGE_TOOLS" => {
                    self.bridge_tools = split_list(&value);
                    true
                }
                "SANDBOX_BACKENDS" => {
                    self.sandbox.backends = split_list(&value);
                    true
                }
                _ => {
                    debug!("[Settings] Ignoring unknown override {}", key);
                    continue;
                }
            };
            if applied {
                debug!("[Settings] Override {}={}", key, value);
            } else {
                warn!("[Settings] Ignoring unparseable override {}={}", key, value);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.detection_timeout_secs == 0 || self.session_timeout_secs == 0 {
            bail!("Timeouts must be greater than zero");
        }
        if self.session_timeout_secs < self.detection_timeout_secs {
            bail!(
                "sessionTimeoutSecs ({}) must not be shorter than detectionTimeoutSecs ({})",
                self.session_timeout_secs,
                self.detection_timeout_secs
            );
        }
        if self.output_settle_ms < self.partial_line_flush_ms {
            bail!(
                "outputSettleMs ({}) must not be shorter than partialLineFlushMs ({})",
                self.output_settle_ms,
                self.partial_line_flush_ms
            );
        }
        if self.scan_window < 256 {
            bail!("scanWindow must be at least 256 bytes");
        }
        if self.output_buffer_limit == 0 {
            bail!("outputBufferLimit must be greater than zero");
        }
        for pattern in self.token_patterns.iter().chain(&self.completion_patterns) {
            Regex::new(pattern).with_context(|| format!("Invalid pattern: {}", pattern))?;
        }
        Ok(())
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_secs(self.detection_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn partial_line_flush(&self) -> Duration {
        Duration::from_millis(self.partial_line_flush_ms)
    }

    pub fn output_settle(&self) -> Duration {
        Duration::from_millis(self.output_settle_ms)
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.trim().parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
