//! Per-server operator log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Operator log entry (stored as JSON Lines)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerLog {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "lvl")]
    pub level: LogLevel,

    #[serde(rename = "src")]
    pub source: LogSource,

    /// Session that produced the entry, if any
    #[serde(rename = "sid", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,

    #[serde(rename = "msg")]
    pub message: String,
}

impl ServerLog {
    pub fn new(level: LogLevel, source: LogSource, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source,
            session_id: None,
            message: message.into(),
        }
    }

    pub fn for_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogSource {
    /// Helper process stdout
    Stdout,
    /// Helper process stderr
    Stderr,
    /// Sandbox backend selection
    Sandbox,
    /// Spawn / exit / termination
    Process,
    /// Session state transitions
    OAuth,
}

/// Configuration for per-server log files
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub base_dir: PathBuf,
    /// Rotate `current.log` once it exceeds this many bytes
    pub max_file_size: u64,
    /// Rotated files kept per server
    pub max_files: usize,
    /// Gzip rotated files
    pub compress: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_dir: crate::branding::server_logs_dir(),
            max_file_size: 2 * 1024 * 1024,
            max_files: 10,
            compress: true,
        }
    }
}
