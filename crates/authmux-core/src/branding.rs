//! Centralized branding constants
//!
//! All product naming and default on-disk locations come from this module.

use std::path::PathBuf;

/// User-facing display name
pub const DISPLAY_NAME: &str = "AuthMux";

/// Reverse-domain identifier, used for the data directory name
pub const IDENTIFIER: &str = "com.authmux.app";

/// Prefix for rotated application log files (e.g. `authmux.2026-01-22.log`)
pub const LOG_PREFIX: &str = "authmux";

/// Prefix for settings overrides read from the environment
pub const ENV_PREFIX: &str = "AUTHMUX_";

/// Get the local data directory for this app
///
/// - Windows: %LOCALAPPDATA%/<identifier>/
/// - macOS: ~/Library/Application Support/<identifier>/
/// - Linux: ~/.local/share/<identifier>/
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(IDENTIFIER)
}

/// Application log directory (tracing output)
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Per-server helper output logs (operator-only, never shown to end users)
pub fn server_logs_dir() -> PathBuf {
    logs_dir().join("servers")
}
