//! macOS seatbelt (`sandbox-exec`) backend

use std::path::PathBuf;
use std::sync::Arc;

use authmux_core::Invocation;

use super::{path_arg, BinaryLocator, SandboxBackend};

const SANDBOX_EXEC: &str = "sandbox-exec";

/// Directories every helper may write regardless of configuration
const BASE_WRITABLE: [&str; 4] = ["/private/tmp", "/private/var/folders", "/dev", "/tmp"];

pub struct SeatbeltBackend {
    locator: Arc<dyn BinaryLocator>,
    writable_paths: Vec<PathBuf>,
}

impl SeatbeltBackend {
    pub const NAME: &'static str = "seatbelt";

    pub fn new(locator: Arc<dyn BinaryLocator>, writable_paths: Vec<PathBuf>) -> Self {
        Self {
            locator,
            writable_paths,
        }
    }

    /// Allow everything except file writes outside the writable set
    pub fn profile(&self) -> String {
        let mut profile = String::from("(version 1)\n(allow default)\n(deny file-write*)\n(allow file-write*");
        let extra = self.writable_paths.iter().map(|p| path_arg(p));
        for path in BASE_WRITABLE.iter().map(|s| s.to_string()).chain(extra) {
            profile.push_str(&format!("\n    (subpath \"{}\")", escape(&path)));
        }
        profile.push_str(")\n");
        profile
    }
}

fn escape(path: &str) -> String {
    path.replace('\\', "\\\\").replace('"', "\\\"")
}

impl SandboxBackend for SeatbeltBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        self.locator.locate(SANDBOX_EXEC).is_some()
    }

    fn wrap(&self, invocation: &Invocation) -> Invocation {
        let program = self
            .locator
            .locate(SANDBOX_EXEC)
            .map(|p| path_arg(&p))
            .unwrap_or_else(|| SANDBOX_EXEC.to_string());

        let mut args = vec!["-p".to_string(), self.profile(), invocation.program.clone()];
        args.extend(invocation.args.iter().cloned());

        Invocation {
            program,
            args,
            env: invocation.env.clone(),
        }
    }
}
