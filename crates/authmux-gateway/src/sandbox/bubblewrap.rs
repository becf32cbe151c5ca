//! Linux bubblewrap backend

use std::path::PathBuf;
use std::sync::Arc;

use authmux_core::Invocation;

use super::{path_arg, BinaryLocator, SandboxBackend};

const BWRAP: &str = "bwrap";

/// Read-only host filesystem with private `/dev`, `/proc` and `/tmp`; network
/// is shared because the helper must reach the provider and bind its
/// callback port.
pub struct BubblewrapBackend {
    locator: Arc<dyn BinaryLocator>,
    writable_paths: Vec<PathBuf>,
}

impl BubblewrapBackend {
    pub const NAME: &'static str = "bubblewrap";

    pub fn new(locator: Arc<dyn BinaryLocator>, writable_paths: Vec<PathBuf>) -> Self {
        Self {
            locator,
            writable_paths,
        }
    }
}

impl SandboxBackend for BubblewrapBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        self.locator.locate(BWRAP).is_some()
    }

    fn wrap(&self, invocation: &Invocation) -> Invocation {
        let program = self
            .locator
            .locate(BWRAP)
            .map(|p| path_arg(&p))
            .unwrap_or_else(|| BWRAP.to_string());

        let mut args: Vec<String> = [
            "--unshare-all",
            "--share-net",
            "--die-with-parent",
            "--new-session",
            "--ro-bind",
            "/",
            "/",
            "--dev",
            "/dev",
            "--proc",
            "/proc",
            "--tmpfs",
            "/tmp",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        for path in &self.writable_paths {
            let p = path_arg(path);
            args.push("--bind-try".to_string());
            args.push(p.clone());
            args.push(p);
        }

        args.push("--".to_string());
        args.push(invocation.program.clone());
        args.extend(invocation.args.iter().cloned());

        Invocation {
            program,
            args,
            env: invocation.env.clone(),
        }
    }
}
