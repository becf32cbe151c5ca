//! Sandbox selection for OAuth helper processes
//!
//! Backends form an ordered chain; the first one whose binary is installed
//! wraps the invocation. When none is available the invocation runs as-is and
//! the caller is told so. Absence of a backend is never an error.

mod bubblewrap;
mod seatbelt;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use authmux_core::{Invocation, SandboxSettings};
use tracing::{debug, info};

pub use bubblewrap::BubblewrapBackend;
pub use seatbelt::SeatbeltBackend;

/// Finds executables on the host. Injected so availability is testable.
pub trait BinaryLocator: Send + Sync {
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Looks programs up on `PATH`
#[derive(Debug, Default, Clone, Copy)]
pub struct WhichLocator;

impl BinaryLocator for WhichLocator {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// One sandbox technology
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Rewrite `invocation` to run confined. Must not change the program's
    /// stdout/stderr framing.
    fn wrap(&self, invocation: &Invocation) -> Invocation;
}

/// Outcome of [`SandboxAdapter::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxDecision {
    pub invocation: Invocation,
    /// Backend that wrapped the invocation; `None` means unsandboxed
    pub backend: Option<&'static str>,
}

impl SandboxDecision {
    pub fn is_sandboxed(&self) -> bool {
        self.backend.is_some()
    }
}

pub struct SandboxAdapter {
    backends: Vec<Box<dyn SandboxBackend>>,
}

impl SandboxAdapter {
    pub fn new(backends: Vec<Box<dyn SandboxBackend>>) -> Self {
        Self { backends }
    }

    /// Build the chain from settings using `PATH` lookup
    pub fn from_settings(settings: &SandboxSettings) -> Self {
        Self::with_locator(settings, Arc::new(WhichLocator))
    }

    /// Build the chain from settings. Backends appear in the order listed in
    /// `settings.backends`; unknown names are skipped.
    pub fn with_locator(settings: &SandboxSettings, locator: Arc<dyn BinaryLocator>) -> Self {
        let writable = expand_writable_paths(&settings.writable_paths);
        let mut backends: Vec<Box<dyn SandboxBackend>> = Vec::new();

        for name in &settings.backends {
            match name.as_str() {
                BubblewrapBackend::NAME => backends.push(Box::new(BubblewrapBackend::new(
                    locator.clone(),
                    writable.clone(),
                ))),
                SeatbeltBackend::NAME => backends.push(Box::new(SeatbeltBackend::new(
                    locator.clone(),
                    writable.clone(),
                ))),
                other => debug!("[Sandbox] Ignoring unknown backend '{}'", other),
            }
        }

        Self::new(backends)
    }

    /// No backends at all; every invocation runs unsandboxed
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// The collaborator contract: wrapped invocation, or `None` when no
    /// backend is available or sandboxing was not requested.
    pub fn try_wrap(&self, invocation: &Invocation, requested: bool) -> Option<SandboxDecision> {
        if !requested {
            return None;
        }

        let backend = self.backends.iter().find(|b| b.is_available())?;
        let wrapped = backend.wrap(invocation);
        info!(
            backend = backend.name(),
            program = %invocation.program,
            "[Sandbox] Wrapping helper invocation"
        );
        Some(SandboxDecision {
            invocation: wrapped,
            backend: Some(backend.name()),
        })
    }

    /// Like [`try_wrap`](Self::try_wrap) but falls back to the unmodified
    /// invocation.
    pub fn apply(&self, invocation: &Invocation, requested: bool) -> SandboxDecision {
        self.try_wrap(invocation, requested)
            .unwrap_or_else(|| SandboxDecision {
                invocation: invocation.clone(),
                backend: None,
            })
    }
}

/// Expand `~` and drop duplicates, keeping order
fn expand_writable_paths(paths: &[String]) -> Vec<PathBuf> {
    let home = dirs::home_dir();
    let mut expanded: Vec<PathBuf> = Vec::new();

    for raw in paths {
        let path = match (raw.strip_prefix("~"), &home) {
            (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
            (Some(_), None) => continue,
            (None, _) => PathBuf::from(raw),
        };
        if !expanded.contains(&path) {
            expanded.push(path);
        }
    }
    expanded
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
