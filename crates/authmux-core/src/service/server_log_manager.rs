//! Per-server operator log files
//!
//! Helper output never reaches the caller; operators inspect it here. Each
//! server gets `<base>/<server>/current.log` (JSON Lines), rotated by size
//! and optionally gzipped.

use crate::{LogConfig, LogLevel, ServerLog};
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CURRENT_LOG: &str = "current.log";

pub struct ServerLogManager {
    config: LogConfig,
    writers: Arc<RwLock<HashMap<String, Arc<Mutex<ServerLogWriter>>>>>,
}

impl ServerLogManager {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            writers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Server ids are opaque; keep them to one path component on every OS
    /// One path component under `base_dir`; `.`, `..` and empty ids map to `_`
    fn sanitize_server_id(server_id: &str) -> String {
        if server_id.is_empty() || server_id.chars().all(|c| c == '.') {
            return "_".to_string();
        }
        server_id
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' | '<' | '>' | '|' | '?' | '*' | '"' => '_',
                c => c,
            })
            .collect()
    }

    fn log_dir(&self, server_id: &str) -> PathBuf {
        self.config
            .base_dir
            .join(Self::sanitize_server_id(server_id))
    }

    async fn get_writer(&self, server_id: &str) -> Result<Arc<Mutex<ServerLogWriter>>> {
        {
            let writers = self.writers.read().await;
            if let Some(writer) = writers.get(server_id) {
                return Ok(writer.clone());
            }
        }

        let mut writers = self.writers.write().await;
        if let Some(writer) = writers.get(server_id) {
            return Ok(writer.clone());
        }

        let log_dir = self.log_dir(server_id);
        tokio::fs::create_dir_all(&log_dir)
            .await
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let writer = Arc::new(Mutex::new(ServerLogWriter::open(log_dir, &self.config).await?));
        writers.insert(server_id.to_string(), writer.clone());
        Ok(writer)
    }

    pub async fn append(&self, server_id: &str, log: ServerLog) -> Result<()> {
        let writer = self.get_writer(server_id).await?;
        let mut w = writer.lock().await;
        w.write(&log).await
    }

    /// Most recent entries of `current.log`, oldest first
    pub async fn read_logs(
        &self,
        server_id: &str,
        limit: usize,
        level_filter: Option<LogLevel>,
    ) -> Result<Vec<ServerLog>> {
        self.read_filtered(server_id, limit, |log| {
            level_filter.map_or(true, |lvl| log.level >= lvl)
        })
        .await
    }

    /// Most recent entries produced by one session, oldest first
    pub async fn read_session(
        &self,
        server_id: &str,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ServerLog>> {
        self.read_filtered(server_id, limit, |log| log.session_id == Some(session_id))
            .await
    }

    async fn read_filtered<F>(&self, server_id: &str, limit: usize, keep: F) -> Result<Vec<ServerLog>>
    where
        F: Fn(&ServerLog) -> bool,
    {
        let current_log = self.log_file(server_id);
        if !current_log.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&current_log)
            .await
            .with_context(|| format!("Failed to read {}", current_log.display()))?;
        let mut logs: Vec<ServerLog> = content
            .lines()
            .rev()
            .filter_map(|line| match serde_json::from_str::<ServerLog>(line) {
                Ok(log) => Some(log),
                Err(e) => {
                    debug!("[ServerLog] Skipping unparseable line: {}", e);
                    None
                }
            })
            .filter(|log| keep(log))
            .take(limit)
            .collect();

        logs.reverse();
        Ok(logs)
    }

    pub async fn clear_logs(&self, server_id: &str) -> Result<()> {
        self.writers.write().await.remove(server_id);

        let log_dir = self.log_dir(server_id);
        if log_dir.exists() {
            tokio::fs::remove_dir_all(&log_dir)
                .await
                .context("Failed to remove log directory")?;
            info!(server_id = %server_id, "[ServerLog] Cleared logs");
        }
        Ok(())
    }

    pub fn log_file(&self, server_id: &str) -> PathBuf {
        self.log_dir(server_id).join(CURRENT_LOG)
    }
}

struct ServerLogWriter {
    log_dir: PathBuf,
    current_file: File,
    current_size: u64,
    max_file_size: u64,
    max_files: usize,
    compress: bool,
}

impl ServerLogWriter {
    async fn open(log_dir: PathBuf, config: &LogConfig) -> Result<Self> {
        let file = open_append(&log_dir.join(CURRENT_LOG)).await?;
        let current_size = file.metadata().await?.len();

        Ok(Self {
            log_dir,
            current_file: file,
            current_size,
            max_file_size: config.max_file_size,
            max_files: config.max_files,
            compress: config.compress,
        })
    }

    async fn write(&mut self, log: &ServerLog) -> Result<()> {
        let mut line = serde_json::to_string(log).context("Failed to serialize log entry")?;
        line.push('\n');
        let line_len = line.len() as u64;

        if self.current_size > 0 && self.current_size + line_len > self.max_file_size {
            self.rotate().await?;
        }

        self.current_file.write_all(line.as_bytes()).await?;
        self.current_file.flush().await?;
        self.current_size += line_len;
        Ok(())
    }

    async fn rotate(&mut self) -> Result<()> {
        debug!("[ServerLog] Rotating {}", self.log_dir.display());
        self.current_file.shutdown().await?;

        let current_path = self.log_dir.join(CURRENT_LOG);
        // Millisecond stamp plus a short suffix; rapid rotations must not collide
        let rotated_path = self.log_dir.join(format!(
            "{}-{}.log",
            chrono::Utc::now().format("%Y%m%d-%H%M%S%3f"),
            &Uuid::new_v4().simple().to_string()[..6]
        ));
        tokio::fs::rename(&current_path, &rotated_path).await?;

        if self.compress {
            tokio::spawn(async move {
                if let Err(e) = compress_log_file(&rotated_path).await {
                    warn!("[ServerLog] Failed to compress {}: {}", rotated_path.display(), e);
                }
            });
        }

        self.prune_rotated().await?;
        self.current_file = open_append(&current_path).await?;
        self.current_size = 0;
        Ok(())
    }

    async fn prune_rotated(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.log_dir).await?;
        let mut rotated = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_rotated =
                name.ends_with(".log.gz") || (name.ends_with(".log") && name != CURRENT_LOG);
            if !is_rotated {
                continue;
            }
            if let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) {
                rotated.push((path, modified));
            }
        }

        if rotated.len() <= self.max_files {
            return Ok(());
        }

        rotated.sort_by_key(|(_, modified)| *modified);
        let excess = rotated.len() - self.max_files;
        for (path, _) in rotated.into_iter().take(excess) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("[ServerLog] Removed {}", path.display()),
                Err(e) => warn!("[ServerLog] Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))
}

async fn compress_log_file(path: &Path) -> Result<()> {
    let gz_path = path.with_extension("log.gz");
    let content = tokio::fs::read(path).await?;

    let target = gz_path.clone();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&target)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&content)?;
        encoder.finish()?;
        Ok::<_, anyhow::Error>(())
    })
    .await??;

    tokio::fs::remove_file(path).await?;
    debug!("[ServerLog] Compressed {} -> {}", path.display(), gz_path.display());
    Ok(())
}
