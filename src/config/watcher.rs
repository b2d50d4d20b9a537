//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by rename still trigger a reload. Only validated configs whose
//! text differs from the last applied one are forwarded.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::ClientConfig;

/// Monitors the configuration file and emits freshly validated configs.
pub struct ConfigWatcher {
    reloader: Reloader,
    update_tx: mpsc::UnboundedSender<ClientConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates. The file
    /// as it reads now counts as already applied.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ClientConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                reloader: Reloader::new(path),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.reloader.path.clone();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tx = self.update_tx;
        let reloader = Mutex::new(self.reloader);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event.paths.iter().any(|p| p.file_name() == path.file_name());
                    if !relevant {
                        return;
                    }
                    if let Some(config) = reloader.lock().reload() {
                        let _ = tx.send(config);
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(dir = ?dir, "Config watcher started");
        Ok(watcher)
    }
}

struct Reloader {
    path: PathBuf,
    last_applied: Option<String>,
}

impl Reloader {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last_applied: fs::read_to_string(path).ok(),
        }
    }

    /// Re-read the file. `None` when unreadable, unchanged or invalid.
    fn reload(&mut self) -> Option<ClientConfig> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Config file unreadable, skipping reload");
                return None;
            }
        };
        if self.last_applied.as_deref() == Some(content.as_str()) {
            return None;
        }

        match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = ?self.path, "Config reloaded");
                self.last_applied = Some(content);
                Some(config)
            }
            Err(ConfigError::Validation(errors)) => {
                for error in &errors {
                    tracing::warn!(field = %error.field, problem = %error.message, "Rejected config value");
                }
                tracing::error!(
                    problems = errors.len(),
                    "Config reload rejected, keeping current configuration"
                );
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                None
            }
        }
    }
}
