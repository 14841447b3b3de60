//! Config file watcher.
//!
//! Watches a TOML config file for changes, debounces rapid modifications,
//! and reloads the configuration. Invalid configs are rejected and the last
//! good config stays current.
//!
//! Requires the `config-watch` feature.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;

use crate::{ConfigError, SafexecConfig};

/// Debounce interval for rapid file changes.
const DEBOUNCE_MS: u64 = 200;

/// Reloads a config file when it changes on disk.
pub struct ConfigWatcher {
    path: PathBuf,
    tx: watch::Sender<Arc<SafexecConfig>>,
    rx: watch::Receiver<Arc<SafexecConfig>>,
}

impl ConfigWatcher {
    /// Load the config at `path` and prepare to watch it.
    ///
    /// Fails if the initial load fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = SafexecConfig::from_file_with_env(&path)?;
        let (tx, rx) = watch::channel(Arc::new(config));
        Ok(Self { path, tx, rx })
    }

    /// A receiver that yields the latest config on each change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SafexecConfig>> {
        self.rx.clone()
    }

    pub fn current(&self) -> Arc<SafexecConfig> {
        self.rx.borrow().clone()
    }

    /// Start watching in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.watch_loop().await {
                tracing::error!(error = %e, "config watcher stopped");
            }
        })
    }

    async fn watch_loop(&self) -> Result<(), ConfigError> {
        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        let _ = notify_tx.blocking_send(());
                    }
                }
            })
            .map_err(|e| ConfigError::Invalid(format!("failed to create watcher: {e}")))?;

        // Editors that save by rename replace the inode, so watch the directory.
        let watch_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Invalid(format!("failed to watch directory: {e}")))?;

        tracing::info!(path = %self.path.display(), "watching config file");

        while notify_rx.recv().await.is_some() {
            tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
            while notify_rx.try_recv().is_ok() {}

            match SafexecConfig::from_file_with_env(&self.path) {
                Ok(config) => {
                    tracing::info!(path = %self.path.display(), "config reloaded");
                    let _ = self.tx.send(Arc::new(config));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "config reload failed, keeping previous config");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = "[sandbox]\nmax_steps = 5000\n";
    const MODIFIED: &str = "[sandbox]\nmax_steps = 9000\n\n[policy]\npreset = \"strict\"\n";

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn reloads_on_change() {
        let file = config_file(VALID);
        let watcher = ConfigWatcher::new(file.path()).unwrap();
        assert_eq!(watcher.current().sandbox.max_steps, Some(5000));
        let mut rx = watcher.subscribe();
        let handle = watcher.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(file.path(), MODIFIED).unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(3), rx.changed()).await;
        assert!(changed.is_ok(), "should detect file change within timeout");
        let config = rx.borrow().clone();
        assert_eq!(config.sandbox.max_steps, Some(9000));
        assert_eq!(config.policy.preset.as_deref(), Some("strict"));

        handle.abort();
    }

    #[tokio::test]
    async fn debounces_rapid_changes() {
        let file = config_file(VALID);
        let watcher = ConfigWatcher::new(file.path()).unwrap();
        let mut rx = watcher.subscribe();
        let handle = watcher.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        for i in 0..5 {
            let contents = format!("[sandbox]\nmax_steps = {}\n", 10_000 + i);
            std::fs::write(file.path(), contents).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let changed = tokio::time::timeout(Duration::from_secs(3), rx.changed()).await;
        assert!(changed.is_ok(), "should eventually detect changes");
        let config = rx.borrow().clone();
        assert!(config.sandbox.max_steps.unwrap_or(0) >= 10_000);

        handle.abort();
    }

    #[tokio::test]
    async fn invalid_config_keeps_previous() {
        let file = config_file(VALID);
        let watcher = ConfigWatcher::new(file.path()).unwrap();
        let mut rx = watcher.subscribe();
        let handle = watcher.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(file.path(), "[policy]\npreset = \"paranoid\"\n").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let config = rx.borrow_and_update().clone();
        assert_eq!(config.sandbox.max_steps, Some(5000));

        handle.abort();
    }

    #[tokio::test]
    async fn deleted_file_keeps_previous() {
        let file = config_file(VALID);
        let path = file.path().to_path_buf();
        let watcher = ConfigWatcher::new(&path).unwrap();
        let mut rx = watcher.subscribe();
        let handle = watcher.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let config = rx.borrow_and_update().clone();
        assert_eq!(config.sandbox.max_steps, Some(5000));

        handle.abort();
    }

    #[test]
    fn initial_load_errors_surface() {
        let file = config_file("not toml {{{");
        assert!(matches!(
            ConfigWatcher::new(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
