//! Source watcher: delivers the full text of one file on start and after
//! every modification
//!
//! The parent directory is watched rather than the file itself so editors
//! that save by writing a temp file and renaming it over the original keep
//! triggering updates.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────┐
//! │   notify    │────>│  debouncer  │────>│  Driver  │
//! │   watcher   │     │  (100ms)    │     │ (mpsc)   │
//! └─────────────┘     └─────────────┘     └──────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use tokio::sync::mpsc;

use crate::error::{LiveCellError, Result};

/// Configuration for the source watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration (default: 100ms)
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(100),
        }
    }
}

/// Watches one source file
pub struct SourceWatcher {
    path: PathBuf,
    config: WatcherConfig,
    running: Arc<AtomicBool>,
}

impl SourceWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, WatcherConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        Self {
            path: path.into(),
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start watching.
    ///
    /// The current contents are sent first. After that every debounced
    /// change that leaves the file readable sends its contents, even when
    /// they match what was sent before. The
    /// watcher thread exits when the handle is stopped or dropped, or when
    /// the receiving side of `sources` closes.
    pub fn start(&self, sources: mpsc::Sender<String>) -> Result<WatcherHandle> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(WatcherHandle {
                running: Arc::clone(&self.running),
            });
        }

        let path = match std::fs::canonicalize(&self.path) {
            Ok(path) => path,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(missing_or_io(&self.path, e));
            }
        };
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, rx) = std::sync::mpsc::channel();
        let watch = new_debouncer(self.config.debounce_duration, tx).and_then(|mut debouncer| {
            debouncer
                .watcher()
                .watch(&dir, RecursiveMode::NonRecursive)
                .map(|()| debouncer)
        });
        let debouncer = match watch {
            Ok(debouncer) => debouncer,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(LiveCellError::Watch {
                    message: e.to_string(),
                });
            }
        };
        // Read only after the watch is registered so no write can fall
        // between the two.
        let initial = match read_source(&path) {
            Ok(text) => text,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        tracing::info!(path = %path.display(), "watching source file");

        let running = Arc::clone(&self.running);
        std::thread::spawn(move || {
            if sources.blocking_send(initial).is_err() {
                running.store(false, Ordering::SeqCst);
                return;
            }

            while running.load(Ordering::SeqCst) {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(Ok(events)) => {
                        let touched = events.iter().any(|event| {
                            matches!(event.kind, DebouncedEventKind::Any)
                                && event.path.file_name() == path.file_name()
                        });
                        if !touched {
                            continue;
                        }
                        let text = match read_source(&path) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::debug!(error = %e, "source not readable yet");
                                continue;
                            }
                        };
                        tracing::debug!(bytes = text.len(), "source changed");
                        if sources.blocking_send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = ?e, "watcher error");
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }

            running.store(false, Ordering::SeqCst);
            drop(debouncer);
            tracing::debug!("watcher stopped");
        });

        Ok(WatcherHandle {
            running: Arc::clone(&self.running),
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Read the whole file, mapping a missing file to `FileNotFound`
pub fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| missing_or_io(path, e))
}

fn missing_or_io(path: &Path, e: std::io::Error) -> LiveCellError {
    if e.kind() == std::io::ErrorKind::NotFound {
        LiveCellError::FileNotFound {
            path: path.display().to_string(),
        }
    } else {
        LiveCellError::Io(e)
    }
}

/// Handle for controlling a running watcher
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
