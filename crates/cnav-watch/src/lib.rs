//! cnav-watch: Filesystem watcher for the dirty controller.
//!
//! Uses `notify` with debouncing to turn raw filesystem events into
//! change/removal notifications for C-family sources. The debounce window
//! is the project's dirty coalescing window, so bursts (branch switches,
//! build outputs touching headers) arrive as one batch.

use crossbeam_channel::Receiver;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cnav_core::CnavError;

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Contents changed; feed to `Project::dirty`.
    Changed(PathBuf),
    /// File disappeared; feed to `Project::remove`.
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Changed(path) | Self::Removed(path) => path,
        }
    }
}

/// Directory names that never contain project sources.
const IGNORE_DIRS: &[&str] = &[
    ".git",
    ".svn",
    "build",
    "cmake-build-debug",
    "cmake-build-release",
    ".cache",
    "node_modules",
];

/// C-family source and header extensions.
const WATCHABLE_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "cxx", "h", "hh", "hpp", "hxx", "inl", "ipp", "m", "mm",
];

/// Check if a path looks like a C-family source or header.
pub fn is_watchable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| WATCHABLE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Check if a path is inside a directory we never index.
pub fn should_ignore(path: &Path) -> bool {
    for component in path.components() {
        if let std::path::Component::Normal(name) = component {
            if let Some(name) = name.to_str() {
                if IGNORE_DIRS.contains(&name) {
                    return true;
                }
            }
        }
    }
    false
}

/// Watches a project root and emits debounced change events.
pub struct FileWatcher {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    receiver: Receiver<WatchEvent>,
}

impl FileWatcher {
    /// Watch `root` recursively, batching events within `window`.
    pub fn new(root: &Path, window: Duration) -> Result<Self, CnavError> {
        let (event_tx, receiver) = crossbeam_channel::unbounded::<WatchEvent>();

        let mut debouncer = new_debouncer(
            window,
            move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                match res {
                    Ok(events) => {
                        let mut seen = HashSet::new();
                        for event in events {
                            let path = event.path;
                            if !seen.insert(path.clone()) {
                                continue;
                            }
                            if should_ignore(&path) || !is_watchable(&path) {
                                continue;
                            }
                            let watch_event = match event.kind {
                                DebouncedEventKind::Any => {
                                    if path.exists() {
                                        WatchEvent::Changed(path)
                                    } else {
                                        WatchEvent::Removed(path)
                                    }
                                }
                                _ => WatchEvent::Changed(path),
                            };
                            let _ = event_tx.send(watch_event);
                        }
                    }
                    Err(e) => {
                        tracing::error!("watch error: {e}");
                    }
                }
            },
        )
        .map_err(|e| CnavError::Watch(format!("failed to create debouncer: {e}")))?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)
            .map_err(|e| CnavError::Watch(format!("failed to watch {}: {e}", root.display())))?;

        tracing::info!("watching {} for changes", root.display());

        Ok(Self {
            _debouncer: debouncer,
            receiver,
        })
    }

    /// Receiver for watch events. Wire `Changed` paths into
    /// `Project::dirty` and `Removed` paths into `Project::remove`.
    pub fn receiver(&self) -> &Receiver<WatchEvent> {
        &self.receiver
    }
}
