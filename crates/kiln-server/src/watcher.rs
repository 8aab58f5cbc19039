//! File watching for rebuilds.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// Events emitted by the file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Removed(p) => p,
        }
    }
}

/// Recursive watcher over the source tree.
///
/// Every event is forwarded; coalescing bursts into one rebuild is left to
/// the consumer.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `paths`, skipping events under any of `ignore`.
    ///
    /// Returns the watcher and a channel to receive events.
    pub fn new(
        paths: &[PathBuf],
        ignore: Vec<PathBuf>,
    ) -> Result<(Self, async_mpsc::Receiver<WatchEvent>), std::io::Error> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
            } else {
                tracing::warn!("Not watching missing path {}", path.display());
            }
        }

        std::thread::spawn(move || {
            while let Ok(event) = sync_rx.recv() {
                for path in &event.paths {
                    if is_ignored(path, &ignore) {
                        continue;
                    }
                    if let Some(e) = classify_event(path, &event.kind) {
                        if async_tx.blocking_send(e).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

fn is_ignored(path: &Path, ignore: &[PathBuf]) -> bool {
    ignore.iter().any(|dir| path.starts_with(dir))
        || path.components().any(|c| {
            let name = c.as_os_str();
            name == ".git" || name == "node_modules"
        })
}

/// Classify a notify event into a WatchEvent.
fn classify_event(path: &Path, kind: &notify::EventKind) -> Option<WatchEvent> {
    use notify::EventKind;

    match kind {
        EventKind::Create(_) => Some(WatchEvent::Created(path.to_path_buf())),
        EventKind::Remove(_) => Some(WatchEvent::Removed(path.to_path_buf())),
        EventKind::Modify(_) => Some(WatchEvent::Modified(path.to_path_buf())),
        _ => None,
    }
}
