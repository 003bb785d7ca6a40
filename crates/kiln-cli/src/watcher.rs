//! File system watcher for watch mode.
//!
//! Watches the root package tree and forwards debounced change events over
//! a channel. The engine cache and hidden files are filtered at the
//! watcher; generated to-source outputs are filtered by the watch loop,
//! which knows the graph.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// One file change, already relative-path normalized.
#[derive(Debug, Clone)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Modified(p) | FileChange::Created(p) | FileChange::Removed(p) => p,
        }
    }
}

/// Recursive watcher with per-path debouncing.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Watch `root` recursively. Returns the watcher (keep it alive) and
    /// the receiving end of the change channel.
    pub fn new(
        root: PathBuf,
        debounce: Duration,
    ) -> notify::Result<(FileWatcher, mpsc::Receiver<FileChange>)> {
        let (tx, rx) = mpsc::channel(256);
        let watch_root = root.clone();
        let mut last_event: Option<(PathBuf, Instant)> = None;

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let Ok(event) = result else {
                return;
            };
            for path in &event.paths {
                if Self::should_ignore(path, &watch_root) {
                    continue;
                }
                let now = Instant::now();
                if let Some((last_path, last_time)) = &last_event {
                    if last_path == path && now.duration_since(*last_time) < debounce {
                        continue;
                    }
                }
                last_event = Some((path.clone(), now));

                let change = match event.kind {
                    notify::EventKind::Create(_) => FileChange::Created(path.clone()),
                    notify::EventKind::Modify(_) => FileChange::Modified(path.clone()),
                    notify::EventKind::Remove(_) => FileChange::Removed(path.clone()),
                    _ => continue,
                };
                let _ = tx.blocking_send(change);
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((
            FileWatcher {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths outside the root, under hidden directories, or inside the
    /// engine cache are never interesting.
    fn should_ignore(path: &Path, root: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return true;
        };
        for component in relative.components() {
            if let Some(name) = component.as_os_str().to_str() {
                if name.starts_with('.') {
                    return true;
                }
            } else {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_engine_cache() {
        let root = PathBuf::from("/project");
        assert!(FileWatcher::should_ignore(
            Path::new("/project/.kiln/asset_graph.json"),
            &root
        ));
        assert!(FileWatcher::should_ignore(
            Path::new("/project/.git/HEAD"),
            &root
        ));
        assert!(!FileWatcher::should_ignore(
            Path::new("/project/web/a.txt"),
            &root
        ));
    }

    #[test]
    fn test_ignores_outside_root() {
        let root = PathBuf::from("/project");
        assert!(FileWatcher::should_ignore(
            Path::new("/elsewhere/web/a.txt"),
            &root
        ));
    }

    #[test]
    fn test_change_carries_path() {
        let path = PathBuf::from("/project/web/a.txt");
        assert_eq!(FileChange::Modified(path.clone()).path(), path.as_path());
        assert_eq!(FileChange::Removed(path.clone()).path(), path.as_path());
    }
}
