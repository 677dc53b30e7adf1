//! Recursive directory enumeration with per-entry action callbacks.
//!
//! A [`DirWalker`] enumerates one directory in sorted order and invokes
//! a caller-provided action per entry, either synchronously or fanned
//! out over a [`ThreadPool`]. Actions steer the traversal through
//! [`Flow`] return codes; the parallel walk adds a shared abort flag
//! for cooperative cancellation across in-flight work.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::file::FileInfo;
use crate::pool::ThreadPool;

/// Traversal state surfaced to actions and returned from walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    /// Pre-dispatch notification on the walking thread (parallel walk
    /// only); the hook for cheap filtering without pool overhead.
    Queuing,
    /// Entry is visible to the caller.
    Opened,
    /// An action stopped the walk of the current directory.
    Stopped,
    /// An action aborted the entire traversal.
    Aborted,
    /// A directory could not be opened or an entry could not be read.
    Failed,
    /// Normal completion.
    Done,
}

/// Action return codes steering the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Do not descend into this entry; continue with the next sibling.
    Skip,
    /// Stop walking the current directory (the parent keeps going).
    Stop,
    /// Stop the entire traversal.
    Abort,
}

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("could not read entry under {path}: {source}")]
    Entry {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Enumerates one directory and dispatches actions per entry.
#[derive(Debug, Clone)]
pub struct DirWalker {
    path: PathBuf,
    /// Recursion depth of this walker (0 at the root).
    pub level: usize,
    /// Descend into child directories.
    pub recursive: bool,
    /// Surface `.` and `..` records to synchronous walks.
    pub include_dot_dir: bool,
    /// Reserved; ignore files are not yet consulted.
    pub respect_gitignore: bool,
    /// Leaf names skipped without dispatching the action.
    pub ignore: HashSet<String>,
    valid: bool,
}

impl DirWalker {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let valid = std::fs::read_dir(&path).is_ok();
        Self {
            path,
            level: 0,
            recursive: false,
            include_dot_dir: false,
            respect_gitignore: true,
            ignore: HashSet::new(),
            valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All immediate children in the enumerator's sorted order,
    /// skipping unreadable entries (with a warning).
    pub fn children(&self) -> Vec<FileInfo> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!(dir = %self.path.display(), %err, "skipping unreadable entry");
                    None
                }
            })
            .collect()
    }

    /// Sorted one-level listing; per-entry failures stay explicit
    /// values for the walk loops to surface as `Failed` callbacks.
    fn entries(&self) -> Vec<Result<FileInfo, WalkError>> {
        WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .map(|entry| match entry {
                Ok(e) => Ok(FileInfo::from_entry(&e)),
                Err(source) => Err(WalkError::Entry {
                    path: source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.path.clone()),
                    source,
                }),
            })
            .collect()
    }

    fn child(&self, path: &Path) -> Self {
        let mut child = Self::new(path);
        child.level = self.level + 1;
        child.recursive = self.recursive;
        child.include_dot_dir = self.include_dot_dir;
        child.respect_gitignore = self.respect_gitignore;
        child.ignore = self.ignore.clone();
        child
    }

    /// Synchronous walk. Invokes `action(Opened, entry)` for each
    /// child and recurses into directories when `recursive` is set.
    /// Returns `Done` on normal completion, `Stopped`/`Aborted` when
    /// an action cut the walk short, `Failed` when this directory
    /// could not be opened.
    pub fn walk<A>(&self, mut action: A) -> WalkStatus
    where
        A: FnMut(WalkStatus, &FileInfo) -> Flow,
    {
        self.walk_inner(&mut action)
    }

    fn walk_inner(&self, action: &mut dyn FnMut(WalkStatus, &FileInfo) -> Flow) -> WalkStatus {
        if !self.valid {
            return WalkStatus::Failed;
        }
        debug!(dir = %self.path.display(), level = self.level, "walking");

        if self.include_dot_dir {
            for name in [".", ".."] {
                let info = FileInfo::with_name(self.path.join(name), name);
                match action(WalkStatus::Opened, &info) {
                    Flow::Stop => return WalkStatus::Stopped,
                    Flow::Abort => return WalkStatus::Aborted,
                    Flow::Continue | Flow::Skip => {}
                }
            }
        }

        for entry in self.entries() {
            let file = match entry {
                Ok(file) => file,
                Err(err) => {
                    warn!(%err, "entry failed");
                    let info = FileInfo::from_path(&self.path);
                    match action(WalkStatus::Failed, &info) {
                        Flow::Abort => return WalkStatus::Aborted,
                        Flow::Stop => return WalkStatus::Stopped,
                        _ => continue,
                    }
                }
            };

            if self.ignore.contains(file.name()) {
                continue;
            }

            match action(WalkStatus::Opened, &file) {
                Flow::Skip => continue,
                Flow::Stop => return WalkStatus::Stopped,
                Flow::Abort => return WalkStatus::Aborted,
                Flow::Continue => {
                    if file.is_dir() && self.recursive {
                        let child = self.child(file.path());
                        match child.walk_inner(action) {
                            WalkStatus::Aborted => return WalkStatus::Aborted,
                            WalkStatus::Failed => {
                                if action(WalkStatus::Failed, &file) == Flow::Abort {
                                    return WalkStatus::Aborted;
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        WalkStatus::Done
    }

    /// Parallel walk. Directories are traversed on the calling thread;
    /// each non-directory entry is dispatched to the pool as an
    /// `action(Opened, entry)` task after `action(Queuing, entry)` has
    /// been invoked on the calling thread for cheap filtering.
    ///
    /// An `Abort` from any action sets a shared flag; every queued
    /// task checks it before running, so in-flight work drains as
    /// no-ops. The caller decides when to block on
    /// [`ThreadPool::wait_until_finished`].
    pub fn walk_parallel<A>(&self, pool: &ThreadPool, action: A)
    where
        A: Fn(WalkStatus, &FileInfo) -> Flow + Send + Sync + 'static,
    {
        let action = Arc::new(action);
        let abort = Arc::new(AtomicBool::new(false));
        self.walk_parallel_inner(pool, &action, &abort);
    }

    fn walk_parallel_inner<A>(
        &self,
        pool: &ThreadPool,
        action: &Arc<A>,
        abort: &Arc<AtomicBool>,
    ) where
        A: Fn(WalkStatus, &FileInfo) -> Flow + Send + Sync + 'static,
    {
        for entry in self.entries() {
            if abort.load(Ordering::Acquire) {
                return;
            }

            let file = match entry {
                Ok(file) => file,
                Err(err) => {
                    warn!(%err, "entry failed");
                    let info = FileInfo::from_path(&self.path);
                    match action(WalkStatus::Failed, &info) {
                        Flow::Abort => {
                            abort.store(true, Ordering::Release);
                            return;
                        }
                        Flow::Stop => return,
                        _ => continue,
                    }
                }
            };

            if self.ignore.contains(file.name()) {
                continue;
            }

            match action(WalkStatus::Queuing, &file) {
                Flow::Skip => continue,
                Flow::Stop => return,
                Flow::Abort => {
                    abort.store(true, Ordering::Release);
                    return;
                }
                Flow::Continue => {}
            }

            if file.is_dir() && self.recursive {
                self.child(file.path()).walk_parallel_inner(pool, action, abort);
            } else {
                let action = Arc::clone(action);
                let abort = Arc::clone(abort);
                pool.enqueue(move || {
                    if abort.load(Ordering::Acquire) {
                        return;
                    }
                    if action(WalkStatus::Opened, &file) == Flow::Abort {
                        abort.store(true, Ordering::Release);
                    }
                });
            }
        }
    }
}
