//! Raw filesystem change sources
//!
//! A [`RawEventSource`] hands the watcher whatever change records it has
//! buffered since the last poll. [`NotifySource`] is backed by the
//! platform watcher from `notify`; [`ScriptedSource`] replays queued
//! batches for tests and embedding.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::error::{Result, WatchError};
use crate::events::{split_path, ChangeOperation, RawChangeRecord};
use crate::paths::RepositoryPaths;

/// Capability interface over a native change feed.
pub trait RawEventSource: Send {
    /// Acquire the underlying handle for `repository_root`.
    fn initialize(&mut self, repository_root: &Path) -> Result<()>;

    /// Drain buffered records without blocking. May be empty.
    fn get_events(&mut self) -> Vec<RawChangeRecord>;

    /// Release the handle. Calling it again is a no-op.
    fn dispose(&mut self);
}

/// Paired renames remembered so a trailing `Both` report is not counted twice.
const PAIRED_HISTORY: usize = 64;

/// Change source backed by `notify::RecommendedWatcher`, watching the repository recursively.
pub struct NotifySource {
    extra_paths: Vec<PathBuf>,
    watcher: Option<RecommendedWatcher>,
    event_rx: Option<Receiver<notify::Result<Event>>>,
    renames: RenamePairing,
}

impl NotifySource {
    pub fn new() -> Self {
        Self {
            extra_paths: Vec::new(),
            watcher: None,
            event_rx: None,
            renames: RenamePairing::default(),
        }
    }

    /// Also watches the git directory when it lives outside the working tree.
    pub fn for_repository(paths: &RepositoryPaths) -> Self {
        let mut source = Self::new();
        if !paths.git_dir().starts_with(paths.root()) {
            source.extra_paths.push(paths.git_dir().to_path_buf());
        }
        source
    }
}

impl Default for NotifySource {
    fn default() -> Self {
        Self::new()
    }
}

impl RawEventSource for NotifySource {
    fn initialize(&mut self, repository_root: &Path) -> Result<()> {
        if !repository_root.is_dir() {
            return Err(WatchError::InitFailed {
                path: repository_root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(tx)?;

        for path in std::iter::once(repository_root).chain(self.extra_paths.iter().map(PathBuf::as_path)) {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| WatchError::InitFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
        }

        self.watcher = Some(watcher);
        self.event_rx = Some(rx);
        Ok(())
    }

    fn get_events(&mut self) -> Vec<RawChangeRecord> {
        let Self { event_rx, renames, .. } = self;
        let Some(rx) = event_rx.as_ref() else {
            return Vec::new();
        };

        let mut records = Vec::new();
        while let Ok(result) = rx.try_recv() {
            match result {
                Ok(event) => renames.translate(event, &mut records),
                Err(err) => tracing::error!("File watcher error: {}", err),
            }
        }
        renames.expire(&mut records);
        records
    }

    fn dispose(&mut self) {
        if self.watcher.take().is_some() {
            tracing::debug!("Released filesystem watcher");
        }
        self.event_rx = None;
        self.renames = RenamePairing::default();
    }
}

/// Joins rename halves that some backends report separately.
#[derive(Debug, Default)]
struct RenamePairing {
    /// tracker -> (source path, survived one drain already)
    pending: HashMap<usize, (PathBuf, bool)>,
    paired: VecDeque<usize>,
}

impl RenamePairing {
    fn translate(&mut self, event: Event, out: &mut Vec<RawChangeRecord>) {
        let tracker = event.attrs.tracker();
        match event.kind {
            EventKind::Create(_) => push_all(out, ChangeOperation::Created, &event.paths),
            EventKind::Remove(_) => push_all(out, ChangeOperation::Deleted, &event.paths),
            EventKind::Modify(ModifyKind::Name(mode)) => self.rename(mode, tracker, event.paths, out),
            EventKind::Modify(_) => push_all(out, ChangeOperation::Modified, &event.paths),
            _ => {}
        }
    }

    fn rename(&mut self, mode: RenameMode, tracker: Option<usize>, paths: Vec<PathBuf>, out: &mut Vec<RawChangeRecord>) {
        match (mode, tracker) {
            (RenameMode::Both, tracker) => {
                if tracker.map_or(false, |t| self.take_paired(t)) {
                    return;
                }
                if let [from, to] = paths.as_slice() {
                    out.push(renamed_record(from, to));
                }
            }
            (RenameMode::From, Some(t)) => {
                if let Some(from) = paths.into_iter().next() {
                    self.pending.insert(t, (from, false));
                }
            }
            (RenameMode::To, Some(t)) => match self.pending.remove(&t) {
                Some((from, _)) => {
                    for to in &paths {
                        out.push(renamed_record(&from, to));
                    }
                    self.mark_paired(t);
                }
                None => push_all(out, ChangeOperation::Created, &paths),
            },
            (RenameMode::From, None) => push_all(out, ChangeOperation::Deleted, &paths),
            (RenameMode::To, None) => push_all(out, ChangeOperation::Created, &paths),
            _ => {
                for path in &paths {
                    let operation = if path.exists() {
                        ChangeOperation::Created
                    } else {
                        ChangeOperation::Deleted
                    };
                    out.push(RawChangeRecord::from_path(operation, path));
                }
            }
        }
    }

    /// Unmatched rename sources that already waited a full drain moved out of view.
    fn expire(&mut self, out: &mut Vec<RawChangeRecord>) {
        self.pending.retain(|_, (from, aged)| {
            if *aged {
                out.push(RawChangeRecord::from_path(ChangeOperation::Deleted, from));
                false
            } else {
                *aged = true;
                true
            }
        });
    }

    fn mark_paired(&mut self, tracker: usize) {
        if self.paired.len() == PAIRED_HISTORY {
            self.paired.pop_front();
        }
        self.paired.push_back(tracker);
    }

    fn take_paired(&mut self, tracker: usize) -> bool {
        match self.paired.iter().position(|t| *t == tracker) {
            Some(index) => {
                self.paired.remove(index);
                true
            }
            None => false,
        }
    }
}

fn push_all(out: &mut Vec<RawChangeRecord>, operation: ChangeOperation, paths: &[PathBuf]) {
    out.extend(paths.iter().map(|path| RawChangeRecord::from_path(operation, path)));
}

fn renamed_record(from: &Path, to: &Path) -> RawChangeRecord {
    let (directory, name) = split_path(from);
    let target = if to.parent() == Some(directory.as_path()) {
        split_path(to).1
    } else {
        to.to_string_lossy().into_owned()
    };
    RawChangeRecord::renamed(directory, name, target)
}

/// Deterministic source replaying queued batches, one per poll. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    batches: VecDeque<Vec<RawChangeRecord>>,
    init_failure: Option<String>,
    initialized: bool,
    polls: usize,
    disposals: usize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose initialization always fails with `reason`.
    pub fn failing<S: Into<String>>(reason: S) -> Self {
        let source = Self::new();
        source.state.lock().init_failure = Some(reason.into());
        source
    }

    pub fn push_batch(&self, batch: Vec<RawChangeRecord>) {
        self.state.lock().batches.push_back(batch);
    }

    /// Number of `get_events` calls so far.
    pub fn poll_count(&self) -> usize {
        self.state.lock().polls
    }

    /// Number of `dispose` calls that actually released the handle.
    pub fn dispose_count(&self) -> usize {
        self.state.lock().disposals
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }
}

impl RawEventSource for ScriptedSource {
    fn initialize(&mut self, repository_root: &Path) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.init_failure {
            return Err(WatchError::InitFailed {
                path: repository_root.to_path_buf(),
                reason: reason.clone(),
            });
        }
        state.initialized = true;
        Ok(())
    }

    fn get_events(&mut self) -> Vec<RawChangeRecord> {
        let mut state = self.state.lock();
        state.polls += 1;
        state.batches.pop_front().unwrap_or_default()
    }

    fn dispose(&mut self) {
        let mut state = self.state.lock();
        if state.initialized {
            state.initialized = false;
            state.disposals += 1;
        }
    }
}
