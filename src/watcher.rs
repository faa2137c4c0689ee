use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::classifier::classify;
use crate::config::{RepoWatchConfig, WatcherConfig};
use crate::dispatch::Dispatcher;
use crate::error::{Result, WatchError};
use crate::events::{BranchRef, RepoEvent, RepoEventKind};
use crate::guard::PollGuard;
use crate::paths::RepositoryPaths;
use crate::signal::CancellationToken;
use crate::source::{NotifySource, RawEventSource};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceState {
    Uninitialized,
    Ready,
    Disabled(String),
    Disposed,
}

struct Shared {
    paths: RepositoryPaths,
    config: WatcherConfig,
    source: Mutex<Box<dyn RawEventSource>>,
    state: Mutex<SourceState>,
    dispatcher: Dispatcher,
    guard: PollGuard,
    token: Mutex<CancellationToken>,
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Polls a raw event source on a background thread and publishes semantic repository events.
///
/// Lifecycle: [`initialize`](Self::initialize) acquires the source (failures
/// leave the watcher disabled rather than erroring), [`start`](Self::start) /
/// [`stop`](Self::stop) toggle the poll loop, and [`dispose`](Self::dispose)
/// releases everything. Polls never overlap: [`check_and_process_events`]
/// joins an in-flight poll instead of starting a second one. Called from a
/// subscriber while that subscriber's own poll is dispatching, it returns 0.
///
/// [`check_and_process_events`]: Self::check_and_process_events
pub struct RepositoryWatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl RepositoryWatcher {
    pub fn new<S>(paths: RepositoryPaths, source: S, config: WatcherConfig) -> Self
    where
        S: RawEventSource + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                paths,
                config,
                source: Mutex::new(Box::new(source)),
                state: Mutex::new(SourceState::Uninitialized),
                dispatcher: Dispatcher::new(),
                guard: PollGuard::new(),
                token: Mutex::new(CancellationToken::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Acquire the raw event source. On failure the watcher stays constructed but disabled.
    pub fn initialize(&self) -> bool {
        let mut state = self.shared.state.lock();
        match &*state {
            SourceState::Ready => return true,
            SourceState::Disposed => {
                tracing::warn!("Cannot initialize a disposed repository watcher");
                return false;
            }
            _ => {}
        }

        let root = self.shared.paths.root();
        match self.shared.source.lock().initialize(root) {
            Ok(()) => {
                tracing::info!("Watching repository: {}", root.display());
                *state = SourceState::Ready;
                true
            }
            Err(err) => {
                tracing::warn!("Repository watching disabled: {}", err);
                *state = SourceState::Disabled(err.to_string());
                false
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.shared.state.lock() == SourceState::Ready
    }

    /// Begin polling every `poll_interval` on a dedicated thread.
    pub fn start(&self) -> Result<()> {
        match &*self.shared.state.lock() {
            SourceState::Ready => {}
            SourceState::Uninitialized => {
                return Err(WatchError::InvalidState {
                    reason: "watcher has not been initialized".to_string(),
                })
            }
            SourceState::Disabled(reason) => {
                return Err(WatchError::InvalidState {
                    reason: format!("event source unavailable: {}", reason),
                })
            }
            SourceState::Disposed => {
                return Err(WatchError::InvalidState {
                    reason: "watcher has been disposed".to_string(),
                })
            }
        }

        let mut worker = self.worker.lock();
        if let Some(running) = worker.as_ref() {
            if !running.handle.is_finished() {
                tracing::warn!("Repository watcher is already running");
                return Ok(());
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.handle.join();
        }

        let token = {
            let mut current = self.shared.token.lock();
            if current.is_cancelled() {
                *current = CancellationToken::new();
            }
            current.clone()
        };

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("repowatch-poll".to_string())
            .spawn(move || {
                let interval = shared.config.poll_interval();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    if token.is_cancelled() {
                        break;
                    }
                    shared.poll(&token);
                }
                tracing::debug!("Poll loop exited");
            })
            .map_err(|e| WatchError::InvalidState {
                reason: format!("failed to spawn poll thread: {}", e),
            })?;

        *worker = Some(Worker { stop_tx, handle });
        tracing::info!(
            "Started polling every {:?}",
            self.shared.config.poll_interval()
        );
        Ok(())
    }

    /// Stop the poll loop. Stopping an idle watcher only logs a warning.
    pub fn stop(&self) {
        if !self.shutdown_worker() {
            tracing::warn!("Repository watcher is already stopped");
            return;
        }
        tracing::info!("Stopped watching: {}", self.shared.paths.root().display());
    }

    /// Cancel in-flight work, release coalesced waiters and stop the loop.
    pub fn cancel(&self) {
        self.shared.token.lock().cancel();
        self.shared.guard.wake_all();
        if self.shutdown_worker() {
            tracing::info!("Repository watcher cancelled");
        }
    }

    /// Token observed by the current run; cancelling it is equivalent to [`cancel`](Self::cancel)
    /// except that the loop notices at its next tick.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    /// Poll now on the calling thread, or join the poll already in flight.
    /// Returns the number of notifications delivered.
    pub fn check_and_process_events(&self) -> usize {
        let token = self.cancellation_token();
        self.shared.poll(&token)
    }

    /// Stop the loop and release the event source. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.shutdown_worker();

        let mut state = self.shared.state.lock();
        let previous = std::mem::replace(&mut *state, SourceState::Disposed);
        if previous == SourceState::Ready {
            self.shared.source.lock().dispose();
            tracing::debug!("Disposed watcher for {}", self.shared.paths.root().display());
        }
    }

    pub fn paths(&self) -> &RepositoryPaths {
        &self.shared.paths
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn subscribe<F>(&self, kind: RepoEventKind, callback: F)
    where
        F: Fn(&RepoEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(kind, callback);
    }

    pub fn subscribe_all<F>(&self, callback: F)
    where
        F: Fn(&RepoEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe_all(callback);
    }

    pub fn channel(&self, kinds: &[RepoEventKind]) -> mpsc::Receiver<RepoEvent> {
        self.shared.dispatcher.channel(kinds)
    }

    pub fn on_config_changed<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe(RepoEventKind::ConfigChanged, move |_| callback());
    }

    pub fn on_head_changed<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe(RepoEventKind::HeadChanged, move |_| callback());
    }

    pub fn on_index_changed<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe(RepoEventKind::IndexChanged, move |_| callback());
    }

    pub fn on_repository_changed<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe(RepoEventKind::RepositoryChanged, move |_| callback());
    }

    pub fn on_local_branch_created<F: Fn(&BranchRef) + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe_branch(RepoEventKind::LocalBranchCreated, callback);
    }

    pub fn on_local_branch_changed<F: Fn(&BranchRef) + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe_branch(RepoEventKind::LocalBranchChanged, callback);
    }

    pub fn on_local_branch_deleted<F: Fn(&BranchRef) + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe_branch(RepoEventKind::LocalBranchDeleted, callback);
    }

    pub fn on_remote_branch_created<F: Fn(&BranchRef) + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe_branch(RepoEventKind::RemoteBranchCreated, callback);
    }

    pub fn on_remote_branch_deleted<F: Fn(&BranchRef) + Send + Sync + 'static>(&self, callback: F) {
        self.subscribe_branch(RepoEventKind::RemoteBranchDeleted, callback);
    }

    fn subscribe_branch<F>(&self, kind: RepoEventKind, callback: F)
    where
        F: Fn(&BranchRef) + Send + Sync + 'static,
    {
        self.subscribe(kind, move |event| {
            if let Some(branch) = event.branch() {
                callback(branch);
            }
        });
    }

    /// Returns true when a live loop was stopped.
    fn shutdown_worker(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };

        let was_running = !worker.handle.is_finished();
        let _ = worker.stop_tx.send(());

        // a subscriber on the poll thread may stop its own loop; it exits after this tick
        if worker.handle.thread().id() != thread::current().id() {
            if worker.handle.join().is_err() {
                tracing::error!("Poll thread panicked");
            }
        }
        was_running
    }
}

impl Shared {
    fn poll(&self, token: &CancellationToken) -> usize {
        if *self.state.lock() != SourceState::Ready {
            return 0;
        }
        // a cancelled run must leave buffered records for the next one
        if token.is_cancelled() {
            return 0;
        }

        self.guard.run(token, self.config.wait_slice(), || {
            if token.is_cancelled() {
                return 0;
            }
            let batch = self.source.lock().get_events();
            if batch.is_empty() {
                return 0;
            }
            tracing::debug!("Classifying {} raw change records", batch.len());
            let result = classify(&batch, &self.paths, token);
            self.dispatcher.dispatch(&result)
        })
    }
}

impl Drop for RepositoryWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for RepositoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryWatcher")
            .field("root", &self.shared.paths.root())
            .field("state", &*self.shared.state.lock())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Convenience constructor: discover the repository layout under `root` and watch it with `notify`.
pub fn watch_repository<P: AsRef<Path>>(root: P, config: &RepoWatchConfig) -> Result<RepositoryWatcher> {
    let paths = RepositoryPaths::discover(root, &config.paths)?;
    let source = NotifySource::for_repository(&paths);
    let watcher = RepositoryWatcher::new(paths, source, config.watcher.clone());
    watcher.initialize();
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::events::{ChangeOperation, RawChangeRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Blocks inside `get_events` until released, so a poll can be held in flight.
    struct GatedSource {
        entered: Sender<()>,
        release: mpsc::Receiver<()>,
        polls: Arc<AtomicUsize>,
        batch: Vec<RawChangeRecord>,
    }

    impl RawEventSource for GatedSource {
        fn initialize(&mut self, _root: &Path) -> Result<()> {
            Ok(())
        }

        fn get_events(&mut self) -> Vec<RawChangeRecord> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.batch.clone()
        }

        fn dispose(&mut self) {}
    }

    struct Harness {
        watcher: Arc<RepositoryWatcher>,
        entered: mpsc::Receiver<()>,
        release: Sender<()>,
        polls: Arc<AtomicUsize>,
    }

    fn gated_watcher() -> Harness {
        let paths = RepositoryPaths::new("/repo", &PathsConfig::default());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let polls = Arc::new(AtomicUsize::new(0));
        let source = GatedSource {
            entered: entered_tx,
            release: release_rx,
            polls: Arc::clone(&polls),
            batch: vec![
                RawChangeRecord::new(ChangeOperation::Modified, "/repo/.git", "HEAD"),
                RawChangeRecord::new(ChangeOperation::Created, "/repo/src", "main.rs"),
            ],
        };
        let config = WatcherConfig {
            poll_interval_ms: 60_000,
            wait_slice_ms: 10,
        };
        let watcher = Arc::new(RepositoryWatcher::new(paths, source, config));
        assert!(watcher.initialize());

        Harness {
            watcher,
            entered: entered_rx,
            release: release_tx,
            polls,
        }
    }

    fn wait_for_waiters(watcher: &RepositoryWatcher, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while watcher.shared.guard.waiters() != count {
            assert!(Instant::now() < deadline, "waiters never arrived");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_overlapping_checks_query_source_once() {
        let harness = gated_watcher();

        let leader = {
            let watcher = Arc::clone(&harness.watcher);
            thread::spawn(move || watcher.check_and_process_events())
        };
        harness.entered.recv().unwrap();

        let followers: Vec<_> = (0..4)
            .map(|_| {
                let watcher = Arc::clone(&harness.watcher);
                thread::spawn(move || watcher.check_and_process_events())
            })
            .collect();
        wait_for_waiters(&harness.watcher, 4);

        harness.release.send(()).unwrap();

        assert_eq!(leader.join().unwrap(), 2);
        for follower in followers {
            assert_eq!(follower.join().unwrap(), 2);
        }
        assert_eq!(harness.polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_check_during_dispatch_does_not_block() {
        let paths = RepositoryPaths::new("/repo", &PathsConfig::default());
        let source = crate::source::ScriptedSource::new();
        source.push_batch(vec![RawChangeRecord::new(ChangeOperation::Modified, "/repo/.git", "HEAD")]);
        let watcher = Arc::new(RepositoryWatcher::new(paths, source, WatcherConfig::default()));
        assert!(watcher.initialize());

        let nested = Arc::new(AtomicUsize::new(usize::MAX));
        {
            let handle = Arc::downgrade(&watcher);
            let nested = Arc::clone(&nested);
            watcher.on_head_changed(move || {
                if let Some(watcher) = handle.upgrade() {
                    nested.store(watcher.check_and_process_events(), Ordering::SeqCst);
                }
            });
        }

        assert_eq!(watcher.check_and_process_events(), 1);
        assert_eq!(nested.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_unblocks_waiters_and_truncates_poll() {
        let harness = gated_watcher();

        let leader = {
            let watcher = Arc::clone(&harness.watcher);
            thread::spawn(move || watcher.check_and_process_events())
        };
        harness.entered.recv().unwrap();

        let follower = {
            let watcher = Arc::clone(&harness.watcher);
            thread::spawn(move || watcher.check_and_process_events())
        };
        wait_for_waiters(&harness.watcher, 1);

        harness.watcher.cancel();
        assert_eq!(follower.join().unwrap(), 0);

        harness.release.send(()).unwrap();
        assert_eq!(leader.join().unwrap(), 0);
        assert_eq!(harness.polls.load(Ordering::SeqCst), 1);
    }
}
