//! Directory watcher
//!
//! One [`WatchSubscription`] per watched root. A notify backend feeds raw
//! events into a channel; a coalescer thread waits for the debounce window
//! to pass quietly, reduces the touched paths to a minimal set and refreshes
//! each one with a changes-only subtree walk. Everything a refresh produces
//! goes to the async queue. With [`RefreshMode::Deferred`] the walk itself is
//! queued as well and runs wherever the queue is pumped.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cache::ChangeCache;
use crate::config::{ScanConfig, WatchBackend};
use crate::error::{ErrorKind, MediaError};
use crate::models::ScanEvent;
use crate::queue::QueueProducer;
use crate::scanner::{Sink, TreeWalker, WalkMode, WalkScope};

/// Lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    Watching,
    /// First event of a burst received
    Triggered,
    /// Waiting for the debounce window to pass quietly
    Coalescing,
    Refreshing,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchState::Unwatched => "unwatched",
            WatchState::Watching => "watching",
            WatchState::Triggered => "triggered",
            WatchState::Coalescing => "coalescing",
            WatchState::Refreshing => "refreshing",
        };
        write!(f, "{}", s)
    }
}

enum WatchMessage {
    Event(Event),
    Error(notify::Error),
    Stop,
}

/// Where refresh walks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// On the coalescer thread
    Background,
    /// Queued as [`ScanEvent::Refresh`] for the consumer of the queue
    Deferred,
}

/// What a subscription needs to refresh its root
#[derive(Clone)]
pub struct WatchTarget {
    pub walker: TreeWalker,
    pub cache: Arc<ChangeCache>,
    pub producer: QueueProducer,
    pub config: Arc<ScanConfig>,
    pub refresh: RefreshMode,
}

/// Live watch on one root
pub struct WatchSubscription {
    root: PathBuf,
    state: Arc<Mutex<WatchState>>,
    backend: Option<Box<dyn Watcher + Send>>,
    control: Sender<WatchMessage>,
    coalescer: Option<JoinHandle<()>>,
}

impl fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("root", &self.root)
            .field("state", &self.state())
            .finish()
    }
}

impl WatchSubscription {
    /// Start watching `root`, which must be an existing directory
    pub fn start(root: PathBuf, target: WatchTarget) -> Result<Self, MediaError> {
        if !root.is_dir() {
            return Err(MediaError::illegal_parameter(root, "watch target is not a directory"));
        }

        let (tx, rx) = unbounded();
        let backend = open_backend(&root, &target.config, &tx)?;
        let state = Arc::new(Mutex::new(WatchState::Watching));

        let coalescer = Coalescer {
            root: root.clone(),
            rx,
            state: Arc::clone(&state),
            debounce: target.config.debounce(),
            target,
        };
        let handle = std::thread::Builder::new()
            .name("media-watch-coalescer".to_string())
            .spawn(move || coalescer.run())
            .map_err(|e| MediaError::from_io(ErrorKind::OutOfMemory, &root, &e))?;

        info!("Watching {}", root.display());
        Ok(Self {
            root,
            state,
            backend: Some(backend),
            control: tx,
            coalescer: Some(handle),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> WatchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        // Stop the event source first so nothing arrives after Stop.
        self.backend.take();
        let _ = self.control.send(WatchMessage::Stop);
        if let Some(handle) = self.coalescer.take() {
            if handle.join().is_err() {
                warn!("Coalescer for {} panicked", self.root.display());
            }
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WatchState::Unwatched;
        info!("Stopped watching {}", self.root.display());
    }
}

fn open_backend(
    root: &Path,
    config: &ScanConfig,
    tx: &Sender<WatchMessage>,
) -> Result<Box<dyn Watcher + Send>, MediaError> {
    match config.watch_backend {
        WatchBackend::Native => native_backend(root, tx),
        WatchBackend::Polling => poll_backend(root, config.poll_interval(), tx),
        WatchBackend::Auto => native_backend(root, tx).or_else(|e| {
            warn!(
                "Native watcher unavailable for {} ({}), falling back to polling",
                root.display(),
                e
            );
            poll_backend(root, config.poll_interval(), tx)
        }),
    }
}

fn event_handler(tx: Sender<WatchMessage>) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |res: notify::Result<Event>| {
        let message = match res {
            Ok(event) => WatchMessage::Event(event),
            Err(err) => WatchMessage::Error(err),
        };
        // Receiver gone means the subscription is shutting down.
        let _ = tx.send(message);
    }
}

fn native_backend(root: &Path, tx: &Sender<WatchMessage>) -> Result<Box<dyn Watcher + Send>, MediaError> {
    let mut watcher = RecommendedWatcher::new(event_handler(tx.clone()), NotifyConfig::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(Box::new(watcher))
}

fn poll_backend(
    root: &Path,
    interval: Duration,
    tx: &Sender<WatchMessage>,
) -> Result<Box<dyn Watcher + Send>, MediaError> {
    let config = NotifyConfig::default().with_poll_interval(interval);
    let mut watcher = PollWatcher::new(event_handler(tx.clone()), config)?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(Box::new(watcher))
}

/// Paths touched during one debounce window
#[derive(Debug, Default)]
struct Burst {
    touched: Vec<PathBuf>,
    removed: HashSet<PathBuf>,
    rescan: bool,
}

impl Burst {
    fn is_empty(&self) -> bool {
        self.touched.is_empty() && !self.rescan
    }

    fn absorb(&mut self, message: WatchMessage) {
        match message {
            WatchMessage::Event(event) => {
                if event.need_rescan() {
                    self.rescan = true;
                }
                match event.kind {
                    EventKind::Access(_) => return,
                    EventKind::Remove(_)
                    | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                        self.removed.extend(event.paths.iter().cloned());
                    }
                    EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                        if let Some(from) = event.paths.first() {
                            self.removed.insert(from.clone());
                        }
                    }
                    _ => {}
                }
                self.touched.extend(event.paths);
            }
            WatchMessage::Error(err) => {
                warn!("Watch backend error, refreshing whole root: {}", err);
                self.rescan = true;
            }
            WatchMessage::Stop => {}
        }
    }
}

enum RefreshOutcome {
    Done,
    RootLost,
    Cancelled,
}

struct Coalescer {
    root: PathBuf,
    rx: Receiver<WatchMessage>,
    state: Arc<Mutex<WatchState>>,
    debounce: Duration,
    target: WatchTarget,
}

impl Coalescer {
    fn set_state(&self, state: WatchState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn run(self) {
        loop {
            let mut burst = Burst::default();
            match self.rx.recv() {
                Ok(WatchMessage::Stop) | Err(_) => return,
                Ok(message) => burst.absorb(message),
            }
            if burst.is_empty() {
                continue;
            }
            self.set_state(WatchState::Triggered);

            self.set_state(WatchState::Coalescing);
            loop {
                match self.rx.recv_timeout(self.debounce) {
                    Ok(WatchMessage::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                    Ok(message) => burst.absorb(message),
                    Err(RecvTimeoutError::Timeout) => break,
                }
            }

            self.set_state(WatchState::Refreshing);
            match self.refresh(burst) {
                RefreshOutcome::Done => self.set_state(WatchState::Watching),
                RefreshOutcome::RootLost => {
                    self.set_state(WatchState::Unwatched);
                    self.drain_until_stop();
                    return;
                }
                RefreshOutcome::Cancelled => return,
            }
        }
    }

    /// Keep the channel serviced until the owner stops the subscription
    fn drain_until_stop(&self) {
        while let Ok(message) = self.rx.recv() {
            if let WatchMessage::Stop = message {
                return;
            }
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        let config = &self.target.config;
        let mut components: Vec<_> = relative.components().collect();
        // The last component may be a file; only directories are filtered.
        if path.is_file() {
            components.pop();
        }
        components
            .iter()
            .filter_map(|c| c.as_os_str().to_str())
            .any(|name| config.should_ignore_dir(name))
    }

    fn refresh(&self, burst: Burst) -> RefreshOutcome {
        let target = &self.target;
        if target.producer.is_cancelled() {
            return RefreshOutcome::Cancelled;
        }

        if self.root.symlink_metadata().is_err() {
            error!("Watched directory {} disappeared", self.root.display());
            target.cache.remove_subtree(&self.root);
            target.producer.push(ScanEvent::Error(MediaError::directory_unreadable(
                self.root.clone(),
                "watched directory was removed",
            )));
            return RefreshOutcome::RootLost;
        }

        for path in &burst.removed {
            if path.starts_with(&self.root) {
                let evicted = target.cache.remove_subtree(path);
                debug!("Evicted {} cache entries under {}", evicted, path.display());
            }
        }

        let touched = if burst.rescan {
            vec![self.root.clone()]
        } else {
            coalesce_paths(burst.touched)
        };
        let paths: Vec<PathBuf> = touched
            .into_iter()
            .filter(|p| p.starts_with(&self.root) && !self.is_ignored(p))
            .collect();
        if paths.is_empty() {
            return RefreshOutcome::Done;
        }
        debug!("Refreshing {} path(s) under {}", paths.len(), self.root.display());

        match target.refresh {
            RefreshMode::Deferred => {
                target.producer.push(ScanEvent::Refresh {
                    root: self.root.clone(),
                    paths,
                });
            }
            RefreshMode::Background => {
                let producer = &target.producer;
                let finished = refresh_paths(&target.walker, &target.cache, &self.root, &paths, &mut |event| {
                    producer.push(event);
                });
                if !finished {
                    return RefreshOutcome::Cancelled;
                }
            }
        }
        RefreshOutcome::Done
    }
}

/// Run a changes-only walk of each path below `root`
///
/// Paths that no longer exist only lose their cache entries. Returns false
/// when the walker was cancelled before every path was handled.
pub fn refresh_paths(
    walker: &TreeWalker,
    cache: &ChangeCache,
    root: &Path,
    paths: &[PathBuf],
    sink: &mut Sink<'_>,
) -> bool {
    for path in paths {
        if walker.is_cancelled() {
            return false;
        }
        if path.symlink_metadata().is_err() {
            cache.remove_subtree(path);
            if let Some(parent) = path.parent() {
                cache.evict_missing(parent);
            }
            continue;
        }

        let outcome = walker.walk(root, &WalkScope::Subtree(path.clone()), WalkMode::ChangesOnly, &mut *sink);
        if let Err(err) = outcome {
            error!("Refresh of {} aborted: {}", path.display(), err);
            sink(ScanEvent::Error(err));
        }
    }
    true
}

/// Reduce paths to a sorted set in which no member lies below another
pub fn coalesce_paths(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort();
    paths.dedup();
    let mut minimal: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(last) = minimal.last() {
            if path.starts_with(last) {
                continue;
            }
        }
        minimal.push(path);
    }
    minimal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::CountingProbe;
    use crate::queue::AsyncQueue;
    use proptest::prelude::*;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        root: PathBuf,
        probe: Arc<CountingProbe>,
        queue: AsyncQueue,
        target: WatchTarget,
    }

    fn harness(backend: WatchBackend) -> Harness {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap().join("library");
        fs::create_dir_all(&root).unwrap();

        let config = Arc::new(
            ScanConfig::builder()
                .debounce_ms(150)
                .watch_backend(backend)
                .poll_interval_ms(100)
                .build(),
        );
        let probe = Arc::new(CountingProbe::new());
        let cache = Arc::new(ChangeCache::open_in_memory());
        let queue = AsyncQueue::new();
        let producer = queue.producer();
        let walker = TreeWalker::new(
            Arc::clone(&config),
            Arc::clone(&cache),
            probe.clone(),
            producer.cancel_flag(),
        );
        Harness {
            _dir: dir,
            root,
            probe,
            queue,
            target: WatchTarget {
                walker,
                cache,
                producer,
                config,
                refresh: RefreshMode::Background,
            },
        }
    }

    impl Harness {
        fn prime(&self) {
            self.target
                .walker
                .walk(&self.root, &WalkScope::Full, WalkMode::Report, &mut |_| {})
                .unwrap();
        }

        /// Pump until `expected` items arrived, then keep listening a little to catch extras
        fn collect(&mut self, expected: usize) -> Vec<ScanEvent> {
            let deadline = Instant::now() + Duration::from_secs(10);
            let mut items = Vec::new();
            while items.len() < expected && Instant::now() < deadline {
                if self.queue.wait_ready(Duration::from_millis(50)) {
                    while let Some(item) = self.queue.pop() {
                        items.push(item);
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(600));
            while let Some(item) = self.queue.pop() {
                items.push(item);
            }
            items
        }
    }

    fn results(items: &[ScanEvent]) -> Vec<PathBuf> {
        let mut paths: Vec<_> = items
            .iter()
            .filter_map(|i| i.as_result().map(|r| r.path.clone()))
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_single_copy_yields_single_result() {
        let mut h = harness(WatchBackend::Auto);
        fs::write(h.root.join("existing.mp4"), b"old").unwrap();
        h.prime();
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();
        assert_eq!(sub.state(), WatchState::Watching);

        let copied = h.root.join("copied.mkv");
        fs::write(&copied, vec![7u8; 64 * 1024]).unwrap();

        let items = h.collect(1);
        assert_eq!(results(&items), vec![copied.clone()]);
        assert_eq!(h.probe.calls_for(&copied), 1);
        drop(sub);
    }

    #[test]
    fn test_burst_of_copies_yields_one_result_each() {
        let mut h = harness(WatchBackend::Auto);
        h.prime();
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();

        let mut expected = Vec::new();
        for i in 0..5 {
            let path = h.root.join(format!("clip{i}.mp4"));
            fs::write(&path, format!("clip number {i}")).unwrap();
            expected.push(path);
        }

        let items = h.collect(5);
        assert_eq!(results(&items), expected);
        drop(sub);
    }

    #[test]
    fn test_delete_and_readd_is_probed_again() {
        let mut h = harness(WatchBackend::Auto);
        let path = h.root.join("song.mp3");
        fs::write(&path, b"first take").unwrap();
        h.prime();
        assert_eq!(h.probe.calls_for(&path), 1);
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();

        fs::remove_file(&path).unwrap();
        fs::write(&path, b"second, different take").unwrap();

        let items = h.collect(1);
        assert_eq!(results(&items), vec![path.clone()]);
        assert_eq!(h.probe.calls_for(&path), 2);
        assert_eq!(h.target.cache.lookup(&path).unwrap().fingerprint.size, 22);
        drop(sub);
    }

    #[test]
    fn test_nested_directory_drop_in() {
        let mut h = harness(WatchBackend::Auto);
        h.prime();
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();

        let album = h.root.join("album");
        fs::create_dir_all(album.join("disc1")).unwrap();
        fs::write(album.join("disc1/01.flac"), b"a").unwrap();
        fs::write(album.join("cover.jpg"), b"b").unwrap();
        fs::write(album.join("notes.txt"), b"c").unwrap();

        let items = h.collect(2);
        assert_eq!(
            results(&items),
            vec![album.join("cover.jpg"), album.join("disc1/01.flac")]
        );
        drop(sub);
    }

    #[test]
    fn test_deferred_refresh_leaves_walk_to_consumer() {
        let mut h = harness(WatchBackend::Auto);
        h.prime();
        let mut target = h.target.clone();
        target.refresh = RefreshMode::Deferred;
        let sub = WatchSubscription::start(h.root.clone(), target).unwrap();

        let clip = h.root.join("clip.mp4");
        fs::write(&clip, b"clip").unwrap();

        let items = h.collect(1);
        assert!(results(&items).is_empty());
        assert_eq!(h.probe.calls(), 0);

        let mut refreshed = Vec::new();
        for item in items {
            let ScanEvent::Refresh { root, paths } = item else {
                continue;
            };
            assert_eq!(root, h.root);
            let finished = refresh_paths(&h.target.walker, &h.target.cache, &root, &paths, &mut |event| {
                if let ScanEvent::Result(r) = event {
                    refreshed.push(r.path);
                }
            });
            assert!(finished);
        }
        assert_eq!(refreshed, vec![clip.clone()]);
        assert_eq!(h.probe.calls_for(&clip), 1);
        drop(sub);
    }

    #[test]
    fn test_root_removal_reported_once() {
        let mut h = harness(WatchBackend::Auto);
        fs::write(h.root.join("a.mp4"), b"a").unwrap();
        h.prime();
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();

        fs::remove_dir_all(&h.root).unwrap();

        let items = h.collect(1);
        let errors: Vec<_> = items.iter().filter_map(|i| i.as_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::DirectoryUnreadable);
        assert_eq!(errors[0].path.as_deref(), Some(h.root.as_path()));
        assert!(results(&items).is_empty());
        assert_eq!(sub.state(), WatchState::Unwatched);
        assert!(h.target.cache.is_empty());
    }

    #[test]
    fn test_polling_backend() {
        let mut h = harness(WatchBackend::Polling);
        h.prime();
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();

        let path = h.root.join("polled.jpg");
        fs::write(&path, b"image").unwrap();

        let items = h.collect(1);
        assert_eq!(results(&items), vec![path]);
        drop(sub);
    }

    #[test]
    fn test_rejects_missing_directory() {
        let h = harness(WatchBackend::Auto);
        let err = WatchSubscription::start(h.root.join("nope"), h.target.clone()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalParameter);
    }

    #[test]
    fn test_drop_stops_refreshes() {
        let mut h = harness(WatchBackend::Auto);
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();
        drop(sub);
        fs::write(h.root.join("late.mp4"), b"late").unwrap();
        std::thread::sleep(Duration::from_millis(400));
        assert!(h.queue.pop().is_none());
        assert_eq!(h.probe.calls(), 0);
    }

    #[test]
    fn test_cancelled_producer_skips_refresh() {
        let h = harness(WatchBackend::Auto);
        let flag: Arc<AtomicBool> = h.target.producer.cancel_flag();
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
        let sub = WatchSubscription::start(h.root.clone(), h.target.clone()).unwrap();
        fs::write(h.root.join("x.mp4"), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(h.probe.calls(), 0);
        drop(sub);
    }

    #[test]
    fn test_coalesce_paths_drops_descendants() {
        let input = vec![
            PathBuf::from("/m/a/1.mp4"),
            PathBuf::from("/m/a"),
            PathBuf::from("/m/b.mp4"),
            PathBuf::from("/m/a b/2.mp4"),
            PathBuf::from("/m/b.mp4"),
        ];
        assert_eq!(
            coalesce_paths(input),
            vec![
                PathBuf::from("/m/a"),
                PathBuf::from("/m/a b/2.mp4"),
                PathBuf::from("/m/b.mp4"),
            ]
        );
    }

    fn arb_path() -> impl Strategy<Value = PathBuf> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "a b", "c.mp4"]), 1..5)
            .prop_map(|parts| {
                let mut path = PathBuf::from("/");
                for part in parts {
                    path.push(part);
                }
                path
            })
    }

    proptest! {
        #[test]
        fn coalesced_paths_are_minimal_and_cover_input(paths in prop::collection::vec(arb_path(), 0..20)) {
            let minimal = coalesce_paths(paths.clone());
            for (i, a) in minimal.iter().enumerate() {
                for (j, b) in minimal.iter().enumerate() {
                    if i != j {
                        prop_assert!(!b.starts_with(a));
                    }
                }
            }
            for path in &paths {
                prop_assert!(minimal.iter().any(|m| path.starts_with(m)));
            }
        }
    }
}
