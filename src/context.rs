//! Scan context
//!
//! [`ScanContext`] is the engine's public face. It holds the registered
//! roots, the callbacks and the owned cache, progress, queue and watch
//! subscriptions. Callbacks only ever run inside [`ScanContext::scan`] (sync
//! mode) and [`ScanContext::pump`], on the thread that owns the context.
//!
//! ```no_run
//! use media_watch::{ScanConfig, ScanContext};
//!
//! let mut ctx = ScanContext::new(ScanConfig::builder().async_mode(true).build());
//! ctx.add_path("/srv/media")?;
//! ctx.set_result_callback(Some(Box::new(|_ctx: &ScanContext, r: &media_watch::MediaResult| {
//!     println!("{}", r.path.display());
//! })));
//! ctx.scan()?;
//! while ctx.is_scanning() || ctx.is_ready() {
//!     ctx.wait_ready(std::time::Duration::from_millis(100));
//!     ctx.pump();
//! }
//! # Ok::<(), media_watch::MediaError>(())
//! ```

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::cache::ChangeCache;
use crate::config::ScanConfig;
use crate::error::{ErrorKind, MediaError};
use crate::models::{MediaResult, ScanEvent, ScanSummary};
use crate::probe::{ExtensionProbe, MediaProbe};
use crate::progress::{self, Progress, ProgressSnapshot, SharedProgress};
use crate::queue::{AsyncQueue, WorkTracker};
use crate::scanner::{TreeWalker, WalkMode, WalkScope};
use crate::watcher::{self, RefreshMode, WatchState, WatchSubscription, WatchTarget};

#[cfg(unix)]
use std::os::unix::io::RawFd;

pub type ResultCallback = Box<dyn FnMut(&ScanContext, &MediaResult)>;
pub type ErrorCallback = Box<dyn FnMut(&ScanContext, &MediaError)>;
pub type ProgressCallback = Box<dyn FnMut(&ScanContext, &ProgressSnapshot)>;

/// Recursive scanner and watcher over a set of roots
pub struct ScanContext {
    config: Arc<ScanConfig>,
    roots: Vec<PathBuf>,
    async_mode: bool,
    probe: Arc<dyn MediaProbe>,
    cache: Arc<ChangeCache>,
    progress: SharedProgress,
    summary: Arc<Mutex<ScanSummary>>,
    queue: AsyncQueue,
    tracker: WorkTracker,
    pool: Option<rayon::ThreadPool>,
    watches: HashMap<PathBuf, WatchSubscription>,
    on_result: Option<ResultCallback>,
    on_error: Option<ErrorCallback>,
    on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanContext")
            .field("roots", &self.roots)
            .field("async_mode", &self.async_mode)
            .field("cache", &self.cache)
            .field("watches", &self.watches.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ScanContext {
    /// Create a context using the extension-only probe
    pub fn new(config: ScanConfig) -> Self {
        Self::with_probe(config, Arc::new(ExtensionProbe))
    }

    /// Create a context with a custom media probe
    pub fn with_probe(config: ScanConfig, probe: Arc<dyn MediaProbe>) -> Self {
        let cache = match &config.cache_path {
            Some(path) => ChangeCache::open(path),
            None => ChangeCache::open_in_memory(),
        };
        let progress = Progress::shared(Duration::from_millis(config.progress_interval_ms));
        Self {
            async_mode: config.async_mode,
            config: Arc::new(config),
            roots: Vec::new(),
            probe,
            cache: Arc::new(cache),
            progress,
            summary: Arc::new(Mutex::new(ScanSummary::new())),
            queue: AsyncQueue::new(),
            tracker: WorkTracker::new(),
            pool: None,
            watches: HashMap::new(),
            on_result: None,
            on_error: None,
            on_progress: None,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn cache(&self) -> &ChangeCache {
        &self.cache
    }

    /// Register a root; registering the same root twice is a no-op
    pub fn add_path(&mut self, path: impl AsRef<Path>) -> Result<(), MediaError> {
        let root = self.validate_root(path.as_ref())?;
        if self.roots.contains(&root) {
            debug!("Root {} already registered", root.display());
            return Ok(());
        }
        info!("Registered root {}", root.display());
        self.roots.push(root);
        Ok(())
    }

    /// Unregister a root and stop watching it; returns whether it was registered
    pub fn remove_path(&mut self, path: impl AsRef<Path>) -> bool {
        let root = normalize_root(path.as_ref());
        self.watches.remove(&root);
        let before = self.roots.len();
        self.roots.retain(|r| r != &root);
        before != self.roots.len()
    }

    /// Registered roots in insertion order
    pub fn paths(&self) -> &[PathBuf] {
        &self.roots
    }

    fn validate_root(&self, path: &Path) -> Result<PathBuf, MediaError> {
        if path.as_os_str().is_empty() {
            return Err(MediaError::new(
                ErrorKind::IllegalParameter,
                None,
                Some("empty path".to_string()),
            ));
        }
        if !self.config.allow_network_paths && is_network_path(path) {
            return Err(MediaError::illegal_parameter(path, "network paths are not allowed"));
        }
        Ok(normalize_root(path))
    }

    pub fn is_async(&self) -> bool {
        self.async_mode
    }

    /// Switch between sync and async scanning; rejected while background work runs
    pub fn set_async(&mut self, enabled: bool) -> Result<(), MediaError> {
        if self.is_scanning() {
            return Err(MediaError::new(
                ErrorKind::IllegalParameter,
                None,
                Some("cannot change mode while a scan is running".to_string()),
            ));
        }
        self.async_mode = enabled;
        Ok(())
    }

    pub fn set_result_callback(&mut self, callback: Option<ResultCallback>) {
        self.on_result = callback;
    }

    pub fn set_error_callback(&mut self, callback: Option<ErrorCallback>) {
        self.on_error = callback;
    }

    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.on_progress = callback;
    }

    pub fn set_progress_interval(&mut self, interval_ms: u64) {
        progress::lock(&self.progress).set_interval(Duration::from_millis(interval_ms));
    }

    /// Current progress counters
    pub fn progress(&self) -> ProgressSnapshot {
        progress::lock(&self.progress).snapshot()
    }

    /// Totals of the last completed scan
    pub fn summary(&self) -> ScanSummary {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forget every fingerprint so the next scan reprocesses everything
    pub fn reset_cache(&mut self) {
        info!("Resetting change cache");
        self.cache.reset();
    }

    fn walker(&self) -> TreeWalker {
        TreeWalker::new(
            Arc::clone(&self.config),
            Arc::clone(&self.cache),
            Arc::clone(&self.probe),
            self.queue.producer().cancel_flag(),
        )
    }

    pub fn is_scanning(&self) -> bool {
        self.tracker.active() > 0
    }

    /// Scan every registered root
    ///
    /// In sync mode this walks on the calling thread and dispatches callbacks
    /// before returning. In async mode it starts the walk on the worker pool
    /// and returns at once; results arrive through [`pump`](Self::pump).
    pub fn scan(&mut self) -> Result<(), MediaError> {
        if self.roots.is_empty() {
            return Err(MediaError::new(
                ErrorKind::IllegalParameter,
                None,
                Some("no roots registered".to_string()),
            ));
        }
        if self.is_scanning() {
            return Err(MediaError::new(
                ErrorKind::IllegalParameter,
                None,
                Some("a scan is already running".to_string()),
            ));
        }

        {
            let mut progress = progress::lock(&self.progress);
            progress.start_phase("scan");
            progress.set_total(None);
        }
        let walker = self.walker().with_progress(Arc::clone(&self.progress));
        let roots = self.roots.clone();
        info!("Scanning {} root(s), async: {}", roots.len(), self.async_mode);

        if self.async_mode {
            return self.spawn_scan(walker, roots);
        }

        let summary = walker.walk_roots(&roots, &WalkScope::Full, WalkMode::Report, &mut |event| {
            self.dispatch(event)
        })?;
        *self.summary.lock().unwrap_or_else(PoisonError::into_inner) = summary;
        Ok(())
    }

    fn pool(&mut self) -> Result<&rayon::ThreadPool, MediaError> {
        if self.pool.is_none() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.effective_threads())
                .thread_name(|idx| format!("media-watch-{}", idx))
                .build()
                .map_err(|e| MediaError::new(ErrorKind::OutOfMemory, None, Some(e.to_string())))?;
            self.pool = Some(pool);
        }
        match &self.pool {
            Some(pool) => Ok(pool),
            None => Err(MediaError::new(ErrorKind::OutOfMemory, None, None)),
        }
    }

    fn spawn_scan(&mut self, walker: TreeWalker, roots: Vec<PathBuf>) -> Result<(), MediaError> {
        let guard = self.tracker.enter();
        let producer = self.queue.producer();
        let summary = Arc::clone(&self.summary);
        self.pool()?.spawn(move || {
            let _guard = guard;
            let outcomes: Vec<Result<ScanSummary, MediaError>> = roots
                .par_iter()
                .map(|root| {
                    walker.walk(root, &WalkScope::Full, WalkMode::Report, &mut |event| {
                        producer.push(event);
                    })
                })
                .collect();

            let mut total = ScanSummary::new();
            for outcome in outcomes {
                match outcome {
                    Ok(s) => total.merge(&s),
                    Err(e) => {
                        warn!("Background scan aborted: {}", e);
                        producer.push(ScanEvent::Error(e));
                    }
                }
            }
            info!("Background scan finished: {} files", total.total_files);
            *summary.lock().unwrap_or_else(PoisonError::into_inner) = total;
        });
        Ok(())
    }

    /// Dispatch the items queued at the time of the call; returns how many ran
    pub fn pump(&mut self) -> usize {
        let pending = self.queue.len();
        let mut dispatched = 0;
        for _ in 0..pending {
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.dispatch(event);
            dispatched += 1;
        }
        dispatched
    }

    /// Block until items are pending or `timeout` passes
    pub fn wait_ready(&mut self, timeout: Duration) -> bool {
        self.queue.wait_ready(timeout)
    }

    pub fn is_ready(&self) -> bool {
        self.queue.is_ready()
    }

    /// Descriptor that polls readable while [`pump`](Self::pump) has work
    #[cfg(unix)]
    pub fn readiness_fd(&self) -> Option<RawFd> {
        self.queue.readiness_fd()
    }

    fn dispatch(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Result(result) => {
                if let Some(mut callback) = self.on_result.take() {
                    callback(&*self, &result);
                    self.on_result = Some(callback);
                }
            }
            ScanEvent::Error(error) => {
                if let Some(mut callback) = self.on_error.take() {
                    callback(&*self, &error);
                    self.on_error = Some(callback);
                } else {
                    debug!("Unhandled scan error: {}", error);
                }
            }
            ScanEvent::Progress(snapshot) => {
                if let Some(mut callback) = self.on_progress.take() {
                    callback(&*self, &snapshot);
                    self.on_progress = Some(callback);
                }
            }
            ScanEvent::Refresh { root, paths } => {
                let walker = self.walker();
                let cache = Arc::clone(&self.cache);
                watcher::refresh_paths(&walker, &cache, &root, &paths, &mut |event| self.dispatch(event));
            }
        }
    }

    /// Watch an existing directory, registering it as a root if needed
    ///
    /// A watch that lost its directory is replaced by a fresh one. In sync
    /// mode refresh walks are queued and run by [`pump`](Self::pump) on the
    /// calling thread; in async mode they run on the watcher's own thread.
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<(), MediaError> {
        let path = path.as_ref();
        let root = self.validate_root(path)?;
        if !root.is_dir() {
            return Err(MediaError::illegal_parameter(path, "not an existing directory"));
        }
        match self.watches.get(&root).map(WatchSubscription::state) {
            Some(WatchState::Unwatched) => {
                info!("Restarting watch on {}", root.display());
                self.watches.remove(&root);
            }
            Some(_) => return Ok(()),
            None => {}
        }

        let target = WatchTarget {
            walker: self.walker(),
            cache: Arc::clone(&self.cache),
            producer: self.queue.producer(),
            config: Arc::clone(&self.config),
            refresh: if self.async_mode {
                RefreshMode::Background
            } else {
                RefreshMode::Deferred
            },
        };
        let subscription = WatchSubscription::start(root.clone(), target)?;
        self.watches.insert(root.clone(), subscription);
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
        Ok(())
    }

    /// Stop watching a directory; the root stays registered
    pub fn unwatch_directory(&mut self, path: impl AsRef<Path>) -> bool {
        self.watches.remove(&normalize_root(path.as_ref())).is_some()
    }

    pub fn watch_state(&self, path: impl AsRef<Path>) -> WatchState {
        self.watches
            .get(&normalize_root(path.as_ref()))
            .map(WatchSubscription::state)
            .unwrap_or(WatchState::Unwatched)
    }
}

impl Drop for ScanContext {
    fn drop(&mut self) {
        self.queue.producer().cancel_flag().store(true, Ordering::SeqCst);
        self.watches.clear();
        self.tracker.wait_idle(None);
        let discarded = self.queue.cancel();
        if discarded > 0 {
            debug!("Discarded {} undelivered items", discarded);
        }
    }
}

fn normalize_root(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// `\\server\share` and `//server/share`, including the `\\?\UNC\` form
pub fn is_network_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    let normalized = s.replace('\\', "/");
    if let Some(rest) = normalized.strip_prefix("//?/") {
        return rest.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("unc/"));
    }
    match normalized.strip_prefix("//") {
        Some(rest) => rest.chars().next().is_some_and(|c| c != '/'),
        None => false,
    }
}
