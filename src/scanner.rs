//! Scanner module - depth-first tree walker
//!
//! Walks registered roots, resolves aliases, consults the change cache and
//! hands new or modified files to the media probe. Everything the walk
//! produces goes to a caller-supplied sink; the walker itself never decides
//! whether items are dispatched inline or queued.

use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

use crate::alias::{self, AliasResolver, Resolution};
use crate::cache::{CacheEntry, ChangeCache, Fingerprint};
use crate::config::ScanConfig;
use crate::error::{ErrorKind, MediaError};
use crate::models::{ResultFlags, ScanEvent, ScanSummary};
use crate::probe::MediaProbe;
use crate::progress::{self, SharedProgress};

/// Which part of a root to walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkScope {
    /// The whole root
    Full,
    /// One file or directory below the root
    Subtree(PathBuf),
}

/// Whether unchanged files are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// Emit a result for every file, cached or not
    Report,
    /// Emit results only for files that were probed
    ChangesOnly,
}

/// Receives every item a walk produces
pub type Sink<'a> = dyn FnMut(ScanEvent) + 'a;

/// Depth-first walker over registered roots
#[derive(Clone)]
pub struct TreeWalker {
    config: Arc<ScanConfig>,
    cache: Arc<ChangeCache>,
    probe: Arc<dyn MediaProbe>,
    resolver: AliasResolver,
    progress: Option<SharedProgress>,
    cancelled: Arc<AtomicBool>,
}

struct WalkState<'s, 'a> {
    sink: &'s mut Sink<'a>,
    summary: ScanSummary,
    /// Canonical directories entered so far, directly or through an alias
    visited_dirs: HashSet<PathBuf>,
    /// Canonical files handled so far
    visited_files: HashSet<PathBuf>,
    mode: WalkMode,
}

impl WalkState<'_, '_> {
    fn emit_error(&mut self, error: MediaError) {
        debug!("Walk error: {}", error);
        self.summary.errors += 1;
        (self.sink)(ScanEvent::Error(error));
    }
}

impl TreeWalker {
    pub fn new(
        config: Arc<ScanConfig>,
        cache: Arc<ChangeCache>,
        probe: Arc<dyn MediaProbe>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            cache,
            probe,
            resolver: AliasResolver::new(),
            progress: None,
            cancelled,
        }
    }

    /// Count processed files against `progress` and forward due snapshots
    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Walk every root that `scope` touches, one after another
    pub fn walk_roots(
        &self,
        roots: &[PathBuf],
        scope: &WalkScope,
        mode: WalkMode,
        sink: &mut Sink<'_>,
    ) -> Result<ScanSummary, MediaError> {
        let mut summary = ScanSummary::new();
        for root in roots {
            if let WalkScope::Subtree(path) = scope {
                if !path.starts_with(root) {
                    continue;
                }
            }
            if self.is_cancelled() {
                break;
            }
            summary.merge(&self.walk(root, scope, mode, sink)?);
        }
        Ok(summary)
    }

    /// Walk one root
    ///
    /// Returns `Err` only for fatal conditions; everything else is sent to
    /// `sink` as an error item and the walk carries on.
    pub fn walk(
        &self,
        root: &Path,
        scope: &WalkScope,
        mode: WalkMode,
        sink: &mut Sink<'_>,
    ) -> Result<ScanSummary, MediaError> {
        let start_time = Instant::now();
        let max_depth = self.config.effective_max_depth();

        let (start, budget) = match scope {
            WalkScope::Full => (root.to_path_buf(), max_depth),
            WalkScope::Subtree(path) => {
                let relative = path.strip_prefix(root).map_err(|_| {
                    MediaError::illegal_parameter(path.clone(), "subtree is outside the root")
                })?;
                let depth = relative.components().count();
                if depth > max_depth {
                    return Ok(ScanSummary::new());
                }
                (path.clone(), max_depth - depth)
            }
        };

        let mut state = WalkState {
            sink,
            summary: ScanSummary::new(),
            visited_dirs: HashSet::new(),
            visited_files: HashSet::new(),
            mode,
        };
        if let Some(failure) = self.cache.take_failure() {
            state.emit_error(failure);
        }
        if let Ok(canonical) = fs::canonicalize(&start) {
            state.visited_dirs.insert(canonical);
        }

        self.walk_tree(&start, budget, &mut state)?;

        if let Some(failure) = self.cache.take_failure() {
            state.emit_error(failure);
        }
        let mut summary = state.summary;
        summary.duration_ms = start_time.elapsed().as_millis() as u64;
        info!(
            "Walked {}: {} files ({} probed, {} cached), {} dirs, {} errors in {}ms",
            start.display(),
            summary.total_files,
            summary.probed_files,
            summary.cached_files,
            summary.total_dirs,
            summary.errors,
            summary.duration_ms
        );
        Ok(summary)
    }

    fn walk_tree(
        &self,
        start: &Path,
        budget: usize,
        state: &mut WalkState<'_, '_>,
    ) -> Result<(), MediaError> {
        let config = &self.config;
        // Links are not followed, so everything below a canonical base is canonical too
        let base = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
        let canonical = |path: &Path| match path.strip_prefix(start) {
            Ok(relative) if relative.as_os_str().is_empty() => base.clone(),
            Ok(relative) => base.join(relative),
            Err(_) => path.to_path_buf(),
        };
        let mut walker = WalkDir::new(start)
            .max_depth(budget)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                e.file_name()
                    .to_str()
                    .map(|name| !config.should_ignore_dir(name))
                    .unwrap_or(true)
            });

        while let Some(entry) = walker.next() {
            if self.is_cancelled() {
                debug!("Walk of {} cancelled", start.display());
                return Ok(());
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| start.to_path_buf());
                    let error = match e.io_error() {
                        Some(io) => MediaError::from_io(ErrorKind::DirectoryUnreadable, &path, io),
                        None => MediaError::directory_unreadable(path, e.to_string()),
                    };
                    if error.is_fatal() {
                        return Err(error);
                    }
                    state.emit_error(error);
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if entry.depth() > 0 && !state.visited_dirs.insert(canonical(path)) {
                    debug!("Already walked {}", path.display());
                    walker.skip_current_dir();
                    continue;
                }
                state.summary.total_dirs += 1;
                state.summary.evicted += self.cache.evict_missing(path) as u64;
                continue;
            }

            if alias::is_alias(path, &file_type) {
                match self.resolver.resolve(path) {
                    Resolution::NotAnAlias => {}
                    Resolution::Unresolvable(error) => {
                        state.emit_error(error);
                        continue;
                    }
                    Resolution::Resolved(target) => {
                        if target.is_dir() {
                            let remaining = budget.saturating_sub(entry.depth());
                            if remaining > 0 && state.visited_dirs.insert(target.clone()) {
                                debug!("Following alias {} -> {}", path.display(), target.display());
                                self.walk_tree(&target, remaining, state)?;
                            }
                        } else if state.visited_files.insert(target.clone()) {
                            self.process_file(&target, state)?;
                        }
                        continue;
                    }
                }
            }

            if file_type.is_file() && state.visited_files.insert(canonical(path)) {
                self.process_file(path, state)?;
            }
        }
        Ok(())
    }

    fn process_file(&self, path: &Path, state: &mut WalkState<'_, '_>) -> Result<(), MediaError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !self.config.should_include_extension(&extension) {
            return Ok(());
        }

        let _write_guard = self.cache.lock_path(path);

        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::OutOfMemory {
                    return Err(MediaError::out_of_memory(Some(path.to_path_buf())));
                }
                // Removed between listing and stat.
                debug!("Skipping vanished file {}: {}", path.display(), e);
                self.cache.remove(path);
                return Ok(());
            }
        };

        let mut fingerprint = Fingerprint::from_metadata(&metadata);
        if self.config.compute_digest {
            match fingerprint
                .clone()
                .with_digest(path, self.config.large_file_threshold)
            {
                Ok(with_digest) => fingerprint = with_digest,
                Err(e) => debug!("Digest of {} failed, using size and mtime: {}", path.display(), e),
            }
        }

        let cached = self.cache.lookup(path);
        if let Some(entry) = &cached {
            if entry.fingerprint.matches(&fingerprint) {
                state.summary.total_files += 1;
                state.summary.cached_files += 1;
                if state.mode == WalkMode::Report {
                    let result = entry.result.clone().with_flags(ResultFlags::CACHED);
                    (state.sink)(ScanEvent::Result(result));
                }
                self.tick(path, state);
                return Ok(());
            }
        }

        state.summary.probed_files += 1;
        debug!("Probing {}", path.display());
        match self.probe.probe(path) {
            Ok(mut result) => {
                result.path = path.to_path_buf();
                result.flags.remove(ResultFlags::CACHED);
                result.flags.remove(ResultFlags::CHANGED);
                if fingerprint.partial_digest {
                    result.flags.insert(ResultFlags::PARTIAL_DIGEST);
                }
                self.cache.put(
                    path,
                    &CacheEntry {
                        fingerprint,
                        result: result.clone(),
                    },
                );
                if cached.is_some() {
                    result.flags.insert(ResultFlags::CHANGED);
                }
                state.summary.total_files += 1;
                (state.sink)(ScanEvent::Result(result));
            }
            Err(error) => {
                if error.is_fatal() {
                    return Err(error);
                }
                let detail = error.detail.clone().unwrap_or_else(|| error.to_string());
                state.emit_error(MediaError::probe_failed(path, detail));
            }
        }
        self.tick(path, state);
        Ok(())
    }

    fn tick(&self, path: &Path, state: &mut WalkState<'_, '_>) {
        let Some(shared) = &self.progress else {
            return;
        };
        let snapshot = {
            let mut progress = progress::lock(shared);
            if !progress.update(&path.to_string_lossy()) {
                return;
            }
            progress.snapshot()
        };
        (state.sink)(ScanEvent::Progress(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaResult, MediaType};
    use crate::probe::testing::CountingProbe;
    use crate::progress::Progress;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        probe: Arc<CountingProbe>,
        cache: Arc<ChangeCache>,
        walker: TreeWalker,
    }

    fn fixture_with(probe: CountingProbe, config: ScanConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let probe = Arc::new(probe);
        let cache = Arc::new(ChangeCache::open_in_memory());
        let walker = TreeWalker::new(
            Arc::new(config),
            Arc::clone(&cache),
            probe.clone(),
            Arc::new(AtomicBool::new(false)),
        );
        Fixture {
            dir,
            probe,
            cache,
            walker,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CountingProbe::new(), ScanConfig::default())
    }

    impl Fixture {
        fn root(&self) -> PathBuf {
            fs::canonicalize(self.dir.path()).unwrap()
        }

        fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
            let path = self.root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            path
        }

        fn walk(&self, scope: WalkScope, mode: WalkMode) -> (Vec<MediaResult>, Vec<MediaError>) {
            let mut results = Vec::new();
            let mut errors = Vec::new();
            self.walker
                .walk(&self.root(), &scope, mode, &mut |event| match event {
                    ScanEvent::Result(r) => results.push(r),
                    ScanEvent::Error(e) => errors.push(e),
                    ScanEvent::Progress(_) | ScanEvent::Refresh { .. } => {}
                })
                .unwrap();
            results.sort_by(|a, b| a.path.cmp(&b.path));
            (results, errors)
        }

        fn full(&self) -> (Vec<MediaResult>, Vec<MediaError>) {
            self.walk(WalkScope::Full, WalkMode::Report)
        }
    }

    #[test]
    fn test_walk_covers_nested_media_only() {
        let fx = fixture();
        fx.write("a.mp4", b"video");
        fx.write("music/b.flac", b"audio");
        fx.write("music/deep/c.jpg", b"image");
        fx.write("notes.txt", b"text");
        fx.write(".git/d.mp4", b"hidden");
        fx.write("@eaDir/e.mp4", b"thumbs");

        let (results, errors) = fx.full();
        assert!(errors.is_empty());
        let names: Vec<_> = results.iter().filter_map(|r| r.file_name()).collect();
        assert_eq!(names, vec!["a.mp4", "b.flac", "c.jpg"]);
        assert_eq!(results[1].media_type, MediaType::Audio);
        assert_eq!(fx.probe.calls(), 3);
    }

    #[test]
    fn test_unchanged_files_come_from_cache() {
        let fx = fixture();
        fx.write("a.mp4", b"video");
        fx.write("b.mp3", b"audio");

        let (first, _) = fx.full();
        assert_eq!(fx.probe.calls(), 2);
        assert!(first.iter().all(|r| !r.flags.contains(ResultFlags::CACHED)));

        let (second, _) = fx.full();
        assert_eq!(fx.probe.calls(), 2);
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|r| r.flags.contains(ResultFlags::CACHED)));
        assert_eq!(second[0].path, first[0].path);
        assert_eq!(second[0].size, first[0].size);
    }

    #[test]
    fn test_changed_file_probed_exactly_once() {
        let fx = fixture();
        let a = fx.write("a.mp4", b"video");
        let b = fx.write("b.mp3", b"audio");
        fx.full();

        fs::write(&a, b"a longer video payload").unwrap();
        let (results, _) = fx.full();
        assert_eq!(fx.probe.calls_for(&a), 2);
        assert_eq!(fx.probe.calls_for(&b), 1);

        let changed = results.iter().find(|r| r.path == a).unwrap();
        assert!(changed.flags.contains(ResultFlags::CHANGED));
        assert_eq!(changed.size, 22);
        assert_eq!(fx.cache.lookup(&a).unwrap().fingerprint.size, 22);
    }

    #[test]
    fn test_reset_forces_reprocessing() {
        let fx = fixture();
        fx.write("a.mp4", b"video");
        fx.write("b.mp3", b"audio");
        fx.full();
        fx.cache.reset();
        fx.full();
        assert_eq!(fx.probe.calls(), 4);
    }

    #[test]
    fn test_probe_failure_reported_and_retried() {
        let fx = fixture_with(CountingProbe::failing_on("broken"), ScanConfig::default());
        let bad = fx.write("broken.mkv", b"garbage");
        fx.write("fine.mkv", b"ok");

        let (results, errors) = fx.full();
        assert_eq!(results.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::ProbeFailed);
        assert_eq!(errors[0].path.as_deref(), Some(bad.as_path()));
        assert!(fx.cache.lookup(&bad).is_none());

        fx.full();
        assert_eq!(fx.probe.calls_for(&bad), 2);
    }

    #[test]
    fn test_changes_only_suppresses_cached_results() {
        let fx = fixture();
        fx.write("a.mp4", b"video");
        fx.full();
        let b = fx.write("b.mp4", b"new video");

        let (results, _) = fx.walk(WalkScope::Full, WalkMode::ChangesOnly);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, b);
    }

    #[test]
    fn test_subtree_scope_stays_inside() {
        let fx = fixture();
        fx.write("shows/a.mkv", b"1");
        fx.write("shows/s1/b.mkv", b"2");
        fx.write("movies/c.mkv", b"3");

        let shows = fx.root().join("shows");
        let (results, _) = fx.walk(WalkScope::Subtree(shows.clone()), WalkMode::Report);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.path.starts_with(&shows)));

        let single = fx.root().join("movies/c.mkv");
        let (results, _) = fx.walk(WalkScope::Subtree(single.clone()), WalkMode::Report);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, single);
    }

    #[test]
    fn test_subtree_outside_root_rejected() {
        let fx = fixture();
        let err = fx
            .walker
            .walk(
                &fx.root(),
                &WalkScope::Subtree(PathBuf::from("/definitely/elsewhere")),
                WalkMode::Report,
                &mut |_| {},
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IllegalParameter);
    }

    #[test]
    fn test_deleted_file_evicted_on_next_listing() {
        let fx = fixture();
        let a = fx.write("a.mp4", b"video");
        fx.write("b.mp4", b"video");
        fx.full();
        assert!(fx.cache.lookup(&a).is_some());

        fs::remove_file(&a).unwrap();
        assert!(fx.cache.lookup(&a).is_some());
        let (results, _) = fx.full();
        assert_eq!(results.len(), 1);
        assert!(fx.cache.lookup(&a).is_none());
    }

    #[test]
    fn test_missing_root_reported_as_unreadable() {
        let fx = fixture();
        let missing = fx.root().join("gone");
        let mut errors = Vec::new();
        fx.walker
            .walk(&missing, &WalkScope::Full, WalkMode::Report, &mut |e| {
                if let ScanEvent::Error(e) = e {
                    errors.push(e)
                }
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::DirectoryUnreadable);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_does_not_stop_siblings() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        fx.write("locked/a.mp4", b"1");
        fx.write("open/b.mp4", b"2");
        let locked = fx.root().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Running with CAP_DAC_OVERRIDE; permissions are not enforced.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let (results, errors) = fx.full();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_name(), Some("b.mp4"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::DirectoryUnreadable);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_aliases() {
        let fx = fixture();
        let target = fx.write("library/song.flac", b"audio");
        let links = fx.root().join("links");
        fs::create_dir_all(&links).unwrap();
        std::os::unix::fs::symlink(&target, links.join("alias.flac")).unwrap();
        std::os::unix::fs::symlink(fx.root().join("library/gone.flac"), links.join("dead.flac"))
            .unwrap();

        let mut results = Vec::new();
        let mut errors = Vec::new();
        fx.walker
            .walk(&links, &WalkScope::Full, WalkMode::Report, &mut |e| match e {
                ScanEvent::Result(r) => results.push(r),
                ScanEvent::Error(e) => errors.push(e),
                _ => {}
            })
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, target);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::BrokenAlias);
        assert_eq!(errors[0].path, Some(links.join("dead.flac")));
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_symlink_loop_terminates() {
        let fx = fixture();
        fx.write("a/clip.mp4", b"1");
        std::os::unix::fs::symlink(fx.root(), fx.root().join("a/back")).unwrap();

        let (results, errors) = fx.full();
        assert!(errors.is_empty());
        assert_eq!(results.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_alias_into_walked_subdirectory_reported_once() {
        let fx = fixture();
        let clip = fx.write("a/clip.mp4", b"1");
        fx.write("a/deeper/more.mp4", b"2");
        std::os::unix::fs::symlink(fx.root().join("a"), fx.root().join("link")).unwrap();
        std::os::unix::fs::symlink(&clip, fx.root().join("z-clip.mp4")).unwrap();

        let mut results = Vec::new();
        let summary = fx
            .walker
            .walk(&fx.root(), &WalkScope::Full, WalkMode::Report, &mut |e| {
                if let ScanEvent::Result(r) = e {
                    results.push(r.path)
                }
            })
            .unwrap();

        results.sort();
        assert_eq!(results, vec![clip, fx.root().join("a/deeper/more.mp4")]);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.cached_files, 0);
        assert_eq!(fx.probe.calls(), 2);
    }

    #[test]
    fn test_shell_link_to_directory_is_walked() {
        let fx = fixture();
        fx.write("elsewhere/inner/x.mp3", b"1");
        let target_dir = fx.root().join("elsewhere/inner");
        let lnk = crate::alias::tests::build_shell_link(Some(&target_dir.to_string_lossy()), None);
        let linkdir = fx.root().join("links");
        fs::create_dir_all(&linkdir).unwrap();
        fs::write(linkdir.join("inner.lnk"), lnk).unwrap();

        let mut results = Vec::new();
        fx.walker
            .walk(&linkdir, &WalkScope::Full, WalkMode::Report, &mut |e| {
                if let ScanEvent::Result(r) = e {
                    results.push(r)
                }
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, target_dir.join("x.mp3"));
    }

    #[test]
    fn test_digest_detects_same_size_rewrite_with_equal_mtime() {
        let config = ScanConfig::builder().compute_digest(true).build();
        let fx = fixture_with(CountingProbe::new(), config);
        let a = fx.write("a.mp4", b"AAAA");
        fx.full();
        let before = fx.cache.lookup(&a).unwrap().fingerprint;
        assert!(before.digest.is_some());

        // Same size and same timestamp, different bytes.
        let mtime = fs::metadata(&a).unwrap().modified().unwrap();
        fs::write(&a, b"BBBB").unwrap();
        let file = fs::File::options().write(true).open(&a).unwrap();
        file.set_modified(mtime).unwrap();
        drop(file);

        fx.full();
        assert_eq!(fx.probe.calls_for(&a), 2);
    }

    #[test]
    fn test_cancelled_walk_stops_early() {
        let fx = fixture();
        for i in 0..20 {
            fx.write(&format!("f{i}.mp4"), b"x");
        }
        fx.walker.cancelled.store(true, Ordering::SeqCst);
        let (results, _) = fx.full();
        assert!(results.is_empty());
        assert_eq!(fx.probe.calls(), 0);
    }

    #[test]
    fn test_progress_snapshots_forwarded() {
        let fx = fixture();
        fx.write("a.mp4", b"1");
        fx.write("b.mp4", b"2");
        let progress = Progress::shared(Duration::ZERO);
        progress::lock(&progress).start_phase("scan");
        let walker = fx.walker.clone().with_progress(Arc::clone(&progress));

        let mut snapshots = 0;
        walker
            .walk(&fx.root(), &WalkScope::Full, WalkMode::Report, &mut |e| {
                if let ScanEvent::Progress(_) = e {
                    snapshots += 1
                }
            })
            .unwrap();
        assert_eq!(snapshots, 2);
        assert_eq!(progress::lock(&progress).done(), 2);
    }

    #[test]
    fn test_max_depth_and_non_recursive() {
        let config = ScanConfig::builder().recursive(false).build();
        let fx = fixture_with(CountingProbe::new(), config);
        fx.write("top.mp4", b"1");
        fx.write("sub/nested.mp4", b"2");
        let (results, _) = fx.full();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_name(), Some("top.mp4"));
    }
}
