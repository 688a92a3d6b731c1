//! Configuration for the media scanner

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default large file threshold (100 MB)
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Default quiet period before a burst of change notifications is refreshed
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default interval of the polling watch backend
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default minimum interval between progress snapshots
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// Which change-notification backend the watcher uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Native backend, falling back to polling if it cannot be initialised
    #[default]
    Auto,
    /// Platform notification API (inotify, FSEvents, ReadDirectoryChangesW)
    Native,
    /// Periodic metadata polling
    Polling,
}

impl std::str::FromStr for WatchBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchBackend::Auto),
            "native" => Ok(WatchBackend::Native),
            "poll" | "polling" => Ok(WatchBackend::Polling),
            other => Err(format!("unknown watch backend: {other}")),
        }
    }
}

/// Configuration for the scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// File extensions to include (whitelist)
    /// If empty, every file is handed to the probe
    pub extensions: HashSet<String>,

    /// Directory names to ignore
    pub ignore_dirs: HashSet<String>,

    /// Whether the fingerprint includes a content digest
    pub compute_digest: bool,

    /// Threshold for using partial digest (bytes)
    /// Files larger than this hash only the first and last 1MB
    pub large_file_threshold: u64,

    /// Number of background threads for async scans
    /// 0 means auto-detect (available parallelism)
    pub num_threads: usize,

    /// Cache database path; in-memory when unset
    pub cache_path: Option<PathBuf>,

    /// Whether to scan subdirectories recursively
    pub recursive: bool,

    /// Maximum depth for recursive scanning, unlimited when unset
    pub max_depth: Option<usize>,

    /// Whether `scan()` returns immediately and results are pumped
    pub async_mode: bool,

    /// Debounce window for coalescing change notifications (milliseconds)
    pub debounce_ms: u64,

    /// Watch backend selection
    pub watch_backend: WatchBackend,

    /// Poll interval for the polling backend (milliseconds)
    pub poll_interval_ms: u64,

    /// Minimum interval between progress snapshots (milliseconds)
    pub progress_interval_ms: u64,

    /// Whether network share roots (`\\server\share`, `//server/share`) are accepted
    pub allow_network_paths: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: Self::default_extensions(),
            ignore_dirs: Self::default_ignore_dirs(),
            compute_digest: false,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            num_threads: 0,
            cache_path: None,
            recursive: true,
            max_depth: None,
            async_mode: false,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            watch_backend: WatchBackend::Auto,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            allow_network_paths: false,
        }
    }
}

impl ScanConfig {
    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Get the default video extensions
    pub fn default_video_extensions() -> HashSet<String> {
        [
            "mp4", "mkv", "avi", "wmv", "flv", "mov", "webm", "m4v", "ts", "rmvb", "mpg", "mpeg",
            "asf", "3gp",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Get the default image extensions
    pub fn default_image_extensions() -> HashSet<String> {
        ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Get the default audio extensions
    pub fn default_audio_extensions() -> HashSet<String> {
        ["mp3", "flac", "wav", "aac", "ogg", "wma", "m4a", "opus", "aiff"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Get all default media extensions
    pub fn default_extensions() -> HashSet<String> {
        let mut extensions = Self::default_video_extensions();
        extensions.extend(Self::default_image_extensions());
        extensions.extend(Self::default_audio_extensions());
        extensions
    }

    /// Get the default directories to ignore
    pub fn default_ignore_dirs() -> HashSet<String> {
        [
            "$RECYCLE.BIN",
            "System Volume Information",
            ".Trash",
            ".Trash-1000",
            "@eaDir",
            ".git",
            ".svn",
            "node_modules",
            "__pycache__",
            ".cache",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Check if an extension should be included
    pub fn should_include_extension(&self, ext: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Check if a directory should be ignored
    pub fn should_ignore_dir(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return true;
        }
        self.ignore_dirs.contains(name)
    }

    /// Get the effective number of threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }

    /// Get the effective max depth for walkdir
    pub fn effective_max_depth(&self) -> usize {
        if !self.recursive {
            1
        } else {
            self.max_depth.unwrap_or(usize::MAX)
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the extensions whitelist
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    /// Accept every file regardless of extension
    pub fn all_extensions(mut self) -> Self {
        self.config.extensions.clear();
        self
    }

    /// Set only video extensions
    pub fn video_only(mut self) -> Self {
        self.config.extensions = ScanConfig::default_video_extensions();
        self
    }

    /// Set only audio extensions
    pub fn audio_only(mut self) -> Self {
        self.config.extensions = ScanConfig::default_audio_extensions();
        self
    }

    /// Set the directories to ignore
    pub fn ignore_dirs(mut self, dirs: HashSet<String>) -> Self {
        self.config.ignore_dirs = dirs;
        self
    }

    /// Add a directory to ignore
    pub fn add_ignore_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.ignore_dirs.insert(dir.into());
        self
    }

    /// Enable or disable the content digest in fingerprints
    pub fn compute_digest(mut self, enabled: bool) -> Self {
        self.config.compute_digest = enabled;
        self
    }

    /// Set the large file threshold
    pub fn large_file_threshold(mut self, threshold: u64) -> Self {
        self.config.large_file_threshold = threshold;
        self
    }

    /// Set the number of threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the cache database path
    pub fn cache_path(mut self, path: PathBuf) -> Self {
        self.config.cache_path = Some(path);
        self
    }

    /// Enable or disable recursive scanning
    pub fn recursive(mut self, enabled: bool) -> Self {
        self.config.recursive = enabled;
        self
    }

    /// Set the maximum depth for recursive scanning
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = Some(depth);
        self
    }

    /// Enable or disable async mode
    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.config.async_mode = enabled;
        self
    }

    /// Set the debounce window in milliseconds
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    /// Select the watch backend
    pub fn watch_backend(mut self, backend: WatchBackend) -> Self {
        self.config.watch_backend = backend;
        self
    }

    /// Set the polling backend interval in milliseconds
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the progress interval in milliseconds
    pub fn progress_interval_ms(mut self, ms: u64) -> Self {
        self.config.progress_interval_ms = ms;
        self
    }

    /// Accept or reject network share roots
    pub fn allow_network_paths(mut self, allowed: bool) -> Self {
        self.config.allow_network_paths = allowed;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert!(!config.compute_digest);
        assert!(!config.async_mode);
        assert!(config.cache_path.is_none());
        assert_eq!(config.large_file_threshold, DEFAULT_LARGE_FILE_THRESHOLD);
        assert_eq!(config.debounce(), Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(config.watch_backend, WatchBackend::Auto);
    }

    #[test]
    fn test_should_include_extension() {
        let config = ScanConfig::default();
        assert!(config.should_include_extension("mp4"));
        assert!(config.should_include_extension("MP4"));
        assert!(config.should_include_extension("jpg"));
        assert!(!config.should_include_extension("txt"));

        let open = ScanConfig::builder().all_extensions().build();
        assert!(open.should_include_extension("txt"));
    }

    #[test]
    fn test_should_ignore_dir() {
        let config = ScanConfig::default();
        assert!(config.should_ignore_dir(".git"));
        assert!(config.should_ignore_dir(".hidden"));
        assert!(config.should_ignore_dir("$RECYCLE.BIN"));
        assert!(config.should_ignore_dir("@eaDir"));
        assert!(!config.should_ignore_dir("Videos"));
    }

    #[test]
    fn test_config_builder() {
        let config = ScanConfig::builder()
            .video_only()
            .compute_digest(true)
            .num_threads(4)
            .async_mode(true)
            .debounce_ms(150)
            .watch_backend(WatchBackend::Polling)
            .max_depth(2)
            .build();

        assert!(config.compute_digest);
        assert!(config.async_mode);
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.debounce_ms, 150);
        assert_eq!(config.watch_backend, WatchBackend::Polling);
        assert_eq!(config.effective_max_depth(), 2);
        assert!(config.extensions.contains("mp4"));
        assert!(!config.extensions.contains("jpg"));
    }

    #[test]
    fn test_effective_threads_and_depth() {
        let config = ScanConfig::builder().num_threads(8).build();
        assert_eq!(config.effective_threads(), 8);
        assert!(ScanConfig::default().effective_threads() > 0);

        assert_eq!(ScanConfig::default().effective_max_depth(), usize::MAX);
        let flat = ScanConfig::builder().recursive(false).max_depth(9).build();
        assert_eq!(flat.effective_max_depth(), 1);
    }

    #[test]
    fn test_watch_backend_from_str() {
        assert_eq!("auto".parse::<WatchBackend>(), Ok(WatchBackend::Auto));
        assert_eq!("Native".parse::<WatchBackend>(), Ok(WatchBackend::Native));
        assert_eq!("poll".parse::<WatchBackend>(), Ok(WatchBackend::Polling));
        assert!("fsevents2".parse::<WatchBackend>().is_err());
    }

    fn known_extension() -> impl Strategy<Value = String> {
        let mut known: Vec<String> = ScanConfig::default_extensions().into_iter().collect();
        known.sort();
        prop::sample::select(known)
    }

    proptest! {
        #[test]
        fn extension_match_ignores_case(ext in known_extension(), upper in prop::collection::vec(any::<bool>(), 8)) {
            let mixed: String = ext
                .chars()
                .zip(upper.iter().chain(std::iter::repeat(&false)))
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            prop_assert!(ScanConfig::default().should_include_extension(&mixed));
        }

        #[test]
        fn dot_directories_always_ignored(name in "[A-Za-z0-9_ -]{0,12}") {
            let config = ScanConfig::builder().ignore_dirs(HashSet::new()).build();
            let dir = format!(".{}", name);
            prop_assert!(config.should_ignore_dir(&dir));
        }

        #[test]
        fn backend_names_parse_in_any_case(name in prop::sample::select(vec!["auto", "native", "poll", "polling"]), upper in any::<bool>()) {
            let input = if upper { name.to_uppercase() } else { name.to_string() };
            prop_assert!(input.parse::<WatchBackend>().is_ok());
        }
    }
}
