//! Recursive media scanner with change detection and directory watching
//!
//! This library walks media trees with walkdir, skips unchanged files through
//! a SQLite change cache, runs scans on a rayon pool when asked to, and keeps
//! watched roots current with incremental refreshes driven by notify.

pub mod alias;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod watcher;

pub use alias::{AliasResolver, Resolution};
pub use cache::{CacheEntry, ChangeCache, Fingerprint};
pub use config::{ScanConfig, ScanConfigBuilder, WatchBackend};
pub use context::{ErrorCallback, ProgressCallback, ResultCallback, ScanContext};
pub use error::{ErrorKind, MediaError, Result};
pub use models::{MediaMetadata, MediaResult, MediaType, ResultFlags, ScanEvent, ScanSummary};
pub use probe::{ExtensionProbe, MediaProbe};
pub use progress::{Progress, ProgressSnapshot};
pub use scanner::{TreeWalker, WalkMode, WalkScope};
pub use watcher::{RefreshMode, WatchState};
