//! Change-detection cache backed by SQLite
//!
//! Maps a canonical file path to the fingerprint it had when it was last
//! probed and to the result emitted for it. Any failure of the backing
//! store flips the cache into an unavailable state in which every lookup
//! misses and every write is dropped, so scans keep running and simply
//! reprocess everything.

use log::{debug, warn};
use md5::{Digest, Md5};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::hash_map::DefaultHasher;
use std::fs::{File, Metadata};
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

use crate::error::MediaError;
use crate::models::MediaResult;

const PATH_LOCK_STRIPES: usize = 64;
const DIGEST_CHUNK: usize = 1024 * 1024;

/// Size, modification time and optional content digest of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime: i64,
    pub mtime_nanos: u32,
    pub digest: Option<String>,
    pub partial_digest: bool,
}

impl Fingerprint {
    /// Fingerprint from file metadata, keeping the timestamp at the resolution the filesystem reports
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let (mtime, mtime_nanos) = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or((0, 0));

        Self {
            size: metadata.len(),
            mtime,
            mtime_nanos,
            digest: None,
            partial_digest: false,
        }
    }

    /// Add an MD5 content digest; files above `large_file_threshold` hash the first and last 1MB
    pub fn with_digest(mut self, path: &Path, large_file_threshold: u64) -> io::Result<Self> {
        let (digest, partial) = compute_digest(path, large_file_threshold)?;
        self.digest = Some(digest);
        self.partial_digest = partial;
        Ok(self)
    }

    /// Whether a stored fingerprint still describes the file
    ///
    /// Digests are compared only when both sides carry one.
    pub fn matches(&self, current: &Fingerprint) -> bool {
        if self.size != current.size
            || self.mtime != current.mtime
            || self.mtime_nanos != current.mtime_nanos
        {
            return false;
        }
        match (&self.digest, &current.digest) {
            (Some(stored), Some(now)) => stored == now,
            _ => true,
        }
    }
}

fn compute_digest(path: &Path, large_file_threshold: u64) -> io::Result<(String, bool)> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; DIGEST_CHUNK];

    if file_size <= large_file_threshold {
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        return Ok((format!("{:x}", hasher.finalize()), false));
    }

    let n = file.read(&mut buffer)?;
    hasher.update(&buffer[..n]);
    if file_size > DIGEST_CHUNK as u64 {
        file.seek(SeekFrom::End(-(DIGEST_CHUNK as i64)))?;
        let n = file.read(&mut buffer)?;
        hasher.update(&buffer[..n]);
    }
    Ok((format!("{:x}", hasher.finalize()), true))
}

/// Cached state of one file
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Result emitted the last time the file was probed
    pub result: MediaResult,
}

/// Normalize path separators for cross-platform consistency
#[cfg(windows)]
pub fn cache_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Backslash is an ordinary file name character here
#[cfg(not(windows))]
pub fn cache_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parent_key(path: &Path) -> String {
    path.parent().map(cache_key).unwrap_or_default()
}

/// Persistent path -> fingerprint store
pub struct ChangeCache {
    conn: Mutex<Option<Connection>>,
    path_locks: Vec<Mutex<()>>,
    failure: Mutex<Option<MediaError>>,
    failure_reported: AtomicBool,
}

impl std::fmt::Debug for ChangeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeCache")
            .field("available", &self.is_available())
            .finish()
    }
}

impl ChangeCache {
    fn with_connection(conn: Option<Connection>, failure: Option<MediaError>) -> Self {
        Self {
            conn: Mutex::new(conn),
            path_locks: (0..PATH_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            failure: Mutex::new(failure),
            failure_reported: AtomicBool::new(false),
        }
    }

    /// Open or create the cache file; failures yield an unavailable cache
    pub fn open(path: &Path) -> Self {
        match Self::try_open(path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Change cache {} unavailable, every file will be reprocessed: {}", path.display(), e);
                Self::unavailable(e)
            }
        }
    }

    /// Open or create the cache file, surfacing failures
    pub fn try_open(path: &Path) -> Result<Self, MediaError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self::with_connection(Some(conn), None))
    }

    /// In-memory cache that lives as long as this value
    pub fn open_in_memory() -> Self {
        let opened = Connection::open_in_memory().and_then(|conn| {
            init_schema(&conn)?;
            Ok(conn)
        });
        match opened {
            Ok(conn) => Self::with_connection(Some(conn), None),
            Err(e) => Self::unavailable(e.into()),
        }
    }

    /// A cache that never hits
    pub fn unavailable(reason: MediaError) -> Self {
        Self::with_connection(None, Some(reason))
    }

    pub fn is_available(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The failure that made the cache unavailable, returned only the first time it is asked for
    pub fn take_failure(&self) -> Option<MediaError> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        if self.failure_reported.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(failure)
    }

    /// Serialize writers of one path
    pub fn lock_path(&self, path: &Path) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        cache_key(path).hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.path_locks.len();
        self.path_locks[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn run<T>(&self, op: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Option<T> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref()?;
        match f(conn) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Change cache {} failed, disabling cache: {}", op, e);
                *guard = None;
                let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
                failure.get_or_insert_with(|| e.into());
                None
            }
        }
    }

    /// Look up the entry for a path
    pub fn lookup(&self, path: &Path) -> Option<CacheEntry> {
        let key = cache_key(path);
        let row = self
            .run("lookup", |conn| {
                conn.query_row(
                    "SELECT size, mtime, mtime_nanos, digest, partial_digest, result
                     FROM cache_entries WHERE path = ?1",
                    params![key],
                    |row| {
                        Ok((
                            Fingerprint {
                                size: row.get::<_, i64>(0)? as u64,
                                mtime: row.get(1)?,
                                mtime_nanos: row.get::<_, i64>(2)? as u32,
                                digest: row.get(3)?,
                                partial_digest: row.get::<_, i64>(4)? != 0,
                            },
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()
            })
            .flatten()?;

        let (fingerprint, json) = row;
        match serde_json::from_str::<MediaResult>(&json) {
            Ok(result) => Some(CacheEntry { fingerprint, result }),
            Err(e) => {
                debug!("Discarding unreadable cache entry for {}: {}", key, e);
                None
            }
        }
    }

    /// Insert or replace the entry for a path
    pub fn put(&self, path: &Path, entry: &CacheEntry) {
        let json = match serde_json::to_string(&entry.result) {
            Ok(json) => json,
            Err(e) => {
                warn!("Cannot encode cache entry for {}: {}", path.display(), e);
                return;
            }
        };
        let fp = &entry.fingerprint;
        self.run("put", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries
                 (path, parent, size, mtime, mtime_nanos, digest, partial_digest, media_type, result)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    cache_key(path),
                    parent_key(path),
                    fp.size as i64,
                    fp.mtime,
                    fp.mtime_nanos as i64,
                    fp.digest,
                    fp.partial_digest as i32,
                    entry.result.media_type.as_str(),
                    json,
                ],
            )
        });
    }

    /// Remove the entry for a path
    pub fn remove(&self, path: &Path) -> bool {
        self.run("remove", |conn| {
            conn.execute("DELETE FROM cache_entries WHERE path = ?1", params![cache_key(path)])
        })
        .map(|n| n > 0)
        .unwrap_or(false)
    }

    /// Remove the entry for a path and every entry below it
    pub fn remove_subtree(&self, path: &Path) -> usize {
        let key = cache_key(path);
        let prefix = format!("{}/", key.trim_end_matches('/'));
        // LIKE folds ASCII case; compare the prefix byte for byte
        self.run("remove_subtree", |conn| {
            conn.execute(
                "DELETE FROM cache_entries WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
                params![key, prefix],
            )
        })
        .unwrap_or(0)
    }

    /// Evict entries of `dir` whose file no longer exists; called after listing `dir`
    pub fn evict_missing(&self, dir: &Path) -> usize {
        let parent = cache_key(dir);
        let Some(paths) = self.run("evict_missing", |conn| {
            let mut stmt = conn.prepare("SELECT path FROM cache_entries WHERE parent = ?1")?;
            let rows = stmt.query_map(params![parent], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        }) else {
            return 0;
        };

        let missing: Vec<String> = paths
            .into_iter()
            .filter(|p| Path::new(p).symlink_metadata().is_err())
            .collect();
        if missing.is_empty() {
            return 0;
        }

        self.run("evict_missing", |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM cache_entries WHERE path = ?1")?;
                for path in &missing {
                    stmt.execute(params![path])?;
                }
            }
            tx.commit()?;
            Ok(missing.len())
        })
        .unwrap_or(0)
    }

    /// Drop every entry, keeping the backing file
    pub fn reset(&self) {
        self.run("reset", |conn| conn.execute("DELETE FROM cache_entries", []));
    }

    /// Number of entries
    pub fn len(&self) -> u64 {
        self.run("len", |conn| {
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get::<_, i64>(0))
        })
        .map(|n| n as u64)
        .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cache_entries (
            path TEXT PRIMARY KEY,
            parent TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            mtime_nanos INTEGER NOT NULL DEFAULT 0,
            digest TEXT,
            partial_digest INTEGER DEFAULT 0,
            media_type TEXT NOT NULL,
            result TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cache_entries_parent ON cache_entries(parent);
        ",
    )
}
