//! Core data models for the media scanner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::MediaError;
use crate::progress::ProgressSnapshot;

/// Media type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Video files (mp4, mkv, avi, etc.)
    Video,
    /// Image files (jpg, png, webp, etc.)
    Image,
    /// Audio files (mp3, flac, wav, etc.)
    Audio,
    /// Anything the probe could not place in the three media classes
    Other,
}

impl MediaType {
    /// Infer media type from file extension
    pub fn from_extension(ext: &str) -> Self {
        let ext_lower = ext.to_lowercase();
        match ext_lower.as_str() {
            "mp4" | "mkv" | "avi" | "wmv" | "flv" | "mov" | "webm" | "m4v" | "ts" | "rmvb"
            | "mpg" | "mpeg" | "asf" | "3gp" => MediaType::Video,
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tiff" | "tif" => MediaType::Image,
            "mp3" | "flac" | "wav" | "aac" | "ogg" | "wma" | "m4a" | "opus" | "aiff" => {
                MediaType::Audio
            }
            _ => MediaType::Other,
        }
    }

    /// Infer media type from a path's extension
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(MediaType::Other)
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Image => "image",
            MediaType::Audio => "audio",
            MediaType::Other => "other",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type-specific metadata produced by a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaMetadata {
    Audio {
        #[serde(skip_serializing_if = "Option::is_none")]
        codec: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bitrate: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        channels: Option<u8>,
    },
    Video {
        #[serde(skip_serializing_if = "Option::is_none")]
        codec: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_rate: Option<f64>,
    },
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        codec: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
}

/// Bitset of per-result flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultFlags(u32);

impl ResultFlags {
    /// Served from the change-detection cache without probing
    pub const CACHED: ResultFlags = ResultFlags(1);
    /// The file had a cache entry whose fingerprint no longer matched
    pub const CHANGED: ResultFlags = ResultFlags(1 << 1);
    /// The content digest only covers the head and tail of the file
    pub const PARTIAL_DIGEST: ResultFlags = ResultFlags(1 << 2);

    pub const fn empty() -> Self {
        ResultFlags(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: ResultFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ResultFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ResultFlags) {
        self.0 &= !other.0;
    }

    pub const fn union(self, other: ResultFlags) -> Self {
        ResultFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for ResultFlags {
    type Output = ResultFlags;

    fn bitor(self, rhs: ResultFlags) -> ResultFlags {
        self.union(rhs)
    }
}

/// A fully populated record for one processed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaResult {
    /// Canonical path to the file
    pub path: PathBuf,
    /// Detected media type
    pub media_type: MediaType,
    /// File size in bytes
    pub size: u64,
    /// Modification time as Unix timestamp
    pub mtime: i64,
    /// Sub-second part of the modification time, as reported by the filesystem
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mtime_nanos: u32,
    /// Type-specific metadata, when the probe produced any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MediaMetadata>,
    /// Result flags
    #[serde(default)]
    pub flags: ResultFlags,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl MediaResult {
    /// Create a new result with basic metadata
    pub fn new(path: PathBuf, media_type: MediaType, size: u64, mtime: i64) -> Self {
        Self {
            path,
            media_type,
            size,
            mtime,
            mtime_nanos: 0,
            metadata: None,
            flags: ResultFlags::empty(),
        }
    }

    /// Set the sub-second modification time
    pub fn with_mtime_nanos(mut self, nanos: u32) -> Self {
        self.mtime_nanos = nanos;
        self
    }

    /// Attach type-specific metadata
    pub fn with_metadata(mut self, metadata: MediaMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Add flags
    pub fn with_flags(mut self, flags: ResultFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    /// File name without the directory
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Modification time as a UTC timestamp
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.mtime, self.mtime_nanos)
    }
}

/// Item produced by a walk and delivered to the callbacks
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Result(MediaResult),
    Error(MediaError),
    Progress(ProgressSnapshot),
    /// Changes-only walk of `paths` below a watched `root`, left for the
    /// thread that pumps the queue
    Refresh { root: PathBuf, paths: Vec<PathBuf> },
}

impl ScanEvent {
    pub fn as_result(&self) -> Option<&MediaResult> {
        match self {
            ScanEvent::Result(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&MediaError> {
        match self {
            ScanEvent::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// Counters for one walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Number of files that produced a result
    pub total_files: u64,
    /// Number of directories traversed
    pub total_dirs: u64,
    /// Files handed to the probe
    pub probed_files: u64,
    /// Files served from the cache
    pub cached_files: u64,
    /// Errors reported
    pub errors: u64,
    /// Cache entries evicted because their file disappeared
    pub evicted: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl ScanSummary {
    /// Create a new empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold another summary into this one
    pub fn merge(&mut self, other: &ScanSummary) {
        self.total_files += other.total_files;
        self.total_dirs += other.total_dirs;
        self.probed_files += other.probed_files;
        self.cached_files += other.cached_files;
        self.errors += other.errors;
        self.evicted += other.evicted;
        self.duration_ms = self.duration_ms.max(other.duration_ms);
    }

    /// Check if the walk completed without errors
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}
