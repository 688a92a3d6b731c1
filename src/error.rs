//! Error types for the media scanner

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error kinds reported by the scan engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or disallowed path handed to a registration call
    IllegalParameter,
    /// A directory could not be listed (permission denied, removed mid-walk)
    DirectoryUnreadable,
    /// An alias whose target is missing or whose alias file is unreadable
    BrokenAlias,
    /// The media probe rejected the file
    ProbeFailed,
    /// The change-detection cache could not be opened or queried
    CacheUnavailable,
    /// Allocation failure; aborts the current operation
    OutOfMemory,
}

impl ErrorKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IllegalParameter => "illegal_parameter",
            ErrorKind::DirectoryUnreadable => "directory_unreadable",
            ErrorKind::BrokenAlias => "broken_alias",
            ErrorKind::ProbeFailed => "probe_failed",
            ErrorKind::CacheUnavailable => "cache_unavailable",
            ErrorKind::OutOfMemory => "out_of_memory",
        }
    }

    /// Whether this kind aborts the operation instead of being recovered locally
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::OutOfMemory)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error produced while registering, walking, probing or watching
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}{}", context_suffix(.path, .detail))]
pub struct MediaError {
    /// The kind of error
    pub kind: ErrorKind,
    /// The path the error refers to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Human-readable detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

fn context_suffix(path: &Option<PathBuf>, detail: &Option<String>) -> String {
    let mut out = String::new();
    if let Some(path) = path {
        out.push_str(&format!(" ({})", path.display()));
    }
    if let Some(detail) = detail {
        out.push_str(": ");
        out.push_str(detail);
    }
    out
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MediaError>;

impl MediaError {
    /// Create a new error
    pub fn new(kind: ErrorKind, path: Option<PathBuf>, detail: Option<String>) -> Self {
        Self { kind, path, detail }
    }

    /// Create an illegal parameter error
    pub fn illegal_parameter(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::IllegalParameter,
            Some(path.into()),
            Some(detail.into()),
        )
    }

    /// Create a directory unreadable error
    pub fn directory_unreadable(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::DirectoryUnreadable,
            Some(path.into()),
            Some(detail.into()),
        )
    }

    /// Create a broken alias error
    pub fn broken_alias(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::BrokenAlias,
            Some(path.into()),
            Some(detail.into()),
        )
    }

    /// Create a probe failure
    pub fn probe_failed(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ProbeFailed,
            Some(path.into()),
            Some(detail.into()),
        )
    }

    /// Create a cache unavailable error
    pub fn cache_unavailable(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::CacheUnavailable, None, Some(detail.into()))
    }

    /// Create an out of memory error
    pub fn out_of_memory(path: Option<PathBuf>) -> Self {
        Self::new(ErrorKind::OutOfMemory, path, None)
    }

    /// Map an I/O error, keeping allocation failures fatal and using `kind` for the rest
    pub fn from_io(kind: ErrorKind, path: &Path, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::OutOfMemory {
            return Self::out_of_memory(Some(path.to_path_buf()));
        }
        Self::new(kind, Some(path.to_path_buf()), Some(err.to_string()))
    }

    /// Whether this error aborts the current operation
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::OutOfMemory {
            return Self::out_of_memory(None);
        }
        Self::new(ErrorKind::DirectoryUnreadable, None, Some(err.to_string()))
    }
}

impl From<rusqlite::Error> for MediaError {
    fn from(err: rusqlite::Error) -> Self {
        Self::cache_unavailable(err.to_string())
    }
}

impl From<notify::Error> for MediaError {
    fn from(err: notify::Error) -> Self {
        let path = err.paths.first().cloned();
        let kind = match err.kind {
            notify::ErrorKind::PathNotFound => ErrorKind::IllegalParameter,
            _ => ErrorKind::DirectoryUnreadable,
        };
        Self::new(kind, path, Some(err.to_string()))
    }
}
