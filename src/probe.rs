//! Media probes
//!
//! The engine treats metadata extraction as an opaque function of a path.
//! Real codec/container probes live outside this crate and plug in through
//! [`MediaProbe`]; [`ExtensionProbe`] classifies by extension and reports
//! filesystem metadata only.

use std::path::Path;

use crate::error::{ErrorKind, MediaError};
use crate::models::{MediaResult, MediaType};

/// Extracts a result for one file
///
/// Called from background threads in async mode. Implementations may block
/// for as long as they need; the walker imposes no timeout.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaResult, MediaError>;
}

impl<F> MediaProbe for F
where
    F: Fn(&Path) -> Result<MediaResult, MediaError> + Send + Sync,
{
    fn probe(&self, path: &Path) -> Result<MediaResult, MediaError> {
        self(path)
    }
}

/// Classifies by extension and reports size and modification time
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionProbe;

impl MediaProbe for ExtensionProbe {
    fn probe(&self, path: &Path) -> Result<MediaResult, MediaError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| MediaError::from_io(ErrorKind::ProbeFailed, path, &e))?;
        if !metadata.is_file() {
            return Err(MediaError::probe_failed(path, "not a regular file"));
        }

        let (mtime, nanos) = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or((0, 0));

        Ok(MediaResult::new(
            path.to_path_buf(),
            MediaType::from_path(path),
            metadata.len(),
            mtime,
        )
        .with_mtime_nanos(nanos))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_probe_reads_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.MP3");
        std::fs::write(&path, b"12345").unwrap();

        let result = ExtensionProbe.probe(&path).unwrap();
        assert_eq!(result.media_type, MediaType::Audio);
        assert_eq!(result.size, 5);
        assert_eq!(result.path, path);
        assert!(result.metadata.is_none());
    }

    #[test]
    fn test_extension_probe_missing_file() {
        let err = ExtensionProbe.probe(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProbeFailed);
    }

    #[test]
    fn test_closure_probe() {
        let probe = |path: &Path| -> Result<MediaResult, MediaError> {
            Ok(MediaResult::new(path.to_path_buf(), MediaType::Image, 1, 2))
        };
        let result = probe.probe(Path::new("/x.png")).unwrap();
        assert_eq!(result.media_type, MediaType::Image);
    }
}
