//! Alias resolution
//!
//! Two kinds of directory entries redirect to another path: symbolic links,
//! and Windows shell link files (`.lnk`). Shell links are parsed from their
//! binary layout so they resolve the same way on every platform; a library
//! copied off a Windows machine keeps working as long as the targets exist.

use std::fs::{self, FileType};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::MediaError;

/// Outcome of resolving a directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The entry is a regular file or directory
    NotAnAlias,
    /// Canonical path of an existing target
    Resolved(PathBuf),
    /// Dangling target or unreadable alias file
    Unresolvable(MediaError),
}

/// Whether an entry looks like an alias and must go through [`AliasResolver::resolve`]
pub fn is_alias(path: &Path, file_type: &FileType) -> bool {
    file_type.is_symlink() || (file_type.is_file() && is_shell_link_name(path))
}

fn is_shell_link_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("lnk"))
        .unwrap_or(false)
}

/// Resolves symbolic links and shell link files to canonical targets
#[derive(Debug, Clone, Copy, Default)]
pub struct AliasResolver;

impl AliasResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve one entry
    pub fn resolve(&self, path: &Path) -> Resolution {
        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) => return Resolution::Unresolvable(MediaError::broken_alias(path, e.to_string())),
        };
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            return self.resolve_symlink(path);
        }
        if file_type.is_file() && is_shell_link_name(path) {
            return self.resolve_shell_link(path);
        }
        Resolution::NotAnAlias
    }

    fn resolve_symlink(&self, path: &Path) -> Resolution {
        if let Err(e) = fs::read_link(path) {
            return Resolution::Unresolvable(MediaError::broken_alias(path, e.to_string()));
        }
        match fs::canonicalize(path) {
            Ok(target) => Resolution::Resolved(target),
            Err(e) => Resolution::Unresolvable(MediaError::broken_alias(
                path,
                format!("dangling link: {e}"),
            )),
        }
    }

    fn resolve_shell_link(&self, path: &Path) -> Resolution {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => return Resolution::Unresolvable(MediaError::broken_alias(path, e.to_string())),
        };
        let link = match ShellLink::parse(&bytes) {
            Ok(link) => link,
            Err(e) => return Resolution::Unresolvable(MediaError::broken_alias(path, e.to_string())),
        };
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let Some(target) = link.target(base) else {
            return Resolution::Unresolvable(MediaError::broken_alias(path, "shell link has no target path"));
        };
        match fs::canonicalize(&target) {
            Ok(canonical) => Resolution::Resolved(canonical),
            Err(e) => Resolution::Unresolvable(MediaError::broken_alias(
                path,
                format!("target {} unavailable: {e}", target.display()),
            )),
        }
    }
}

const HEADER_SIZE: u32 = 0x4C;
const LINK_CLSID: [u8; 16] = [
    0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
];

const HAS_LINK_TARGET_ID_LIST: u32 = 0x01;
const HAS_LINK_INFO: u32 = 0x02;
const HAS_NAME: u32 = 0x04;
const HAS_RELATIVE_PATH: u32 = 0x08;
const IS_UNICODE: u32 = 0x80;

const VOLUME_ID_AND_LOCAL_BASE_PATH: u32 = 0x01;

/// Shell link parse failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellLinkError {
    #[error("not a shell link file")]
    BadHeader,
    #[error("shell link truncated in {0}")]
    Truncated(&'static str),
}

/// Target information carried by a shell link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellLink {
    /// Absolute target from the LinkInfo structure
    pub local_base_path: Option<String>,
    /// Path suffix appended to the local base path
    pub common_path_suffix: Option<String>,
    /// Target relative to the link file's directory
    pub relative_path: Option<String>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ShellLinkError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ShellLinkError::Truncated(what))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, ShellLinkError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, ShellLinkError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn read_u32_at(bytes: &[u8], offset: usize, what: &'static str) -> Result<u32, ShellLinkError> {
    Cursor::new(bytes, offset).u32(what)
}

fn nul_terminated_ansi(bytes: &[u8], offset: usize) -> Option<String> {
    let tail = bytes.get(offset..)?;
    let end = tail.iter().position(|b| *b == 0)?;
    let s = String::from_utf8_lossy(&tail[..end]).into_owned();
    (!s.is_empty()).then_some(s)
}

fn nul_terminated_utf16(bytes: &[u8], offset: usize) -> Option<String> {
    let tail = bytes.get(offset..)?;
    let units: Vec<u16> = tail
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    let s = String::from_utf16_lossy(&units);
    (!s.is_empty()).then_some(s)
}

impl ShellLink {
    /// Parse the binary shell link layout
    pub fn parse(bytes: &[u8]) -> Result<Self, ShellLinkError> {
        let mut cursor = Cursor::new(bytes, 0);
        if cursor.u32("header")? != HEADER_SIZE {
            return Err(ShellLinkError::BadHeader);
        }
        if cursor.take(16, "header")? != LINK_CLSID {
            return Err(ShellLinkError::BadHeader);
        }
        let flags = cursor.u32("header")?;
        cursor.pos = HEADER_SIZE as usize;
        if bytes.len() < cursor.pos {
            return Err(ShellLinkError::Truncated("header"));
        }

        if flags & HAS_LINK_TARGET_ID_LIST != 0 {
            let len = cursor.u16("id list")? as usize;
            cursor.take(len, "id list")?;
        }

        let mut link = ShellLink::default();

        if flags & HAS_LINK_INFO != 0 {
            let start = cursor.pos;
            let size = cursor.u32("link info")? as usize;
            let info = cursor.take(size.saturating_sub(4), "link info")?;
            let info = &bytes[start..start + 4 + info.len()];
            link.read_link_info(info)?;
        }

        let unicode = flags & IS_UNICODE != 0;
        if flags & HAS_NAME != 0 {
            read_string_data(&mut cursor, unicode, "name")?;
        }
        if flags & HAS_RELATIVE_PATH != 0 {
            link.relative_path = Some(read_string_data(&mut cursor, unicode, "relative path")?)
                .filter(|s| !s.is_empty());
        }

        Ok(link)
    }

    fn read_link_info(&mut self, info: &[u8]) -> Result<(), ShellLinkError> {
        let header_size = read_u32_at(info, 4, "link info")?;
        let info_flags = read_u32_at(info, 8, "link info")?;
        if info_flags & VOLUME_ID_AND_LOCAL_BASE_PATH == 0 {
            return Ok(());
        }
        let local_offset = read_u32_at(info, 16, "link info")? as usize;
        let suffix_offset = read_u32_at(info, 24, "link info")? as usize;

        if header_size >= 0x24 {
            let local_unicode = read_u32_at(info, 28, "link info")? as usize;
            let suffix_unicode = read_u32_at(info, 32, "link info")? as usize;
            self.local_base_path = nul_terminated_utf16(info, local_unicode);
            self.common_path_suffix = nul_terminated_utf16(info, suffix_unicode);
        }
        if self.local_base_path.is_none() {
            self.local_base_path = nul_terminated_ansi(info, local_offset);
        }
        if self.common_path_suffix.is_none() && suffix_offset != 0 {
            self.common_path_suffix = nul_terminated_ansi(info, suffix_offset);
        }
        Ok(())
    }

    /// Target path, resolving a relative path against `link_dir`
    pub fn target(&self, link_dir: &Path) -> Option<PathBuf> {
        if let Some(base) = &self.local_base_path {
            let mut full = base.clone();
            if let Some(suffix) = &self.common_path_suffix {
                full.push_str(suffix);
            }
            return Some(PathBuf::from(native_separators(&full)));
        }
        self.relative_path
            .as_ref()
            .map(|rel| link_dir.join(native_separators(rel)))
    }
}

fn read_string_data(
    cursor: &mut Cursor<'_>,
    unicode: bool,
    what: &'static str,
) -> Result<String, ShellLinkError> {
    let count = cursor.u16(what)? as usize;
    if unicode {
        let raw = cursor.take(count * 2, what)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    } else {
        let raw = cursor.take(count, what)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

#[cfg(windows)]
fn native_separators(path: &str) -> String {
    path.to_string()
}

#[cfg(not(windows))]
fn native_separators(path: &str) -> String {
    path.replace('\\', "/")
}
