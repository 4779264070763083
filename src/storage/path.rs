//! # Storage Paths and Names
//!
//! Naming of day folders and drive files, and validation of paths supplied by
//! query-service clients. A [`StoragePath`] can only be built from segments
//! that passed validation, so a traversal or hidden-entry segment never
//! reaches the filesystem.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::{LoggerError, Result};

/// Extension of drive files
pub const DRIVE_EXTENSION: &str = ".json";

/// Day folder name, `YYYY-MM-DD`
pub fn day_folder_name(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Drive file name, `HH-MM-SS.json`
pub fn drive_file_name(at: &DateTime<Utc>) -> String {
    format!("{}{}", at.format("%H-%M-%S"), DRIVE_EXTENSION)
}

fn digits_with_dashes(name: &[u8], dashes: &[usize]) -> bool {
    name.iter().enumerate().all(|(i, &b)| {
        if dashes.contains(&i) {
            b == b'-'
        } else {
            b.is_ascii_digit()
        }
    })
}

/// Matches `YYYY-MM-DD`
pub fn is_day_folder(name: &str) -> bool {
    name.len() == 10 && digits_with_dashes(name.as_bytes(), &[4, 7])
}

/// Matches `HH-MM-SS.json`
pub fn is_drive_file(name: &str) -> bool {
    match name.strip_suffix(DRIVE_EXTENSION) {
        Some(stem) => stem.len() == 8 && digits_with_dashes(stem.as_bytes(), &[2, 5]),
        None => false,
    }
}

/// Hidden entries are never listed or served
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Check one user-supplied path segment
///
/// # Errors
///
/// Returns `InvalidPath` if the segment is empty, starts with `.` (which also
/// covers `..`), or contains a separator, backslash or NUL.
pub fn validate_segment(segment: &str) -> Result<&str> {
    if segment.is_empty() {
        return Err(LoggerError::InvalidPath("empty path segment".to_string()));
    }
    if is_hidden(segment) {
        return Err(LoggerError::InvalidPath(format!("forbidden segment '{}'", segment)));
    }
    if segment.contains(['/', '\\', '\0']) {
        return Err(LoggerError::InvalidPath(format!("forbidden character in '{}'", segment)));
    }
    Ok(segment)
}

/// Validated path relative to the storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    segments: Vec<String>,
}

impl StoragePath {
    /// The storage root itself
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parse a `/`-separated path; empty segments are skipped
    ///
    /// # Examples
    ///
    /// ```
    /// use drive_logger::storage::StoragePath;
    ///
    /// assert!(StoragePath::parse("/2024-03-09/14-05-07.json").is_ok());
    /// assert!(StoragePath::parse("../etc/passwd").is_err());
    /// assert!(StoragePath::parse("2024-03-09/.hidden").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            segments.push(validate_segment(segment)?.to_string());
        }
        Ok(Self { segments })
    }

    /// Build from individual segments, each validated on its own
    pub fn from_segments(parts: &[&str]) -> Result<Self> {
        let segments = parts
            .iter()
            .map(|part| validate_segment(part).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Absolute location below `root`
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(&self.segments);
        path
    }
}

impl std::fmt::Display for StoragePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_names_are_zero_padded() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 4, 5, 7).unwrap();
        assert_eq!(day_folder_name(&at), "2024-03-09");
        assert_eq!(drive_file_name(&at), "04-05-07.json");
        assert!(is_day_folder(&day_folder_name(&at)));
        assert!(is_drive_file(&drive_file_name(&at)));
    }

    #[test]
    fn test_name_order_is_chronological() {
        let earlier = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        assert!(day_folder_name(&earlier) < day_folder_name(&later));
        assert!(drive_file_name(&later) < drive_file_name(&earlier));
    }

    #[test]
    fn test_day_folder_pattern() {
        assert!(is_day_folder("2024-03-09"));
        assert!(!is_day_folder("2024-3-9"));
        assert!(!is_day_folder("2024_03_09"));
        assert!(!is_day_folder("System Volume"));
        assert!(!is_day_folder("2024-03-09x"));
    }

    #[test]
    fn test_drive_file_pattern() {
        assert!(is_drive_file("14-05-07.json"));
        assert!(!is_drive_file("14-05.json"));
        assert!(!is_drive_file("14-05-07.txt"));
        assert!(!is_drive_file("ab-cd-ef.json"));
        assert!(!is_drive_file(".json"));
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("2024-03-09").is_ok());
        assert!(validate_segment("notes.txt").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment(".").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment(".hidden").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("a\\..\\b").is_err());
        assert!(validate_segment("a\0").is_err());
    }

    #[test]
    fn test_parse_rejects_any_bad_segment() {
        assert!(StoragePath::parse("../x").is_err());
        assert!(StoragePath::parse("2024-03-09/../../x").is_err());
        assert!(StoragePath::parse("/2024-03-09/.Trash").is_err());
        assert!(StoragePath::parse("..").is_err());
    }

    #[test]
    fn test_parse_normalises_slashes() {
        let path = StoragePath::parse("//2024-03-09///14-05-07.json/").unwrap();
        assert_eq!(path.segments(), ["2024-03-09", "14-05-07.json"]);
        assert_eq!(path.to_string(), "/2024-03-09/14-05-07.json");
        assert!(StoragePath::parse("/").unwrap().is_root());
        assert!(StoragePath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_from_segments_does_not_split() {
        assert!(StoragePath::from_segments(&["2024-03-09", "14-05-07.json"]).is_ok());
        assert!(StoragePath::from_segments(&["2024-03-09", "../x"]).is_err());
        assert!(StoragePath::from_segments(&["a/..", "x"]).is_err());
        assert!(StoragePath::from_segments(&["", "x"]).is_err());
    }

    #[test]
    fn test_resolve_stays_below_root() {
        let root = Path::new("/mnt/sd");
        let path = StoragePath::parse("2024-03-09/14-05-07.json").unwrap();
        assert_eq!(path.resolve(root), PathBuf::from("/mnt/sd/2024-03-09/14-05-07.json"));
        assert_eq!(StoragePath::root().resolve(root), PathBuf::from("/mnt/sd"));
    }
}
