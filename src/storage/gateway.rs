//! # Storage Gateway
//!
//! Single point of mutual exclusion around the log tree. Every filesystem
//! operation from the acquisition loop or the query service first takes the
//! gateway lock, waiting at most `lock_timeout`; a timeout fails that one
//! attempt with [`LoggerError::StorageBusy`] and leaves the lock usable.

use bytes::Bytes;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::path::{self, StoragePath};
use crate::error::{LoggerError, Result};

/// An open drive file, appended to through the gateway
#[derive(Debug)]
pub struct DriveFile {
    file: File,
    day: String,
    name: String,
}

impl DriveFile {
    pub fn day(&self) -> &str {
        &self.day
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Capacity figures of the filesystem holding the log tree, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// The most recent drive and its contents
#[derive(Debug, Clone)]
pub struct LatestDrive {
    pub day: String,
    pub drive: String,
    pub contents: Bytes,
}

/// Mutex-guarded access to the log tree
#[derive(Debug)]
pub struct StorageGateway {
    root: PathBuf,
    lock: Mutex<()>,
    lock_timeout: Duration,
}

impl StorageGateway {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Take the storage lock, waiting at most `lock_timeout`
    async fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        match tokio::time::timeout(self.lock_timeout, self.lock.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!("Storage lock not acquired within {:?}", self.lock_timeout);
                Err(LoggerError::StorageBusy)
            }
        }
    }

    /// Create the storage root if it is missing
    pub async fn ensure_root(&self) -> Result<()> {
        let _guard = self.acquire().await?;
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Open (creating if needed) `day/name` for appending
    pub async fn open_drive(&self, day: &str, name: &str) -> Result<DriveFile> {
        let location = StoragePath::from_segments(&[day, name])?;
        let _guard = self.acquire().await?;

        let dir = self.root.join(day);
        fs::create_dir_all(&dir).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(location.resolve(&self.root))
            .await?;

        info!("Log file opened: {}", location);
        Ok(DriveFile {
            file,
            day: day.to_string(),
            name: name.to_string(),
        })
    }

    /// Append bytes and push them to the device before releasing the lock
    pub async fn append(&self, drive: &mut DriveFile, bytes: &[u8]) -> Result<()> {
        let _guard = self.acquire().await?;
        drive.file.write_all(bytes).await?;
        drive.file.flush().await?;
        drive.file.sync_data().await?;
        Ok(())
    }

    /// Flush and release a drive file
    ///
    /// The handle is released even when the lock cannot be taken; everything
    /// already appended was flushed by [`StorageGateway::append`].
    pub async fn close(&self, mut drive: DriveFile) -> Result<()> {
        let _guard = match self.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Releasing {}/{} without final flush: {}", drive.day, drive.name, e);
                return Err(e);
            }
        };
        drive.file.flush().await?;
        drive.file.sync_all().await?;
        info!("Log file closed: /{}/{}", drive.day, drive.name);
        Ok(())
    }

    /// Visible directories under the root, ascending
    pub async fn list_days(&self) -> Result<Vec<String>> {
        let _guard = self.acquire().await?;
        list_entries(&self.root, true).await
    }

    /// Visible files in one day folder, ascending
    pub async fn list_drives(&self, day: &str) -> Result<Vec<String>> {
        let location = StoragePath::from_segments(&[day])?;
        let _guard = self.acquire().await?;

        let dir = location.resolve(&self.root);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => list_entries(&dir, false).await,
            Ok(_) => Err(LoggerError::NotFound(format!("day {}", day))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LoggerError::NotFound(format!("day {}", day))),
            Err(e) => Err(e.into()),
        }
    }

    /// Whole contents of one drive file
    ///
    /// The file may be in the middle of being logged; the read returns every
    /// record appended so far.
    pub async fn read_drive(&self, day: &str, drive: &str) -> Result<Bytes> {
        let location = StoragePath::from_segments(&[day, drive])?;
        let _guard = self.acquire().await?;
        read_file(&location.resolve(&self.root), &location).await
    }

    /// Greatest drive file of the greatest day folder holding one
    pub async fn read_latest_drive(&self) -> Result<LatestDrive> {
        let _guard = self.acquire().await?;

        let mut days: Vec<String> = list_entries(&self.root, true)
            .await?
            .into_iter()
            .filter(|name| path::is_day_folder(name))
            .collect();
        days.sort_unstable_by(|a, b| b.cmp(a));

        for day in days {
            let dir = self.root.join(&day);
            let latest = list_entries(&dir, false)
                .await?
                .into_iter()
                .filter(|name| path::is_drive_file(name))
                .max();

            if let Some(drive) = latest {
                let location = StoragePath::from_segments(&[day.as_str(), drive.as_str()])?;
                let contents = read_file(&location.resolve(&self.root), &location).await?;
                return Ok(LatestDrive { day, drive, contents });
            }
            debug!("Day {} holds no drives", day);
        }

        Err(LoggerError::NotFound("no log data".to_string()))
    }

    /// Delete a file, or a directory with everything below it
    pub async fn delete(&self, target: &StoragePath) -> Result<()> {
        if target.is_root() {
            return Err(LoggerError::InvalidPath("refusing to delete the storage root".to_string()));
        }
        let _guard = self.acquire().await?;

        let location = target.resolve(&self.root);
        let meta = match fs::symlink_metadata(&location).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LoggerError::NotFound(target.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            fs::remove_dir_all(&location).await?;
        } else {
            fs::remove_file(&location).await?;
        }
        info!("Deleted {}", target);
        Ok(())
    }

    /// Capacity of the filesystem holding the log tree
    pub async fn usage(&self) -> Result<StorageUsage> {
        let _guard = self.acquire().await?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || filesystem_usage(&root))
            .await
            .map_err(|e| LoggerError::Io(std::io::Error::new(ErrorKind::Other, e)))?
    }

    #[cfg(test)]
    pub(crate) async fn hold_lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

async fn list_entries(dir: &Path, dirs: bool) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        if is_dir != dirs {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if path::is_hidden(&name) {
            continue;
        }
        names.push(name);
    }

    names.sort_unstable();
    Ok(names)
}

async fn read_file(location: &Path, shown: &StoragePath) -> Result<Bytes> {
    match fs::metadata(location).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(LoggerError::NotFound(shown.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(LoggerError::NotFound(shown.to_string())),
        Err(e) => return Err(e.into()),
    }
    Ok(Bytes::from(fs::read(location).await?))
}

#[cfg(unix)]
fn filesystem_usage(root: &Path) -> Result<StorageUsage> {
    let stats = nix::sys::statvfs::statvfs(root).map_err(|e| LoggerError::Io(e.into()))?;

    let block = stats.fragment_size() as u64;
    let total = stats.blocks() as u64 * block;
    let free = stats.blocks_available() as u64 * block;
    let used = total.saturating_sub(stats.blocks_free() as u64 * block);
    Ok(StorageUsage { total, used, free })
}

#[cfg(not(unix))]
fn filesystem_usage(_root: &Path) -> Result<StorageUsage> {
    Err(LoggerError::Io(std::io::Error::new(
        ErrorKind::Unsupported,
        "storage usage is only available on unix",
    )))
}
