//! # Log Session
//!
//! One drive's append-only log file.
//!
//! ```text
//! Idle --enabled && journey--> Open --append--> Open
//!                               |
//!                    logging disabled / shutdown
//!                               v
//!                             Closed --enabled && journey--> Open (new name)
//! ```
//!
//! The folder and file name are fixed when the session opens and never change
//! while it stays open, even if the drive runs past midnight.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::gateway::{DriveFile, StorageGateway};
use super::path::{day_folder_name, drive_file_name};
use crate::error::{LoggerError, Result};
use crate::sample::TelemetrySample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Open,
    Closed,
}

/// Lifecycle of the current drive file
#[derive(Debug, Default)]
pub struct LogSession {
    state: SessionState,
    drive: Option<DriveFile>,
}

impl LogSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.drive.is_some()
    }

    /// `(day, file)` of the open drive
    pub fn identity(&self) -> Option<(&str, &str)> {
        self.drive.as_ref().map(|d| (d.day(), d.name()))
    }

    /// Open a drive named after `at`, unless one is already open
    ///
    /// Returns `true` when a new file was opened. Opening while open keeps the
    /// current file and its name.
    pub async fn ensure_open(&mut self, gateway: &StorageGateway, at: &DateTime<Utc>) -> Result<bool> {
        if self.drive.is_some() {
            return Ok(false);
        }

        let day = day_folder_name(at);
        let name = drive_file_name(at);
        let drive = gateway.open_drive(&day, &name).await?;
        self.drive = Some(drive);
        self.state = SessionState::Open;
        Ok(true)
    }

    /// Serialize and append one sample to the open drive
    pub async fn append(&mut self, gateway: &StorageGateway, sample: &TelemetrySample) -> Result<()> {
        let Some(drive) = self.drive.as_mut() else {
            return Err(LoggerError::NotFound("no open drive".to_string()));
        };
        let line = sample.to_record_line()?;
        gateway.append(drive, &line).await?;
        debug!("Logged sample to {}/{}", drive.day(), drive.name());
        Ok(())
    }

    /// Flush and release the drive, if any
    ///
    /// The session ends up closed even if the final flush fails.
    pub async fn close(&mut self, gateway: &StorageGateway) -> Result<()> {
        let Some(drive) = self.drive.take() else {
            return Ok(());
        };
        self.state = SessionState::Closed;
        if let Err(e) = gateway.close(drive).await {
            warn!("Drive closed with error: {}", e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::tests::sample_at;
    use std::time::Duration;
    use tempfile::TempDir;

    fn gateway(dir: &TempDir) -> StorageGateway {
        StorageGateway::new(dir.path(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let mut session = LogSession::new();
        assert_eq!(session.state(), SessionState::Idle);

        let sample = sample_at(14, 5, 7);
        assert!(session.ensure_open(&gw, &sample.timestamp).await.unwrap());
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.identity(), Some(("2024-03-09", "14-05-07.json")));

        session.append(&gw, &sample).await.unwrap();
        session.append(&gw, &sample).await.unwrap();
        session.close(&gw).await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());

        let contents = std::fs::read_to_string(dir.path().join("2024-03-09/14-05-07.json")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["engine"]["rpm"], 1726);
        }
    }

    #[tokio::test]
    async fn test_reentrant_open_keeps_file() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let mut session = LogSession::new();

        let first = sample_at(14, 5, 7);
        let later = sample_at(14, 5, 8);
        assert!(session.ensure_open(&gw, &first.timestamp).await.unwrap());
        assert!(!session.ensure_open(&gw, &first.timestamp).await.unwrap());
        assert!(!session.ensure_open(&gw, &later.timestamp).await.unwrap());
        assert_eq!(session.identity(), Some(("2024-03-09", "14-05-07.json")));

        session.append(&gw, &later).await.unwrap();
        let drives = gw.list_drives("2024-03-09").await.unwrap();
        assert_eq!(drives, vec!["14-05-07.json"]);
    }

    #[tokio::test]
    async fn test_reopen_after_close_uses_new_name() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let mut session = LogSession::new();

        session.ensure_open(&gw, &sample_at(8, 0, 0).timestamp).await.unwrap();
        session.close(&gw).await.unwrap();
        session.ensure_open(&gw, &sample_at(17, 30, 0).timestamp).await.unwrap();
        assert_eq!(session.identity(), Some(("2024-03-09", "17-30-00.json")));
        assert_eq!(
            gw.list_drives("2024-03-09").await.unwrap(),
            vec!["08-00-00.json", "17-30-00.json"]
        );
    }

    #[tokio::test]
    async fn test_append_without_open_fails() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let mut session = LogSession::new();
        assert!(session.append(&gw, &sample_at(8, 0, 0)).await.is_err());
        assert!(session.close(&gw).await.is_ok());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_close_under_contention_still_releases() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let mut session = LogSession::new();
        session.ensure_open(&gw, &sample_at(8, 0, 0).timestamp).await.unwrap();

        let guard = gw.hold_lock().await;
        assert!(matches!(session.close(&gw).await, Err(LoggerError::StorageBusy)));
        drop(guard);

        assert!(!session.is_open());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_append_under_contention_keeps_session() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let mut session = LogSession::new();
        session.ensure_open(&gw, &sample_at(8, 0, 0).timestamp).await.unwrap();

        let guard = gw.hold_lock().await;
        assert!(matches!(
            session.append(&gw, &sample_at(8, 0, 1)).await,
            Err(LoggerError::StorageBusy)
        ));
        drop(guard);

        assert!(session.is_open());
        session.append(&gw, &sample_at(8, 0, 2)).await.unwrap();
    }
}
