//! Single-file recovery snapshot for development restarts.
//!
//! The file holds at most one session (last write wins). It is written
//! synchronously so a crash right after a request still leaves that
//! session on disk.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use cloud_session_core::{SessionId, SessionRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot error.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot is corrupt: {0}")]
    Corrupt(String),
}

/// What the snapshot file contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: SessionId,
    #[serde(flatten)]
    pub record: SessionRecord,
}

/// Handle to the recovery file.
#[derive(Debug, Clone)]
pub struct RecoverySnapshot {
    path: PathBuf,
}

impl RecoverySnapshot {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the file with `record`.
    ///
    /// # Errors
    /// Returns error if the record cannot be encoded or written.
    pub fn write(&self, id: &SessionId, record: &SessionRecord) -> Result<(), SnapshotError> {
        let entry = SnapshotEntry {
            id: id.clone(),
            record: record.clone(),
        };
        let json =
            serde_json::to_vec(&entry).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Read the stored entry. `Ok(None)` when there is no file.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or decoded.
    pub fn read(&self) -> Result<Option<SnapshotEntry>, SnapshotError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SnapshotError::Corrupt(e.to_string()))
    }

    /// Delete the file. A missing file is not an error.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<(), SnapshotError> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
