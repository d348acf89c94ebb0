// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Durable session records for silent resume.
//!
//! While a session is active, a small JSON record of what the supervisor was
//! doing is kept on disk. After a process restart the supervisor reads it back
//! and quietly re-joins the channel it was in, without any user-visible
//! announcement. Records that no longer match reality are cleared rather than
//! acted on.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which listening mode the session was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCommand {
    /// Single tracked speaker.
    Listen,
    /// Every non-system channel member.
    ListenAll,
}

/// Snapshot of an active session, sufficient to resume it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub command: SessionCommand,
    pub guild_id: String,
    pub channel_id: String,
    pub text_channel_id: String,
    /// Tracked speaker for [`SessionCommand::Listen`]; unused otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("session record io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session record malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// File-backed store holding at most one [`SessionRecord`].
#[derive(Debug, Clone)]
pub struct SessionRecordStore {
    path: PathBuf,
}

impl SessionRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Persist the record, replacing any previous one.
    pub async fn save(&self, record: &SessionRecord) -> Result<(), RecordError> {
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Load the stored record. A missing file is `Ok(None)`; an unreadable or
    /// malformed file is an error so callers can decide to clear it.
    pub async fn load(&self) -> Result<Option<SessionRecord>, RecordError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Remove the stored record. Removing an absent record is not an error.
    pub async fn clear(&self) -> Result<(), RecordError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
