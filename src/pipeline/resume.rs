// src/pipeline/resume.rs

//! Checkpoint/resume state.
//!
//! The checkpoint is a small JSON document listing the identity keys of
//! targets that reached a terminal state. It is rewritten atomically, so a
//! crash mid-flush leaves the previous checkpoint intact.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::storage::local::{read_optional, remove_if_exists, write_atomic};

/// Persisted progress of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    /// Identity keys of completed targets
    pub completed: BTreeSet<String>,
    /// Number of targets completed
    pub processed: usize,
    pub updated_at: DateTime<Utc>,
}

impl ResumeState {
    pub fn new() -> Self {
        Self {
            completed: BTreeSet::new(),
            processed: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Default for ResumeState {
    fn default() -> Self {
        Self::new()
    }
}

struct Progress {
    state: ResumeState,
    since_flush: usize,
}

/// Tracks completed targets and persists them.
pub struct ResumeCheckpoint {
    path: PathBuf,
    /// Whether completed keys are recorded at all
    tracking: bool,
    /// Periodic flush interval; `None` only flushes on demand
    flush_every: Option<usize>,
    /// Keys loaded at startup; these are skipped
    skip: HashSet<String>,
    progress: Mutex<Progress>,
}

impl ResumeCheckpoint {
    /// Load a checkpoint, returning `None` when the file does not exist.
    pub async fn load(path: &Path) -> Result<Option<ResumeState>> {
        let Some(bytes) = read_optional(path).await? else {
            return Ok(None);
        };
        let state = serde_json::from_slice::<ResumeState>(&bytes)
            .map_err(|e| AppError::resume(path.display(), e))?;
        Ok(Some(state))
    }

    pub fn new(path: impl Into<PathBuf>, flush_every: Option<usize>, previous: Option<ResumeState>) -> Self {
        let state = previous.unwrap_or_default();
        Self {
            path: path.into(),
            tracking: true,
            flush_every: flush_every.map(|n| n.max(1)),
            skip: state.completed.iter().cloned().collect(),
            progress: Mutex::new(Progress {
                state,
                since_flush: 0,
            }),
        }
    }

    /// A checkpoint that records nothing and never writes.
    pub fn disabled(path: impl Into<PathBuf>) -> Self {
        Self {
            tracking: false,
            ..Self::new(path, None, None)
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a previous run already completed this target.
    pub fn is_complete(&self, key: &str) -> bool {
        self.skip.contains(key)
    }

    /// Number of targets skipped because a previous run completed them.
    pub fn restored(&self) -> usize {
        self.skip.len()
    }

    /// Record a completed target, flushing when the interval is reached.
    pub async fn mark_complete(&self, key: &str) -> Result<()> {
        if !self.tracking {
            return Ok(());
        }
        let mut progress = self.progress.lock().await;
        if !progress.state.completed.insert(key.to_string()) {
            return Ok(());
        }
        progress.state.processed += 1;
        progress.since_flush += 1;

        if let Some(every) = self.flush_every {
            if progress.since_flush >= every {
                self.write(&mut progress).await?;
            }
        }
        Ok(())
    }

    /// Persist the current state. A disabled checkpoint writes nothing.
    pub async fn flush(&self) -> Result<()> {
        if !self.tracking {
            return Ok(());
        }
        let mut progress = self.progress.lock().await;
        self.write(&mut progress).await
    }

    /// Remove the checkpoint after a clean, complete run.
    pub async fn discard(&self) -> Result<()> {
        remove_if_exists(&self.path).await
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> ResumeState {
        self.progress.lock().await.state.clone()
    }

    async fn write(&self, progress: &mut Progress) -> Result<()> {
        progress.state.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&progress.state)?;
        write_atomic(&self.path, &bytes).await?;
        progress.since_flush = 0;

        log::debug!(
            "Checkpoint: {} targets saved to {}",
            progress.state.processed,
            self.path.display()
        );
        Ok(())
    }
}
