//! Marker Store
//!
//! Durable record of which targets have run. Presence of a marker is the
//! only thing that gates re-execution; the recorded outcome is informational.
//!
//! The file-backed store keeps one JSON document per target and writes it
//! through temp file, `fsync`, rename and directory `fsync`, so a crash at
//! any point leaves either the old or the new completion set on disk.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::MarkerError;
use crate::types::TargetId;

const MARKER_EXT: &str = "json";

/// How a target's execution path ended
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MarkerOutcome {
    /// Every step succeeded and the component reported healthy
    #[default]
    Succeeded,
    /// Started, but health could not be confirmed
    Degraded {
        /// Why health is in doubt
        reason: String,
    },
    /// An execution step failed; recorded to keep the schedule moving
    Failed {
        /// Failure detail
        reason: String,
    },
}

impl MarkerOutcome {
    /// Whether the outcome needs operator attention
    #[inline]
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        !matches!(self, Self::Succeeded)
    }
}

/// One completion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecord {
    /// Target the marker belongs to
    pub target_id: TargetId,
    /// When the execution path returned
    pub completed_at: DateTime<Utc>,
    /// How it returned
    #[serde(default)]
    pub outcome: MarkerOutcome,
}

/// Durable, idempotent completion tracking
pub trait MarkerStore: Send + Sync {
    /// Marker of a target, if any
    ///
    /// # Errors
    /// Returns `MarkerError` if the store cannot be read.
    fn record(&self, id: &TargetId) -> Result<Option<MarkerRecord>, MarkerError>;

    /// Record completion; a second call returns the existing marker untouched
    ///
    /// # Errors
    /// Returns `MarkerError` if the marker cannot be persisted.
    fn mark_complete(&self, id: &TargetId, outcome: MarkerOutcome) -> Result<MarkerRecord, MarkerError>;

    /// All markers, oldest first
    ///
    /// # Errors
    /// Returns `MarkerError` if the store cannot be read.
    fn records(&self) -> Result<Vec<MarkerRecord>, MarkerError>;

    /// Whether a target has a marker
    ///
    /// # Errors
    /// Returns `MarkerError` if the store cannot be read.
    fn is_complete(&self, id: &TargetId) -> Result<bool, MarkerError> {
        Ok(self.record(id)?.is_some())
    }

    /// Completion time of a target
    ///
    /// # Errors
    /// Returns `MarkerError` if the store cannot be read.
    fn completed_at(&self, id: &TargetId) -> Result<Option<DateTime<Utc>>, MarkerError> {
        Ok(self.record(id)?.map(|r| r.completed_at))
    }
}

/// Marker store backed by one file per target in a directory
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    dir: PathBuf,
}

impl FileMarkerStore {
    /// Open (and create if needed) a marker directory
    ///
    /// # Errors
    /// Returns `MarkerError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, MarkerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| io_err(&dir, source))?;
        Ok(Self { dir })
    }

    /// Directory holding the markers
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete a marker; returns whether one existed
    ///
    /// This is an operator reset. The orchestrator itself never deletes.
    ///
    /// # Errors
    /// Returns `MarkerError::Io` if removal fails.
    pub fn reset(&self, id: &TargetId) -> Result<bool, MarkerError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                fsync_dir(&self.dir)?;
                tracing::info!(target = %id, "marker removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_err(&path, source)),
        }
    }

    /// Delete every marker; returns how many were removed
    ///
    /// # Errors
    /// Returns `MarkerError` if listing or removal fails.
    pub fn reset_all(&self) -> Result<usize, MarkerError> {
        let mut removed = 0;
        for record in self.records()? {
            if self.reset(&record.target_id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn path_for(&self, id: &TargetId) -> PathBuf {
        self.dir.join(format!("{id}.{MARKER_EXT}"))
    }

    fn read_marker(&self, id: &TargetId, path: &Path) -> Result<MarkerRecord, MarkerError> {
        let bytes = fs::read(path).map_err(|source| io_err(path, source))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            // An empty file still counts as a marker; date it by mtime.
            let completed_at = fs::metadata(path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .map_err(|source| io_err(path, source))?;
            return Ok(MarkerRecord {
                target_id: id.clone(),
                completed_at,
                outcome: MarkerOutcome::Succeeded,
            });
        }
        serde_json::from_slice(&bytes).map_err(|source| MarkerError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_marker(&self, record: &MarkerRecord) -> Result<(), MarkerError> {
        let final_path = self.path_for(&record.target_id);
        let tmp_path = self.dir.join(format!(".{}.{MARKER_EXT}.tmp", record.target_id));
        let bytes = serde_json::to_vec_pretty(record).map_err(|source| MarkerError::Corrupt {
            path: final_path.clone(),
            source,
        })?;

        let mut file = File::create(&tmp_path).map_err(|source| io_err(&tmp_path, source))?;
        file.write_all(&bytes).map_err(|source| io_err(&tmp_path, source))?;
        file.write_all(b"\n").map_err(|source| io_err(&tmp_path, source))?;
        file.sync_all().map_err(|source| io_err(&tmp_path, source))?;

        fs::rename(&tmp_path, &final_path).map_err(|source| io_err(&final_path, source))?;
        fsync_dir(&self.dir)
    }
}

impl MarkerStore for FileMarkerStore {
    fn record(&self, id: &TargetId) -> Result<Option<MarkerRecord>, MarkerError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_marker(id, &path).map(Some)
    }

    fn is_complete(&self, id: &TargetId) -> Result<bool, MarkerError> {
        // Presence alone gates, even when the document is unreadable.
        Ok(self.path_for(id).exists())
    }

    fn mark_complete(&self, id: &TargetId, outcome: MarkerOutcome) -> Result<MarkerRecord, MarkerError> {
        if let Some(existing) = self.record(id)? {
            tracing::debug!(target = %id, "marker already present");
            return Ok(existing);
        }
        let record = MarkerRecord {
            target_id: id.clone(),
            completed_at: Utc::now(),
            outcome,
        };
        self.write_marker(&record)?;
        tracing::info!(target = %id, outcome = ?record.outcome, "marker written");
        Ok(record)
    }

    fn records(&self) -> Result<Vec<MarkerRecord>, MarkerError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| io_err(&self.dir, source))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_err(&self.dir, source))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MARKER_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Leftover temp files and foreign names are not markers.
            let Ok(id) = TargetId::new(stem) else {
                continue;
            };
            records.push(self.read_marker(&id, &path)?);
        }
        records.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        Ok(records)
    }
}

/// Marker store held in memory, for tests and simulation
#[derive(Debug, Default)]
pub struct InMemoryMarkerStore {
    inner: Mutex<IndexMap<TargetId, MarkerRecord>>,
}

impl InMemoryMarkerStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given targets already complete
    #[must_use]
    pub fn with_completed<'a>(ids: impl IntoIterator<Item = &'a TargetId>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.inner.lock();
            for id in ids {
                guard.insert(
                    id.clone(),
                    MarkerRecord {
                        target_id: id.clone(),
                        completed_at: Utc::now(),
                        outcome: MarkerOutcome::Succeeded,
                    },
                );
            }
        }
        store
    }

    /// Number of markers
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if no marker exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl MarkerStore for InMemoryMarkerStore {
    fn record(&self, id: &TargetId) -> Result<Option<MarkerRecord>, MarkerError> {
        Ok(self.inner.lock().get(id).cloned())
    }

    fn mark_complete(&self, id: &TargetId, outcome: MarkerOutcome) -> Result<MarkerRecord, MarkerError> {
        let mut guard = self.inner.lock();
        let record = guard.entry(id.clone()).or_insert_with(|| MarkerRecord {
            target_id: id.clone(),
            completed_at: Utc::now(),
            outcome,
        });
        Ok(record.clone())
    }

    fn records(&self) -> Result<Vec<MarkerRecord>, MarkerError> {
        Ok(self.inner.lock().values().cloned().collect())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> MarkerError {
    MarkerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> Result<(), MarkerError> {
    let dir = File::open(path).map_err(|source| io_err(path, source))?;
    dir.sync_all().map_err(|source| io_err(path, source))
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> Result<(), MarkerError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> TargetId {
        TargetId::new(raw).unwrap()
    }

    #[test]
    fn in_memory_mark_is_idempotent() {
        let store = InMemoryMarkerStore::new();
        let first = store.mark_complete(&id("node1-el"), MarkerOutcome::Succeeded).unwrap();
        let second = store
            .mark_complete(
                &id("node1-el"),
                MarkerOutcome::Failed {
                    reason: "ignored".into(),
                },
            )
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert!(store.is_complete(&id("node1-el")).unwrap());
        assert!(!store.is_complete(&id("node2-el")).unwrap());
    }

    #[test]
    fn outcome_defaults_to_succeeded_when_absent() {
        let raw = r#"{"target_id":"node1-el","completed_at":"2025-01-01T00:00:00Z"}"#;
        let record: MarkerRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.outcome, MarkerOutcome::Succeeded);
    }

    #[test]
    fn failed_outcome_needs_attention() {
        assert!(!MarkerOutcome::Succeeded.needs_attention());
        assert!(MarkerOutcome::Failed { reason: "x".into() }.needs_attention());
        assert!(MarkerOutcome::Degraded { reason: "x".into() }.needs_attention());
    }
}
