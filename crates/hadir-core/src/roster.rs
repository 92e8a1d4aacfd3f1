//! Embedding roster with tolerant snapshot loading and atomic reload.
//!
//! The snapshot is a JSON array of `{name, embedding}` records produced by
//! the roster builder. Damaged entries are skipped individually so partial
//! data survives a bad rebuild; only an unreadable container aborts a load.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::Embedding;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("snapshot not readable: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot container corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One enrolled identity: unique name plus its reference embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// An immutable roster snapshot. Iteration order is the snapshot order,
/// which keeps best-match tie-breaking deterministic.
#[derive(Debug, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a snapshot load: how many entries made it in and how many
/// were skipped as malformed.
#[derive(Debug, Clone, Copy)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Shared roster holder with atomic swap on reload.
///
/// Readers take an `Arc` snapshot and keep matching against it even while
/// a reload commits, so they observe the old or new roster in full, never
/// a mix.
pub struct EmbeddingStore {
    snapshot_path: PathBuf,
    current: RwLock<Arc<Roster>>,
}

impl EmbeddingStore {
    /// Create a store bound to a snapshot path, starting empty.
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            current: RwLock::new(Arc::new(Roster::default())),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Re-read the snapshot file and atomically swap in the parsed roster.
    ///
    /// Callable at any time, including while a session is open. On error
    /// the previous roster stays installed.
    pub fn load(&self) -> Result<LoadReport, LoadError> {
        let bytes = std::fs::read(&self.snapshot_path)?;
        self.load_from_bytes(&bytes)
    }

    /// Parse a snapshot from raw bytes and swap it in.
    pub fn load_from_bytes(&self, bytes: &[u8]) -> Result<LoadReport, LoadError> {
        let (roster, skipped) = parse_snapshot(bytes)?;
        let report = LoadReport {
            loaded: roster.len(),
            skipped,
        };

        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(roster);
        drop(guard);

        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped,
            "roster snapshot installed"
        );
        Ok(report)
    }

    /// Current roster snapshot.
    pub fn snapshot(&self) -> Arc<Roster> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of enrolled identities currently loaded.
    pub fn size(&self) -> usize {
        self.snapshot().len()
    }
}

/// Decode a snapshot, skipping malformed entries instead of failing the
/// whole load. Fails only when the container itself is not valid JSON.
pub fn parse_snapshot(bytes: &[u8]) -> Result<(Roster, usize), LoadError> {
    let raw: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;

    let mut entries = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;

    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<RosterEntry>(value) {
            Ok(entry) if entry.name.is_empty() => {
                tracing::warn!(index, "skipping roster entry with empty name");
                skipped += 1;
            }
            Ok(entry) if entry.embedding.values.is_empty() => {
                tracing::warn!(index, name = %entry.name, "skipping roster entry with empty embedding");
                skipped += 1;
            }
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(index, error = %err, "skipping malformed roster entry");
                skipped += 1;
            }
        }
    }

    Ok((Roster { entries }, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EmbeddingStore {
        EmbeddingStore::new("/nonexistent/master_embeddings.json")
    }

    #[test]
    fn test_load_well_formed_snapshot() {
        let s = store();
        let report = s
            .load_from_bytes(br#"[{"name":"ana","embedding":[1.0,0.0]},{"name":"budi","embedding":[0.0,1.0]}]"#)
            .unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(s.size(), 2);
        assert_eq!(s.snapshot().entries()[0].name, "ana");
    }

    #[test]
    fn test_malformed_entries_are_skipped_not_fatal() {
        let s = store();
        let report = s
            .load_from_bytes(
                br#"[
                    {"name":"ana","embedding":[1.0,0.0]},
                    {"name":"broken"},
                    {"embedding":[1.0]},
                    {"name":"","embedding":[1.0]},
                    {"name":"cici","embedding":[]},
                    {"name":"budi","embedding":[0.0,1.0]}
                ]"#,
            )
            .unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 4);
        assert_eq!(s.size(), 2);
    }

    #[test]
    fn test_corrupt_container_aborts_load() {
        let s = store();
        s.load_from_bytes(br#"[{"name":"ana","embedding":[1.0]}]"#)
            .unwrap();
        let err = s.load_from_bytes(b"not json at all").unwrap_err();
        assert!(matches!(err, LoadError::Corrupt(_)));
        // Previous roster stays installed on a failed load.
        assert_eq!(s.size(), 1);
    }

    #[test]
    fn test_reload_swaps_whole_roster() {
        let s = store();
        s.load_from_bytes(br#"[{"name":"ana","embedding":[1.0]}]"#)
            .unwrap();
        let before = s.snapshot();

        s.load_from_bytes(br#"[{"name":"budi","embedding":[0.5]},{"name":"cici","embedding":[0.5]}]"#)
            .unwrap();

        // Old snapshot handles keep observing the old roster in full.
        assert_eq!(before.len(), 1);
        assert_eq!(before.entries()[0].name, "ana");
        assert_eq!(s.size(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = store().load().unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }
}
