//! Durable attendance ledger backed by SQLite.
//!
//! The `attendance` table carries a `UNIQUE(session_id, identity)`
//! constraint; the constraint-guarded insert is the authoritative
//! de-duplication point, correct even across several server processes
//! sharing one database file. The in-memory dedup cache only saves
//! round-trips here.

use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("storage unavailable: {0}")]
    Storage(String),
}

/// Result of an attendance insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A concurrent writer (or an earlier request) already holds the
    /// `(session, identity)` slot. Not an error.
    Duplicate,
}

/// One attendance row, as read back for the live log API.
#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub identity: String,
    pub recorded_at: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id            TEXT PRIMARY KEY,
    schedule_ref  INTEGER NOT NULL,
    meeting_index INTEGER,
    started_at    TEXT NOT NULL,
    ended_at      TEXT
);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL REFERENCES sessions(id),
    identity    TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    UNIQUE(session_id, identity)
);
";

/// Async handle to the attendance database.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Storage(e.to_string()))?;
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Self::init(conn).await
    }

    /// In-memory database for tests.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(storage)?;
        Ok(Self { conn })
    }

    /// Persist a newly started session.
    pub async fn create_session(
        &self,
        id: &str,
        schedule_ref: i64,
        meeting_index: Option<i64>,
        started_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let id = id.to_string();
        let started_at = started_at.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, schedule_ref, meeting_index, started_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, schedule_ref, meeting_index, started_at],
                )?;
                Ok(())
            })
            .await
            .map_err(storage)
    }

    /// Stamp `ended_at` on a session.
    pub async fn close_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let id = id.to_string();
        let ended_at = ended_at.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sessions SET ended_at = ?1 WHERE id = ?2",
                    rusqlite::params![ended_at, id],
                )?;
                Ok(())
            })
            .await
            .map_err(storage)
    }

    /// Close any sessions left open by a previous run, so the in-memory
    /// Closed state and the store agree after a crash.
    pub async fn close_dangling_sessions(
        &self,
        ended_at: DateTime<Utc>,
    ) -> Result<usize, LedgerError> {
        let ended_at = ended_at.to_rfc3339();
        self.conn
            .call(move |conn| {
                let swept = conn.execute(
                    "UPDATE sessions SET ended_at = ?1 WHERE ended_at IS NULL",
                    rusqlite::params![ended_at],
                )?;
                Ok(swept)
            })
            .await
            .map_err(storage)
    }

    /// Does a record already exist for `(session_id, identity)`?
    pub async fn attendance_exists(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<bool, LedgerError> {
        let session_id = session_id.to_string();
        let identity = identity.to_string();
        self.conn
            .call(move |conn| {
                let exists = conn.query_row(
                    "SELECT EXISTS(
                         SELECT 1 FROM attendance WHERE session_id = ?1 AND identity = ?2
                     )",
                    rusqlite::params![session_id, identity],
                    |row| row.get::<_, bool>(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(storage)
    }

    /// Insert an attendance record under the uniqueness constraint.
    ///
    /// A constraint violation means a concurrent writer won the race for
    /// this `(session, identity)` pair; the caller treats that as
    /// already-recorded, never as a failure.
    pub async fn insert_attendance(
        &self,
        session_id: &str,
        identity: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<InsertOutcome, LedgerError> {
        let session_id = session_id.to_string();
        let identity = identity.to_string();
        let recorded_at = recorded_at.to_rfc3339();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (session_id, identity, recorded_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![session_id, identity, recorded_at],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(InsertOutcome::Inserted),
            Err(err) if is_constraint_violation(&err) => Ok(InsertOutcome::Duplicate),
            Err(err) => Err(storage(err)),
        }
    }

    /// Attendance rows for one session, oldest first.
    pub async fn recent_attendance(
        &self,
        session_id: &str,
    ) -> Result<Vec<AttendanceRow>, LedgerError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity, recorded_at FROM attendance
                     WHERE session_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![session_id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await
            .map_err(storage)
            .map(|rows| {
                rows.into_iter()
                    .filter_map(|(identity, recorded_at)| {
                        match DateTime::parse_from_rfc3339(&recorded_at) {
                            Ok(at) => Some(AttendanceRow {
                                identity,
                                recorded_at: at.with_timezone(&Utc),
                            }),
                            Err(err) => {
                                tracing::warn!(%identity, error = %err, "skipping attendance row with bad timestamp");
                                None
                            }
                        }
                    })
                    .collect()
            })
    }

    /// Row count for one session, used by tests to pin the at-most-once
    /// invariant.
    #[cfg(test)]
    pub async fn attendance_count(&self, session_id: &str) -> Result<i64, LedgerError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(storage)
    }
}

fn storage(err: tokio_rusqlite::Error) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

/// Only the `(session_id, identity)` UNIQUE index can trip on this
/// insert: both columns are non-null by construction.
fn is_constraint_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger_with_session(id: &str) -> Ledger {
        let ledger = Ledger::open_in_memory().await.unwrap();
        ledger.create_session(id, 1, Some(3), Utc::now()).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_insert_then_duplicate() {
        let ledger = ledger_with_session("s1").await;

        let first = ledger.insert_attendance("s1", "ana", Utc::now()).await.unwrap();
        assert_eq!(first, InsertOutcome::Inserted);

        let second = ledger.insert_attendance("s1", "ana", Utc::now()).await.unwrap();
        assert_eq!(second, InsertOutcome::Duplicate);

        assert_eq!(ledger.attendance_count("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_identity_different_sessions() {
        let ledger = ledger_with_session("s1").await;
        ledger.create_session("s2", 1, Some(4), Utc::now()).await.unwrap();

        assert_eq!(
            ledger.insert_attendance("s1", "ana", Utc::now()).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            ledger.insert_attendance("s2", "ana", Utc::now()).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_attendance_exists() {
        let ledger = ledger_with_session("s1").await;
        assert!(!ledger.attendance_exists("s1", "ana").await.unwrap());
        ledger.insert_attendance("s1", "ana", Utc::now()).await.unwrap();
        assert!(ledger.attendance_exists("s1", "ana").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_attendance_ordered_oldest_first() {
        let ledger = ledger_with_session("s1").await;
        ledger.insert_attendance("s1", "ana", Utc::now()).await.unwrap();
        ledger.insert_attendance("s1", "budi", Utc::now()).await.unwrap();

        let rows = ledger.recent_attendance("s1").await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(names, vec!["ana", "budi"]);
    }

    #[tokio::test]
    async fn test_close_dangling_sessions() {
        let ledger = ledger_with_session("s1").await;
        ledger.create_session("s2", 2, None, Utc::now()).await.unwrap();
        ledger.close_session("s2", Utc::now()).await.unwrap();

        // Only s1 is still open.
        assert_eq!(ledger.close_dangling_sessions(Utc::now()).await.unwrap(), 1);
        assert_eq!(ledger.close_dangling_sessions(Utc::now()).await.unwrap(), 0);
    }
}
