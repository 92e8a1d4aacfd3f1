//! Session state machine and the two-tier de-duplication protocol.
//!
//! One coordinator owns the open-session record and its dedup cache
//! behind a single transition lock, and is injected into request
//! handlers — never reached through globals. The cache is a derived
//! accelerator; the ledger's uniqueness constraint stays authoritative.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ledger::{InsertOutcome, Ledger, LedgerError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("another session is still active")]
    AlreadyOpen,
    #[error("no active session")]
    NotOpen,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Read-only session snapshot handed to clients via polling.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub open: bool,
    pub session_id: Option<String>,
}

/// Outcome of one attendance submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyRecorded,
    /// The submitted session id is not the currently open session
    /// (closed, or stale from a client that missed a transition).
    SessionNotOpen,
}

/// The single open attendance window, plus its dedup cache.
struct OpenSession {
    id: String,
    /// Names already recorded this session. Non-authoritative: a miss
    /// always falls through to the ledger before any write.
    recorded: HashSet<String>,
}

/// Authoritative in-process record of the attendance window.
///
/// `start`/`stop` and the open-session read inside `record_attendance`
/// share one lock, so a transition can never interleave with the
/// session check. Ledger I/O runs outside the lock; the storage
/// constraint covers the remaining window.
pub struct SessionCoordinator {
    state: Mutex<Option<OpenSession>>,
    ledger: Arc<Ledger>,
}

impl SessionCoordinator {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            state: Mutex::new(None),
            ledger,
        }
    }

    /// Open a new session window.
    ///
    /// Rejected — not queued — while another session is open; the
    /// instructor must stop the previous session explicitly.
    pub async fn start(
        &self,
        schedule_ref: i64,
        meeting_index: Option<i64>,
    ) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(SessionError::AlreadyOpen);
        }

        let id = Uuid::new_v4().to_string();
        self.ledger
            .create_session(&id, schedule_ref, meeting_index, Utc::now())
            .await?;

        // Fresh dedup cache with the fresh session.
        *state = Some(OpenSession {
            id: id.clone(),
            recorded: HashSet::new(),
        });

        tracing::info!(session_id = %id, schedule_ref, ?meeting_index, "session started");
        Ok(id)
    }

    /// Close the open session window and drop its dedup cache.
    pub async fn stop(&self) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;
        let open = state.as_ref().ok_or(SessionError::NotOpen)?;

        let id = open.id.clone();
        self.ledger.close_session(&id, Utc::now()).await?;
        *state = None;

        tracing::info!(session_id = %id, "session stopped");
        Ok(id)
    }

    /// Current window snapshot. Brief lock, no I/O.
    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        match state.as_ref() {
            Some(open) => SessionStatus {
                open: true,
                session_id: Some(open.id.clone()),
            },
            None => SessionStatus {
                open: false,
                session_id: None,
            },
        }
    }

    /// Record an identity for a session, at most once.
    ///
    /// Order is load-bearing: session check and cache check under the
    /// transition lock, then a ledger re-check, then the
    /// constraint-guarded insert as the authoritative write. A lost
    /// insert race converges to `AlreadyRecorded`.
    pub async fn record_attendance(
        &self,
        session_id: &str,
        identity: &str,
    ) -> Result<RecordOutcome, LedgerError> {
        {
            let state = self.state.lock().await;
            match state.as_ref() {
                None => return Ok(RecordOutcome::SessionNotOpen),
                Some(open) if open.id != session_id => {
                    return Ok(RecordOutcome::SessionNotOpen);
                }
                Some(open) => {
                    if open.recorded.contains(identity) {
                        // Fast path: person lingering in frame across
                        // polling cycles, no storage round-trip.
                        return Ok(RecordOutcome::AlreadyRecorded);
                    }
                }
            }
        }

        // Cache miss. Heal a cold/stale cache from the ledger before
        // attempting the authoritative write.
        if self.ledger.attendance_exists(session_id, identity).await? {
            self.note_recorded(session_id, identity).await;
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        match self
            .ledger
            .insert_attendance(session_id, identity, Utc::now())
            .await?
        {
            InsertOutcome::Inserted => {
                self.note_recorded(session_id, identity).await;
                tracing::info!(session_id, identity, "attendance recorded");
                Ok(RecordOutcome::Recorded)
            }
            InsertOutcome::Duplicate => {
                self.note_recorded(session_id, identity).await;
                tracing::debug!(session_id, identity, "lost insert race, already recorded");
                Ok(RecordOutcome::AlreadyRecorded)
            }
        }
    }

    /// Insert into the dedup cache, but only if the same session is
    /// still the open one — a stop/start may have happened while the
    /// ledger was consulted.
    async fn note_recorded(&self, session_id: &str, identity: &str) {
        let mut state = self.state.lock().await;
        if let Some(open) = state.as_mut() {
            if open.id == session_id {
                open.recorded.insert(identity.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn coordinator() -> (Arc<SessionCoordinator>, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::open_in_memory().await.unwrap());
        (Arc::new(SessionCoordinator::new(ledger.clone())), ledger)
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let (coordinator, _) = coordinator().await;

        assert!(!coordinator.status().await.open);
        let id = coordinator.start(1, Some(2)).await.unwrap();

        let status = coordinator.status().await;
        assert!(status.open);
        assert_eq!(status.session_id.as_deref(), Some(id.as_str()));

        let stopped = coordinator.stop().await.unwrap();
        assert_eq!(stopped, id);
        assert!(!coordinator.status().await.open);
    }

    #[tokio::test]
    async fn test_start_while_open_is_rejected_without_mutation() {
        let (coordinator, _) = coordinator().await;
        let id = coordinator.start(1, Some(1)).await.unwrap();

        let err = coordinator.start(2, Some(9)).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyOpen));

        // The open session is untouched.
        assert_eq!(
            coordinator.status().await.session_id.as_deref(),
            Some(id.as_str())
        );
    }

    #[tokio::test]
    async fn test_stop_without_open_session() {
        let (coordinator, _) = coordinator().await;
        assert!(matches!(
            coordinator.stop().await.unwrap_err(),
            SessionError::NotOpen
        ));
    }

    #[tokio::test]
    async fn test_record_then_duplicate_single_row() {
        let (coordinator, ledger) = coordinator().await;
        let id = coordinator.start(1, Some(1)).await.unwrap();

        assert_eq!(
            coordinator.record_attendance(&id, "ana").await.unwrap(),
            RecordOutcome::Recorded
        );
        assert_eq!(
            coordinator.record_attendance(&id, "ana").await.unwrap(),
            RecordOutcome::AlreadyRecorded
        );
        assert_eq!(ledger.attendance_count(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_without_session() {
        let (coordinator, _) = coordinator().await;
        assert_eq!(
            coordinator.record_attendance("ghost", "ana").await.unwrap(),
            RecordOutcome::SessionNotOpen
        );
    }

    #[tokio::test]
    async fn test_record_with_stale_session_id() {
        let (coordinator, ledger) = coordinator().await;
        let first = coordinator.start(1, Some(1)).await.unwrap();
        coordinator.stop().await.unwrap();
        let second = coordinator.start(1, Some(2)).await.unwrap();

        // A client that missed the transition submits the old id.
        assert_eq!(
            coordinator.record_attendance(&first, "ana").await.unwrap(),
            RecordOutcome::SessionNotOpen
        );
        assert_eq!(ledger.attendance_count(&first).await.unwrap(), 0);
        assert_eq!(ledger.attendance_count(&second).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cold_cache_healed_from_ledger() {
        let (coordinator, ledger) = coordinator().await;
        let id = coordinator.start(1, Some(1)).await.unwrap();

        // Row written by another process sharing the store.
        ledger.insert_attendance(&id, "ana", Utc::now()).await.unwrap();

        assert_eq!(
            coordinator.record_attendance(&id, "ana").await.unwrap(),
            RecordOutcome::AlreadyRecorded
        );
        assert_eq!(ledger.attendance_count(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_session_starts_with_clear_cache() {
        let (coordinator, ledger) = coordinator().await;
        let first = coordinator.start(1, Some(1)).await.unwrap();
        coordinator.record_attendance(&first, "ana").await.unwrap();
        coordinator.stop().await.unwrap();

        let second = coordinator.start(1, Some(2)).await.unwrap();
        assert_eq!(
            coordinator.record_attendance(&second, "ana").await.unwrap(),
            RecordOutcome::Recorded
        );
        assert_eq!(ledger.attendance_count(&second).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_record_exactly_once() {
        let (coordinator, ledger) = coordinator().await;
        let id = coordinator.start(1, Some(1)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let coordinator = coordinator.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.record_attendance(&id, "ana").await.unwrap()
            }));
        }

        let mut recorded = 0;
        let mut already = 0;
        for task in tasks {
            match task.await.unwrap() {
                RecordOutcome::Recorded => recorded += 1,
                RecordOutcome::AlreadyRecorded => already += 1,
                RecordOutcome::SessionNotOpen => panic!("session closed unexpectedly"),
            }
        }

        assert_eq!(recorded, 1);
        assert_eq!(already, 15);
        assert_eq!(ledger.attendance_count(&id).await.unwrap(), 1);
    }
}
