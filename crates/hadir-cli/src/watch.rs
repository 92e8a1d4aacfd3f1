//! Kiosk watch loop: capture, poll, submit.
//!
//! Deliberately a single-threaded cooperative loop. Each iteration reads
//! one frame, polls session status only when the poll interval elapsed,
//! and conditionally submits the frame. A slow submission only delays
//! the next capture, which is acceptable for an attendance kiosk; a
//! failed submission is never retried because the next frame supersedes
//! a stale one.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::capture::FrameCamera;
use crate::client::{ApiClient, RecognizeResponse};

/// Pause between loop iterations so the camera is not hammered.
const FRAME_DELAY: Duration = Duration::from_millis(200);
/// Extra submission back-off after the server reports an identity that
/// was already recorded — the person is lingering in frame.
const LINGER_BACKOFF: Duration = Duration::from_secs(8);

pub struct WatchOptions {
    pub server: String,
    pub device: String,
    /// How often to ask the server for session status (not every frame).
    pub poll_interval: Duration,
    /// Minimum spacing between frame submissions.
    pub submit_interval: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum StatusChange {
    Opened,
    Closed,
    Unchanged,
}

#[derive(Debug, PartialEq, Eq)]
enum SubmitFeedback {
    NewlyRecorded(String),
    Lingering(String),
    Unrecognized,
}

/// Client-side mirror of the session window plus the local dedup cache.
///
/// The cache only suppresses redundant submissions; the server stays
/// authoritative and re-checks everything it receives.
#[derive(Default)]
struct LocalState {
    session_id: Option<String>,
    recorded: HashSet<String>,
}

impl LocalState {
    /// Fold a polled status into local state. A new session id means a
    /// fresh window: the old notebook is discarded either way.
    fn apply_status(&mut self, active: bool, sesi_id: Option<&str>) -> StatusChange {
        match (active, sesi_id) {
            (true, Some(id)) if self.session_id.as_deref() != Some(id) => {
                self.session_id = Some(id.to_string());
                self.recorded.clear();
                StatusChange::Opened
            }
            (false, _) if self.session_id.is_some() => {
                self.session_id = None;
                self.recorded.clear();
                StatusChange::Closed
            }
            _ => StatusChange::Unchanged,
        }
    }

    /// Fold a recognition response into local state.
    fn apply_response(&mut self, response: &RecognizeResponse) -> SubmitFeedback {
        let Some(name) = response.name.as_deref().filter(|_| response.recognized) else {
            return SubmitFeedback::Unrecognized;
        };
        self.recorded.insert(name.to_string());
        if response.saved_to_db.unwrap_or(false) {
            SubmitFeedback::NewlyRecorded(name.to_string())
        } else {
            SubmitFeedback::Lingering(name.to_string())
        }
    }
}

/// Run the kiosk loop until the process is terminated.
pub fn run(options: &WatchOptions) -> anyhow::Result<()> {
    let client = ApiClient::new(&options.server);
    let camera = FrameCamera::open(&options.device)?;

    let mut state = LocalState::default();
    let mut last_poll: Option<Instant> = None;
    let mut next_submit_after = Instant::now();

    tracing::info!(server = %options.server, device = %options.device, "kiosk watch loop started");

    loop {
        let frame = match camera.capture_jpeg() {
            Ok(jpeg) => Some(jpeg),
            Err(err) => {
                tracing::warn!(error = %err, "frame capture failed");
                None
            }
        };

        let now = Instant::now();
        if last_poll.map_or(true, |t| now.duration_since(t) >= options.poll_interval) {
            last_poll = Some(now);
            match client.session_status() {
                Ok(status) => {
                    match state.apply_status(status.is_active(), status.sesi_id.as_deref()) {
                        StatusChange::Opened => tracing::info!(
                            session_id = state.session_id.as_deref().unwrap_or("-"),
                            embeddings_loaded = status.embeddings_loaded,
                            "session active"
                        ),
                        StatusChange::Closed => tracing::info!("session ended"),
                        StatusChange::Unchanged => {}
                    }
                }
                Err(err) => tracing::warn!(error = %err, "status poll failed"),
            }
        }

        if state.session_id.is_some() && Instant::now() >= next_submit_after {
            if let Some(jpeg) = frame {
                next_submit_after = Instant::now() + options.submit_interval;
                match client.submit_frame(&jpeg) {
                    Ok(response) => match state.apply_response(&response) {
                        SubmitFeedback::NewlyRecorded(name) => {
                            tracing::info!(
                                %name,
                                similarity = ?response.similarity,
                                "attendance recorded"
                            );
                        }
                        SubmitFeedback::Lingering(name) => {
                            tracing::debug!(%name, "already recorded, backing off");
                            next_submit_after = Instant::now() + LINGER_BACKOFF;
                        }
                        SubmitFeedback::Unrecognized => {
                            tracing::debug!(
                                best_match = ?response.best_match,
                                message = %response.message,
                                "frame not recognized"
                            );
                        }
                    },
                    Err(err) => tracing::warn!(error = %err, "submission failed"),
                }
            }
        }

        std::thread::sleep(FRAME_DELAY);
    }
}
