//! HTTP API for the attendance daemon.
//!
//! The wire contract (paths, Indonesian field names, status strings) is
//! shared with the kiosk clients and the dashboard; it is the protocol,
//! so it stays verbatim even though the code is English.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use hadir_core::extract::ExtractError;
use hadir_core::{EmbeddingStore, RosterMatcher};

use crate::engine::{EngineError, EngineHandle};
use crate::ledger::Ledger;
use crate::session::{RecordOutcome, SessionCoordinator, SessionError};

/// Uploads smaller than this cannot be a real camera frame.
const MIN_IMAGE_BYTES: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub store: Arc<EmbeddingStore>,
    pub engine: EngineHandle,
    pub matcher: RosterMatcher,
    pub ledger: Arc<Ledger>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status_sesi", get(status_sesi))
        .route("/api/recognize_and_attend", post(recognize_and_attend))
        .route("/api/mulai_sesi", post(mulai_sesi))
        .route("/api/selesai_sesi", post(selesai_sesi))
        .route("/api/reload_embeddings", post(reload_embeddings))
        .route("/api/log_absen_terkini", get(log_absen_terkini))
        .route("/api/system_info", get(system_info))
        .route("/api/manual_attend", post(manual_attend))
        .with_state(state)
}

#[derive(Deserialize)]
struct StartSessionRequest {
    jadwal_id: i64,
    pertemuan_ke: Option<i64>,
}

#[derive(Deserialize)]
struct ManualAttendRequest {
    nama: String,
}

async fn status_sesi(State(state): State<AppState>) -> Json<Value> {
    let status = state.coordinator.status().await;
    Json(json!({
        "status": if status.open { "aktif" } else { "tidak_aktif" },
        "sesi_id": status.session_id,
        "embeddings_loaded": state.store.size(),
    }))
}

async fn mulai_sesi(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> (StatusCode, Json<Value>) {
    match state
        .coordinator
        .start(request.jadwal_id, request.pertemuan_ke)
        .await
    {
        Ok(_) => {
            let message = match request.pertemuan_ke {
                Some(n) => format!("Sesi untuk pertemuan ke-{n} berhasil dimulai"),
                None => "Sesi berhasil dimulai".to_string(),
            };
            (StatusCode::OK, Json(json!({"status": "sukses", "message": message})))
        }
        Err(SessionError::AlreadyOpen) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "Sesi lain masih aktif."})),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": format!("Gagal memulai sesi: {err}")})),
        ),
    }
}

async fn selesai_sesi(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.coordinator.stop().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"status": "sukses", "message": "Sesi telah berakhir"})),
        ),
        Err(SessionError::NotOpen) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "Tidak ada sesi aktif."})),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": format!("Gagal menutup sesi: {err}")})),
        ),
    }
}

async fn recognize_and_attend(
    State(state): State<AppState>,
    multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let status = state.coordinator.status().await;
    let Some(session_id) = status.session_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Sesi tidak aktif, absensi ditolak."})),
        );
    };

    if state.store.size() == 0 {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "Master embedding belum dimuat. Hubungi administrator."})),
        );
    }

    let image = match read_image_part(multipart).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": "Tidak ada file gambar."})),
            );
        }
        Err(message) => return (StatusCode::BAD_REQUEST, Json(json!({"message": message}))),
    };

    if image.len() < MIN_IMAGE_BYTES {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Gambar terlalu kecil atau rusak."})),
        );
    }

    let embedding = match state.engine.extract(image).await {
        Ok(embedding) => embedding,
        Err(EngineError::Extract(ExtractError::InvalidImage(err))) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": format!("File gambar tidak valid: {err}")})),
            );
        }
        Err(err) => {
            tracing::error!(error = %err, "extraction failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": format!("Error memproses gambar: {err}")})),
            );
        }
    };

    let result = state.matcher.best_match(&embedding, &state.store.snapshot());
    tracing::debug!(
        best_match = result.name.as_deref().unwrap_or("-"),
        similarity = result.similarity,
        threshold = state.matcher.threshold(),
        "matched live embedding"
    );

    let Some(name) = result.name.clone().filter(|_| result.accepted) else {
        // Below threshold: report the best candidate for tuning, but
        // never treat it as a recognition.
        return (
            StatusCode::OK,
            Json(json!({
                "message": format!(
                    "Wajah terdeteksi, tapi tidak dikenali (Similarity tertinggi: {:.2}).",
                    result.similarity
                ),
                "recognized": false,
                "similarity": round3(result.similarity),
                "best_match": result.name,
            })),
        );
    };

    match state.coordinator.record_attendance(&session_id, &name).await {
        Ok(RecordOutcome::Recorded) => (
            StatusCode::OK,
            Json(json!({
                "message": format!(
                    "Absensi {name} berhasil disimpan! (Similarity: {:.2})",
                    result.similarity
                ),
                "recognized": true,
                "name": name,
                "similarity": round3(result.similarity),
                "saved_to_db": true,
            })),
        ),
        Ok(RecordOutcome::AlreadyRecorded) => (
            StatusCode::OK,
            Json(json!({
                "message": format!("{name} sudah tercatat absen."),
                "recognized": true,
                "name": name,
                "similarity": round3(result.similarity),
                "saved_to_db": false,
            })),
        ),
        Ok(RecordOutcome::SessionNotOpen) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Sesi tidak aktif, absensi ditolak."})),
        ),
        Err(err) => {
            tracing::error!(error = %err, %name, "attendance write failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": format!(
                        "Wajah dikenali sebagai {name}, tapi gagal menyimpan absensi: {err}"
                    ),
                    "recognized": true,
                    "name": name,
                    "similarity": round3(result.similarity),
                    "saved_to_db": false,
                })),
            )
        }
    }
}

async fn manual_attend(
    State(state): State<AppState>,
    Json(request): Json<ManualAttendRequest>,
) -> (StatusCode, Json<Value>) {
    let status = state.coordinator.status().await;
    let Some(session_id) = status.session_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Sesi tidak aktif"})),
        );
    };

    let name = request.nama;
    match state.coordinator.record_attendance(&session_id, &name).await {
        Ok(RecordOutcome::Recorded) => (
            StatusCode::OK,
            Json(json!({"message": format!("Absensi manual untuk {name} berhasil")})),
        ),
        Ok(RecordOutcome::AlreadyRecorded) => (
            StatusCode::OK,
            Json(json!({"message": format!("{name} sudah absen")})),
        ),
        Ok(RecordOutcome::SessionNotOpen) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Sesi tidak aktif"})),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": format!("Error: {err}")})),
        ),
    }
}

async fn log_absen_terkini(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let status = state.coordinator.status().await;
    let Some(session_id) = status.session_id else {
        return (StatusCode::OK, Json(json!([])));
    };

    match state.ledger.recent_attendance(&session_id).await {
        Ok(rows) => {
            let log: Vec<Value> = rows
                .iter()
                .map(|row| {
                    json!({
                        "nama_mahasiswa": row.identity,
                        "waktu_absen": row.recorded_at.format("%H:%M:%S").to_string(),
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!(log)))
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.to_string()})),
        ),
    }
}

async fn reload_embeddings(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.store.load() {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": format!(
                    "Master embedding berhasil dimuat ulang. Total: {} embeddings.",
                    report.loaded
                ),
            })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "message": format!("Gagal memuat ulang embeddings: {err}"),
            })),
        ),
    }
}

async fn system_info(State(state): State<AppState>) -> Json<Value> {
    let status = state.coordinator.status().await;
    Json(json!({
        "embeddings_loaded": state.store.size(),
        "similarity_threshold": state.matcher.threshold(),
        "sesi_aktif": status.open,
    }))
}

/// Pull the `image` part out of the multipart body.
async fn read_image_part(mut multipart: Multipart) -> Result<Option<Vec<u8>>, String> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("File gambar tidak valid: {e}"))?
    {
        if field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| format!("File gambar tidak valid: {e}"))?;
            return Ok(Some(bytes.to_vec()));
        }
    }
    Ok(None)
}

fn round3(value: f32) -> f64 {
    (f64::from(value) * 1000.0).round() / 1000.0
}
