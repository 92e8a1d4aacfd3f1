//! Blocking HTTP client for the daemon API.
//!
//! Every call carries a bounded timeout; callers in the watch loop log
//! failures and move on to the next iteration rather than retrying.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const MULTIPART_BOUNDARY: &str = "----hadir-frame-boundary";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("connection failed: {0}")]
    Transport(String),
    #[error("response not decodable: {0}")]
    BadResponse(String),
}

/// Session window snapshot, as polled from `/api/status_sesi`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatus {
    pub status: String,
    pub sesi_id: Option<String>,
    pub embeddings_loaded: usize,
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        self.status == "aktif"
    }
}

/// Response of `/api/recognize_and_attend`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizeResponse {
    pub message: String,
    #[serde(default)]
    pub recognized: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub saved_to_db: Option<bool>,
    #[serde(default)]
    pub best_match: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceLogRow {
    pub nama_mahasiswa: String,
    pub waktu_absen: String,
}

pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(HTTP_TIMEOUT)
            .timeout_read(HTTP_TIMEOUT)
            .timeout_write(HTTP_TIMEOUT)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn session_status(&self) -> Result<SessionStatus, ClientError> {
        let response = self
            .agent
            .get(&self.url("/api/status_sesi"))
            .call()
            .map_err(server_error)?;
        decode(response)
    }

    pub fn start_session(
        &self,
        jadwal_id: i64,
        pertemuan_ke: Option<i64>,
    ) -> Result<String, ClientError> {
        let response = self
            .agent
            .post(&self.url("/api/mulai_sesi"))
            .send_json(serde_json::json!({
                "jadwal_id": jadwal_id,
                "pertemuan_ke": pertemuan_ke,
            }))
            .map_err(server_error)?;
        message_of(response)
    }

    pub fn end_session(&self) -> Result<String, ClientError> {
        let response = self
            .agent
            .post(&self.url("/api/selesai_sesi"))
            .send_json(serde_json::json!({}))
            .map_err(server_error)?;
        message_of(response)
    }

    pub fn reload_embeddings(&self) -> Result<String, ClientError> {
        let response = self
            .agent
            .post(&self.url("/api/reload_embeddings"))
            .send_json(serde_json::json!({}))
            .map_err(server_error)?;
        message_of(response)
    }

    pub fn recent_log(&self) -> Result<Vec<AttendanceLogRow>, ClientError> {
        let response = self
            .agent
            .get(&self.url("/api/log_absen_terkini"))
            .call()
            .map_err(server_error)?;
        decode(response)
    }

    /// Submit one JPEG frame for recognition.
    pub fn submit_frame(&self, jpeg: &[u8]) -> Result<RecognizeResponse, ClientError> {
        let body = multipart_image(MULTIPART_BOUNDARY, "capture.jpg", jpeg);
        let response = self
            .agent
            .post(&self.url("/api/recognize_and_attend"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .send_bytes(&body)
            .map_err(server_error)?;
        decode(response)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Assemble a single-part multipart/form-data body around the frame.
fn multipart_image(boundary: &str, filename: &str, image: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(image.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn decode<T: serde::de::DeserializeOwned>(response: ureq::Response) -> Result<T, ClientError> {
    serde_json::from_reader(response.into_reader())
        .map_err(|e| ClientError::BadResponse(e.to_string()))
}

fn message_of(response: ureq::Response) -> Result<String, ClientError> {
    let value: serde_json::Value = decode(response)?;
    Ok(value
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string())
}

fn server_error(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .ok()
                .and_then(|body| serde_json::from_str::<serde_json::Value>(&body).ok())
                .and_then(|v| {
                    v.get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "unexpected server error".to_string());
            ClientError::Server { status, message }
        }
        ureq::Error::Transport(transport) => ClientError::Transport(transport.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_image("XYZ", "capture.jpg", b"\xff\xd8jpegdata");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\n"));
        assert!(text.contains("Content-Disposition: form-data; name=\"image\"; filename=\"capture.jpg\""));
        assert!(text.contains("Content-Type: image/jpeg"));
        assert!(text.ends_with("\r\n--XYZ--\r\n"));
    }

    #[test]
    fn test_session_status_active() {
        let status: SessionStatus = serde_json::from_str(
            r#"{"status":"aktif","sesi_id":"abc","embeddings_loaded":12}"#,
        )
        .unwrap();
        assert!(status.is_active());
        assert_eq!(status.sesi_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_session_status_inactive() {
        let status: SessionStatus = serde_json::from_str(
            r#"{"status":"tidak_aktif","sesi_id":null,"embeddings_loaded":0}"#,
        )
        .unwrap();
        assert!(!status.is_active());
    }

    #[test]
    fn test_recognize_response_minimal_fields() {
        let response: RecognizeResponse =
            serde_json::from_str(r#"{"message":"Sesi tidak aktif, absensi ditolak."}"#).unwrap();
        assert!(!response.recognized);
        assert!(response.name.is_none());
        assert!(response.saved_to_db.is_none());
    }

    #[test]
    fn test_recognize_response_full_fields() {
        let response: RecognizeResponse = serde_json::from_str(
            r#"{"message":"ok","recognized":true,"name":"ana","similarity":0.62,"saved_to_db":true}"#,
        )
        .unwrap();
        assert!(response.recognized);
        assert_eq!(response.name.as_deref(), Some("ana"));
        assert_eq!(response.saved_to_db, Some(true));
    }
}
