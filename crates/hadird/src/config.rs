use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// HTTP bind address (default: 0.0.0.0:5000).
    pub bind: String,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Path to the master embeddings snapshot.
    pub snapshot_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for a positive recognition. Tuned for
    /// the embedding model the roster was built with; revalidate when the
    /// model changes.
    pub similarity_threshold: f32,
}

impl Config {
    /// Load configuration from `HADIR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("hadir");

        let db_path = std::env::var("HADIR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let snapshot_path = std::env::var("HADIR_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("master_embeddings.json"));

        let model_dir = std::env::var("HADIR_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            bind: std::env::var("HADIR_BIND").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            db_path,
            snapshot_path,
            model_dir,
            similarity_threshold: env_f32("HADIR_SIMILARITY_THRESHOLD", 0.55),
        }
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(hadir_core::pipeline::DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face recognition model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(hadir_core::pipeline::EMBEDDER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
