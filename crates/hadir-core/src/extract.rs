//! Ordered-fallback embedding extraction.
//!
//! Face detection fails for uncorrelated reasons across lighting and pose,
//! so a single strict configuration rejects too many usable captures. The
//! extractor tries a strict primary configuration, then a fixed ordered
//! list of cheaper fallbacks, and finally a permissive pass that does not
//! require a confirmed detection. Each fallback runs only after the
//! previous attempt failed.

use image::RgbImage;
use thiserror::Error;

use crate::embedding::Embedding;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image not decodable: {0}")]
    InvalidImage(String),
    #[error("all {attempts} extraction attempts failed")]
    AllAttemptsFailed { attempts: usize },
}

/// Failure of a single backend attempt, consumed by the fallback chain.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no face above confidence {min_confidence}")]
    NoFace { min_confidence: f32 },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// One extraction strategy configuration.
#[derive(Debug, Clone, Copy)]
pub struct ExtractAttempt {
    pub label: &'static str,
    /// Minimum detector confidence for a face to count as confirmed.
    pub min_confidence: f32,
    /// Apply histogram equalization before detecting.
    pub equalize: bool,
    /// When false, embed a center crop even without a confirmed detection.
    pub require_face: bool,
}

/// The fixed attempt chain: strict primary, relaxed confidence, equalized
/// retry, then the permissive final pass.
pub fn default_attempts() -> Vec<ExtractAttempt> {
    vec![
        ExtractAttempt {
            label: "strict",
            min_confidence: 0.7,
            equalize: false,
            require_face: true,
        },
        ExtractAttempt {
            label: "relaxed",
            min_confidence: 0.5,
            equalize: false,
            require_face: true,
        },
        ExtractAttempt {
            label: "equalized",
            min_confidence: 0.5,
            equalize: true,
            require_face: true,
        },
        ExtractAttempt {
            label: "permissive",
            min_confidence: 0.7,
            equalize: false,
            require_face: false,
        },
    ]
}

/// A backend able to produce an embedding for one attempt configuration.
pub trait ExtractBackend {
    fn represent(
        &mut self,
        image: &RgbImage,
        attempt: &ExtractAttempt,
    ) -> Result<Embedding, BackendError>;
}

/// Iterates the attempt chain over a backend, short-circuiting on the
/// first success.
pub struct FallbackExtractor<B> {
    backend: B,
    attempts: Vec<ExtractAttempt>,
}

impl<B: ExtractBackend> FallbackExtractor<B> {
    pub fn new(backend: B) -> Self {
        Self::with_attempts(backend, default_attempts())
    }

    pub fn with_attempts(backend: B, attempts: Vec<ExtractAttempt>) -> Self {
        Self { backend, attempts }
    }

    /// Decode the capture and run the attempt chain.
    ///
    /// Returns the first successful embedding;
    /// `ExtractError::AllAttemptsFailed` only when every configuration
    /// failed.
    pub fn extract(&mut self, image_bytes: &[u8]) -> Result<Embedding, ExtractError> {
        let image = image::load_from_memory(image_bytes)
            .map_err(|e| ExtractError::InvalidImage(e.to_string()))?
            .to_rgb8();

        for attempt in &self.attempts {
            match self.backend.represent(&image, attempt) {
                Ok(embedding) => {
                    tracing::debug!(strategy = attempt.label, "extraction succeeded");
                    return Ok(embedding);
                }
                Err(err) => {
                    tracing::warn!(strategy = attempt.label, error = %err, "extraction attempt failed");
                }
            }
        }

        Err(ExtractError::AllAttemptsFailed {
            attempts: self.attempts.len(),
        })
    }
}
