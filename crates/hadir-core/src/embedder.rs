//! Face embedder via ONNX Runtime.
//!
//! Runs a MobileFaceNet-class recognition model over a 112x112 RGB face
//! crop and returns the L2-normalized embedding.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const EMBEDDER_INPUT_SIZE: usize = 112;
const EMBEDDER_MEAN: f32 = 127.5;
// Symmetric normalization, matching the model's training distribution.
const EMBEDDER_STD: f32 = 127.5;

use crate::embedding::Embedding;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — place the recognition ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX-backed face embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the recognition ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face embedder model"
        );

        Ok(Self { session })
    }

    /// Embed a face crop of any size; it is resized to the canonical
    /// 112x112 input here.
    pub fn embed(&mut self, crop: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.is_empty() {
            return Err(EmbedderError::InferenceFailed(
                "model produced an empty embedding".to_string(),
            ));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }

    /// Resize to 112x112 and normalize into a NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = EMBEDDER_INPUT_SIZE as u32;
        let resized = if crop.width() == size && crop.height() == size {
            crop.clone()
        } else {
            image::imageops::resize(crop, size, size, image::imageops::FilterType::Triangle)
        };

        let mut tensor =
            Array4::<f32>::zeros((1, 3, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] =
                    (pixel[channel] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            }
        }
        tensor
    }
}

/// Scale a vector to unit length; zero vectors pass through unchanged.
fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = RgbImage::from_pixel(200, 160, image::Rgb([128, 128, 128]));
        let tensor = FaceEmbedder::preprocess(&crop);
        assert_eq!(
            tensor.shape(),
            &[1, 3, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE]
        );
    }

    #[test]
    fn test_preprocess_normalization_midpoint() {
        // Pixel 128 → (128 - 127.5) / 127.5 ≈ 0.0039
        let crop = RgbImage::from_pixel(112, 112, image::Rgb([128, 128, 128]));
        let tensor = FaceEmbedder::preprocess(&crop);
        let expected = (128.0 - EMBEDDER_MEAN) / EMBEDDER_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
