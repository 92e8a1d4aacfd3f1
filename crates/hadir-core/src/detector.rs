//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the slim RFB-320 UltraFace export: one scores tensor (1, N, 2) and
//! one boxes tensor (1, N, 4) with corner-form coordinates normalized to
//! [0, 1]. Post-processing is a confidence filter plus IoU-based NMS.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_NMS_IOU: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the UltraFace RFB-320 export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in source-image pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded UltraFace model"
        );

        Ok(Self { session })
    }

    /// Detect faces at or above `min_confidence`, sorted by confidence
    /// descending. Coordinates are in source-image pixels.
    pub fn detect(
        &mut self,
        image: &RgbImage,
        min_confidence: f32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let input = Self::preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Output order in the RFB-320 export: scores first, boxes second.
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let anchors = scores.len() / 2;
        if boxes.len() != anchors * 4 {
            return Err(DetectorError::InferenceFailed(format!(
                "anchor count mismatch: {} scores vs {} box coords",
                scores.len(),
                boxes.len()
            )));
        }

        let width = image.width() as f32;
        let height = image.height() as f32;

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let confidence = scores[i * 2 + 1];
            if confidence < min_confidence {
                continue;
            }
            candidates.push(FaceBox {
                x1: boxes[i * 4].clamp(0.0, 1.0) * width,
                y1: boxes[i * 4 + 1].clamp(0.0, 1.0) * height,
                x2: boxes[i * 4 + 2].clamp(0.0, 1.0) * width,
                y2: boxes[i * 4 + 3].clamp(0.0, 1.0) * height,
                confidence,
            });
        }

        let mut result = nms(candidates, ULTRAFACE_NMS_IOU);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(result)
    }

    /// Resize to 320x240 and normalize into a NCHW float tensor.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(
            image,
            ULTRAFACE_INPUT_WIDTH as u32,
            ULTRAFACE_INPUT_HEIGHT as u32,
            image::imageops::FilterType::Triangle,
        );

        let mut tensor =
            Array4::<f32>::zeros((1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] =
                    (pixel[channel] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            }
        }
        tensor
    }
}

/// Greedy non-maximum suppression: keep the highest-confidence box, drop
/// everything overlapping it beyond the IoU threshold, repeat.
fn nms(mut candidates: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<FaceBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
