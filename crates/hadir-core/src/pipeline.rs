//! ONNX extraction backend: detector + embedder glued into one pipeline.

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceBox, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::embedding::Embedding;
use crate::extract::{BackendError, ExtractAttempt, ExtractBackend};

/// Margin added around a detected box before cropping, as a fraction of
/// the larger box side. Recognition models expect some forehead/chin
/// context beyond the tight detection box.
const FACE_CROP_MARGIN: f32 = 0.2;

/// Model file names expected inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "ultraface_rfb_320.onnx";
pub const EMBEDDER_MODEL_FILE: &str = "mobilefacenet.onnx";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// Detector + embedder pair owning the ONNX sessions.
///
/// Sessions take `&mut self` to run, so one pipeline serves one thread;
/// the daemon keeps it on a dedicated engine thread.
pub struct FacePipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl FacePipeline {
    /// Load both models, failing fast if either file is missing.
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            embedder: FaceEmbedder::load(embedder_path)?,
        })
    }

    /// Load both models from a directory using the canonical file names.
    pub fn load_from_dir(model_dir: &Path) -> Result<Self, PipelineError> {
        Self::load(
            &model_dir.join(DETECTOR_MODEL_FILE).to_string_lossy(),
            &model_dir.join(EMBEDDER_MODEL_FILE).to_string_lossy(),
        )
    }
}

impl ExtractBackend for FacePipeline {
    fn represent(
        &mut self,
        image: &RgbImage,
        attempt: &ExtractAttempt,
    ) -> Result<Embedding, BackendError> {
        let equalized;
        let working = if attempt.equalize {
            equalized = equalize_luma(image);
            &equalized
        } else {
            image
        };

        let faces = self
            .detector
            .detect(working, attempt.min_confidence)
            .map_err(|e| BackendError::Inference(e.to_string()))?;

        let crop = match faces.first() {
            Some(face) => crop_face(working, face),
            None if attempt.require_face => {
                return Err(BackendError::NoFace {
                    min_confidence: attempt.min_confidence,
                });
            }
            // Permissive mode: no confirmed detection, embed the center
            // square and let the matcher threshold sort it out.
            None => center_square_crop(working),
        };

        self.embedder
            .embed(&crop)
            .map_err(|e| BackendError::Inference(e.to_string()))
    }
}

/// Crop a detected face with margin, clamped to the image bounds.
fn crop_face(image: &RgbImage, face: &FaceBox) -> RgbImage {
    let margin = FACE_CROP_MARGIN * face.width().max(face.height());

    let x1 = (face.x1 - margin).max(0.0) as u32;
    let y1 = (face.y1 - margin).max(0.0) as u32;
    let x2 = ((face.x2 + margin) as u32).min(image.width());
    let y2 = ((face.y2 + margin) as u32).min(image.height());

    let width = (x2 - x1).max(1);
    let height = (y2 - y1).max(1);
    image::imageops::crop_imm(image, x1, y1, width, height).to_image()
}

/// Largest centered square of the image.
fn center_square_crop(image: &RgbImage) -> RgbImage {
    let side = image.width().min(image.height()).max(1);
    let x = (image.width() - side) / 2;
    let y = (image.height() - side) / 2;
    image::imageops::crop_imm(image, x, y, side, side).to_image()
}

/// Global histogram equalization on luma, replicated back to RGB.
///
/// Mirrors the enrollment-side preprocessing: equalize the grayscale
/// image and feed the detector a three-channel copy of it.
fn equalize_luma(image: &RgbImage) -> RgbImage {
    let gray = image::imageops::grayscale(image);
    let total = (gray.width() * gray.height()) as f32;
    if total == 0.0 {
        return image.clone();
    }

    let mut hist = [0u32; 256];
    for pixel in gray.pixels() {
        hist[pixel[0] as usize] += 1;
    }

    let mut mapping = [0u8; 256];
    let mut cumulative = 0u32;
    for (level, count) in hist.iter().enumerate() {
        cumulative += count;
        mapping[level] = ((cumulative as f32 / total) * 255.0).round() as u8;
    }

    let mut out = RgbImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        let v = mapping[pixel[0] as usize];
        out.put_pixel(x, y, image::Rgb([v, v, v]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_face_clamps_to_image_bounds() {
        let img = RgbImage::from_pixel(100, 100, image::Rgb([10, 10, 10]));
        let face = FaceBox {
            x1: -5.0,
            y1: 90.0,
            x2: 50.0,
            y2: 120.0,
            confidence: 0.9,
        };
        let crop = crop_face(&img, &face);
        assert!(crop.width() <= 100);
        assert!(crop.height() <= 100);
        assert!(crop.width() > 0 && crop.height() > 0);
    }

    #[test]
    fn test_center_square_crop_is_square() {
        let img = RgbImage::from_pixel(640, 480, image::Rgb([10, 10, 10]));
        let crop = center_square_crop(&img);
        assert_eq!(crop.width(), 480);
        assert_eq!(crop.height(), 480);
    }

    #[test]
    fn test_equalize_luma_spreads_contrast() {
        // Low-contrast gradient packed into 100..=110.
        let mut img = RgbImage::new(64, 64);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            let v = 100 + (x % 11) as u8;
            *pixel = image::Rgb([v, v, v]);
        }

        let out = equalize_luma(&img);
        let spread = |img: &RgbImage| {
            let values: Vec<f32> = img.pixels().map(|p| p[0] as f32).collect();
            let mean = values.iter().sum::<f32>() / values.len() as f32;
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32).sqrt()
        };
        assert!(spread(&out) > spread(&img));
    }

    #[test]
    fn test_equalize_luma_output_is_grayscale_rgb() {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([200, 50, 100]));
        let out = equalize_luma(&img);
        for pixel in out.pixels() {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }
}
