//! V4L2 frame capture for the kiosk loop.
//!
//! Grabs YUYV (or native GREY) frames, skips dark ones, and hands back
//! JPEG bytes ready for upload.

use std::io::Cursor;
use std::path::Path;

use image::ImageEncoder;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

// --- Named constants ---
const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
/// Mean luma below this counts as a dark frame (lens covered, lights off).
const DARK_MEAN_THRESHOLD: f32 = 16.0;
const JPEG_QUALITY: u8 = 85;
/// Raw captures tried per call before giving up on a usable frame.
const FRAME_ATTEMPTS: usize = 4;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("every captured frame was dark")]
    AllFramesDark,
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// 8-bit grayscale, 1 byte/pixel.
    Grey,
}

/// V4L2 camera producing upload-ready JPEG frames.
pub struct FrameCamera {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl FrameCamera {
    /// Open a camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path)
            .map_err(|e| CaptureError::DeviceNotFound(format!("{device_path}: {e}")))?;

        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            device = device_path,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    /// Capture one usable frame and encode it as JPEG.
    ///
    /// Tries a handful of raw captures, keeping the first non-dark one.
    pub fn capture_jpeg(&self) -> Result<Vec<u8>, CaptureError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        for _ in 0..FRAME_ATTEMPTS {
            let (buf, _meta) = stream
                .next()
                .map_err(|e| CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            let gray = self.buf_to_luma(buf)?;
            if mean_brightness(&gray) < DARK_MEAN_THRESHOLD {
                tracing::debug!("skipping dark frame");
                continue;
            }

            return encode_jpeg(&gray, self.width, self.height);
        }

        Err(CaptureError::AllFramesDark)
    }

    fn buf_to_luma(&self, buf: &[u8]) -> Result<Vec<u8>, CaptureError> {
        let pixels = (self.width * self.height) as usize;
        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CaptureError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => yuyv_luma(buf, pixels).ok_or_else(|| {
                CaptureError::CaptureFailed(format!(
                    "YUYV buffer too short: expected {}, got {}",
                    pixels * 2,
                    buf.len()
                ))
            }),
        }
    }
}

/// Extract the Y channel from packed YUYV ([Y0, U, Y1, V] per pixel pair).
fn yuyv_luma(buf: &[u8], pixels: usize) -> Option<Vec<u8>> {
    let expected = pixels * 2;
    if buf.len() < expected {
        return None;
    }
    Some(buf[..expected].iter().step_by(2).copied().collect())
}

fn mean_brightness(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 0.0;
    }
    gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
}

fn encode_jpeg(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
    let mut out = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .write_image(gray, width, height, image::ExtendedColorType::L8)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}
