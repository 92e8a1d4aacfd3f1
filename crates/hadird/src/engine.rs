//! Extraction engine on a dedicated OS thread.
//!
//! ONNX sessions need `&mut` access and are CPU-bound, so one thread
//! owns the fallback extractor and serves requests over a channel.
//! Fallback attempts stay sequential within one request; later attempts
//! only matter after earlier failure.

use hadir_core::extract::ExtractError;
use hadir_core::pipeline::{FacePipeline, PipelineError};
use hadir_core::{Embedding, FallbackExtractor};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("engine thread exited")]
    ChannelClosed,
}

enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Embedding, ExtractError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run the fallback extraction chain over one captured image.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        result.map_err(EngineError::from)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously and fails fast if either is
/// missing, then enters the request loop.
pub fn spawn_engine(
    detector_path: &str,
    embedder_path: &str,
) -> Result<EngineHandle, PipelineError> {
    let pipeline = FacePipeline::load(detector_path, embedder_path)?;
    let mut extractor = FallbackExtractor::new(pipeline);

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("hadir-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        let result = extractor.extract(&image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}
