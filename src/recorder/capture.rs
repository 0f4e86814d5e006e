//! Chunked stream encoder abstraction.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::media::MediaStream;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("No media stream available to record")]
    NoStreamAvailable,
    #[error("Recording not supported: {0}")]
    Unsupported(String),
    #[error("Failed to save recording: {0}")]
    Sink(#[from] std::io::Error),
}

/// Live output of an encoder.
///
/// Chunks arrive on `chunks` while recording. Sending on `stop` asks the
/// encoder to flush; the channel closes once the last chunk was delivered.
pub struct ChunkFeed {
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    pub stop: oneshot::Sender<()>,
}

/// Host capability that encodes a stream into a time-sequenced container.
pub trait CaptureRecorder: Send + Sync {
    fn record(&self, stream: &MediaStream, mime_type: &str) -> Result<ChunkFeed, RecorderError>;
}
