//! Headless encoder that emits a labelled chunk per timeslice.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::capture::{CaptureRecorder, ChunkFeed, RecorderError};
use crate::media::MediaStream;

pub struct SimulatedEncoder {
    timeslice: Duration,
    supported: bool,
}

impl SimulatedEncoder {
    pub fn new(timeslice: Duration) -> Self {
        Self {
            timeslice,
            supported: true,
        }
    }

    /// An encoder that fails construction, like a host without recording support.
    pub fn unsupported() -> Self {
        Self {
            timeslice: Duration::from_secs(1),
            supported: false,
        }
    }
}

impl CaptureRecorder for SimulatedEncoder {
    fn record(&self, stream: &MediaStream, mime_type: &str) -> Result<ChunkFeed, RecorderError> {
        if !self.supported {
            return Err(RecorderError::Unsupported(format!(
                "no encoder for {mime_type}"
            )));
        }

        let (tx, chunks) = mpsc::unbounded_channel();
        let (stop, mut stop_rx) = oneshot::channel::<()>();
        let label = stream.id().to_string();
        let timeslice = self.timeslice;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeslice);
            let mut seq: u64 = 0;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if tx.send(format!("{label}:{seq};").into_bytes()).is_err() {
                            return;
                        }
                        seq += 1;
                    }
                }
            }
            // Final flush, then the sender drops and closes the feed.
            let _ = tx.send(format!("{label}:end;").into_bytes());
            debug!("Simulated encoder for {} flushed {} chunk(s)", label, seq + 1);
        });

        Ok(ChunkFeed { chunks, stop })
    }
}
