//! Recorder state machine: idle → recording → idle.
//!
//! Stopping and artifact availability are separate events. `stop` returns as
//! soon as the encoder was asked to flush; the artifact is assembled and saved
//! in a background task that later emits `RecorderEvent::ArtifactReady`.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::artifact::{artifact_file_name, Artifact, ArtifactSink};
use super::capture::{CaptureRecorder, RecorderError};
use crate::media::{MediaStream, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Started { stream: StreamId },
    Stopped { file_name: String },
    ArtifactReady(Artifact),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub mime_type: String,
    pub file_extension: String,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            mime_type: "video/webm".to_string(),
            file_extension: "webm".to_string(),
        }
    }
}

struct ActiveRecording {
    stream: StreamId,
    stop: oneshot::Sender<()>,
    collector: JoinHandle<Vec<Vec<u8>>>,
}

pub struct Recorder {
    backend: Arc<dyn CaptureRecorder>,
    sink: Arc<dyn ArtifactSink>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    options: RecorderOptions,
    active: Option<ActiveRecording>,
    finalizing: Vec<JoinHandle<()>>,
}

impl Recorder {
    pub fn new(
        backend: Arc<dyn CaptureRecorder>,
        sink: Arc<dyn ArtifactSink>,
        events: mpsc::UnboundedSender<RecorderEvent>,
        options: RecorderOptions,
    ) -> Self {
        Self {
            backend,
            sink,
            events,
            options,
            active: None,
            finalizing: Vec::new(),
        }
    }

    pub fn phase(&self) -> RecorderPhase {
        if self.active.is_some() {
            RecorderPhase::Recording
        } else {
            RecorderPhase::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Start capturing `stream`. The stream is fixed for the whole session;
    /// later source swaps are not followed.
    pub fn start(&mut self, stream: Option<&MediaStream>) -> Result<(), RecorderError> {
        if let Some(active) = &self.active {
            debug!("Recorder already capturing {}", active.stream);
            return Ok(());
        }

        let stream = stream.ok_or(RecorderError::NoStreamAvailable)?;
        let feed = self.backend.record(stream, &self.options.mime_type)?;

        // Each session collects into a fresh buffer; nothing carries over.
        let mut chunks_rx = feed.chunks;
        let collector = tokio::spawn(async move {
            let mut chunks = Vec::new();
            while let Some(chunk) = chunks_rx.recv().await {
                if !chunk.is_empty() {
                    chunks.push(chunk);
                }
            }
            chunks
        });

        self.active = Some(ActiveRecording {
            stream: stream.id(),
            stop: feed.stop,
            collector,
        });

        info!("Recording started from {}", stream.id());
        let _ = self.events.send(RecorderEvent::Started {
            stream: stream.id(),
        });
        Ok(())
    }

    /// Stop capturing. Returns the artifact file name, or `None` if idle.
    pub fn stop(&mut self) -> Option<String> {
        let active = self.active.take()?;

        if active.stop.send(()).is_err() {
            warn!("Encoder for {} already finished", active.stream);
        }

        let file_name = artifact_file_name(Utc::now(), &self.options.file_extension);
        info!("Recording stopped, finalizing {}", file_name);
        let _ = self.events.send(RecorderEvent::Stopped {
            file_name: file_name.clone(),
        });

        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();
        let mime_type = self.options.mime_type.clone();
        let name = file_name.clone();
        let collector = active.collector;

        self.finalizing.retain(|h| !h.is_finished());
        self.finalizing.push(tokio::spawn(async move {
            let event = match Self::finalize(collector, sink, &name, &mime_type).await {
                Ok(artifact) => RecorderEvent::ArtifactReady(artifact),
                Err(e) => {
                    error!("Failed to finalize recording {}: {}", name, e);
                    RecorderEvent::Failed(e.to_string())
                }
            };
            let _ = events.send(event);
        }));

        Some(file_name)
    }

    async fn finalize(
        collector: JoinHandle<Vec<Vec<u8>>>,
        sink: Arc<dyn ArtifactSink>,
        file_name: &str,
        mime_type: &str,
    ) -> anyhow::Result<Artifact> {
        let chunks = collector.await?;
        let data = chunks.concat();
        debug!("Assembling {} from {} chunk(s)", file_name, chunks.len());
        Ok(sink.save(file_name, mime_type, data).await?)
    }

    /// Wait for every pending artifact to be written.
    pub async fn flush(&mut self) {
        for handle in self.finalizing.drain(..) {
            if let Err(e) = handle.await {
                warn!("Recording finalization task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, TrackKind};
    use crate::media::simulated::SimulatedTrack;
    use crate::recorder::artifact::DirectorySink;
    use crate::recorder::simulated::SimulatedEncoder;
    use std::time::Duration;
    use tempfile::TempDir;

    fn stream() -> MediaStream {
        MediaStream::new(vec![
            Arc::new(SimulatedTrack::new("v", TrackKind::Video)) as Arc<dyn MediaTrack>
        ])
    }

    fn recorder(
        backend: SimulatedEncoder,
    ) -> (Recorder, mpsc::UnboundedReceiver<RecorderEvent>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::new(
            Arc::new(backend),
            Arc::new(DirectorySink::new(dir.path())),
            tx,
            RecorderOptions::default(),
        );
        (recorder, rx, dir)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RecorderEvent>) -> Vec<RecorderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_without_stream_fails() {
        let (mut recorder, mut rx, _dir) = recorder(SimulatedEncoder::new(Duration::from_millis(10)));
        let err = recorder.start(None).unwrap_err();
        assert!(matches!(err, RecorderError::NoStreamAvailable));
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_backend_stays_idle() {
        let (mut recorder, _rx, _dir) = recorder(SimulatedEncoder::unsupported());
        let err = recorder.start(Some(&stream())).unwrap_err();
        assert!(matches!(err, RecorderError::Unsupported(_)));
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_silent() {
        let (mut recorder, mut rx, _dir) = recorder(SimulatedEncoder::new(Duration::from_millis(10)));
        assert_eq!(recorder.stop(), None);
        recorder.flush().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_yields_exactly_one_artifact() {
        let (mut recorder, mut rx, _dir) = recorder(SimulatedEncoder::new(Duration::from_millis(5)));
        let source = stream();
        recorder.start(Some(&source)).unwrap();
        assert_eq!(recorder.phase(), RecorderPhase::Recording);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let file_name = recorder.stop().unwrap();
        assert!(file_name.starts_with("recording-"));
        assert!(file_name.ends_with(".webm"));
        assert_eq!(recorder.phase(), RecorderPhase::Idle);

        recorder.flush().await;
        let events = drain(&mut rx);
        assert_eq!(events[0], RecorderEvent::Started { stream: source.id() });
        assert_eq!(
            events[1],
            RecorderEvent::Stopped {
                file_name: file_name.clone()
            }
        );

        let artifacts: Vec<&Artifact> = events
            .iter()
            .filter_map(|e| match e {
                RecorderEvent::ArtifactReady(a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, file_name);
        assert!(artifacts[0].size_bytes > 0);

        let content = std::fs::read_to_string(&artifacts[0].location).unwrap();
        assert!(content.ends_with(&format!("{}:end;", source.id())));
    }

    #[tokio::test]
    async fn test_second_session_does_not_include_previous_chunks() {
        let (mut recorder, mut rx, _dir) = recorder(SimulatedEncoder::new(Duration::from_millis(5)));
        let first = stream();
        let second = stream();

        recorder.start(Some(&first)).unwrap();
        recorder.stop();
        recorder.flush().await;
        recorder.start(Some(&second)).unwrap();
        recorder.stop();
        recorder.flush().await;

        let artifacts: Vec<Artifact> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                RecorderEvent::ArtifactReady(a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(artifacts.len(), 2);
        assert_ne!(artifacts[0].location, artifacts[1].location);
        let content = std::fs::read_to_string(&artifacts[1].location).unwrap();
        assert!(!content.contains(&format!("{}:", first.id())));
    }
}
