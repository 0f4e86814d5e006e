pub mod artifact;
pub mod capture;
pub mod simulated;
pub mod stream_recorder;

pub use artifact::{artifact_file_name, Artifact, ArtifactSink, DirectorySink};
pub use capture::{CaptureRecorder, ChunkFeed, RecorderError};
pub use stream_recorder::{Recorder, RecorderEvent, RecorderOptions, RecorderPhase};
