pub mod device;
pub mod simulated;
pub mod source_manager;

pub use device::{
    DeviceError, DisplayCapture, LogPreviewSink, MediaConstraints, MediaDevices, MediaStream,
    MediaTrack, PreviewSink, StreamId, TrackKind,
};
pub use source_manager::{
    LocalMediaSnapshot, MediaEvent, MediaOptions, MediaSourceManager, PreviewSource,
};
