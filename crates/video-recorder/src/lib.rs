//! Segmented Video Recorder
//!
//! One recorder per camera. Encodes a live video input into a sequence
//! of fixed-duration MP4 files: `<stem>.mp4`, `<stem>_part1.mp4`, ...
//! Rollover happens on a wall-clock timer; the brief gap between
//! finalizing one segment and starting the next drops the frames that
//! arrive in between.

mod pipeline;
mod recorder;

pub use pipeline::{EncoderFactory, EncoderPipeline, EncoderSpec, SurfaceHandle};
pub use recorder::{
    RecorderEvent, SegmentedRecorder, DEFAULT_BITRATE_BPS, DEFAULT_FRAME_RATE,
    DEFAULT_SEGMENT_DURATION,
};

use thiserror::Error;

/// Recorder error types
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Encoder pipeline not prepared")]
    NotPrepared,

    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Output file error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RecorderError {
    fn from(err: std::io::Error) -> Self {
        RecorderError::Io(err.to_string())
    }
}
