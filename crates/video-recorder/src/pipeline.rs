//! Encoder pipeline abstraction.
//!
//! Models the host video-encoder capability: a MediaRecorder-like object
//! that is prepared against one output file, exposes a writable input
//! surface, and is started/stopped around that single file.

use std::path::PathBuf;

use crate::RecorderError;

/// Encoder parameters for one segment file
#[derive(Debug, Clone)]
pub struct EncoderSpec {
    /// Output file the pipeline is bound to
    pub path: PathBuf,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Target bitrate, bits per second
    pub bitrate_bps: u32,
    /// Frame-rate hint
    pub frame_rate: u32,
}

/// Handle to an encoder's writable input surface.
///
/// The capture session wires this into its sink set and otherwise treats
/// it as opaque routing metadata; the recorder stays the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// One live encoder pipeline bound to a single output file.
/// Dropping the pipeline releases its resources.
pub trait EncoderPipeline: Send {
    /// Writable input surface, valid until the pipeline is dropped
    fn surface(&self) -> SurfaceHandle;

    /// Begin encoding into the bound output file
    fn start(&mut self) -> Result<(), RecorderError>;

    /// Flush pending frames and finalize the output file
    fn stop(&mut self) -> Result<(), RecorderError>;
}

/// Builds encoder pipelines. Maps to the host encoder's prepare step:
/// `create` binds a pipeline to the output file but does not begin
/// encoding.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, spec: &EncoderSpec) -> Result<Box<dyn EncoderPipeline>, RecorderError>;
}
