//! Capture Session
//!
//! One capture session per camera slot. The session owns the sensor
//! handle while open, composes the active sink set (preview, recording
//! encoder, still reader) into a live sensor session and routes frames.
//! Reconfiguring the sink set tears the session down and rebuilds it;
//! changes issued close together coalesce into one rebuild.

mod device;
mod session;
mod sink;
mod transform;

pub use device::{CameraProvider, CapturedFrame, PixelFormat, SensorDevice, SessionHandle};
pub use session::{CaptureSession, SessionEvent, SessionState};
pub use sink::{OutputSink, PreviewSurface, SinkKind, SinkSet, StillSink};
pub use transform::{CropRect, DisplayTransform, Orientation, OutputConfig};

use thiserror::Error;

/// Capture error types
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Sensor exists but the host denied access
    #[error("Sensor access denied: {0}")]
    SensorDenied(String),

    /// Sensor-level failure while opening or streaming
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Building the session over the sink set failed
    #[error("Session configuration failed: {0}")]
    Configure(String),

    /// A session must have at least one sink
    #[error("Sink set is empty")]
    EmptySinkSet,

    /// Still capture requires a STILL sink
    #[error("No still sink configured")]
    NoStillSink,

    /// Operation requires a running session
    #[error("Session is not running")]
    NotRunning,

    /// The session is in its failed state; close to reset
    #[error("Session failed: {0}")]
    Failed(String),

    /// Sensor id not known to the host
    #[error("Unknown sensor id: {0}")]
    UnknownSensor(String),
}
