//! Host camera capability traits.
//!
//! The core never talks to sensor hardware directly; any host that can
//! enumerate sensors, open them and bind a set of output surfaces into a
//! repeating capture session can drive it.

use async_trait::async_trait;

use crate::sink::OutputSink;
use crate::CaptureError;

/// Pixel format of a captured still frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Already-encoded JPEG bytes
    Jpeg,
    /// Raw RGBA, 8 bits per channel, row-major
    Rgba8,
}

/// One captured still frame
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Enumerates and opens camera sensors
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Sensor ids available on this host
    async fn sensor_ids(&self) -> Result<Vec<String>, CaptureError>;

    /// Open a sensor for exclusive use. The handle closes on drop.
    async fn open(&self, sensor_id: &str) -> Result<Box<dyn SensorDevice>, CaptureError>;
}

/// An open sensor, exclusively owned by its capture session
#[async_trait]
pub trait SensorDevice: Send {
    /// Build a capture session binding the given sinks to this sensor
    async fn create_session(
        &mut self,
        sinks: &[OutputSink],
    ) -> Result<Box<dyn SessionHandle>, CaptureError>;
}

/// A configured capture session on an open sensor
#[async_trait]
pub trait SessionHandle: Send {
    /// Issue a repeating capture request so frames flow to every sink
    async fn start_repeating(&mut self) -> Result<(), CaptureError>;

    /// Fire a one-shot still capture against the STILL sink
    async fn capture_still(&mut self) -> Result<CapturedFrame, CaptureError>;

    /// Stop the repeating request and tear the session down
    async fn stop(&mut self) -> Result<(), CaptureError>;
}
