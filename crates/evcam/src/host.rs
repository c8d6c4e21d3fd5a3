//! Simulated host capabilities.
//!
//! Stand-ins for the real camera HAL and hardware encoder so the engine
//! can run end-to-end on a development machine: sensors always open,
//! stills come back as flat gray frames, and "encoded" segments are
//! written as placeholder MP4 files. Real deployments implement the
//! same traits against their platform.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use capture_session::{
    CameraProvider, CaptureError, CapturedFrame, OutputSink, PixelFormat, SensorDevice,
    SessionHandle,
};
use tracing::debug;
use video_recorder::{EncoderFactory, EncoderPipeline, EncoderSpec, RecorderError, SurfaceHandle};

/// Minimal `ftyp` box so segment files read as MP4 placeholders
const MP4_STUB: [u8; 24] = [
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02,
    0x00, b'i', b's', b'o', b'm', b'm', b'p', b'4', b'1',
];

/// Camera provider whose sensors always open
#[derive(Default)]
pub struct SimCameraProvider;

impl SimCameraProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CameraProvider for SimCameraProvider {
    async fn sensor_ids(&self) -> Result<Vec<String>, CaptureError> {
        Ok((0..4).map(|i| i.to_string()).collect())
    }

    async fn open(&self, sensor_id: &str) -> Result<Box<dyn SensorDevice>, CaptureError> {
        debug!(sensor_id, "sim sensor opened");
        Ok(Box::new(SimDevice))
    }
}

struct SimDevice;

#[async_trait]
impl SensorDevice for SimDevice {
    async fn create_session(
        &mut self,
        sinks: &[OutputSink],
    ) -> Result<Box<dyn SessionHandle>, CaptureError> {
        if sinks.is_empty() {
            return Err(CaptureError::EmptySinkSet);
        }
        Ok(Box::new(SimSession))
    }
}

struct SimSession;

#[async_trait]
impl SessionHandle for SimSession {
    async fn start_repeating(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn capture_still(&mut self) -> Result<CapturedFrame, CaptureError> {
        // Flat mid-gray test card.
        let (width, height) = (160, 90);
        Ok(CapturedFrame {
            width,
            height,
            format: PixelFormat::Rgba8,
            data: vec![0x80; (width * height * 4) as usize],
        })
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Encoder factory that writes placeholder MP4 files
#[derive(Default)]
pub struct SimEncoderFactory {
    next_surface: AtomicU64,
}

impl SimEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EncoderFactory for SimEncoderFactory {
    fn create(&self, spec: &EncoderSpec) -> Result<Box<dyn EncoderPipeline>, RecorderError> {
        // Zero bytes until `start`, so scanners treat it as in-flight.
        File::create(&spec.path)?;
        Ok(Box::new(SimPipeline {
            path: spec.path.clone(),
            surface: SurfaceHandle(self.next_surface.fetch_add(1, Ordering::Relaxed)),
        }))
    }
}

struct SimPipeline {
    path: PathBuf,
    surface: SurfaceHandle,
}

impl EncoderPipeline for SimPipeline {
    fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    fn start(&mut self) -> Result<(), RecorderError> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.write_all(&MP4_STUB)?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RecorderError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.flush()?;
        Ok(())
    }
}
