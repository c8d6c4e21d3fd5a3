//! Camera Orchestrator
//!
//! Owns the collection of camera slots, enforces the global open quota,
//! serializes open/close, and fans multi-camera operations (record,
//! still capture, sink wiring) out to the per-slot sessions and
//! recorders. External collaborators talk to this façade only.

mod orchestrator;
mod slot;

pub use orchestrator::{CameraOrchestrator, OrchestratorSettings, SlotStatus};
pub use slot::{SlotConfig, SlotPosition};

use thiserror::Error;

/// Orchestrator error types
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Slot {0} is not configured")]
    UnknownSlot(SlotPosition),

    #[error("Slot {0} is open; close it before reconfiguring")]
    SlotOpen(SlotPosition),

    #[error("No slots configured")]
    NotConfigured,

    #[error(transparent)]
    Capture(#[from] capture_session::CaptureError),

    #[error(transparent)]
    Recorder(#[from] video_recorder::RecorderError),

    #[error(transparent)]
    Store(#[from] media_store::StoreError),
}
