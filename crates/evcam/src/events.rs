//! Unified event stream.

use capture_session::SessionEvent;
use vhal_signal::SignalEvent;
use video_recorder::RecorderEvent;

/// Everything the engine reports, in dispatch order. Events from one
/// source keep their relative order; interleaving across sources is
/// unspecified.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Capture-session lifecycle and errors
    Camera(SessionEvent),
    /// Recorder start/stop/error
    Recorder(RecorderEvent),
    /// Vehicle-bus events (turn, doors, custom key, connectivity)
    Signal(SignalEvent),
    /// Custom key accepted by the speed gate
    Wake { speed: f32 },
}
