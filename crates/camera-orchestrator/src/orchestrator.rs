//! Multi-camera orchestration façade.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use capture_session::{
    CameraProvider, CaptureSession, DisplayTransform, Orientation, OutputSink, SessionEvent,
    SessionState, SinkKind,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use video_recorder::{EncoderFactory, RecorderError, RecorderEvent, SegmentedRecorder};

use crate::slot::{SlotConfig, SlotPosition};
use crate::OrchestratorError;

/// Tunables shared by every slot
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Global cap on simultaneously open sensors
    pub max_open: usize,
    pub segment_duration: Duration,
    pub video_bitrate_bps: u32,
    pub video_fps: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_open: 4,
            segment_duration: Duration::from_secs(60),
            video_bitrate_bps: 1_000_000,
            video_fps: 30,
        }
    }
}

/// Snapshot of one slot for status displays
#[derive(Debug, Clone)]
pub struct SlotStatus {
    pub position: SlotPosition,
    pub sensor_id: String,
    pub state: SessionState,
    pub recording: bool,
    pub error: Option<String>,
}

struct CameraSlot {
    config: SlotConfig,
    session: CaptureSession,
    recorder: SegmentedRecorder,
    /// Error recorded when a synchronous open attempt was refused
    error: Option<String>,
}

struct Inner {
    slots: BTreeMap<SlotPosition, CameraSlot>,
    max_open: usize,
    /// Slots closed by quota enforcement; reopened when the quota rises
    quota_closed: BTreeSet<SlotPosition>,
}

/// Owns the camera slots and serializes every multi-camera operation.
///
/// `open_all` and `set_max_open` share one critical section, so the
/// number of slots holding sensor resources never exceeds the quota.
pub struct CameraOrchestrator {
    provider: Arc<dyn CameraProvider>,
    encoders: Arc<dyn EncoderFactory>,
    session_events: mpsc::UnboundedSender<SessionEvent>,
    recorder_events: mpsc::UnboundedSender<RecorderEvent>,
    settings: OrchestratorSettings,
    inner: Mutex<Inner>,
}

impl CameraOrchestrator {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        encoders: Arc<dyn EncoderFactory>,
        settings: OrchestratorSettings,
        session_events: mpsc::UnboundedSender<SessionEvent>,
        recorder_events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Self {
        let max_open = settings.max_open;
        Self {
            provider,
            encoders,
            session_events,
            recorder_events,
            settings,
            inner: Mutex::new(Inner {
                slots: BTreeMap::new(),
                max_open,
                quota_closed: BTreeSet::new(),
            }),
        }
    }

    /// Configure the slot collection. Idempotent for identical configs;
    /// changing an open slot's configuration is refused.
    pub async fn configure(&self, configs: Vec<SlotConfig>) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        for config in configs {
            if let Some(existing) = inner.slots.get(&config.position) {
                if existing.config == config {
                    continue;
                }
                if existing.session.state().holds_resources() {
                    return Err(OrchestratorError::SlotOpen(config.position));
                }
            }
            info!(slot = %config.position, sensor = %config.sensor_id, "slot configured");
            let session = CaptureSession::new(
                config.position.as_str(),
                config.sensor_id.clone(),
                config.output.clone(),
                self.provider.clone(),
                self.session_events.clone(),
            );
            let recorder = SegmentedRecorder::new(
                config.position.as_str(),
                self.encoders.clone(),
                self.recorder_events.clone(),
            )
            .with_segment_duration(self.settings.segment_duration)
            .with_encoding(self.settings.video_bitrate_bps, self.settings.video_fps);
            let position = config.position;
            inner.slots.insert(
                position,
                CameraSlot {
                    config,
                    session,
                    recorder,
                    error: None,
                },
            );
        }
        Ok(())
    }

    /// Change the open quota. When the new quota is exceeded, excess
    /// slots close in reverse position order (right, left, back, front);
    /// when it rises, slots previously closed by the quota reopen in
    /// position order.
    pub async fn set_max_open(&self, max_open: usize) {
        let mut inner = self.inner.lock().await;
        inner.max_open = max_open;
        let open: Vec<SlotPosition> = SlotPosition::ALL
            .iter()
            .copied()
            .filter(|p| {
                inner
                    .slots
                    .get(p)
                    .is_some_and(|s| s.session.state().holds_resources())
            })
            .collect();

        if open.len() > max_open {
            let excess = open.len() - max_open;
            let to_close: Vec<SlotPosition> = open.iter().rev().take(excess).copied().collect();
            for position in to_close {
                info!(slot = %position, "closing to honor quota");
                if let Some(slot) = inner.slots.get(&position) {
                    slot.recorder.release();
                    slot.session.close().await;
                }
                inner.quota_closed.insert(position);
            }
        } else {
            let mut headroom = max_open - open.len();
            let candidates: Vec<SlotPosition> = inner.quota_closed.iter().copied().collect();
            for position in candidates {
                if headroom == 0 {
                    break;
                }
                let result = inner.slots.get(&position).map(|slot| slot.session.open());
                inner.quota_closed.remove(&position);
                match result {
                    Some(Ok(())) => {
                        info!(slot = %position, "reopening under raised quota");
                        headroom -= 1;
                    }
                    Some(Err(err)) => {
                        warn!(slot = %position, "reopen failed: {err}");
                        if let Some(slot) = inner.slots.get_mut(&position) {
                            slot.error = Some(err.to_string());
                        }
                    }
                    None => {}
                }
            }
        }
    }

    /// Open every configured slot up to the quota, in position order.
    /// A failing slot records its error and the rest continue.
    pub async fn open_all(&self) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        if inner.slots.is_empty() {
            return Err(OrchestratorError::NotConfigured);
        }
        let max_open = inner.max_open;
        let mut occupied = inner
            .slots
            .values()
            .filter(|s| s.session.state().holds_resources())
            .count();
        let positions: Vec<SlotPosition> = inner.slots.keys().copied().collect();
        for position in positions {
            if occupied >= max_open {
                debug!(max_open, "open quota reached");
                break;
            }
            let result = match inner.slots.get(&position) {
                Some(slot) if !slot.session.state().holds_resources() => {
                    Some(slot.session.open())
                }
                _ => None,
            };
            match result {
                Some(Ok(())) => {
                    occupied += 1;
                    inner.quota_closed.remove(&position);
                    if let Some(slot) = inner.slots.get_mut(&position) {
                        slot.error = None;
                    }
                }
                Some(Err(err)) => {
                    warn!(slot = %position, "open refused: {err}");
                    if let Some(slot) = inner.slots.get_mut(&position) {
                        slot.error = Some(err.to_string());
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Close every slot. Resource release completes before this returns.
    pub async fn close_all(&self) {
        let mut inner = self.inner.lock().await;
        inner.quota_closed.clear();
        for (position, slot) in inner.slots.iter() {
            slot.recorder.release();
            slot.session.close().await;
            debug!(slot = %position, "slot closed");
        }
        for slot in inner.slots.values_mut() {
            slot.error = None;
        }
    }

    /// Add or replace a sink on a slot; live sessions rebuild (coalesced)
    pub async fn set_sink(&self, position: SlotPosition, sink: OutputSink) -> Result<(), OrchestratorError> {
        let inner = self.inner.lock().await;
        let slot = inner
            .slots
            .get(&position)
            .ok_or(OrchestratorError::UnknownSlot(position))?;
        slot.session.set_sink(sink);
        Ok(())
    }

    /// Remove a sink from a slot
    pub async fn remove_sink(&self, position: SlotPosition, kind: SinkKind) -> Result<bool, OrchestratorError> {
        let inner = self.inner.lock().await;
        let slot = inner
            .slots
            .get(&position)
            .ok_or(OrchestratorError::UnknownSlot(position))?;
        Ok(slot.session.remove_sink(kind)?)
    }

    /// Start recording on every running slot. All slots share the
    /// timestamp, which doubles as the recording group id:
    /// `<base_dir>/<timestamp>_<slot>[_part<k>].mp4`.
    pub async fn start_record_all(
        &self,
        base_dir: &Path,
        timestamp: &str,
    ) -> Result<String, OrchestratorError> {
        let inner = self.inner.lock().await;
        if inner.slots.is_empty() {
            return Err(OrchestratorError::NotConfigured);
        }
        std::fs::create_dir_all(base_dir).map_err(RecorderError::from)?;
        for (position, slot) in inner.slots.iter() {
            if slot.session.state() != SessionState::Running {
                debug!(slot = %position, "not running, skipping record start");
                continue;
            }
            let output = slot.session.output();
            let stem = media_store::recording_stem(base_dir, timestamp, position.as_str());
            if slot
                .recorder
                .prepare(&stem, output.width, output.height)
                .is_err()
            {
                // The recorder has already emitted the error event.
                continue;
            }
            if let Some(surface) = slot.recorder.surface() {
                slot.session.set_sink(OutputSink::Record(surface));
            }
            if slot.recorder.start().is_err() {
                if let Err(err) = slot.session.remove_sink(SinkKind::Record) {
                    debug!(slot = %position, "record sink removal: {err}");
                }
            }
        }
        info!(group = timestamp, "recording started");
        Ok(timestamp.to_string())
    }

    /// Stop recording on every recording slot
    pub async fn stop_record_all(&self) {
        let inner = self.inner.lock().await;
        for (position, slot) in inner.slots.iter() {
            if !slot.recorder.is_recording() {
                continue;
            }
            slot.recorder.stop();
            if let Err(err) = slot.session.remove_sink(SinkKind::Record) {
                debug!(slot = %position, "record sink removal: {err}");
            }
        }
        info!("recording stopped");
    }

    /// Fire a one-shot still on every slot with a STILL sink; returns
    /// the saved paths. Per-slot failures are logged and skipped.
    pub async fn capture_still_all(
        &self,
        base_dir: &Path,
        timestamp: &str,
    ) -> Vec<(SlotPosition, PathBuf)> {
        let inner = self.inner.lock().await;
        let mut saved = Vec::new();
        for (position, slot) in inner.slots.iter() {
            if slot.session.sinks().still().is_none() {
                continue;
            }
            match slot.session.capture_still().await {
                Ok(frame) => {
                    match media_store::save_still(base_dir, timestamp, position.as_str(), &frame) {
                        Ok(path) => saved.push((*position, path)),
                        Err(err) => warn!(slot = %position, "failed to save still: {err}"),
                    }
                }
                Err(err) => warn!(slot = %position, "still capture failed: {err}"),
            }
        }
        saved
    }

    /// Rotate a slot's output a quarter turn clockwise
    pub async fn rotate(&self, position: SlotPosition) -> Result<Orientation, OrchestratorError> {
        let inner = self.inner.lock().await;
        let slot = inner
            .slots
            .get(&position)
            .ok_or(OrchestratorError::UnknownSlot(position))?;
        Ok(slot.session.rotate_cw())
    }

    /// Toggle a slot's horizontal mirror
    pub async fn set_mirror(&self, position: SlotPosition, mirror: bool) -> Result<(), OrchestratorError> {
        let inner = self.inner.lock().await;
        let slot = inner
            .slots
            .get(&position)
            .ok_or(OrchestratorError::UnknownSlot(position))?;
        slot.session.set_mirror(mirror);
        Ok(())
    }

    /// Preview transform the host should apply for a slot
    pub async fn display_transform(&self, position: SlotPosition) -> Result<DisplayTransform, OrchestratorError> {
        let inner = self.inner.lock().await;
        let slot = inner
            .slots
            .get(&position)
            .ok_or(OrchestratorError::UnknownSlot(position))?;
        Ok(slot.session.display_transform())
    }

    /// Snapshot of every configured slot
    pub async fn slot_states(&self) -> BTreeMap<SlotPosition, SlotStatus> {
        let inner = self.inner.lock().await;
        inner
            .slots
            .iter()
            .map(|(position, slot)| {
                (
                    *position,
                    SlotStatus {
                        position: *position,
                        sensor_id: slot.config.sensor_id.clone(),
                        state: slot.session.state(),
                        recording: slot.recorder.is_recording(),
                        error: slot.error.clone().or_else(|| slot.session.last_error()),
                    },
                )
            })
            .collect()
    }

    pub async fn max_open(&self) -> usize {
        self.inner.lock().await.max_open
    }
}
