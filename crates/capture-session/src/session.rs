//! Capture session state machine.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::device::{CameraProvider, CapturedFrame, SensorDevice, SessionHandle};
use crate::sink::{OutputSink, SinkKind, SinkSet};
use crate::transform::{display_transform, CropRect, DisplayTransform, Orientation, OutputConfig};
use crate::CaptureError;

/// Sink changes issued within this window collapse into one rebuild
const REBUILD_DEBOUNCE: Duration = Duration::from_millis(50);

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No sensor held
    Closed,
    /// Sensor acquisition in flight; cancellable
    Opening,
    /// Sensor ready, building the session over the sink set
    Configuring,
    /// Repeating capture request active, frames flowing
    Running,
    /// Terminal until an explicit `close` clears it
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Configuring => "configuring",
            SessionState::Running => "running",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// States in which the slot holds sensor resources or is acquiring
    /// them; these count against the orchestrator's open quota.
    pub fn holds_resources(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

/// Events emitted by a session, tagged with its camera id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { camera_id: String, state: SessionState },
    SessionError { camera_id: String, message: String },
}

struct Core {
    state: SessionState,
    sinks: SinkSet,
    output: OutputConfig,
    device: Option<Box<dyn SensorDevice>>,
    session: Option<Box<dyn SessionHandle>>,
    /// Bumped on open, close and rebuild; async completions carrying a
    /// stale generation are discarded silently.
    generation: u64,
    rebuild_pending: bool,
    last_error: Option<String>,
}

#[derive(Clone)]
struct Ctx {
    camera_id: String,
    sensor_id: String,
    provider: Arc<dyn CameraProvider>,
    events: mpsc::UnboundedSender<SessionEvent>,
    core: Arc<Mutex<Core>>,
}

impl Ctx {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit_state(&self, state: SessionState) {
        let _ = self.events.send(SessionEvent::StateChanged {
            camera_id: self.camera_id.clone(),
            state,
        });
    }
}

/// One capture session per camera slot.
///
/// Owns the sensor handle while open. The sink set of a built session is
/// immutable; mutating it transitions the session back through
/// CONFIGURING, and changes issued close together coalesce into a
/// single rebuild.
pub struct CaptureSession {
    ctx: Ctx,
}

impl CaptureSession {
    pub fn new(
        camera_id: impl Into<String>,
        sensor_id: impl Into<String>,
        output: OutputConfig,
        provider: Arc<dyn CameraProvider>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            ctx: Ctx {
                camera_id: camera_id.into(),
                sensor_id: sensor_id.into(),
                provider,
                events,
                core: Arc::new(Mutex::new(Core {
                    state: SessionState::Closed,
                    sinks: SinkSet::default(),
                    output,
                    device: None,
                    session: None,
                    generation: 0,
                    rebuild_pending: false,
                    last_error: None,
                })),
            },
        }
    }

    /// Begin opening the sensor. Completes asynchronously; progress is
    /// reported through `SessionEvent::StateChanged`. A non-empty sink
    /// set is required up front.
    pub fn open(&self) -> Result<(), CaptureError> {
        let generation = {
            let mut core = self.ctx.lock();
            match core.state {
                SessionState::Opening | SessionState::Configuring | SessionState::Running => {
                    debug!(camera = %self.ctx.camera_id, "already open");
                    return Ok(());
                }
                SessionState::Failed => {
                    return Err(CaptureError::Failed(
                        core.last_error.clone().unwrap_or_else(|| "unknown".into()),
                    ));
                }
                SessionState::Closed => {}
            }
            if core.sinks.is_empty() {
                return Err(CaptureError::EmptySinkSet);
            }
            core.generation += 1;
            core.state = SessionState::Opening;
            core.generation
        };
        self.ctx.emit_state(SessionState::Opening);
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            drive_open(ctx, generation).await;
        });
        Ok(())
    }

    /// Close the session: cancels a pending open, stops the repeating
    /// request and releases the sensor before returning. Clears a FAILED
    /// state.
    pub async fn close(&self) {
        let (device, session, previous) = {
            let mut core = self.ctx.lock();
            core.generation += 1;
            core.rebuild_pending = false;
            let previous = core.state;
            core.state = SessionState::Closed;
            core.last_error = None;
            (core.device.take(), core.session.take(), previous)
        };
        if let Some(mut session) = session {
            if let Err(err) = session.stop().await {
                debug!(camera = %self.ctx.camera_id, "session stop: {err}");
            }
        }
        drop(device);
        if previous != SessionState::Closed {
            info!(camera = %self.ctx.camera_id, "capture session closed");
            self.ctx.emit_state(SessionState::Closed);
        }
    }

    /// Add or replace a sink. On a live session this schedules a
    /// coalesced rebuild.
    pub fn set_sink(&self, sink: OutputSink) {
        let mut core = self.ctx.lock();
        core.sinks.set(sink);
        self.maybe_schedule_rebuild(&mut core);
    }

    /// Remove a sink. Refused if it would leave a live session without
    /// any sink.
    pub fn remove_sink(&self, kind: SinkKind) -> Result<bool, CaptureError> {
        let mut core = self.ctx.lock();
        let present = match kind {
            SinkKind::Preview => core.sinks.preview().is_some(),
            SinkKind::Record => core.sinks.record().is_some(),
            SinkKind::Still => core.sinks.still().is_some(),
        };
        if present && core.sinks.len() == 1 && core.state.holds_resources() {
            return Err(CaptureError::EmptySinkSet);
        }
        let removed = core.sinks.remove(kind);
        if removed {
            self.maybe_schedule_rebuild(&mut core);
        }
        Ok(removed)
    }

    /// Fire a one-shot still capture. Requires a running session with a
    /// STILL sink.
    pub async fn capture_still(&self) -> Result<CapturedFrame, CaptureError> {
        let (generation, mut session) = {
            let mut core = self.ctx.lock();
            if core.state != SessionState::Running {
                return Err(CaptureError::NotRunning);
            }
            if core.sinks.still().is_none() {
                return Err(CaptureError::NoStillSink);
            }
            let Some(session) = core.session.take() else {
                return Err(CaptureError::NotRunning);
            };
            (core.generation, session)
        };
        let result = session.capture_still().await;
        let mut core = self.ctx.lock();
        if core.generation == generation && core.session.is_none() {
            core.session = Some(session);
        }
        drop(core);
        result
    }

    pub fn state(&self) -> SessionState {
        self.ctx.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.ctx.lock().last_error.clone()
    }

    pub fn camera_id(&self) -> &str {
        &self.ctx.camera_id
    }

    pub fn sensor_id(&self) -> &str {
        &self.ctx.sensor_id
    }

    pub fn sinks(&self) -> SinkSet {
        self.ctx.lock().sinks.clone()
    }

    pub fn output(&self) -> OutputConfig {
        self.ctx.lock().output.clone()
    }

    /// Rotate the output a quarter turn clockwise; returns the new value
    pub fn rotate_cw(&self) -> Orientation {
        let mut core = self.ctx.lock();
        core.output.orientation = core.output.orientation.rotated_cw();
        core.output.orientation
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        self.ctx.lock().output.orientation = orientation;
    }

    pub fn set_mirror(&self, mirror: bool) {
        self.ctx.lock().output.mirror = mirror;
    }

    pub fn set_crop(&self, crop: Option<CropRect>) {
        self.ctx.lock().output.crop = crop;
    }

    /// Transform the host should apply to the preview surface for the
    /// current output configuration
    pub fn display_transform(&self) -> DisplayTransform {
        display_transform(&self.ctx.lock().output)
    }

    fn maybe_schedule_rebuild(&self, core: &mut Core) {
        if !matches!(core.state, SessionState::Running | SessionState::Configuring) {
            return;
        }
        if core.rebuild_pending {
            return;
        }
        core.rebuild_pending = true;
        schedule_rebuild(self.ctx.clone(), core.generation);
    }
}

fn schedule_rebuild(ctx: Ctx, generation: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(REBUILD_DEBOUNCE).await;
        rebuild(ctx, generation).await;
    });
}

async fn drive_open(ctx: Ctx, generation: u64) {
    let device = match ctx.provider.open(&ctx.sensor_id).await {
        Ok(device) => device,
        Err(err) => {
            fail(&ctx, generation, &err);
            return;
        }
    };
    let sinks = {
        let mut core = ctx.lock();
        if core.generation != generation {
            debug!(camera = %ctx.camera_id, "late sensor-ready discarded");
            return;
        }
        core.state = SessionState::Configuring;
        core.sinks.clone()
    };
    ctx.emit_state(SessionState::Configuring);
    build_session(ctx, generation, device, sinks).await;
}

async fn build_session(ctx: Ctx, generation: u64, mut device: Box<dyn SensorDevice>, sinks: SinkSet) {
    let mut session = match device.create_session(&sinks.bindings()).await {
        Ok(session) => session,
        Err(err) => {
            fail(&ctx, generation, &err);
            return;
        }
    };
    if let Err(err) = session.start_repeating().await {
        fail(&ctx, generation, &err);
        return;
    }
    let resume_rebuild = {
        let mut core = ctx.lock();
        if core.generation != generation {
            debug!(camera = %ctx.camera_id, "late session-ready discarded");
            return;
        }
        core.device = Some(device);
        core.session = Some(session);
        core.state = SessionState::Running;
        core.rebuild_pending
    };
    info!(camera = %ctx.camera_id, "capture session running");
    ctx.emit_state(SessionState::Running);
    if resume_rebuild {
        // A sink change arrived while the session was being built.
        schedule_rebuild(ctx, generation);
    }
}

async fn rebuild(ctx: Ctx, generation: u64) {
    let (device, old_session, sinks, new_generation) = {
        let mut core = ctx.lock();
        if core.generation != generation || !core.rebuild_pending {
            return;
        }
        if core.state == SessionState::Configuring {
            // A build is in flight; it resumes the rebuild when done.
            return;
        }
        if core.state != SessionState::Running {
            core.rebuild_pending = false;
            return;
        }
        core.rebuild_pending = false;
        if core.sinks.is_empty() {
            return;
        }
        let Some(device) = core.device.take() else {
            return;
        };
        let old_session = core.session.take();
        core.generation += 1;
        core.state = SessionState::Configuring;
        (device, old_session, core.sinks.clone(), core.generation)
    };
    debug!(camera = %ctx.camera_id, sinks = sinks.len(), "rebuilding capture session");
    ctx.emit_state(SessionState::Configuring);
    if let Some(mut session) = old_session {
        if let Err(err) = session.stop().await {
            debug!(camera = %ctx.camera_id, "old session stop: {err}");
        }
    }
    build_session(ctx, new_generation, device, sinks).await;
}

fn fail(ctx: &Ctx, generation: u64, err: &CaptureError) {
    {
        let mut core = ctx.lock();
        if core.generation != generation {
            debug!(camera = %ctx.camera_id, "stale failure discarded: {err}");
            return;
        }
        core.state = SessionState::Failed;
        core.last_error = Some(err.to_string());
        core.device = None;
        core.session = None;
    }
    warn!(camera = %ctx.camera_id, "capture session failed: {err}");
    let _ = ctx.events.send(SessionEvent::SessionError {
        camera_id: ctx.camera_id.clone(),
        message: err.to_string(),
    });
    ctx.emit_state(SessionState::Failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{PixelFormat, SessionHandle};
    use crate::sink::PreviewSurface;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct MockProvider {
        fail_open: AtomicBool,
        fail_create: AtomicBool,
        open_gate: Option<Arc<Semaphore>>,
        opened: AtomicUsize,
        sessions_created: Arc<AtomicUsize>,
        device_dropped: Arc<AtomicBool>,
    }

    impl MockProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn gated() -> (Arc<Self>, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            let provider = Arc::new(Self {
                open_gate: Some(gate.clone()),
                ..Self::default()
            });
            (provider, gate)
        }
    }

    #[async_trait]
    impl CameraProvider for MockProvider {
        async fn sensor_ids(&self) -> Result<Vec<String>, CaptureError> {
            Ok(vec!["0".into(), "1".into()])
        }

        async fn open(&self, sensor_id: &str) -> Result<Box<dyn SensorDevice>, CaptureError> {
            if let Some(gate) = &self.open_gate {
                let permit = gate.acquire().await.map_err(|_| CaptureError::Sensor("gate closed".into()))?;
                permit.forget();
            }
            if self.fail_open.load(Ordering::Acquire) {
                return Err(CaptureError::SensorDenied(format!("sensor {sensor_id} busy")));
            }
            self.opened.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MockDevice {
                fail_create: self.fail_create.load(Ordering::Acquire),
                sessions_created: self.sessions_created.clone(),
                dropped: self.device_dropped.clone(),
            }))
        }
    }

    struct MockDevice {
        fail_create: bool,
        sessions_created: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for MockDevice {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl SensorDevice for MockDevice {
        async fn create_session(
            &mut self,
            sinks: &[OutputSink],
        ) -> Result<Box<dyn SessionHandle>, CaptureError> {
            if self.fail_create {
                return Err(CaptureError::Configure("no streams".into()));
            }
            assert!(!sinks.is_empty());
            self.sessions_created.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MockSession))
        }
    }

    struct MockSession;

    #[async_trait]
    impl SessionHandle for MockSession {
        async fn start_repeating(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        async fn capture_still(&mut self) -> Result<CapturedFrame, CaptureError> {
            Ok(CapturedFrame {
                width: 2,
                height: 2,
                format: PixelFormat::Rgba8,
                data: vec![0; 16],
            })
        }

        async fn stop(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    fn preview(id: u64) -> OutputSink {
        OutputSink::Preview(PreviewSurface { id, width: 640, height: 480 })
    }

    fn session_with(
        provider: Arc<MockProvider>,
    ) -> (CaptureSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = CaptureSession::new("front", "0", OutputConfig::new(1280, 720), provider, tx);
        (session, rx)
    }

    fn states(events: &[SessionEvent]) -> Vec<SessionState> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    async fn settle() {
        // Let spawned lifecycle tasks run to completion.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_walks_through_to_running() {
        let provider = MockProvider::new();
        let (session, mut rx) = session_with(provider);
        session.set_sink(preview(1));
        session.open().unwrap();
        settle().await;
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(
            states(&drain(&mut rx)),
            vec![SessionState::Opening, SessionState::Configuring, SessionState::Running]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_requires_a_sink() {
        let provider = MockProvider::new();
        let (session, _rx) = session_with(provider);
        assert!(matches!(session.open(), Err(CaptureError::EmptySinkSet)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_terminal_until_close() {
        let provider = MockProvider::new();
        provider.fail_open.store(true, Ordering::Release);
        let (session, mut rx) = session_with(provider.clone());
        session.set_sink(preview(1));
        session.open().unwrap();
        settle().await;
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.last_error().is_some());
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionError { .. })));

        // Re-open while failed is refused.
        assert!(matches!(session.open(), Err(CaptureError::Failed(_))));

        // close clears the state and a fresh open succeeds.
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        provider.fail_open.store(false, Ordering::Release);
        session.open().unwrap();
        settle().await;
        assert_eq!(session.state(), SessionState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn close_discards_late_sensor_ready() {
        let (provider, gate) = MockProvider::gated();
        let (session, mut rx) = session_with(provider.clone());
        session.set_sink(preview(1));
        session.open().unwrap();
        settle().await;
        assert_eq!(session.state(), SessionState::Opening);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        // Sensor becomes ready after the close: the handle must be
        // dropped without any state transition.
        gate.add_permits(1);
        settle().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(provider.device_dropped.load(Ordering::Acquire));
        let states = states(&drain(&mut rx));
        assert!(!states.contains(&SessionState::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn sink_changes_coalesce_into_one_rebuild() {
        let provider = MockProvider::new();
        let (session, _rx) = session_with(provider.clone());
        session.set_sink(preview(1));
        session.open().unwrap();
        settle().await;
        assert_eq!(provider.sessions_created.load(Ordering::Acquire), 1);

        session.set_sink(preview(2));
        session.set_sink(OutputSink::Record(video_recorder::SurfaceHandle(9)));
        session.set_sink(OutputSink::Still(crate::sink::StillSink {
            id: 3,
            width: 1920,
            height: 1080,
        }));
        tokio::time::sleep(REBUILD_DEBOUNCE * 4).await;
        settle().await;

        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(provider.sessions_created.load(Ordering::Acquire), 2);
        assert_eq!(session.sinks().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_the_last_sink_is_refused_while_open() {
        let provider = MockProvider::new();
        let (session, _rx) = session_with(provider);
        session.set_sink(preview(1));
        session.open().unwrap();
        settle().await;
        assert!(matches!(
            session.remove_sink(SinkKind::Preview),
            Err(CaptureError::EmptySinkSet)
        ));
        session.close().await;
        assert!(matches!(session.remove_sink(SinkKind::Preview), Ok(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn still_capture_needs_a_still_sink() {
        let provider = MockProvider::new();
        let (session, _rx) = session_with(provider);
        session.set_sink(preview(1));
        session.open().unwrap();
        settle().await;
        assert!(matches!(
            session.capture_still().await,
            Err(CaptureError::NoStillSink)
        ));

        session.set_sink(OutputSink::Still(crate::sink::StillSink {
            id: 3,
            width: 1920,
            height: 1080,
        }));
        tokio::time::sleep(REBUILD_DEBOUNCE * 4).await;
        settle().await;
        let frame = session.capture_still().await.unwrap();
        assert_eq!(frame.format, PixelFormat::Rgba8);
        assert_eq!(session.state(), SessionState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_still_when_closed_is_refused() {
        let provider = MockProvider::new();
        let (session, _rx) = session_with(provider);
        assert!(matches!(
            session.capture_still().await,
            Err(CaptureError::NotRunning)
        ));
    }
}
