//! Per-camera segmented recorder.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{EncoderFactory, EncoderPipeline, EncoderSpec, SurfaceHandle};
use crate::RecorderError;

/// Wall-clock duration of one segment
pub const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_secs(60);
/// H.264 target bitrate, bits per second
pub const DEFAULT_BITRATE_BPS: u32 = 1_000_000;
/// Frame-rate hint passed to the encoder
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Events emitted by a recorder, tagged with its camera id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    RecordStart(String),
    RecordStop(String),
    RecordError { camera_id: String, message: String },
}

struct Inner {
    recording: bool,
    segment_index: u32,
    stem: Option<String>,
    width: u32,
    height: u32,
    pipeline: Option<Box<dyn EncoderPipeline>>,
    current_path: Option<PathBuf>,
    rollover: Option<CancellationToken>,
}

/// Shared context the rollover timer task needs to cut a segment.
#[derive(Clone)]
struct RolloverCtx {
    camera_id: String,
    factory: Arc<dyn EncoderFactory>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    segment_duration: Duration,
    bitrate_bps: u32,
    frame_rate: u32,
    inner: Arc<Mutex<Inner>>,
}

/// Segmented recorder for one camera.
///
/// `prepare` binds the first segment, `start` begins encoding and arms
/// the rollover timer. The recorder owns the timer's cancel token,
/// clears it on `stop` and reassigns it after each rollover. Segment
/// indices are strictly increasing within a run and reset to 0 only by
/// `stop` followed by a fresh `start`.
pub struct SegmentedRecorder {
    ctx: RolloverCtx,
}

impl SegmentedRecorder {
    pub fn new(
        camera_id: impl Into<String>,
        factory: Arc<dyn EncoderFactory>,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Self {
        Self {
            ctx: RolloverCtx {
                camera_id: camera_id.into(),
                factory,
                events,
                segment_duration: DEFAULT_SEGMENT_DURATION,
                bitrate_bps: DEFAULT_BITRATE_BPS,
                frame_rate: DEFAULT_FRAME_RATE,
                inner: Arc::new(Mutex::new(Inner {
                    recording: false,
                    segment_index: 0,
                    stem: None,
                    width: 0,
                    height: 0,
                    pipeline: None,
                    current_path: None,
                    rollover: None,
                })),
            },
        }
    }

    /// Override the segment duration (default 60 s)
    pub fn with_segment_duration(mut self, duration: Duration) -> Self {
        self.ctx.segment_duration = duration;
        self
    }

    /// Override encoder bitrate and frame rate
    pub fn with_encoding(mut self, bitrate_bps: u32, frame_rate: u32) -> Self {
        self.ctx.bitrate_bps = bitrate_bps;
        self.ctx.frame_rate = frame_rate;
        self
    }

    /// Bind the first segment. Derives the stem from `path` (a trailing
    /// `.mp4` is stripped), resets the segment index and builds the
    /// encoder pipeline. Does not begin encoding.
    pub fn prepare(&self, path: impl AsRef<Path>, width: u32, height: u32) -> Result<(), RecorderError> {
        let mut inner = lock(&self.ctx.inner);
        if inner.recording {
            warn!(camera = %self.ctx.camera_id, "already recording");
            return Err(RecorderError::AlreadyRecording);
        }
        if width == 0 || height == 0 {
            return Err(RecorderError::InvalidDimensions { width, height });
        }

        let stem = derive_stem(path.as_ref());
        inner.segment_index = 0;
        inner.width = width;
        inner.height = height;

        let first = segment_path(&stem, 0);
        let spec = EncoderSpec {
            path: first.clone(),
            width,
            height,
            bitrate_bps: self.ctx.bitrate_bps,
            frame_rate: self.ctx.frame_rate,
        };
        match self.ctx.factory.create(&spec) {
            Ok(pipeline) => {
                inner.pipeline = Some(pipeline);
                inner.stem = Some(stem);
                inner.current_path = Some(first.clone());
                debug!(camera = %self.ctx.camera_id, path = %first.display(), "prepared recording");
                Ok(())
            }
            Err(err) => {
                inner.pipeline = None;
                inner.stem = None;
                inner.current_path = None;
                warn!(camera = %self.ctx.camera_id, "failed to prepare recording: {err}");
                let _ = self.ctx.events.send(RecorderEvent::RecordError {
                    camera_id: self.ctx.camera_id.clone(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Begin encoding. Requires a prepared pipeline; arms the rollover
    /// timer and emits `RecordStart`.
    pub fn start(&self) -> Result<(), RecorderError> {
        {
            let mut inner = lock(&self.ctx.inner);
            if inner.recording {
                warn!(camera = %self.ctx.camera_id, "already recording");
                return Err(RecorderError::AlreadyRecording);
            }
            let Some(pipeline) = inner.pipeline.as_mut() else {
                return Err(RecorderError::NotPrepared);
            };
            if let Err(err) = pipeline.start() {
                inner.pipeline = None;
                warn!(camera = %self.ctx.camera_id, "failed to start recording: {err}");
                let _ = self.ctx.events.send(RecorderEvent::RecordError {
                    camera_id: self.ctx.camera_id.clone(),
                    message: err.to_string(),
                });
                return Err(err);
            }
            inner.recording = true;
            info!(camera = %self.ctx.camera_id, segment = inner.segment_index, "recording started");
        }
        let _ = self
            .ctx
            .events
            .send(RecorderEvent::RecordStart(self.ctx.camera_id.clone()));
        arm_rollover(&self.ctx);
        Ok(())
    }

    /// Stop recording: cancel the rollover timer, finalize the current
    /// segment (errors logged and swallowed, the pipeline is released
    /// unconditionally), reset the index and emit `RecordStop`.
    pub fn stop(&self) {
        let total = {
            let mut inner = lock(&self.ctx.inner);
            if let Some(token) = inner.rollover.take() {
                token.cancel();
            }
            if !inner.recording {
                debug!(camera = %self.ctx.camera_id, "not recording");
                return;
            }
            inner.recording = false;
            if let Some(mut pipeline) = inner.pipeline.take() {
                if let Err(err) = pipeline.stop() {
                    warn!(camera = %self.ctx.camera_id, "error finalizing recording: {err}");
                }
            }
            let total = inner.segment_index + 1;
            inner.segment_index = 0;
            inner.current_path = None;
            inner.stem = None;
            total
        };
        info!(camera = %self.ctx.camera_id, segments = total, "recording stopped");
        let _ = self
            .ctx
            .events
            .send(RecorderEvent::RecordStop(self.ctx.camera_id.clone()));
    }

    /// Release everything: cancels the timer, stops if recording, drops
    /// any prepared pipeline.
    pub fn release(&self) {
        let recording = {
            let mut inner = lock(&self.ctx.inner);
            if let Some(token) = inner.rollover.take() {
                token.cancel();
            }
            inner.recording
        };
        if recording {
            self.stop();
        }
        let mut inner = lock(&self.ctx.inner);
        inner.pipeline = None;
        inner.current_path = None;
        inner.stem = None;
        inner.segment_index = 0;
    }

    /// Writable sink handle the capture session wires in. Valid from
    /// after `prepare` until the next `stop`/`release`.
    pub fn surface(&self) -> Option<SurfaceHandle> {
        lock(&self.ctx.inner).pipeline.as_ref().map(|p| p.surface())
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.ctx.inner).recording
    }

    /// Index of the segment currently being written
    pub fn segment_index(&self) -> u32 {
        lock(&self.ctx.inner).segment_index
    }

    /// Path of the segment currently being written
    pub fn current_path(&self) -> Option<PathBuf> {
        lock(&self.ctx.inner).current_path.clone()
    }

    pub fn camera_id(&self) -> &str {
        &self.ctx.camera_id
    }
}

impl Drop for SegmentedRecorder {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.ctx.inner).rollover.take() {
            token.cancel();
        }
    }
}

/// Arm the rollover timer for the current segment. Must run inside a
/// tokio runtime; the token is stored so `stop` can cancel it.
fn arm_rollover(ctx: &RolloverCtx) {
    let token = CancellationToken::new();
    lock(&ctx.inner).rollover = Some(token.clone());

    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(ctx.segment_duration) => {
                if roll_segment(&ctx) {
                    arm_rollover(&ctx);
                }
            }
        }
    });
}

/// Cut the current segment and start the next one. Returns false when
/// recording has ended (normally or through a rollover failure).
fn roll_segment(ctx: &RolloverCtx) -> bool {
    let mut inner = lock(&ctx.inner);
    if !inner.recording {
        return false;
    }

    // Finalize segment k before segment k+1 exists. Frames arriving in
    // this window are dropped.
    if let Some(mut pipeline) = inner.pipeline.take() {
        if let Err(err) = pipeline.stop() {
            warn!(camera = %ctx.camera_id, segment = inner.segment_index, "error finalizing segment: {err}");
        }
    }

    let Some(stem) = inner.stem.clone() else {
        inner.recording = false;
        return false;
    };
    inner.segment_index += 1;
    let path = segment_path(&stem, inner.segment_index);
    let spec = EncoderSpec {
        path: path.clone(),
        width: inner.width,
        height: inner.height,
        bitrate_bps: ctx.bitrate_bps,
        frame_rate: ctx.frame_rate,
    };

    let started = ctx
        .factory
        .create(&spec)
        .and_then(|mut pipeline| pipeline.start().map(|_| pipeline));
    match started {
        Ok(pipeline) => {
            inner.pipeline = Some(pipeline);
            inner.current_path = Some(path.clone());
            debug!(camera = %ctx.camera_id, segment = inner.segment_index, path = %path.display(), "rolled over");
            true
        }
        Err(err) => {
            // The failed rollover is an implicit stop: never a state with
            // the recording flag set and no pipeline behind it.
            inner.recording = false;
            inner.rollover = None;
            inner.current_path = None;
            warn!(camera = %ctx.camera_id, "rollover failed: {err}");
            let _ = ctx.events.send(RecorderEvent::RecordError {
                camera_id: ctx.camera_id.clone(),
                message: format!("failed to switch segment: {err}"),
            });
            false
        }
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn derive_stem(path: &Path) -> String {
    let raw = path.to_string_lossy();
    raw.strip_suffix(".mp4").unwrap_or(&raw).to_string()
}

fn segment_path(stem: &str, index: u32) -> PathBuf {
    if index == 0 {
        PathBuf::from(format!("{stem}.mp4"))
    } else {
        PathBuf::from(format!("{stem}_part{index}.mp4"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct MockState {
        created: Vec<PathBuf>,
        log: Vec<String>,
        fail_on_create: Option<usize>,
    }

    #[derive(Default)]
    struct MockFactory {
        state: Arc<Mutex<MockState>>,
        next_surface: AtomicU64,
    }

    impl MockFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing_on(nth: usize) -> Arc<Self> {
            let factory = Self::default();
            factory.state.lock().unwrap().fail_on_create = Some(nth);
            Arc::new(factory)
        }

        fn created(&self) -> Vec<PathBuf> {
            self.state.lock().unwrap().created.clone()
        }

        fn log(&self) -> Vec<String> {
            self.state.lock().unwrap().log.clone()
        }
    }

    impl EncoderFactory for MockFactory {
        fn create(&self, spec: &EncoderSpec) -> Result<Box<dyn EncoderPipeline>, RecorderError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_on_create == Some(state.created.len()) {
                return Err(RecorderError::Encoder("simulated prepare failure".into()));
            }
            state.created.push(spec.path.clone());
            let entry = format!("create:{}", spec.path.display());
            state.log.push(entry);
            Ok(Box::new(MockPipeline {
                path: spec.path.clone(),
                surface: SurfaceHandle(self.next_surface.fetch_add(1, Ordering::Relaxed)),
                state: self.state.clone(),
            }))
        }
    }

    struct MockPipeline {
        path: PathBuf,
        surface: SurfaceHandle,
        state: Arc<Mutex<MockState>>,
    }

    impl EncoderPipeline for MockPipeline {
        fn surface(&self) -> SurfaceHandle {
            self.surface
        }

        fn start(&mut self) -> Result<(), RecorderError> {
            let entry = format!("start:{}", self.path.display());
            self.state.lock().unwrap().log.push(entry);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), RecorderError> {
            let entry = format!("stop:{}", self.path.display());
            self.state.lock().unwrap().log.push(entry);
            Ok(())
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RecorderEvent>) -> Vec<RecorderEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[tokio::test(start_paused = true)]
    async fn segments_roll_on_the_minute() {
        let factory = MockFactory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("front", factory.clone(), tx);

        recorder.prepare("/x/a.mp4", 1280, 720).unwrap();
        assert_eq!(recorder.current_path(), Some(p("/x/a.mp4")));
        recorder.start().unwrap();
        tokio::time::sleep(Duration::from_secs(130)).await;
        recorder.stop();

        assert_eq!(
            factory.created(),
            vec![p("/x/a.mp4"), p("/x/a_part1.mp4"), p("/x/a_part2.mp4")]
        );
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                RecorderEvent::RecordStart("front".into()),
                RecorderEvent::RecordStop("front".into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn segment_is_finalized_before_its_successor_exists() {
        let factory = MockFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("front", factory.clone(), tx);

        recorder.prepare("/x/a", 640, 480).unwrap();
        recorder.start().unwrap();
        tokio::time::sleep(Duration::from_secs(65)).await;

        assert_eq!(
            factory.log(),
            vec![
                "create:/x/a.mp4",
                "start:/x/a.mp4",
                "stop:/x/a.mp4",
                "create:/x/a_part1.mp4",
                "start:/x/a_part1.mp4",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn index_is_monotonic_and_resets_on_stop() {
        let factory = MockFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("back", factory.clone(), tx);

        recorder.prepare("/x/b.mp4", 640, 480).unwrap();
        recorder.start().unwrap();
        let mut last = recorder.segment_index();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(61)).await;
            let index = recorder.segment_index();
            assert!(index > last);
            last = index;
        }
        recorder.stop();
        assert_eq!(recorder.segment_index(), 0);

        recorder.prepare("/x/b.mp4", 640, 480).unwrap();
        recorder.start().unwrap();
        assert_eq!(recorder.segment_index(), 0);
        assert_eq!(recorder.current_path(), Some(p("/x/b.mp4")));
        recorder.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn rollover_failure_is_an_implicit_stop() {
        // Creation of segment 1 (the second pipeline) fails.
        let factory = MockFactory::failing_on(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("left", factory.clone(), tx);

        recorder.prepare("/x/c.mp4", 640, 480).unwrap();
        recorder.start().unwrap();
        tokio::time::sleep(Duration::from_secs(65)).await;

        assert!(!recorder.is_recording());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RecorderEvent::RecordStart("left".into()));
        assert!(matches!(events[1], RecorderEvent::RecordError { .. }));

        // The timer chain is dead: nothing further gets created.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(factory.created().len(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn start_requires_prepare() {
        let factory = MockFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("front", factory, tx);
        assert!(matches!(recorder.start(), Err(RecorderError::NotPrepared)));
    }

    #[tokio::test]
    async fn prepare_rejects_while_recording() {
        let factory = MockFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("front", factory, tx);
        recorder.prepare("/x/d.mp4", 640, 480).unwrap();
        recorder.start().unwrap();
        assert!(matches!(
            recorder.prepare("/x/e.mp4", 640, 480),
            Err(RecorderError::AlreadyRecording)
        ));
        recorder.stop();
    }

    #[tokio::test]
    async fn prepare_rejects_zero_dimensions() {
        let factory = MockFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("front", factory, tx);
        assert!(matches!(
            recorder.prepare("/x/f.mp4", 0, 480),
            Err(RecorderError::InvalidDimensions { .. })
        ));
    }

    #[tokio::test]
    async fn surface_lives_from_prepare_to_stop() {
        let factory = MockFactory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("front", factory, tx);
        assert!(recorder.surface().is_none());
        recorder.prepare("/x/g.mp4", 640, 480).unwrap();
        assert!(recorder.surface().is_some());
        recorder.start().unwrap();
        assert!(recorder.surface().is_some());
        recorder.stop();
        assert!(recorder.surface().is_none());
    }

    #[tokio::test]
    async fn stop_when_idle_is_silent() {
        let factory = MockFactory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = SegmentedRecorder::new("front", factory, tx);
        recorder.stop();
        assert!(drain(&mut rx).is_empty());
    }
}
