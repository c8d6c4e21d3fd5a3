//! The process-wide core handle.
//!
//! Created once at startup and passed explicitly; lifecycle is
//! `init → run → release`. Owns the orchestrator, the signal observer
//! and the serial dispatcher task that fans every component event out
//! to subscribers in order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use camera_orchestrator::{CameraOrchestrator, SlotPosition};
use capture_session::{CameraProvider, SessionEvent};
use chrono::Local;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vhal_signal::{PropertyBus, SignalEvent, VhalSignalObserver};
use video_recorder::{EncoderFactory, RecorderEvent};

use crate::config::AppConfig;
use crate::events::CoreEvent;
use crate::EngineError;

type Subscribers = Arc<StdMutex<Vec<mpsc::UnboundedSender<CoreEvent>>>>;

/// Engine façade. Everything external collaborators may do goes through
/// here; nothing else names the internals.
pub struct CoreHandle {
    config: AppConfig,
    orchestrator: Arc<CameraOrchestrator>,
    observer: Arc<Mutex<VhalSignalObserver>>,
    subscribers: Subscribers,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl CoreHandle {
    /// Wire the engine together. The host supplies its camera and
    /// encoder capabilities and the property-bus transport. Must run
    /// inside a tokio runtime.
    pub fn init(
        config: AppConfig,
        provider: Arc<dyn CameraProvider>,
        encoders: Arc<dyn EncoderFactory>,
        bus: Arc<dyn PropertyBus>,
    ) -> Self {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (recorder_tx, recorder_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let orchestrator = Arc::new(CameraOrchestrator::new(
            provider,
            encoders,
            config.orchestrator_settings(),
            session_tx,
            recorder_tx,
        ));
        let observer = Arc::new(Mutex::new(VhalSignalObserver::new(
            bus,
            config.observer_config(),
            signal_tx,
        )));
        let subscribers: Subscribers = Arc::default();
        let dispatcher = tokio::spawn(dispatch(
            session_rx,
            recorder_rx,
            signal_rx,
            subscribers.clone(),
            observer.clone(),
        ));

        Self {
            config,
            orchestrator,
            observer,
            subscribers,
            dispatcher: StdMutex::new(Some(dispatcher)),
        }
    }

    /// Configure the slot layout and start the signal observer. Cameras
    /// open once the host has wired sinks and calls `open_cameras`.
    pub async fn run(&self) -> Result<(), EngineError> {
        self.orchestrator.configure(self.config.slots.clone()).await?;
        self.observer.lock().await.start();
        info!("core running");
        Ok(())
    }

    /// Subscribe to the ordered event stream
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// The camera façade, for sink wiring and per-slot operations
    pub fn orchestrator(&self) -> Arc<CameraOrchestrator> {
        self.orchestrator.clone()
    }

    pub async fn open_cameras(&self) -> Result<(), EngineError> {
        Ok(self.orchestrator.open_all().await?)
    }

    pub async fn close_cameras(&self) {
        self.orchestrator.close_all().await;
    }

    /// Start a recording group stamped with the current wall-clock time
    pub async fn start_recording(&self) -> Result<String, EngineError> {
        let timestamp = media_store::format_timestamp(&Local::now().naive_local());
        self.start_recording_at(&timestamp).await
    }

    /// Start a recording group with an explicit timestamp stem
    pub async fn start_recording_at(&self, timestamp: &str) -> Result<String, EngineError> {
        Ok(self
            .orchestrator
            .start_record_all(&self.config.recording_dir, timestamp)
            .await?)
    }

    pub async fn stop_recording(&self) {
        self.orchestrator.stop_record_all().await;
    }

    /// Capture stills on every slot with a STILL sink, stamped with the
    /// current wall-clock time
    pub async fn capture_stills(&self) -> Vec<(SlotPosition, PathBuf)> {
        let timestamp = media_store::format_timestamp(&Local::now().naive_local());
        self.capture_stills_at(&timestamp).await
    }

    pub async fn capture_stills_at(&self, timestamp: &str) -> Vec<(SlotPosition, PathBuf)> {
        self.orchestrator
            .capture_still_all(&self.config.still_dir, timestamp)
            .await
    }

    /// Latest observed vehicle speed, for listener-side gating
    pub async fn current_speed(&self) -> f32 {
        self.observer.lock().await.current_speed()
    }

    pub async fn signal_connected(&self) -> bool {
        self.observer.lock().await.is_connected()
    }

    /// Tear everything down: recording, cameras, observer, dispatcher.
    pub async fn release(&self) {
        info!("releasing core");
        self.orchestrator.stop_record_all().await;
        self.orchestrator.close_all().await;
        self.observer.lock().await.stop().await;
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

async fn dispatch(
    mut sessions: mpsc::UnboundedReceiver<SessionEvent>,
    mut recorders: mpsc::UnboundedReceiver<RecorderEvent>,
    mut signals: mpsc::UnboundedReceiver<SignalEvent>,
    subscribers: Subscribers,
    observer: Arc<Mutex<VhalSignalObserver>>,
) {
    loop {
        let event = tokio::select! {
            Some(event) = sessions.recv() => CoreEvent::Camera(event),
            Some(event) = recorders.recv() => CoreEvent::Recorder(event),
            Some(event) = signals.recv() => CoreEvent::Signal(event),
            else => break,
        };
        if matches!(event, CoreEvent::Signal(SignalEvent::CustomKey)) {
            let (speed, threshold) = {
                let observer = observer.lock().await;
                (observer.current_speed(), observer.speed_threshold())
            };
            fan_out(&subscribers, event);
            if speed < threshold {
                info!(speed, "wake key accepted");
                fan_out(&subscribers, CoreEvent::Wake { speed });
            } else {
                debug!(speed, threshold, "wake key ignored above speed threshold");
            }
            continue;
        }
        fan_out(&subscribers, event);
    }
    debug!("event dispatcher drained");
}

fn fan_out(subscribers: &Subscribers, event: CoreEvent) {
    subscribers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .retain(|tx| tx.send(event.clone()).is_ok());
}
