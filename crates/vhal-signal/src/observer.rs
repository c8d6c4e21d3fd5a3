//! Signal observer: subscribes to the property stream, debounces raw
//! values and fans out semantic events.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::props;
use crate::transport::PropertyBus;
use crate::SignalError;

/// How long to wait before re-establishing a broken channel
const RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// How long `stop` waits for the worker before aborting it
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Vehicle side a door or turn-signal event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic events emitted by the observer, in decode order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalEvent {
    /// Turn indicator entered (`on` = true) or left (`on` = false) a side
    Turn { side: Side, on: bool },
    /// A door on the given side opened
    DoorOpen(Side),
    /// All doors mapped to the given side are closed
    DoorClose(Side),
    /// Custom wake key rising edge. The speed-gate decision is the
    /// listener's; see [`VhalSignalObserver::current_speed`].
    CustomKey,
    /// Channel connectivity changed
    Connection(bool),
}

/// Observer configuration
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Vendor property carrying vehicle speed (float)
    pub speed_prop_id: i32,
    /// Vendor property carrying the custom key state (int32)
    pub button_prop_id: i32,
    /// Speed threshold listeners compare against, in m/s
    pub speed_threshold: f32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            speed_prop_id: 291504647,
            button_prop_id: 557872183,
            speed_threshold: 8.34,
        }
    }
}

#[derive(Default)]
struct SharedState {
    speed_bits: AtomicU32,
    connected: AtomicBool,
}

/// Streaming observer for the vehicle property bus.
///
/// Owns one worker task that maintains the subscription across
/// disconnects. Decode state (turn signal, doors, button) resets on
/// `start`, not on reconnect, so a reconnect re-delivers the current
/// value as an initial transition.
pub struct VhalSignalObserver {
    bus: Arc<dyn PropertyBus>,
    config: ObserverConfig,
    events: mpsc::UnboundedSender<SignalEvent>,
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl VhalSignalObserver {
    /// Create an observer over the given bus. Events are delivered on
    /// `events` in the order values were observed.
    pub fn new(
        bus: Arc<dyn PropertyBus>,
        config: ObserverConfig,
        events: mpsc::UnboundedSender<SignalEvent>,
    ) -> Self {
        Self {
            bus,
            config,
            events,
            shared: Arc::new(SharedState::default()),
            worker: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Adjust the custom-key properties. Takes effect on the next `start`.
    pub fn configure_custom_key(&mut self, speed_prop_id: i32, button_prop_id: i32, speed_threshold: f32) {
        self.config.speed_prop_id = speed_prop_id;
        self.config.button_prop_id = button_prop_id;
        self.config.speed_threshold = speed_threshold;
    }

    /// Start the subscription worker. Idempotent while running.
    pub fn start(&mut self) {
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            debug!("signal observer already running");
            return;
        }
        self.shared.speed_bits.store(0, Ordering::Release);
        self.shared.connected.store(false, Ordering::Release);
        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();
        self.worker = Some(tokio::spawn(run_loop(
            self.bus.clone(),
            self.config.clone(),
            self.shared.clone(),
            self.events.clone(),
            cancel,
        )));
        info!("signal observer started");
    }

    /// Stop the worker. Waits up to two seconds for a clean exit, then
    /// aborts; no events are delivered after this returns.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(mut worker) = self.worker.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut worker).await.is_err() {
                warn!("signal worker did not stop in time, aborting");
                worker.abort();
                let _ = worker.await;
            }
        }
        self.shared.connected.store(false, Ordering::Release);
        info!("signal observer stopped");
    }

    /// Whether the channel is currently established
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Latest observed vehicle speed, m/s
    pub fn current_speed(&self) -> f32 {
        f32::from_bits(self.shared.speed_bits.load(Ordering::Acquire))
    }

    /// Configured speed threshold for the custom-key gate
    pub fn speed_threshold(&self) -> f32 {
        self.config.speed_threshold
    }
}

async fn run_loop(
    bus: Arc<dyn PropertyBus>,
    config: ObserverConfig,
    shared: Arc<SharedState>,
    events: mpsc::UnboundedSender<SignalEvent>,
    cancel: CancellationToken,
) {
    let mut decode = DecodeState::new(config);
    while !cancel.is_cancelled() {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = bus.connect() => connected,
        };
        match connected {
            Ok(mut stream) => {
                shared.connected.store(true, Ordering::Release);
                let _ = events.send(SignalEvent::Connection(true));
                debug!("connected, requesting current property values");
                if let Err(err) = stream.send_all().await {
                    // Non-fatal: the stream still delivers future changes.
                    warn!("send-all request failed: {err}");
                }
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        batch = stream.next_batch() => match batch {
                            Ok(Some(batch)) => decode.process_batch(&batch, &shared, &events),
                            Ok(None) => {
                                debug!("property stream completed");
                                break;
                            }
                            Err(err) => {
                                warn!("property stream error: {err}");
                                break;
                            }
                        }
                    }
                }
                shared.connected.store(false, Ordering::Release);
                let _ = events.send(SignalEvent::Connection(false));
            }
            Err(err) => match err {
                SignalError::Connect(msg) => debug!("connect failed: {msg}"),
                other => warn!("connect failed: {other}"),
            },
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

/// Per-run decode state. Built fresh on every `start`.
struct DecodeState {
    config: ObserverConfig,
    last_turn: i32,
    pass_door_open: bool,
    left_rear_open: bool,
    right_rear_open: bool,
    last_button: i32,
}

impl DecodeState {
    fn new(config: ObserverConfig) -> Self {
        Self {
            config,
            last_turn: -1,
            pass_door_open: false,
            left_rear_open: false,
            right_rear_open: false,
            last_button: -1,
        }
    }

    /// Decode one batch: wrapper records at field 1, each wrapping a
    /// property value at field 1.
    fn process_batch(
        &mut self,
        data: &[u8],
        shared: &SharedState,
        events: &mpsc::UnboundedSender<SignalEvent>,
    ) {
        for wrapper in codec::read_nested_all(data, 1) {
            let Some(value) = codec::read_nested(wrapper, 1) else {
                continue;
            };
            let prop = codec::read_varint_i32(value, 1);
            if prop == props::TURN_SIGNAL_STATE {
                self.turn_signal(value, events);
            } else if prop == props::DOOR_POS {
                self.door_position(value, events);
            } else if prop == self.config.speed_prop_id {
                self.vehicle_speed(value, shared);
            } else if prop == self.config.button_prop_id {
                self.custom_button(value, events);
            }
        }
    }

    fn turn_signal(&mut self, value: &[u8], events: &mpsc::UnboundedSender<SignalEvent>) {
        let state = first_int(value);
        if state == self.last_turn {
            return;
        }
        let previous = self.last_turn;
        self.last_turn = state;
        debug!(previous, state, "turn signal changed");
        let event = match state {
            props::SIGNAL_LEFT => Some(SignalEvent::Turn { side: Side::Left, on: true }),
            props::SIGNAL_RIGHT => Some(SignalEvent::Turn { side: Side::Right, on: true }),
            props::SIGNAL_NONE => match previous {
                props::SIGNAL_LEFT => Some(SignalEvent::Turn { side: Side::Left, on: false }),
                props::SIGNAL_RIGHT => Some(SignalEvent::Turn { side: Side::Right, on: false }),
                _ => None,
            },
            _ => None,
        };
        if let Some(event) = event {
            let _ = events.send(event);
        }
    }

    /// Door areas: FL(1) is the driver door and never triggers events;
    /// FR(4) and W_FR(64) both map to the right side, so the right-side
    /// close only fires once both are closed; W_FL(16) maps to the left.
    fn door_position(&mut self, value: &[u8], events: &mpsc::UnboundedSender<SignalEvent>) {
        let area = codec::read_varint_i32(value, 4);
        let state = first_int(value);
        debug!(area, state, "door position changed");
        match area {
            props::AREA_FL => {}
            props::AREA_FR => match state {
                props::DOOR_OPEN => {
                    self.pass_door_open = true;
                    let _ = events.send(SignalEvent::DoorOpen(Side::Right));
                }
                props::DOOR_CLOSED => {
                    self.pass_door_open = false;
                    if !self.right_rear_open {
                        let _ = events.send(SignalEvent::DoorClose(Side::Right));
                    }
                }
                _ => {}
            },
            props::AREA_W_FL => match state {
                props::DOOR_OPEN => {
                    self.left_rear_open = true;
                    let _ = events.send(SignalEvent::DoorOpen(Side::Left));
                }
                props::DOOR_CLOSED => {
                    self.left_rear_open = false;
                    let _ = events.send(SignalEvent::DoorClose(Side::Left));
                }
                _ => {}
            },
            props::AREA_W_FR => match state {
                props::DOOR_OPEN => {
                    self.right_rear_open = true;
                    let _ = events.send(SignalEvent::DoorOpen(Side::Right));
                }
                props::DOOR_CLOSED => {
                    self.right_rear_open = false;
                    if !self.pass_door_open {
                        let _ = events.send(SignalEvent::DoorClose(Side::Right));
                    }
                }
                _ => {}
            },
            other => debug!(area = other, "unknown door area"),
        }
    }

    fn vehicle_speed(&mut self, value: &[u8], shared: &SharedState) {
        // The vendor stores the float in field 7; some firmware versions
        // use the standard field 6 instead.
        let mut floats = codec::read_packed_float(value, 7);
        if floats.is_empty() {
            floats = codec::read_packed_float(value, 6);
        }
        if let Some(speed) = floats.first() {
            shared.speed_bits.store(speed.to_bits(), Ordering::Release);
        }
    }

    fn custom_button(&mut self, value: &[u8], events: &mpsc::UnboundedSender<SignalEvent>) {
        let state = first_int(value);
        if state == 1 && self.last_button != 1 {
            debug!("custom key pressed");
            let _ = events.send(SignalEvent::CustomKey);
        }
        self.last_button = state;
    }
}

fn first_int(value: &[u8]) -> i32 {
    codec::read_packed_sint32(value, 5).first().copied().unwrap_or(0)
}
