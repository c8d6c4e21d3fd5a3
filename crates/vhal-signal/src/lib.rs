//! VHAL Signal Observer
//!
//! This crate maintains a best-effort long-lived subscription to the
//! vehicle property bus (VHAL gRPC service) and emits typed semantic
//! events: turn-signal transitions, door open/close with multi-door
//! aggregation, and a custom wake-key edge trigger.
//!
//! The wire format is decoded by a minimal hand-rolled reader instead of
//! a generated protobuf stack; the stream only uses four wire types.

pub mod codec;
mod error;
mod observer;
mod transport;

pub use error::SignalError;
pub use observer::{ObserverConfig, Side, SignalEvent, VhalSignalObserver};
pub use transport::{GrpcBus, PropertyBus, PropertyStream};

/// VHAL property and area constants
pub mod props {
    /// Turn signal state (0x11400408). Values: 0=none, 1=right, 2=left.
    pub const TURN_SIGNAL_STATE: i32 = 289408008;
    /// Door position (0x16400B00). Values: 1=open, 2=closed.
    pub const DOOR_POS: i32 = 373295872;

    /// Driver door (front left)
    pub const AREA_FL: i32 = 1;
    /// Passenger door (front right)
    pub const AREA_FR: i32 = 4;
    /// Rear left door
    pub const AREA_W_FL: i32 = 16;
    /// Rear right door
    pub const AREA_W_FR: i32 = 64;

    /// Door value: open
    pub const DOOR_OPEN: i32 = 1;
    /// Door value: closed
    pub const DOOR_CLOSED: i32 = 2;

    /// Turn signal value: off
    pub const SIGNAL_NONE: i32 = 0;
    /// Turn signal value: right indicator on
    pub const SIGNAL_RIGHT: i32 = 1;
    /// Turn signal value: left indicator on
    pub const SIGNAL_LEFT: i32 = 2;
}
