//! Signal Bus Error Types

use thiserror::Error;

/// Errors that can occur on the property-bus channel
#[derive(Debug, Error)]
pub enum SignalError {
    /// TCP or HTTP/2 connection could not be established
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The channel broke while a call was in flight
    #[error("Channel error: {0}")]
    Channel(String),

    /// The server rejected a call
    #[error("Call rejected with HTTP status {0}")]
    Rejected(u16),

    /// A frame on the stream was malformed
    #[error("Invalid stream frame: {0}")]
    Frame(String),
}

impl From<std::io::Error> for SignalError {
    fn from(err: std::io::Error) -> Self {
        SignalError::Connect(err.to_string())
    }
}

impl From<hyper::Error> for SignalError {
    fn from(err: hyper::Error) -> Self {
        SignalError::Channel(err.to_string())
    }
}
