//! EvCam Core
//!
//! The process-wide engine handle: wires the camera orchestrator, the
//! vehicle-signal observer and the event fan-out dispatcher together
//! behind one façade, driven by a single configuration surface. Hosts
//! supply the camera and encoder capabilities; everything else lives
//! here.

pub mod config;
mod core;
mod events;
pub mod host;

pub use crate::core::CoreHandle;
pub use config::{AppConfig, SignalBusConfig};
pub use events::CoreEvent;

use thiserror::Error;

use tracing_subscriber::EnvFilter;

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Orchestrator(#[from] camera_orchestrator::OrchestratorError),
}

impl From<::config::ConfigError> for EngineError {
    fn from(err: ::config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
