//! Configuration surface.
//!
//! Loaded from an optional TOML file plus `EVCAM_`-prefixed environment
//! overrides (`EVCAM_SIGNAL_BUS__PORT=40004`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use camera_orchestrator::{OrchestratorSettings, SlotConfig};
use serde::Deserialize;
use vhal_signal::ObserverConfig;

use crate::EngineError;

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Global cap on simultaneously open sensors
    #[serde(default = "defaults::max_open_cameras")]
    pub max_open_cameras: usize,
    /// Camera slot layout
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
    /// Directory for video segments
    pub recording_dir: PathBuf,
    /// Directory for still captures
    pub still_dir: PathBuf,
    #[serde(default)]
    pub signal_bus: SignalBusConfig,
    #[serde(default = "defaults::segment_duration_s")]
    pub segment_duration_s: u64,
    #[serde(default = "defaults::video_bitrate_bps")]
    pub video_bitrate_bps: u32,
    #[serde(default = "defaults::video_fps")]
    pub video_fps: u32,
}

/// Vehicle property-bus endpoint and custom-key tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SignalBusConfig {
    #[serde(default = "defaults::host")]
    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    #[serde(default = "defaults::speed_prop_id")]
    pub speed_prop_id: i32,
    #[serde(default = "defaults::button_prop_id")]
    pub button_prop_id: i32,
    #[serde(default = "defaults::speed_threshold")]
    pub speed_threshold: f32,
}

impl Default for SignalBusConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            speed_prop_id: defaults::speed_prop_id(),
            button_prop_id: defaults::button_prop_id(),
            speed_threshold: defaults::speed_threshold(),
        }
    }
}

mod defaults {
    pub fn max_open_cameras() -> usize {
        4
    }

    pub fn segment_duration_s() -> u64 {
        60
    }

    pub fn video_bitrate_bps() -> u32 {
        1_000_000
    }

    pub fn video_fps() -> u32 {
        30
    }

    pub fn host() -> String {
        "localhost".to_string()
    }

    pub fn port() -> u16 {
        40004
    }

    pub fn speed_prop_id() -> i32 {
        291504647
    }

    pub fn button_prop_id() -> i32 {
        557872183
    }

    pub fn speed_threshold() -> f32 {
        8.34
    }
}

impl AppConfig {
    /// Load from an optional file plus `EVCAM_` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("EVCAM").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_open: self.max_open_cameras,
            segment_duration: Duration::from_secs(self.segment_duration_s),
            video_bitrate_bps: self.video_bitrate_bps,
            video_fps: self.video_fps,
        }
    }

    pub fn observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            speed_prop_id: self.signal_bus.speed_prop_id,
            button_prop_id: self.signal_bus.button_prop_id,
            speed_threshold: self.signal_bus.speed_threshold,
        }
    }
}
