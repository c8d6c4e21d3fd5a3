//! Media Store
//!
//! Owns the on-disk naming scheme for recordings and stills, saves
//! captured still frames, and scans output directories into the grouped
//! form the gallery consumes. Readers tolerate files that are still
//! being written: zero-byte entries are skipped.

mod gallery;
mod paths;
mod still;

pub use gallery::{date_sections, scan_recordings, scan_stills, DateSection, MediaFile, RecordingGroup, StillGroup};
pub use paths::{format_timestamp, parse_media_name, recording_stem, still_path, video_path, MediaName};
pub use still::save_still;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Frame buffer does not match its dimensions")]
    InvalidFrame,

    #[error("Image encoding error: {0}")]
    Encode(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<image::ImageError> for StoreError {
    fn from(err: image::ImageError) -> Self {
        StoreError::Encode(err.to_string())
    }
}
