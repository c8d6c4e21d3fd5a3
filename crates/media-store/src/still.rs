//! Still-frame persistence.

use std::fs;
use std::path::{Path, PathBuf};

use capture_session::{CapturedFrame, PixelFormat};
use tracing::debug;

use crate::paths::still_path;
use crate::StoreError;

/// Write a captured still frame as `<base>/<timestamp>_<slot>.jpg`.
/// Raw frames are JPEG-encoded; already-encoded frames are written
/// through unchanged.
pub fn save_still(
    base: &Path,
    timestamp: &str,
    slot: &str,
    frame: &CapturedFrame,
) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(base)?;
    let path = still_path(base, timestamp, slot);
    match frame.format {
        PixelFormat::Jpeg => fs::write(&path, &frame.data)?,
        PixelFormat::Rgba8 => {
            let rgba = image::RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
                .ok_or(StoreError::InvalidFrame)?;
            // JPEG carries no alpha channel.
            image::DynamicImage::ImageRgba8(rgba).to_rgb8().save(&path)?;
        }
    }
    debug!(path = %path.display(), "still saved");
    Ok(path)
}
