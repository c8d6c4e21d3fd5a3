//! Preview output geometry: orientation, mirroring and cropping.

use serde::{Deserialize, Serialize};

/// Display rotation applied to a camera's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl TryFrom<u32> for Orientation {
    type Error = String;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        Orientation::from_degrees(degrees)
            .ok_or_else(|| format!("orientation must be 0/90/180/270, got {degrees}"))
    }
}

impl From<Orientation> for u32 {
    fn from(orientation: Orientation) -> u32 {
        orientation.degrees()
    }
}

impl Orientation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Orientation::Deg0),
            90 => Some(Orientation::Deg90),
            180 => Some(Orientation::Deg180),
            270 => Some(Orientation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }

    /// Next step clockwise
    pub fn rotated_cw(&self) -> Self {
        match self {
            Orientation::Deg0 => Orientation::Deg90,
            Orientation::Deg90 => Orientation::Deg180,
            Orientation::Deg180 => Orientation::Deg270,
            Orientation::Deg270 => Orientation::Deg0,
        }
    }

    /// Whether width and height swap on screen
    pub fn is_transposed(&self) -> bool {
        matches!(self, Orientation::Deg90 | Orientation::Deg270)
    }
}

/// Crop rectangle in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Per-slot output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub mirror: bool,
    /// Preview viewport crop; does not affect the encoded recording
    #[serde(default)]
    pub crop: Option<CropRect>,
}

impl OutputConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            orientation: Orientation::default(),
            mirror: false,
            crop: None,
        }
    }
}

/// The transform the host applies to a preview surface. A negative
/// `scale_x` expresses the mirror flip; `clip` bounds the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayTransform {
    pub rotation_deg: u32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub clip: Option<CropRect>,
}

/// Compute the preview display transform for an output configuration.
///
/// At 90/270 the rotated frame no longer matches the viewport aspect,
/// so both axes scale by `max(W/H, H/W)` to fill it; the mirror flip
/// composes with that scale on the X axis.
pub fn display_transform(config: &OutputConfig) -> DisplayTransform {
    let fill = if config.orientation.is_transposed() && config.height != 0 && config.width != 0 {
        let w = config.width as f32;
        let h = config.height as f32;
        (w / h).max(h / w)
    } else {
        1.0
    };
    DisplayTransform {
        rotation_deg: config.orientation.degrees(),
        scale_x: if config.mirror { -fill } else { fill },
        scale_y: fill,
        clip: config.crop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upright_output_is_identity() {
        let config = OutputConfig::new(1280, 720);
        let t = display_transform(&config);
        assert_eq!(t.rotation_deg, 0);
        assert_eq!(t.scale_x, 1.0);
        assert_eq!(t.scale_y, 1.0);
        assert_eq!(t.clip, None);
    }

    #[test]
    fn transposed_orientation_scales_to_fill() {
        let mut config = OutputConfig::new(1280, 720);
        config.orientation = Orientation::Deg90;
        let t = display_transform(&config);
        assert_eq!(t.rotation_deg, 90);
        let expected = 1280.0f32 / 720.0;
        assert!((t.scale_x - expected).abs() < 1e-6);
        assert!((t.scale_y - expected).abs() < 1e-6);
    }

    #[test]
    fn mirror_negates_x_and_composes_with_fill() {
        let mut config = OutputConfig::new(1280, 720);
        config.mirror = true;
        let t = display_transform(&config);
        assert_eq!(t.scale_x, -1.0);
        assert_eq!(t.scale_y, 1.0);

        config.orientation = Orientation::Deg270;
        let t = display_transform(&config);
        let expected = 1280.0f32 / 720.0;
        assert!((t.scale_x + expected).abs() < 1e-6);
        assert!((t.scale_y - expected).abs() < 1e-6);
    }

    #[test]
    fn crop_clips_the_viewport() {
        let mut config = OutputConfig::new(1280, 720);
        config.crop = Some(CropRect { x: 100, y: 50, width: 640, height: 360 });
        let t = display_transform(&config);
        assert_eq!(t.clip, config.crop);
    }

    #[test]
    fn rotation_cycles_through_quarters() {
        let mut o = Orientation::Deg0;
        for expected in [90, 180, 270, 0] {
            o = o.rotated_cw();
            assert_eq!(o.degrees(), expected);
        }
        assert_eq!(Orientation::from_degrees(45), None);
    }
}
