//! File naming scheme.
//!
//! All files of one recording run share a timestamp prefix:
//! `<base>/<yyyyMMdd_HHmmss>_<slot>[_part<k>].mp4` for video segments,
//! `<base>/<yyyyMMdd_HHmmss>_<slot>.jpg` for stills. The gallery groups
//! files by that prefix.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

/// Timestamp layout used in file names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Format a local wall-clock time as a file-name timestamp
pub fn format_timestamp(time: &NaiveDateTime) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Stem for one slot's recording run, without the `.mp4` suffix.
/// The recorder appends `.mp4` / `_part<k>.mp4` per segment.
pub fn recording_stem(base: &Path, timestamp: &str, slot: &str) -> PathBuf {
    base.join(format!("{timestamp}_{slot}"))
}

/// Full path of a slot's first video segment
pub fn video_path(base: &Path, timestamp: &str, slot: &str) -> PathBuf {
    base.join(format!("{timestamp}_{slot}.mp4"))
}

/// Full path of a slot's still image
pub fn still_path(base: &Path, timestamp: &str, slot: &str) -> PathBuf {
    base.join(format!("{timestamp}_{slot}.jpg"))
}

/// Parsed media file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaName {
    /// `yyyyMMdd_HHmmss` recording-group prefix
    pub timestamp: String,
    /// Slot name (`front`, `back`, `left`, `right`)
    pub slot: String,
    /// Segment index; 0 for the unsuffixed first segment and for stills
    pub part: u32,
    /// Wall-clock time parsed from the prefix
    pub time: NaiveDateTime,
}

/// Parse `<yyyyMMdd_HHmmss>_<slot>[_part<k>]` out of a file stem.
/// Returns `None` for names that don't follow the scheme.
pub fn parse_media_name(file_stem: &str) -> Option<MediaName> {
    let mut parts = file_stem.split('_');
    let date = parts.next()?;
    let clock = parts.next()?;
    let slot = parts.next()?;
    if date.len() != 8 || clock.len() != 6 || slot.is_empty() {
        return None;
    }
    let timestamp = format!("{date}_{clock}");
    let time = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT).ok()?;

    let part = match parts.next() {
        None => 0,
        Some(suffix) => suffix.strip_prefix("part")?.parse().ok().filter(|p| *p > 0)?,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(MediaName {
        timestamp,
        slot: slot.to_string(),
        part,
        time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_share_the_group_prefix() {
        let base = Path::new("/videos");
        assert_eq!(
            recording_stem(base, "20240601_120000", "front"),
            PathBuf::from("/videos/20240601_120000_front")
        );
        assert_eq!(
            video_path(base, "20240601_120000", "front"),
            PathBuf::from("/videos/20240601_120000_front.mp4")
        );
        assert_eq!(
            still_path(base, "20240601_120000", "left"),
            PathBuf::from("/videos/20240601_120000_left.jpg")
        );
    }

    #[test]
    fn parse_round_trips_first_and_later_segments() {
        let first = parse_media_name("20240601_120000_front").unwrap();
        assert_eq!(first.timestamp, "20240601_120000");
        assert_eq!(first.slot, "front");
        assert_eq!(first.part, 0);

        let later = parse_media_name("20240601_120000_back_part2").unwrap();
        assert_eq!(later.slot, "back");
        assert_eq!(later.part, 2);
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(parse_media_name("thumbnail"), None);
        assert_eq!(parse_media_name("2024_120000_front"), None);
        assert_eq!(parse_media_name("20240601_120000_front_part0"), None);
        assert_eq!(parse_media_name("20240601_120000_front_partx"), None);
        assert_eq!(parse_media_name("20240601_120000_front_part1_extra"), None);
        assert_eq!(parse_media_name("20249999_120000_front"), None);
    }

    #[test]
    fn timestamp_formatting_matches_the_scheme() {
        let time = NaiveDateTime::parse_from_str("20240601_120000", TIMESTAMP_FORMAT).unwrap();
        assert_eq!(format_timestamp(&time), "20240601_120000");
    }
}
