//! Output scanning and gallery grouping.
//!
//! Files sharing a timestamp prefix form one group (all slots of one
//! recording run or still burst); groups sharing a calendar date form
//! one date section. The current segment of a live recording shows up
//! as a zero-byte file and is skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::paths::parse_media_name;
use crate::StoreError;

/// One scanned media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    /// Segment index within its slot's run; 0 for stills
    pub part: u32,
}

/// All files of one recording run, keyed by slot
#[derive(Debug, Clone, Serialize)]
pub struct RecordingGroup {
    /// Shared `yyyyMMdd_HHmmss` prefix
    pub timestamp: String,
    /// Wall-clock start of the run
    pub time: NaiveDateTime,
    slots: BTreeMap<String, Vec<MediaFile>>,
    pub total_bytes: u64,
}

impl RecordingGroup {
    fn new(timestamp: String, time: NaiveDateTime) -> Self {
        Self {
            timestamp,
            time,
            slots: BTreeMap::new(),
            total_bytes: 0,
        }
    }

    fn add(&mut self, slot: String, file: MediaFile) {
        self.total_bytes += file.size;
        self.slots.entry(slot).or_default().push(file);
    }

    /// Segments of one slot, ordered by index
    pub fn slot_files(&self, slot: &str) -> &[MediaFile] {
        self.slots.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Slots that produced at least one segment
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn video_count(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    pub fn formatted_time(&self) -> String {
        self.time.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn formatted_size(&self) -> String {
        format_size(self.total_bytes)
    }
}

/// All stills of one capture burst, keyed by slot
#[derive(Debug, Clone, Serialize)]
pub struct StillGroup {
    pub timestamp: String,
    pub time: NaiveDateTime,
    stills: BTreeMap<String, MediaFile>,
    pub total_bytes: u64,
}

impl StillGroup {
    fn new(timestamp: String, time: NaiveDateTime) -> Self {
        Self {
            timestamp,
            time,
            stills: BTreeMap::new(),
            total_bytes: 0,
        }
    }

    pub fn still(&self, slot: &str) -> Option<&MediaFile> {
        self.stills.get(slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.stills.keys().map(String::as_str)
    }

    pub fn count(&self) -> usize {
        self.stills.len()
    }
}

/// Groups of one calendar date. Only today's section starts expanded.
#[derive(Debug, Clone, Serialize)]
pub struct DateSection<T> {
    pub date: NaiveDate,
    pub items: Vec<T>,
    pub expanded: bool,
}

/// Scan a directory into recording groups, newest first. Non-media
/// files and zero-byte (in-flight) segments are skipped.
pub fn scan_recordings(dir: &Path) -> Result<Vec<RecordingGroup>, StoreError> {
    let mut groups: BTreeMap<String, RecordingGroup> = BTreeMap::new();
    for (path, size, name) in scan_media(dir, "mp4")? {
        groups
            .entry(name.timestamp.clone())
            .or_insert_with(|| RecordingGroup::new(name.timestamp.clone(), name.time))
            .add(name.slot, MediaFile { path, size, part: name.part });
    }
    let mut out: Vec<RecordingGroup> = groups.into_values().collect();
    for group in &mut out {
        for files in group.slots.values_mut() {
            files.sort_by_key(|f| f.part);
        }
    }
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(out)
}

/// Scan a directory into still groups, newest first
pub fn scan_stills(dir: &Path) -> Result<Vec<StillGroup>, StoreError> {
    let mut groups: BTreeMap<String, StillGroup> = BTreeMap::new();
    for (path, size, name) in scan_media(dir, "jpg")? {
        let group = groups
            .entry(name.timestamp.clone())
            .or_insert_with(|| StillGroup::new(name.timestamp.clone(), name.time));
        group.total_bytes += size;
        group.stills.insert(name.slot, MediaFile { path, size, part: 0 });
    }
    let mut out: Vec<StillGroup> = groups.into_values().collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(out)
}

/// Fold ordered groups into date sections. `today`'s section starts
/// expanded, everything else collapsed.
pub fn date_sections<T>(
    items: Vec<T>,
    date_of: impl Fn(&T) -> NaiveDate,
    today: NaiveDate,
) -> Vec<DateSection<T>> {
    let mut sections: Vec<DateSection<T>> = Vec::new();
    for item in items {
        let date = date_of(&item);
        match sections.last_mut() {
            Some(section) if section.date == date => section.items.push(item),
            _ => sections.push(DateSection {
                date,
                items: vec![item],
                expanded: date == today,
            }),
        }
    }
    sections
}

type ScannedFile = (PathBuf, u64, crate::paths::MediaName);

fn scan_media(dir: &Path, extension: &str) -> Result<Vec<ScannedFile>, StoreError> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(name) = parse_media_name(stem) else {
            debug!(path = %path.display(), "skipping foreign file");
            continue;
        };
        let size = entry.metadata()?.len();
        if size == 0 {
            // Still being written by the recorder.
            debug!(path = %path.display(), "skipping in-flight file");
            continue;
        }
        out.push((path, size, name));
    }
    Ok(out)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("media-gallery-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn touch(dir: &Path, name: &str, bytes: usize) {
        fs::write(dir.join(name), vec![0xAB; bytes]).unwrap();
    }

    #[test]
    fn recordings_group_by_timestamp_prefix() {
        let dir = scratch_dir("groups");
        touch(&dir, "20240601_120000_front.mp4", 10);
        touch(&dir, "20240601_120000_front_part1.mp4", 20);
        touch(&dir, "20240601_120000_back.mp4", 30);
        touch(&dir, "20240602_080000_front.mp4", 40);
        touch(&dir, "notes.txt", 5);

        let groups = scan_recordings(&dir).unwrap();
        assert_eq!(groups.len(), 2);
        // Newest first.
        assert_eq!(groups[0].timestamp, "20240602_080000");
        assert_eq!(groups[1].timestamp, "20240601_120000");
        let run = &groups[1];
        assert_eq!(run.video_count(), 3);
        assert_eq!(run.total_bytes, 60);
        let front = run.slot_files("front");
        assert_eq!(front.len(), 2);
        assert_eq!(front[0].part, 0);
        assert_eq!(front[1].part, 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn in_flight_segments_are_skipped() {
        let dir = scratch_dir("inflight");
        touch(&dir, "20240601_120000_front.mp4", 10);
        touch(&dir, "20240601_120000_front_part1.mp4", 0);
        let groups = scan_recordings(&dir).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].video_count(), 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_is_empty_not_an_error() {
        let dir = std::env::temp_dir().join("media-gallery-does-not-exist");
        assert!(scan_recordings(&dir).unwrap().is_empty());
    }

    #[test]
    fn stills_group_per_slot() {
        let dir = scratch_dir("stills");
        touch(&dir, "20240601_120000_front.jpg", 11);
        touch(&dir, "20240601_120000_left.jpg", 13);
        let groups = scan_stills(&dir).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count(), 2);
        assert_eq!(groups[0].total_bytes, 24);
        assert!(groups[0].still("front").is_some());
        assert!(groups[0].still("right").is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn only_today_starts_expanded() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let dates = vec![
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        ];
        let sections = date_sections(dates, |d| *d, today);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].expanded);
        assert_eq!(sections[0].items.len(), 2);
        assert!(!sections[1].expanded);
    }

    #[test]
    fn sizes_format_in_binary_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn groups_serialize_for_the_gallery_manifest() {
        let dir = scratch_dir("manifest");
        touch(&dir, "20240601_120000_front.mp4", 10);
        let groups = scan_recordings(&dir).unwrap();
        let json = serde_json::to_value(&groups).unwrap();
        assert_eq!(json[0]["timestamp"], "20240601_120000");
        assert_eq!(json[0]["total_bytes"], 10);
        assert_eq!(json[0]["slots"]["front"][0]["part"], 0);
        let _ = fs::remove_dir_all(&dir);
    }
}
