/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Listing of finalized recordings.
//!
//! Dimensions and codec are recovered from the filename convention
//! (`NDI_{YYYYMMDD_HHMMSS}_{W}x{H}_{codec}.mp4`); media durations are the
//! playback layer's business and stay `None` here.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A finalized MP4 on disk.
#[derive(Debug, Clone)]
pub struct RecordingFile {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub modified: SystemTime,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    /// Filled by the playback layer when it probes the container.
    pub duration: Option<Duration>,
}

/// List the MP4 files under `dir`, newest first. A missing directory is an
/// empty listing, not an error.
pub fn list_recordings(dir: &Path) -> std::io::Result<Vec<RecordingFile>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let (width, height, codec) = match parse_recording_name(&name) {
            Some((w, h, c)) => (Some(w), Some(h), Some(c)),
            None => (None, None, None),
        };
        files.push(RecordingFile {
            path,
            name,
            size_bytes: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            width,
            height,
            codec,
            duration: None,
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}

/// Parse `NDI_{stamp}_{W}x{H}_{codec}.mp4` into (width, height, codec).
fn parse_recording_name(name: &str) -> Option<(u32, u32, String)> {
    let stem = name.strip_suffix(".mp4")?;
    let mut parts = stem.split('_');
    if parts.next()? != "NDI" {
        return None;
    }
    let _date = parts.next()?;
    let _time = parts.next()?;
    let dims = parts.next()?;
    let codec = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let (w, h) = dims.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?, codec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_filename_convention() {
        let (w, h, codec) =
            parse_recording_name("NDI_20250101_120000_1920x1080_H264.mp4").unwrap();
        assert_eq!((w, h), (1920, 1080));
        assert_eq!(codec, "H264");
        assert!(parse_recording_name("holiday_video.mp4").is_none());
        assert!(parse_recording_name("NDI_garbled.mp4").is_none());
    }

    #[test]
    fn lists_only_mp4_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("NDI_20250101_120000_1280x720_H265.mp4"),
            b"x",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"y").unwrap();

        let files = list_recordings(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].width, Some(1280));
        assert_eq!(files[0].codec.as_deref(), Some("H265"));
        assert_eq!(files[0].size_bytes, 1);
    }

    #[test]
    fn missing_directory_is_an_empty_listing() {
        let dir = tempfile::tempdir().unwrap();
        let files = list_recordings(&dir.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }
}
