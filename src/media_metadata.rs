use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::ProbeError;
use crate::models::EpisodeMetadata;
use crate::probe::{AttrValue, Probe, ProbeReport, Track, TrackKind};

const DURATION_ATTRS: &[&str] = &["duration", "duration_ms", "other_duration"];
const CREATION_DATE_ATTRS: &[&str] = &[
    "encoded_date",
    "recorded_date",
    "file_creation_date",
    "file_created_date",
    "mastered_date",
    "tagged_date",
];
const CREATION_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d",
    "%Y%m%d_%H%M%S",
    "%d.%m.%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const CODEC_ATTRS: &[&str] = &["format", "codec_id"];
const FRAMERATE_ATTRS: &[&str] = &["frame_rate", "framerate", "original_frame_rate"];
const HDR_ATTRS: &[&str] = &[
    "hdr_format",
    "hdr_format_profile",
    "hdr_format_compatibility",
    "transfer_characteristics",
];
const HDR_TOKENS: &[&str] = &["hdr10", "hdr 10", "dolby vision", "dolbyvision", "hlg"];
const COLOR_PRIMARIES_ATTRS: &[&str] = &["color_primaries", "colour_primaries"];
const COLOR_SPACE_ATTRS: &[&str] = &[
    "color_space",
    "color_primaries",
    "colour_primaries",
    "color_range",
    "colour_range",
];
const ENCODER_ATTRS: &[&str] = &[
    "encoded_library_name",
    "writing_library",
    "encoder",
    "encoded_library",
];
const CHANNEL_ATTRS: &[&str] = &["channels", "channel_s"];

/// Values below this are read as seconds, at or above it as milliseconds.
///
/// Numbers between 10 and 10,000 are ambiguous either way.
pub const SECONDS_THRESHOLD: f64 = 10_000.0;

/// Runs the probe on its own task under a timeout and normalizes its report.
#[derive(Clone)]
pub struct MetadataExtractor {
    probe: Arc<dyn Probe>,
    timeout: Duration,
}

impl MetadataExtractor {
    pub fn new(probe: Arc<dyn Probe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// A probe still running when the timeout fires is aborted, which kills its child process.
    pub async fn extract(&self, path: &Path) -> Result<EpisodeMetadata, ProbeError> {
        log::debug!("Extracting metadata from {:?}", path);
        let probe = self.probe.clone();
        let owned_path = path.to_owned();
        let mut task = tokio::spawn(async move { probe.probe(&owned_path).await });
        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result.map(|report| normalize_report(&report)),
            Ok(Err(join_error)) => Err(ProbeError::Worker(join_error.to_string())),
            Err(_) => {
                task.abort();
                Err(ProbeError::Timeout {
                    path: path.to_owned(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

pub fn normalize_report(report: &ProbeReport) -> EpisodeMetadata {
    let mut metadata = EpisodeMetadata::default();
    if let Some(general) = report.first_of(TrackKind::General) {
        apply_general_track(&mut metadata, general);
    }
    if let Some(video) = report.first_of(TrackKind::Video) {
        apply_video_track(&mut metadata, video);
    }
    apply_audio_tracks(&mut metadata, report.tracks_of(TrackKind::Audio).collect());
    apply_subtitle_tracks(&mut metadata, report.tracks_of(TrackKind::Text).collect());
    metadata
}

fn apply_general_track(metadata: &mut EpisodeMetadata, track: &Track) {
    metadata.container_format = track.first_string(&["format"]);
    metadata.video_format = metadata.container_format.clone();
    metadata.duration_ms = DURATION_ATTRS
        .iter()
        .find_map(|name| track.attr(name).and_then(duration_ms));
    metadata.creation_time = creation_time(track);
}

fn apply_video_track(metadata: &mut EpisodeMetadata, track: &Track) {
    metadata.video_codec = track.first_string(CODEC_ATTRS);
    metadata.video_bitrate = track.first_i64(&["bit_rate"]);
    metadata.resolution_width = track.first_i64(&["width"]).filter(|width| *width > 0);
    metadata.resolution_height = track.first_i64(&["height"]).filter(|height| *height > 0);
    metadata.framerate = track.first_f64(FRAMERATE_ATTRS);
    if let (Some(width), Some(height)) = (metadata.resolution_width, metadata.resolution_height) {
        metadata.aspect_ratio = Some(aspect_ratio(width, height));
    }
    metadata.hdr_format = hdr_format(track).map(|format| format.to_owned());
    metadata.color_depth = track.attr("bit_depth").and_then(color_depth);
    metadata.color_space = track.first_string(COLOR_SPACE_ATTRS);
    metadata.scan_type = track.first_string(&["scan_type"]).map(|scan_type| {
        if scan_type.to_lowercase().contains("progressive") {
            "Progressive".to_owned()
        } else {
            "Interlaced".to_owned()
        }
    });
    metadata.encoder = track.first_string(ENCODER_ATTRS);
}

fn apply_audio_tracks(metadata: &mut EpisodeMetadata, tracks: Vec<&Track>) {
    metadata.audio_tracks_count = tracks.len() as i64;
    let primary = match tracks.first() {
        Some(primary) => primary,
        None => return,
    };
    metadata.audio_codec = primary.first_string(CODEC_ATTRS);
    metadata.audio_bitrate = primary.first_i64(&["bit_rate"]);
    metadata.audio_channels = primary.first_i64(CHANNEL_ATTRS);
    metadata.audio_sample_rate = primary.first_i64(&["sampling_rate"]);
    metadata.audio_language = primary.first_string(&["language"]);
    metadata.audio_languages = join_distinct(
        tracks
            .iter()
            .filter_map(|track| track.first_string(&["language"])),
    );
}

fn apply_subtitle_tracks(metadata: &mut EpisodeMetadata, tracks: Vec<&Track>) {
    metadata.subtitles_count = tracks.len() as i64;
    metadata.subtitles_language = join_distinct(
        tracks
            .iter()
            .filter_map(|track| track.first_string(&["language"])),
    );
    metadata.subtitles_formats = join_distinct(
        tracks
            .iter()
            .filter_map(|track| track.first_string(CODEC_ATTRS)),
    );
    metadata.forced_subtitles = tracks.iter().any(|track| {
        track
            .first_string(&["forced"])
            .map_or(false, |forced| is_truthy(&forced))
    });
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "yes" | "true" | "1")
}

/// Comma-joined values in first-seen order, `None` when there are none.
fn join_distinct(values: impl Iterator<Item = String>) -> Option<String> {
    let mut seen = hashbrown::HashSet::new();
    let distinct: Vec<String> = values.filter(|value| seen.insert(value.clone())).collect();
    if distinct.is_empty() {
        None
    } else {
        Some(distinct.join(","))
    }
}

/// Duration in milliseconds from one probed duration attribute.
pub fn duration_ms(value: &AttrValue) -> Option<i64> {
    match value.scalar()? {
        AttrValue::Number(number) => {
            if *number < SECONDS_THRESHOLD {
                Some((number * 1000.0) as i64)
            } else {
                Some(*number as i64)
            }
        }
        AttrValue::Text(text) => {
            let parsed = if text.contains("ms") {
                text.replace("ms", "").trim().parse::<f64>().ok()
            } else if text.contains('s') && !text.contains("minute") && !text.contains("hour") {
                text.replace('s', "")
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .map(|seconds| seconds * 1000.0)
            } else {
                text.chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.')
                    .collect::<String>()
                    .parse::<f64>()
                    .ok()
                    .map(|seconds| seconds * 1000.0)
            };
            if parsed.is_none() {
                log::debug!("Could not read a duration from {:?}", text);
            }
            parsed.map(|ms| ms as i64)
        }
        AttrValue::List(_) => None,
    }
}

/// Common ratios get their usual label, anything else is spelled out as `W:H`.
pub fn aspect_ratio(width: i64, height: i64) -> String {
    let ratio = width as f64 / height as f64;
    if (1.3..=1.4).contains(&ratio) {
        "4:3".to_owned()
    } else if (1.75..=1.85).contains(&ratio) {
        "16:9".to_owned()
    } else if (2.2..=2.4).contains(&ratio) {
        "21:9".to_owned()
    } else {
        format!("{}:{}", width, height)
    }
}

pub fn hdr_format(track: &Track) -> Option<&'static str> {
    for name in HDR_ATTRS {
        let value = match track.attr(name).and_then(|value| value.as_string()) {
            Some(value) => value.to_lowercase(),
            None => continue,
        };
        if !HDR_TOKENS.iter().any(|token| value.contains(token)) {
            continue;
        }
        return if value.contains("dolby") || value.contains("dovi") {
            Some("Dolby Vision")
        } else if value.contains("hlg") {
            Some("HLG")
        } else if value.contains("hdr10+") {
            Some("HDR10+")
        } else {
            Some("HDR10")
        };
    }

    let bit_depth = track.first_i64(&["bit_depth"])?;
    let primaries = track.first_string(COLOR_PRIMARIES_ATTRS)?.to_lowercase();
    if bit_depth > 8 && (primaries.contains("bt.2020") || primaries.contains("bt2020")) {
        Some("HDR (unspecified)")
    } else {
        None
    }
}

fn color_depth(value: &AttrValue) -> Option<String> {
    match value.scalar()? {
        AttrValue::Number(number) => Some(format!("{}bit", number.trunc() as i64)),
        AttrValue::Text(text) => match text.trim().parse::<f64>() {
            Ok(number) => Some(format!("{}bit", number.trunc() as i64)),
            Err(_) => Some(text.clone()),
        },
        AttrValue::List(_) => None,
    }
}

pub fn creation_time(track: &Track) -> Option<NaiveDateTime> {
    CREATION_DATE_ATTRS.iter().find_map(|name| {
        let raw = track.attr(name)?.as_string()?;
        parse_creation_time(&raw)
    })
}

pub fn parse_creation_time(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = raw.replace("UTC ", "").replace('Z', "");
    let cleaned = cleaned.trim().trim_end_matches("UTC").trim();
    for format in CREATION_DATE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Some(parsed);
        }
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            if let Some(parsed) = date.and_hms_opt(0, 0, 0) {
                return Some(parsed);
            }
        }
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(parsed);
    }
    DateTime::parse_from_rfc3339(cleaned)
        .map(|parsed| parsed.naive_utc())
        .ok()
}
