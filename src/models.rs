use sqlx::types::chrono::NaiveDateTime;

#[derive(Debug, sqlx::FromRow)]
pub struct Series {
    pub id: i64,
    pub name: String,
    pub directory_path: String,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct Season {
    pub id: i64,
    pub series_id: i64,
    pub name: String,
    pub season_number: Option<i64>,
    pub directory_path: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct Episode {
    pub id: i64,
    pub season_id: i64,
    pub name: String,
    pub episode_number: Option<i64>,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub file_extension: Option<String>,
}

/// Normalized technical metadata of one episode file.
///
/// Every field may be absent. The track counters and the forced flag are only meaningful when
/// the probe succeeded, which is why a failed probe stores no `EpisodeMetadata` at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeMetadata {
    pub duration_ms: Option<i64>,
    pub video_format: Option<String>,
    pub video_codec: Option<String>,
    pub video_bitrate: Option<i64>,
    pub resolution_width: Option<i64>,
    pub resolution_height: Option<i64>,
    pub framerate: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub color_depth: Option<String>,
    pub hdr_format: Option<String>,
    pub color_space: Option<String>,
    pub scan_type: Option<String>,
    pub encoder: Option<String>,
    pub audio_codec: Option<String>,
    pub audio_channels: Option<i64>,
    pub audio_bitrate: Option<i64>,
    pub audio_sample_rate: Option<i64>,
    pub audio_language: Option<String>,
    pub audio_tracks_count: i64,
    pub audio_languages: Option<String>,
    pub subtitles_language: Option<String>,
    pub subtitles_formats: Option<String>,
    pub subtitles_count: i64,
    pub forced_subtitles: bool,
    pub container_format: Option<String>,
    pub creation_time: Option<NaiveDateTime>,
}

impl EpisodeMetadata {
    pub fn resolution_label(&self) -> String {
        match (self.resolution_width, self.resolution_height) {
            (Some(width), Some(height)) => format!("{}x{}", width, height),
            _ => "unknown".to_owned(),
        }
    }
}
