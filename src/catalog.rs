use std::path::PathBuf;

use futures::stream::{StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::config::RefreshOptions;
use crate::db::SqliteQuery;
use crate::manual_migrations::EPISODE_METADATA_COLUMNS;
use crate::media_metadata::MetadataExtractor;
use crate::models::{EpisodeMetadata, Series};
use crate::stats::RefreshStats;

/// Name of the season given to series that keep their episodes directly in the series directory.
pub const SYNTHETIC_SEASON_NAME: &str = "Season 1";
pub const SYNTHETIC_SEASON_NUMBER: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: i64,
    pub created: bool,
}

#[derive(Debug, typed_builder::TypedBuilder)]
pub struct NewEpisode<'a> {
    pub season_id: i64,
    pub name: &'a str,
    pub episode_number: Option<i64>,
    pub file_path: &'a str,
    pub file_size: Option<i64>,
    pub file_extension: Option<&'a str>,
    #[builder(default)]
    pub metadata: Option<&'a EpisodeMetadata>,
}

static INSERT_EPISODE_SQL: Lazy<String> = Lazy::new(|| {
    let columns: Vec<&str> = EPISODE_METADATA_COLUMNS.iter().map(|(name, _)| *name).collect();
    format!(
        "INSERT INTO episodes (season_id, name, episode_number, file_path, file_size, file_extension, {}) VALUES (?, ?, ?, ?, ?, ?, {}) ON CONFLICT DO NOTHING",
        columns.join(", "),
        vec!["?"; columns.len()].join(", "),
    )
});

static UPDATE_METADATA_SQL: Lazy<String> = Lazy::new(|| {
    let assignments: Vec<String> = EPISODE_METADATA_COLUMNS
        .iter()
        .map(|(name, _)| format!("{} = ?", name))
        .collect();
    format!(
        "UPDATE episodes SET {}, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        assignments.join(", "),
    )
});

/// Binds the metadata block in the order of [`EPISODE_METADATA_COLUMNS`]. `None` binds NULL to
/// every column.
fn bind_metadata<'q>(query: SqliteQuery<'q>, metadata: Option<&'q EpisodeMetadata>) -> SqliteQuery<'q> {
    query
        .bind(metadata.and_then(|m| m.duration_ms))
        .bind(metadata.and_then(|m| m.video_format.as_deref()))
        .bind(metadata.and_then(|m| m.video_codec.as_deref()))
        .bind(metadata.and_then(|m| m.video_bitrate))
        .bind(metadata.and_then(|m| m.resolution_width))
        .bind(metadata.and_then(|m| m.resolution_height))
        .bind(metadata.and_then(|m| m.framerate))
        .bind(metadata.and_then(|m| m.aspect_ratio.as_deref()))
        .bind(metadata.and_then(|m| m.color_depth.as_deref()))
        .bind(metadata.and_then(|m| m.hdr_format.as_deref()))
        .bind(metadata.and_then(|m| m.color_space.as_deref()))
        .bind(metadata.and_then(|m| m.scan_type.as_deref()))
        .bind(metadata.and_then(|m| m.encoder.as_deref()))
        .bind(metadata.and_then(|m| m.audio_codec.as_deref()))
        .bind(metadata.and_then(|m| m.audio_channels))
        .bind(metadata.and_then(|m| m.audio_bitrate))
        .bind(metadata.and_then(|m| m.audio_sample_rate))
        .bind(metadata.and_then(|m| m.audio_language.as_deref()))
        .bind(metadata.map(|m| m.audio_tracks_count))
        .bind(metadata.and_then(|m| m.audio_languages.as_deref()))
        .bind(metadata.and_then(|m| m.subtitles_language.as_deref()))
        .bind(metadata.and_then(|m| m.subtitles_formats.as_deref()))
        .bind(metadata.map(|m| m.subtitles_count))
        .bind(metadata.map(|m| m.forced_subtitles))
        .bind(metadata.and_then(|m| m.container_format.as_deref()))
        .bind(metadata.and_then(|m| m.creation_time))
}

/// Inserts the series unless its directory is already cataloged.
///
/// Returns `None` when a different directory already holds the series name: names are unique
/// too, and the second directory is left out of the catalog.
pub async fn upsert_series(con: &mut SqliteConnection, name: &str, directory_path: &str) -> anyhow::Result<Option<Upserted>> {
    let result = sqlx::query("INSERT INTO series (name, directory_path) VALUES (?, ?) ON CONFLICT DO NOTHING")
        .bind(name)
        .bind(directory_path)
        .execute(&mut *con)
        .await?;
    let existing = sqlx::query_as::<_, (i64,)>("SELECT id FROM series WHERE directory_path = ?")
        .bind(directory_path)
        .fetch_optional(&mut *con)
        .await?;
    Ok(existing.map(|(id,)| Upserted {
        id,
        created: result.rows_affected() > 0,
    }))
}

pub async fn upsert_season(
    con: &mut SqliteConnection,
    series_id: i64,
    name: &str,
    season_number: Option<i64>,
    directory_path: &str,
) -> anyhow::Result<Upserted> {
    let result = sqlx::query("INSERT INTO seasons (series_id, name, season_number, directory_path) VALUES (?, ?, ?, ?) ON CONFLICT DO NOTHING")
        .bind(series_id)
        .bind(name)
        .bind(season_number)
        .bind(directory_path)
        .execute(&mut *con)
        .await?;
    let (id,) = sqlx::query_as::<_, (i64,)>("SELECT id FROM seasons WHERE directory_path = ?")
        .bind(directory_path)
        .fetch_one(&mut *con)
        .await?;
    Ok(Upserted {
        id,
        created: result.rows_affected() > 0,
    })
}

/// Returns whether a new row was created. An existing row is left untouched, metadata included.
pub async fn upsert_episode(con: &mut SqliteConnection, episode: &NewEpisode<'_>) -> anyhow::Result<bool> {
    let query = sqlx::query(INSERT_EPISODE_SQL.as_str())
        .bind(episode.season_id)
        .bind(episode.name)
        .bind(episode.episode_number)
        .bind(episode.file_path)
        .bind(episode.file_size)
        .bind(episode.file_extension);
    let result = bind_metadata(query, episode.metadata).execute(&mut *con).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn episode_exists(con: &mut SqliteConnection, file_path: &str) -> anyhow::Result<bool> {
    let found = sqlx::query_as::<_, (i64,)>("SELECT id FROM episodes WHERE file_path = ?")
        .bind(file_path)
        .fetch_optional(&mut *con)
        .await?;
    Ok(found.is_some())
}

pub async fn update_episode_metadata(con: &mut SqliteConnection, episode_id: i64, metadata: &EpisodeMetadata) -> anyhow::Result<bool> {
    let query = bind_metadata(sqlx::query(UPDATE_METADATA_SQL.as_str()), Some(metadata)).bind(episode_id);
    let result = query.execute(&mut *con).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn series_directory(con: &mut SqliteConnection, series_id: i64) -> anyhow::Result<Option<String>> {
    let found = sqlx::query_as::<_, (String,)>("SELECT directory_path FROM series WHERE id = ?")
        .bind(series_id)
        .fetch_optional(&mut *con)
        .await?;
    Ok(found.map(|(directory_path,)| directory_path))
}

pub async fn list_series(con: &mut SqliteConnection) -> anyhow::Result<Vec<Series>> {
    Ok(sqlx::query_as::<_, Series>("SELECT id, name, directory_path, created_at, updated_at FROM series ORDER BY name, id")
        .fetch_all(&mut *con)
        .await?)
}

/// Episodes due for a metadata refresh, as `(id, file_path)`.
pub async fn select_refresh_candidates(con: &mut SqliteConnection, options: &RefreshOptions) -> anyhow::Result<Vec<(i64, String)>> {
    let mut conditions = Vec::new();
    if !options.reprocess_all {
        conditions.push("(container_format IS NULL OR aspect_ratio IS NULL)");
    }
    if options.path_prefix.is_some() {
        conditions.push("substr(file_path, 1, length(?)) = ?");
    }
    if options.series_id.is_some() {
        conditions.push("season_id IN (SELECT id FROM seasons WHERE series_id = ?)");
    }
    let mut statement = "SELECT id, file_path FROM episodes".to_owned();
    if !conditions.is_empty() {
        statement.push_str(" WHERE ");
        statement.push_str(&conditions.join(" AND "));
    }
    statement.push_str(" ORDER BY id");

    let mut query = sqlx::query_as::<_, (i64, String)>(&statement);
    if let Some(path_prefix) = &options.path_prefix {
        query = query.bind(path_prefix.as_str()).bind(path_prefix.as_str());
    }
    if let Some(series_id) = options.series_id {
        query = query.bind(series_id);
    }
    Ok(query.fetch(&mut *con).try_collect().await?)
}

/// Re-probes stored episodes and overwrites their metadata block in place.
///
/// A missing file or a failed probe skips that episode only.
pub async fn refresh_metadata(pool: &SqlitePool, extractor: &MetadataExtractor, options: &RefreshOptions) -> anyhow::Result<RefreshStats> {
    let mut con = pool.acquire().await?;
    let candidates = select_refresh_candidates(&mut con, options).await?;
    let mut stats = RefreshStats {
        selected: candidates.len(),
        ..RefreshStats::default()
    };
    if candidates.is_empty() {
        log::info!("No episodes need a metadata refresh.");
        return Ok(stats);
    }
    log::info!("Refreshing metadata of {} episode(s)...", candidates.len());

    let mut probed = futures::stream::iter(candidates)
        .map(|(episode_id, file_path)| async move {
            let path = PathBuf::from(&file_path);
            if tokio::fs::metadata(&path).await.is_err() {
                return (episode_id, file_path, None);
            }
            let result = extractor.extract(&path).await;
            (episode_id, file_path, Some(result))
        })
        .buffer_unordered(options.workers.max(1));

    while let Some((episode_id, file_path, result)) = probed.next().await {
        let metadata = match result {
            None => {
                log::warn!("File not found: {}", file_path);
                stats.missing_files += 1;
                continue;
            }
            Some(Err(err)) => {
                log::error!("Could not extract metadata from {}: {}", file_path, err);
                stats.failed += 1;
                continue;
            }
            Some(Ok(metadata)) => metadata,
        };
        match update_episode_metadata(&mut con, episode_id, &metadata).await {
            Ok(true) => {
                stats.updated += 1;
                if stats.updated <= 5 || stats.updated % 10 == 0 {
                    log::info!(
                        "Metadata updated for {} | resolution: {} | codec: {}",
                        file_path,
                        metadata.resolution_label(),
                        metadata.video_codec.as_deref().unwrap_or("unknown"),
                    );
                }
            }
            Ok(false) => log::debug!("Episode {} vanished before its metadata was updated", episode_id),
            Err(err) => {
                log::error!("Could not store metadata for {}: {}", file_path, err);
                stats.failed += 1;
            }
        }
    }
    log::info!(
        "Metadata refresh done: {} of {} episode(s) updated.",
        stats.updated,
        stats.selected
    );
    Ok(stats)
}
