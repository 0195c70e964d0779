use futures::stream::TryStreamExt;
use hashbrown::HashSet;
use sqlx::sqlite::SqlitePool;

/// Episode columns that may be missing from databases created by older versions. They are added
/// in place, never dropped or rewritten.
pub const EPISODE_METADATA_COLUMNS: &[(&str, &str)] = &[
    ("duration_ms", "integer"),
    ("video_format", "text"),
    ("video_codec", "text"),
    ("video_bitrate", "integer"),
    ("resolution_width", "integer"),
    ("resolution_height", "integer"),
    ("framerate", "real"),
    ("aspect_ratio", "text"),
    ("color_depth", "text"),
    ("hdr_format", "text"),
    ("color_space", "text"),
    ("scan_type", "text"),
    ("encoder", "text"),
    ("audio_codec", "text"),
    ("audio_channels", "integer"),
    ("audio_bitrate", "integer"),
    ("audio_sample_rate", "integer"),
    ("audio_language", "text"),
    ("audio_tracks_count", "integer"),
    ("audio_languages", "text"),
    ("subtitles_language", "text"),
    ("subtitles_formats", "text"),
    ("subtitles_count", "integer"),
    ("forced_subtitles", "boolean"),
    ("container_format", "text"),
    ("creation_time", "datetime"),
];

const TIMESTAMP_COLUMNS: &[(&str, &str)] = &[("created_at", "timestamp"), ("updated_at", "timestamp")];

pub async fn migrate_manually(pool: &SqlitePool) -> anyhow::Result<usize> {
    let mut added = 0;
    added += ensure_table(
        pool,
        "series",
        "name text not null, directory_path text not null",
        &[],
    )
    .await?;
    added += ensure_table(
        pool,
        "seasons",
        "series_id integer not null references series(id), name text not null, season_number integer, directory_path text not null",
        &[],
    )
    .await?;
    added += ensure_table(
        pool,
        "episodes",
        "season_id integer not null references seasons(id), name text not null, episode_number integer, file_path text not null, file_size integer, file_extension text",
        EPISODE_METADATA_COLUMNS,
    )
    .await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS series_unique_name ON series(name)").execute(pool).await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS series_unique_path ON series(directory_path)").execute(pool).await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS seasons_unique_path ON seasons(directory_path)").execute(pool).await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS episodes_unique_path ON episodes(file_path)").execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS seasons_series ON seasons(series_id)").execute(pool).await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS episodes_season ON episodes(season_id)").execute(pool).await?;
    log::info!("Database structure is up to date ({} column(s) added)", added);
    Ok(added)
}

/// Creates `table_name` if it does not exist. Otherwise adds whichever of `added_columns` (and
/// the timestamp columns) it lacks. Returns the number of columns added.
async fn ensure_table(
    pool: &SqlitePool,
    table_name: &'static str,
    table_columns: &'static str,
    added_columns: &'static [(&'static str, &'static str)],
) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await?;
    let exists = sqlx::query_as::<_, (String,)>("SELECT sql FROM sqlite_master WHERE type == 'table' AND name = ?")
        .bind(table_name)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        log::debug!("{} does not exist - creating from scratch.", table_name);
        let mut statement = format!("CREATE TABLE {} (id integer primary key autoincrement, {}", table_name, table_columns);
        for (column_name, column_type) in added_columns {
            statement.push_str(&format!(", {} {}", column_name, column_type));
        }
        statement.push_str(", created_at timestamp default CURRENT_TIMESTAMP, updated_at timestamp default CURRENT_TIMESTAMP)");
        sqlx::query(&statement).execute(&mut *tx).await?;
        tx.commit().await?;
        return Ok(0);
    }

    let existing_columns: HashSet<String> = sqlx::query_as::<_, (String,)>("SELECT name FROM pragma_table_info(?)")
        .bind(table_name)
        .fetch(&mut *tx)
        .map_ok(|(name,)| name.to_lowercase())
        .try_collect()
        .await?;
    log::trace!("{} has columns {:?}", table_name, existing_columns);

    let mut added = 0;
    for (column_name, column_type) in added_columns.iter().chain(TIMESTAMP_COLUMNS) {
        if existing_columns.contains(*column_name) {
            continue;
        }
        let statement = format!("ALTER TABLE {} ADD COLUMN {} {}", table_name, column_name, column_type);
        sqlx::query(&statement).execute(&mut *tx).await?;
        log::info!("Added column {} ({}) to {}", column_name, column_type, table_name);
        added += 1;
    }
    tx.commit().await?;
    Ok(added)
}
