use std::ops::AddAssign;

use sqlx::sqlite::SqliteConnection;

/// Counters of one walk. Workers each keep their own and the caller adds them up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub series_created: usize,
    pub seasons_created: usize,
    pub episodes_created: usize,
    pub skipped_files: usize,
    /// Directories left out because their name or path clashed with an existing row.
    pub skipped_directories: usize,
    pub truncated_branches: usize,
    pub probe_failures: usize,
    pub errors: usize,
}

impl ScanStats {
    pub fn created_rows(&self) -> usize {
        self.series_created + self.seasons_created + self.episodes_created
    }
}

impl AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.series_created += other.series_created;
        self.seasons_created += other.seasons_created;
        self.episodes_created += other.episodes_created;
        self.skipped_files += other.skipped_files;
        self.skipped_directories += other.skipped_directories;
        self.truncated_branches += other.truncated_branches;
        self.probe_failures += other.probe_failures;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub selected: usize,
    pub updated: usize,
    pub missing_files: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct LibraryReport {
    pub series: i64,
    pub seasons: i64,
    pub episodes: i64,
    pub top_series: Vec<(String, i64)>,
    pub resolutions: Vec<(String, i64)>,
    pub codecs: Vec<(String, i64)>,
}

impl LibraryReport {
    pub async fn gather(con: &mut SqliteConnection) -> anyhow::Result<Self> {
        let (series,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM series").fetch_one(&mut *con).await?;
        let (seasons,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM seasons").fetch_one(&mut *con).await?;
        let (episodes,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM episodes").fetch_one(&mut *con).await?;
        let top_series = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT series.name, COUNT(episodes.id) AS episode_count
            FROM series
                INNER JOIN seasons ON series.id = seasons.series_id
                INNER JOIN episodes ON seasons.id = episodes.season_id
            GROUP BY series.id
            ORDER BY episode_count DESC, series.name
            LIMIT 10
            "#,
        )
        .fetch_all(&mut *con)
        .await?;
        let resolutions = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT resolution_width || 'x' || resolution_height AS resolution, COUNT(*) AS count
            FROM episodes
            WHERE resolution_width IS NOT NULL AND resolution_height IS NOT NULL
            GROUP BY resolution
            ORDER BY count DESC, resolution
            LIMIT 5
            "#,
        )
        .fetch_all(&mut *con)
        .await?;
        let codecs = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT video_codec, COUNT(*) AS count
            FROM episodes
            WHERE video_codec IS NOT NULL
            GROUP BY video_codec
            ORDER BY count DESC, video_codec
            LIMIT 5
            "#,
        )
        .fetch_all(&mut *con)
        .await?;
        Ok(Self {
            series,
            seasons,
            episodes,
            top_series,
            resolutions,
            codecs,
        })
    }

    pub fn log(&self, scan: Option<&ScanStats>) {
        let separator = "=".repeat(50);
        log::info!("{}", separator);
        log::info!("STATISTICS");
        log::info!("{}", separator);
        log::info!("Stored in the catalog:");
        log::info!("- Series: {}", self.series);
        log::info!("- Seasons: {}", self.seasons);
        log::info!("- Episodes: {}", self.episodes);
        if let Some(scan) = scan {
            log::info!("Created by this scan:");
            log::info!("- Series: {}", scan.series_created);
            log::info!("- Seasons: {}", scan.seasons_created);
            log::info!("- Episodes: {}", scan.episodes_created);
            log::info!("- Skipped files: {}", scan.skipped_files);
            log::info!("- Skipped directories: {}", scan.skipped_directories);
            log::info!("- Truncated branches: {}", scan.truncated_branches);
            log::info!("- Probe failures: {}", scan.probe_failures);
            log::info!("- Errors: {}", scan.errors);
        }
        if !self.top_series.is_empty() {
            log::info!("Top series by episode count:");
            for (i, (name, count)) in self.top_series.iter().enumerate() {
                log::info!("{}. {} - {} episodes", i + 1, name, count);
            }
        }
        if !self.resolutions.is_empty() {
            log::info!("Most common resolutions:");
            for (i, (resolution, count)) in self.resolutions.iter().enumerate() {
                log::info!("{}. {} - {} episodes", i + 1, resolution, count);
            }
        }
        if !self.codecs.is_empty() {
            log::info!("Most common video codecs:");
            for (i, (codec, count)) in self.codecs.iter().enumerate() {
                log::info!("{}. {} - {} episodes", i + 1, codec, count);
            }
        }
    }
}
