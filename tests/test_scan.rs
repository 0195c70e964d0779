use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tempfile::{tempdir, TempDir};

use media_archiver::config::{RefreshOptions, ScanOptions, DEFAULT_PROBE_TIMEOUT};
use media_archiver::error::ProbeError;
use media_archiver::models::{Episode, Season, Series};
use media_archiver::probe::{Probe, ProbeReport, Track, TrackKind};
use media_archiver::{catalog, db, manual_migrations};
use media_archiver::{LibraryScanner, MetadataExtractor, ScanStats, StopSignal};

struct FailingProbe;

#[async_trait]
impl Probe for FailingProbe {
    async fn probe(&self, _path: &Path) -> Result<ProbeReport, ProbeError> {
        Err(ProbeError::MissingMedia)
    }
}

#[derive(Default)]
struct FixedProbe {
    calls: AtomicUsize,
}

#[async_trait]
impl Probe for FixedProbe {
    async fn probe(&self, _path: &Path) -> Result<ProbeReport, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProbeReport {
            tracks: vec![
                Track::new(TrackKind::General)
                    .with_text("format", "Matroska")
                    .with_number("duration", 1420.5),
                Track::new(TrackKind::Video)
                    .with_text("format", "HEVC")
                    .with_number("width", 1920.0)
                    .with_number("height", 1080.0),
                Track::new(TrackKind::Audio)
                    .with_text("format", "AAC")
                    .with_text("language", "de"),
            ],
        })
    }
}

/// Pulls the stop signal the first time it is asked about a file.
struct StoppingProbe {
    stop: StopSignal,
}

#[async_trait]
impl Probe for StoppingProbe {
    async fn probe(&self, _path: &Path) -> Result<ProbeReport, ProbeError> {
        self.stop.stop();
        Err(ProbeError::MissingMedia)
    }
}

struct Library {
    root: TempDir,
    _db_dir: TempDir,
    pool: SqlitePool,
}

impl Library {
    async fn new() -> Self {
        let root = tempdir().unwrap();
        let db_dir = tempdir().unwrap();
        let pool = open_catalog(db_dir.path()).await;
        Self { root, _db_dir: db_dir, pool }
    }

    fn touch(&self, relative: &str) {
        let path = self.root.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"not really a video").unwrap();
    }

    fn mkdir(&self, relative: &str) {
        std::fs::create_dir_all(self.root.path().join(relative)).unwrap();
    }

    fn path(&self, relative: &str) -> String {
        self.root.path().join(relative).to_string_lossy().into_owned()
    }

    async fn scan(&self, max_depth: usize, extractor: Option<MetadataExtractor>) -> ScanStats {
        LibraryScanner::builder()
            .pool(self.pool.clone())
            .options(ScanOptions::builder().media_path(self.root.path()).max_depth(max_depth).workers(2).build())
            .extractor(extractor)
            .build()
            .run()
            .await
            .unwrap()
    }

    async fn series(&self) -> Vec<Series> {
        sqlx::query_as("SELECT id, name, directory_path, created_at, updated_at FROM series ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    async fn seasons(&self) -> Vec<Season> {
        sqlx::query_as("SELECT id, series_id, name, season_number, directory_path FROM seasons ORDER BY directory_path")
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    async fn episodes(&self) -> Vec<Episode> {
        sqlx::query_as("SELECT id, season_id, name, episode_number, file_path, file_size, file_extension FROM episodes ORDER BY file_path")
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }
}

async fn open_catalog(dir: &Path) -> SqlitePool {
    let url = format!("sqlite:{}", dir.join("catalog.db3").display());
    let pool = db::connect(&url, 4).await.unwrap();
    manual_migrations::migrate_manually(&pool).await.unwrap();
    pool
}

fn extractor(probe: impl Probe + 'static) -> MetadataExtractor {
    MetadataExtractor::new(Arc::new(probe), DEFAULT_PROBE_TIMEOUT)
}

#[tokio::test]
async fn test_scan_builds_hierarchy() {
    let library = Library::new().await;
    library.touch("SeriesA/Staffel 1/01 - Pilot.mkv");

    let stats = library.scan(5, Some(extractor(FailingProbe))).await;
    assert_eq!(stats.series_created, 1);
    assert_eq!(stats.seasons_created, 1);
    assert_eq!(stats.episodes_created, 1);
    assert_eq!(stats.skipped_files, 0);
    assert_eq!(stats.probe_failures, 1);

    let series = library.series().await;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].name, "SeriesA");
    assert_eq!(series[0].directory_path, library.path("SeriesA"));

    let seasons = library.seasons().await;
    assert_eq!(seasons.len(), 1);
    assert_eq!(seasons[0].series_id, series[0].id);
    assert_eq!(seasons[0].name, "Staffel 1");
    assert_eq!(seasons[0].season_number, Some(1));

    let episodes = library.episodes().await;
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].season_id, seasons[0].id);
    assert_eq!(episodes[0].name, "01 - Pilot.mkv");
    assert_eq!(episodes[0].episode_number, Some(1));
    assert_eq!(episodes[0].file_path, library.path("SeriesA/Staffel 1/01 - Pilot.mkv"));
    assert_eq!(episodes[0].file_size, Some(18));
    assert_eq!(episodes[0].file_extension.as_deref(), Some(".mkv"));

    let (container_format, audio_tracks_count): (Option<String>, Option<i64>) =
        sqlx::query_as("SELECT container_format, audio_tracks_count FROM episodes")
            .fetch_one(&library.pool)
            .await
            .unwrap();
    assert_eq!(container_format, None);
    assert_eq!(audio_tracks_count, None);
}

#[tokio::test]
async fn test_scan_is_idempotent() {
    let library = Library::new().await;
    library.touch("SeriesA/Staffel 1/01 - Pilot.mkv");
    library.touch("SeriesA/Staffel 1/02 - Second.mkv");
    library.touch("SeriesB/S02/E05.mp4");

    let first = library.scan(5, None).await;
    assert_eq!(first.created_rows(), 2 + 2 + 3);

    let second = library.scan(5, None).await;
    assert_eq!(second.created_rows(), 0);
    assert_eq!(library.series().await.len(), 2);
    assert_eq!(library.seasons().await.len(), 2);
    assert_eq!(library.episodes().await.len(), 3);
}

#[tokio::test]
async fn test_existing_episodes_are_not_probed_again() {
    let library = Library::new().await;
    library.touch("Show/Season 1/01.mkv");
    let probe = Arc::new(FixedProbe::default());
    let extractor = MetadataExtractor::new(probe.clone(), DEFAULT_PROBE_TIMEOUT);

    library.scan(5, Some(extractor.clone())).await;
    library.scan(5, Some(extractor)).await;
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loose_videos_get_synthetic_season() {
    let library = Library::new().await;
    library.touch("Movie Series/03 - Third.mkv");
    library.touch("Movie Series/04 - Fourth.avi");

    let stats = library.scan(5, None).await;
    assert_eq!(stats.seasons_created, 1);

    let seasons = library.seasons().await;
    assert_eq!(seasons.len(), 1);
    assert_eq!(seasons[0].name, catalog::SYNTHETIC_SEASON_NAME);
    assert_eq!(seasons[0].season_number, Some(1));
    assert_eq!(seasons[0].directory_path, library.path("Movie Series"));

    let episodes = library.episodes().await;
    assert_eq!(episodes.len(), 2);
    assert!(episodes.iter().all(|episode| episode.season_id == seasons[0].id));
    assert_eq!(episodes[0].episode_number, Some(3));
    assert_eq!(episodes[1].episode_number, Some(4));

    let again = library.scan(5, None).await;
    assert_eq!(again.created_rows(), 0);
}

#[tokio::test]
async fn test_nested_directories_stay_in_season() {
    let library = Library::new().await;
    library.touch("Show/Season 2/01.mkv");
    library.touch("Show/Season 2/Extras/Making of.mkv");

    let stats = library.scan(5, None).await;
    assert_eq!(stats.seasons_created, 1);
    assert_eq!(stats.episodes_created, 2);

    let seasons = library.seasons().await;
    assert_eq!(seasons.len(), 1);
    assert_eq!(seasons[0].season_number, Some(2));
    let episodes = library.episodes().await;
    assert!(episodes.iter().all(|episode| episode.season_id == seasons[0].id));
    let making_of = episodes.iter().find(|episode| episode.name == "Making of.mkv").unwrap();
    assert_eq!(making_of.episode_number, None);
}

#[tokio::test]
async fn test_depth_limit_truncates_branches() {
    let library = Library::new().await;
    library.touch("Show/Season 1/01.mkv");
    library.touch("Show/Season 1/Extras/Deep/bonus.mkv");

    let stats = library.scan(2, None).await;
    assert_eq!(stats.truncated_branches, 1);
    assert_eq!(stats.episodes_created, 1);
    assert_eq!(library.episodes().await[0].name, "01.mkv");
}

#[tokio::test]
async fn test_non_video_files_are_skipped() {
    let library = Library::new().await;
    library.touch("readme.txt");
    library.touch("Show/poster.jpg");
    library.touch("Show/Season 1/01.mkv");
    library.touch("Show/Season 1/01.nfo");
    library.mkdir("Show/Empty Season");

    let stats = library.scan(5, None).await;
    assert_eq!(stats.skipped_files, 3);
    assert_eq!(stats.episodes_created, 1);
    // Season directories are cataloged even without episodes.
    assert_eq!(library.seasons().await.len(), 2);
}

#[tokio::test]
async fn test_unreachable_root_fails() {
    let db_dir = tempdir().unwrap();
    let pool = open_catalog(db_dir.path()).await;
    let missing = db_dir.path().join("no-such-library");

    let result = LibraryScanner::builder()
        .pool(pool.clone())
        .options(ScanOptions::builder().media_path(missing).build())
        .build()
        .run()
        .await;
    let err = result.unwrap_err();
    assert!(err.downcast_ref::<media_archiver::error::ScanError>().is_some());

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM series").fetch_one(&pool).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_stopped_scan_catalogs_nothing_new() {
    let library = Library::new().await;
    library.touch("Show/Season 1/01.mkv");
    let stop = StopSignal::default();
    stop.stop();

    let stats = LibraryScanner::builder()
        .pool(library.pool.clone())
        .options(ScanOptions::builder().media_path(library.root.path()).build())
        .stop(stop)
        .build()
        .run()
        .await
        .unwrap();
    assert_eq!(stats.created_rows(), 0);
}

#[tokio::test]
async fn test_references_are_consistent() {
    let library = Library::new().await;
    library.touch("A/Season 1/01.mkv");
    library.touch("A/Season 2/01.mkv");
    library.touch("B/loose.mkv");
    library.touch("C/S1/x/y/02.mkv");
    library.scan(6, None).await;

    let (dangling_seasons,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM seasons WHERE series_id NOT IN (SELECT id FROM series)")
            .fetch_one(&library.pool)
            .await
            .unwrap();
    let (dangling_episodes,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM episodes WHERE season_id NOT IN (SELECT id FROM seasons)")
            .fetch_one(&library.pool)
            .await
            .unwrap();
    assert_eq!(dangling_seasons, 0);
    assert_eq!(dangling_episodes, 0);
    assert_eq!(library.episodes().await.len(), 4);
}

#[tokio::test]
async fn test_series_name_clash_skips_second_directory() {
    let library = Library::new().await;
    let other_root = tempdir().unwrap();
    library.touch("Show/Season 1/01.mkv");
    std::fs::create_dir_all(other_root.path().join("Show/Season 1")).unwrap();
    std::fs::write(other_root.path().join("Show/Season 1/01.mkv"), b"x").unwrap();

    library.scan(5, None).await;
    let stats = LibraryScanner::builder()
        .pool(library.pool.clone())
        .options(ScanOptions::builder().media_path(other_root.path()).build())
        .build()
        .run()
        .await
        .unwrap();
    assert_eq!(stats.skipped_directories, 1);
    assert_eq!(stats.created_rows(), 0);
    assert_eq!(library.series().await.len(), 1);
}

#[tokio::test]
async fn test_refresh_fills_incomplete_metadata() {
    let library = Library::new().await;
    library.touch("Show/Season 1/01.mkv");
    library.touch("Show/Season 1/02.mkv");
    library.touch("Other/Season 1/01.mkv");
    library.scan(5, None).await;
    std::fs::remove_file(library.root.path().join("Show/Season 1/02.mkv")).unwrap();

    let extractor = extractor(FixedProbe::default());
    let options = RefreshOptions::builder().path_prefix(Some(library.path("Show"))).build();
    let stats = catalog::refresh_metadata(&library.pool, &extractor, &options).await.unwrap();
    assert_eq!(stats.selected, 2);
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.missing_files, 1);
    assert_eq!(stats.failed, 0);

    let rows: Vec<(String, Option<String>, Option<String>, Option<i64>, Option<String>)> = sqlx::query_as(
        "SELECT file_path, container_format, aspect_ratio, duration_ms, audio_languages FROM episodes ORDER BY file_path",
    )
    .fetch_all(&library.pool)
    .await
    .unwrap();
    let refreshed = rows.iter().find(|row| row.0 == library.path("Show/Season 1/01.mkv")).unwrap();
    assert_eq!(refreshed.1.as_deref(), Some("Matroska"));
    assert_eq!(refreshed.2.as_deref(), Some("16:9"));
    assert_eq!(refreshed.3, Some(1_420_500));
    assert_eq!(refreshed.4.as_deref(), Some("de"));
    let untouched = rows.iter().find(|row| row.0 == library.path("Other/Season 1/01.mkv")).unwrap();
    assert_eq!(untouched.1, None);

    // Complete rows are no longer selected unless everything is reprocessed.
    let stats = catalog::refresh_metadata(&library.pool, &extractor, &RefreshOptions::builder().build())
        .await
        .unwrap();
    assert_eq!(stats.selected, 2);
    let stats = catalog::refresh_metadata(&library.pool, &extractor, &RefreshOptions::builder().reprocess_all(true).build())
        .await
        .unwrap();
    assert_eq!(stats.selected, 3);
}

#[tokio::test]
async fn test_refresh_failures_leave_rows_alone() {
    let library = Library::new().await;
    library.touch("Show/Season 1/01.mkv");
    library.scan(5, None).await;

    let stats = catalog::refresh_metadata(&library.pool, &extractor(FailingProbe), &RefreshOptions::builder().build())
        .await
        .unwrap();
    assert_eq!(stats.selected, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(library.episodes().await.len(), 1);
}

#[tokio::test]
async fn test_migration_adds_missing_columns() {
    let db_dir = tempdir().unwrap();
    let url = format!("sqlite:{}", db_dir.path().join("old.db3").display());
    let pool = db::connect(&url, 1).await.unwrap();
    sqlx::query("CREATE TABLE episodes (id integer primary key autoincrement, season_id integer not null, name text not null, episode_number integer, file_path text not null, file_size integer, file_extension text, duration_ms integer)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO episodes (season_id, name, file_path, duration_ms) VALUES (1, 'old.mkv', '/old.mkv', 1000)")
        .execute(&pool)
        .await
        .unwrap();

    let added = manual_migrations::migrate_manually(&pool).await.unwrap();
    // Every metadata column but duration_ms, plus both timestamps.
    assert_eq!(added, manual_migrations::EPISODE_METADATA_COLUMNS.len() - 1 + 2);

    let (name, duration_ms, hdr_format): (String, Option<i64>, Option<String>) =
        sqlx::query_as("SELECT name, duration_ms, hdr_format FROM episodes")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "old.mkv");
    assert_eq!(duration_ms, Some(1000));
    assert_eq!(hdr_format, None);

    assert_eq!(manual_migrations::migrate_manually(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_stop_between_entries_leaves_rest_uncataloged() {
    let library = Library::new().await;
    library.touch("A/Season 1/01.mkv");
    library.touch("A/Season 1/02.mkv");
    library.touch("A/Season 1/03.mkv");
    library.touch("B/Season 1/01.mkv");
    let stop = StopSignal::default();

    let stats = LibraryScanner::builder()
        .pool(library.pool.clone())
        .options(ScanOptions::builder().media_path(library.root.path()).workers(1).build())
        .extractor(Some(extractor(StoppingProbe { stop: stop.clone() })))
        .stop(stop.clone())
        .build()
        .run()
        .await
        .unwrap();
    assert!(stop.is_stopped());
    assert_eq!(stats.episodes_created, 1);
    assert_eq!(stats.probe_failures, 1);
    assert_eq!(library.episodes().await.len(), 1);
    let series = library.series().await;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].name, "A");
}

#[tokio::test]
async fn test_series_refresh_ignores_series_sharing_a_name_prefix() {
    let library = Library::new().await;
    library.touch("Naruto/S1/01.mkv");
    library.touch("Naruto/S1/02.mkv");
    library.touch("Naruto Shippuden/S1/01.mkv");
    library.scan(5, None).await;
    let naruto = library.series().await.into_iter().find(|series| series.name == "Naruto").unwrap();

    let mut con = library.pool.acquire().await.unwrap();
    let candidates = catalog::select_refresh_candidates(&mut con, &RefreshOptions::for_series(naruto.id))
        .await
        .unwrap();
    let paths: Vec<String> = candidates.into_iter().map(|(_, file_path)| file_path).collect();
    assert_eq!(paths.len(), 2);
    assert!(paths.iter().all(|path| path.starts_with(&library.path("Naruto/"))));

    // A plain path prefix is still a plain string prefix.
    let options = RefreshOptions::builder().path_prefix(Some(library.path("Naruto"))).build();
    let candidates = catalog::select_refresh_candidates(&mut con, &options).await.unwrap();
    assert_eq!(candidates.len(), 3);
}

#[tokio::test]
async fn test_series_refresh_reprocesses_complete_rows() {
    let library = Library::new().await;
    library.touch("Show/Season 1/01.mkv");
    library.touch("Other/Season 1/01.mkv");
    library.scan(5, Some(extractor(FixedProbe::default()))).await;
    let show = library.series().await.into_iter().find(|series| series.name == "Show").unwrap();

    // Every row is complete, so nothing is due by default.
    let stats = catalog::refresh_metadata(&library.pool, &extractor(FixedProbe::default()), &RefreshOptions::builder().build())
        .await
        .unwrap();
    assert_eq!(stats.selected, 0);

    let stats = catalog::refresh_metadata(&library.pool, &extractor(FixedProbe::default()), &RefreshOptions::for_series(show.id))
        .await
        .unwrap();
    assert_eq!(stats.selected, 1);
    assert_eq!(stats.updated, 1);
}

#[tokio::test]
async fn test_list_series_orders_by_name() {
    let library = Library::new().await;
    library.touch("Zorro/Season 1/01.mkv");
    library.touch("Alf/Season 1/01.mkv");
    library.mkdir("Monk");
    library.scan(5, None).await;

    let mut con = library.pool.acquire().await.unwrap();
    let series = catalog::list_series(&mut con).await.unwrap();
    let names: Vec<&str> = series.iter().map(|series| series.name.as_str()).collect();
    assert_eq!(names, vec!["Alf", "Monk", "Zorro"]);
    assert_eq!(series[0].directory_path, library.path("Alf"));
}
