use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flexi_logger::{Duplicate, FileSpec, Logger};
use structopt::StructOpt;

use media_archiver::config::{RefreshOptions, ScanOptions};
use media_archiver::probe::MediaInfoCli;
use media_archiver::{catalog, db, manual_migrations};
use media_archiver::{LibraryReport, LibraryScanner, MetadataExtractor, SqlitePoolConnection, StopSignal};

#[derive(StructOpt, Debug)]
#[structopt(name = "media-archiver", about = "Catalogs a media library into series, seasons and episodes")]
struct Opt {
    #[structopt(long, env = "DATABASE_URL", default_value = "sqlite:media_archiver.db3")]
    database_url: String,

    #[structopt(long, env = "MEDIA_PATH", default_value = "/mnt/mediathek", parse(from_os_str))]
    media_path: PathBuf,

    #[structopt(long, env = "MAX_RECURSION_DEPTH", default_value = "5")]
    max_depth: usize,

    #[structopt(long, env = "ARCHIVER_WORKERS", default_value = "4")]
    workers: usize,

    #[structopt(long, env = "PROBE_TIMEOUT_SECS", default_value = "120")]
    probe_timeout_secs: u64,

    #[structopt(long, env = "MEDIAINFO_BIN", default_value = "mediainfo")]
    mediainfo_bin: String,

    #[structopt(long, env = "ARCHIVER_LOG_FILE", parse(from_os_str))]
    log_file: Option<PathBuf>,

    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// Walk the media path, then refresh incomplete metadata and print statistics
    Scan {
        #[structopt(long)]
        no_refresh: bool,
    },
    /// Re-extract metadata of cataloged episodes
    Refresh {
        #[structopt(long)]
        path_prefix: Option<String>,
        /// Reprocess every episode of one series; takes precedence over --path-prefix and --all
        #[structopt(long)]
        series_id: Option<i64>,
        /// Reprocess every episode, not only those with incomplete metadata
        #[structopt(long)]
        all: bool,
    },
    /// Only create or extend the database structure
    Migrate,
    /// Print catalog statistics
    Stats,
    /// List every series with its id
    List,
}

impl Opt {
    async fn metadata_extractor(&self) -> anyhow::Result<Option<MetadataExtractor>> {
        let probe = MediaInfoCli::new(self.mediainfo_bin.clone());
        if !probe.is_available().await {
            log::warn!("{} is not available - episodes are cataloged without metadata", self.mediainfo_bin);
            return Ok(None);
        }
        log::info!("{} found, extracting video metadata", self.mediainfo_bin);
        Ok(Some(MetadataExtractor::new(
            Arc::new(probe),
            Duration::from_secs(self.probe_timeout_secs),
        )))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let mut logger = Logger::try_with_env_or_str("info")?;
    if let Some(log_file) = &opt.log_file {
        logger = logger
            .log_to_file(FileSpec::try_from(log_file)?)
            .duplicate_to_stderr(Duplicate::All);
    }
    let _logger = logger.start()?;

    let start_time = chrono::Local::now();
    log::info!("Start: {}", start_time.format("%Y-%m-%d %H:%M:%S"));
    log::info!("Database: {}", opt.database_url);

    let pool = db::connect(&opt.database_url, opt.workers as u32 + 1).await?;
    manual_migrations::migrate_manually(&pool).await?;

    match &opt.cmd {
        Cmd::Migrate => {}
        Cmd::Stats => {
            let mut con: SqlitePoolConnection = pool.acquire().await?;
            LibraryReport::gather(&mut con).await?.log(None);
        }
        Cmd::List => {
            let mut con = pool.acquire().await?;
            let series = catalog::list_series(&mut con).await?;
            log::info!("{} series in the catalog:", series.len());
            for series in series {
                log::info!("{} - {} ({})", series.id, series.name, series.directory_path);
            }
        }
        Cmd::Refresh { path_prefix, series_id, all } => {
            let extractor = match opt.metadata_extractor().await? {
                Some(extractor) => extractor,
                None => {
                    log::error!("Metadata refresh needs {} - nothing to do", opt.mediainfo_bin);
                    return Ok(());
                }
            };
            let options = match series_id {
                Some(series_id) => {
                    let mut con = pool.acquire().await?;
                    match catalog::series_directory(&mut con, *series_id).await? {
                        Some(directory) => log::info!("Refreshing every episode of series {} ({})", series_id, directory),
                        None => {
                            log::error!("There is no series with id {} - see the list subcommand", series_id);
                            return Ok(());
                        }
                    }
                    RefreshOptions {
                        workers: opt.workers,
                        ..RefreshOptions::for_series(*series_id)
                    }
                }
                None => RefreshOptions::builder()
                    .path_prefix(path_prefix.clone())
                    .reprocess_all(*all)
                    .workers(opt.workers)
                    .build(),
            };
            let stats = catalog::refresh_metadata(&pool, &extractor, &options).await?;
            log::info!("{:?}", stats);
        }
        Cmd::Scan { no_refresh } => {
            let stop = StopSignal::default();
            tokio::spawn({
                let stop = stop.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        log::warn!("Interrupted - finishing the current entries");
                        stop.stop();
                    }
                }
            });

            log::info!("Media path: {:?}", opt.media_path);
            let extractor = opt.metadata_extractor().await?;
            let options = ScanOptions::builder()
                .media_path(opt.media_path.clone())
                .max_depth(opt.max_depth)
                .workers(opt.workers)
                .build();
            let scanner = LibraryScanner::builder()
                .pool(pool.clone())
                .options(options)
                .extractor(extractor.clone())
                .stop(stop.clone())
                .build();
            let scan_stats = scanner.run().await?;

            if let (false, false, Some(extractor)) = (*no_refresh, stop.is_stopped(), &extractor) {
                log::info!("Refreshing metadata of existing episodes...");
                let options = RefreshOptions::builder().workers(opt.workers).build();
                catalog::refresh_metadata(&pool, extractor, &options).await?;
            }

            let mut con = pool.acquire().await?;
            LibraryReport::gather(&mut con).await?.log(Some(&scan_stats));
        }
    }

    log::info!("Done in {}", chrono::Local::now() - start_time);
    Ok(())
}
