use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;

use crate::catalog::{self, NewEpisode, SYNTHETIC_SEASON_NAME, SYNTHETIC_SEASON_NUMBER};
use crate::config::ScanOptions;
use crate::error::ScanError;
use crate::media_metadata::MetadataExtractor;
use crate::numbering::{extract_episode_number, extract_season_number};
use crate::stats::ScanStats;

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "mpg", "mpeg", "m2ts", "3gp",
    "vob", "divx", "ogm", "ogg", "ogv", "asf", "rm", "rmvb", "m2v", "svi", "mxf", "roq", "nsv",
    "f4v", "f4p", "f4a", "f4b",
];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            let ext = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Where the walk stands in the series → season hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkContext {
    Root,
    Series { series_id: i64 },
    Season { series_id: i64, season_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryRole {
    Series,
    Season,
    /// Nested inside a season ("Extras" and the like). Its videos belong to that season.
    SeasonSubdirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Episode { season_id: i64 },
    /// A video directly in a series directory. It goes to the series' synthetic season.
    LooseEpisode { series_id: i64 },
    Skipped,
}

impl WalkContext {
    pub fn classify_directory(&self) -> DirectoryRole {
        match self {
            Self::Root => DirectoryRole::Series,
            Self::Series { .. } => DirectoryRole::Season,
            Self::Season { .. } => DirectoryRole::SeasonSubdirectory,
        }
    }

    pub fn classify_file(&self, path: &Path) -> FileRole {
        if !is_video_file(path) {
            return FileRole::Skipped;
        }
        match *self {
            Self::Root => FileRole::Skipped,
            Self::Series { series_id } => FileRole::LooseEpisode { series_id },
            Self::Season { season_id, .. } => FileRole::Episode { season_id },
        }
    }

    pub fn enter_series(series_id: i64) -> Self {
        Self::Series { series_id }
    }

    /// The context for a season directory, or for a subdirectory of the current season.
    pub fn enter_season(&self, season_id: i64) -> Self {
        match *self {
            Self::Series { series_id } | Self::Season { series_id, .. } => Self::Season { series_id, season_id },
            Self::Root => *self,
        }
    }
}

/// Cooperative stop flag, checked between directory entries.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(typed_builder::TypedBuilder)]
pub struct LibraryScanner {
    pool: SqlitePool,
    options: ScanOptions,
    /// Without an extractor episodes are cataloged with no metadata.
    #[builder(default)]
    extractor: Option<MetadataExtractor>,
    #[builder(default)]
    stop: StopSignal,
}

impl LibraryScanner {
    /// Walks the media root and catalogs every series below it.
    ///
    /// Fails only when the root cannot be listed or no database connection can be had. Anything
    /// going wrong below the root is logged and counted in the returned statistics.
    pub async fn run(&self) -> anyhow::Result<ScanStats> {
        let root = &self.options.media_path;
        log::info!("Scanning {:?} (maximum depth {})", root, self.options.max_depth);

        let mut stats = ScanStats::default();
        let mut series_dirs = Vec::new();
        let mut read_dir_result = match fs::read_dir(root).await {
            Ok(ok) => ReadDirStream::new(ok),
            Err(source) => {
                return Err(ScanError::RootUnreachable {
                    path: root.clone(),
                    source,
                }
                .into())
            }
        };
        while let Some(dir_entry) = read_dir_result.try_next().await.map_err(|source| ScanError::RootUnreachable {
            path: root.clone(),
            source,
        })? {
            let path = dir_entry.path();
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_dir() => series_dirs.push(path),
                Ok(_) => {
                    log::debug!("{:?} is not inside a series - skipping", path);
                    stats.skipped_files += 1;
                }
                Err(err) => {
                    log::error!("Cannot inspect {:?}: {}", path, err);
                    stats.errors += 1;
                }
            }
        }
        series_dirs.sort();
        log::info!("Processing {} candidate series directories...", series_dirs.len());

        let mut workers = futures::stream::iter(series_dirs)
            .map(|series_dir| self.scan_series(series_dir))
            .buffer_unordered(self.options.workers.max(1));
        while let Some(series_stats) = workers.next().await {
            stats += series_stats?;
        }
        if self.stop.is_stopped() {
            log::warn!("Scan stopped before completion");
        }
        Ok(stats)
    }

    async fn scan_series(&self, series_dir: PathBuf) -> anyhow::Result<ScanStats> {
        let mut stats = ScanStats::default();
        if self.stop.is_stopped() {
            return Ok(stats);
        }
        let mut con = self.pool.acquire().await?;
        let name = display_name(&series_dir);
        let series = match catalog::upsert_series(&mut con, &name, &path_text(&series_dir)).await {
            Ok(Some(series)) => series,
            Ok(None) => {
                log::warn!("Another directory is already cataloged as series {:?} - skipping {:?}", name, series_dir);
                stats.skipped_directories += 1;
                return Ok(stats);
            }
            Err(err) => {
                log::error!("Could not add series {:?}: {}", name, err);
                stats.errors += 1;
                return Ok(stats);
            }
        };
        if series.created {
            stats.series_created += 1;
            log::info!("Series added: {}", name);
        }
        self.walk(&mut con, series_dir, WalkContext::enter_series(series.id), &mut stats).await;
        Ok(stats)
    }

    /// Walks one series directory. Subdirectories wait on a stack together with the context
    /// their parent gave them.
    async fn walk(&self, con: &mut SqliteConnection, series_dir: PathBuf, context: WalkContext, stats: &mut ScanStats) {
        let mut search_in = vec![(series_dir, context, 1)];
        while let Some((dir, context, depth)) = search_in.pop() {
            if depth > self.options.max_depth {
                log::warn!("Maximum recursion depth ({}) reached at {:?}", self.options.max_depth, dir);
                stats.truncated_branches += 1;
                continue;
            }
            let mut read_dir_result = match fs::read_dir(&dir).await {
                Ok(ok) => ReadDirStream::new(ok),
                Err(err) => {
                    log::error!("Cannot read directory {:?}: {}", dir, err);
                    stats.errors += 1;
                    continue;
                }
            };
            let mut synthetic_season = None;
            loop {
                if self.stop.is_stopped() {
                    return;
                }
                let dir_entry = match read_dir_result.try_next().await {
                    Ok(Some(dir_entry)) => dir_entry,
                    Ok(None) => break,
                    Err(err) => {
                        log::error!("Error while reading {:?}: {}", dir, err);
                        stats.errors += 1;
                        break;
                    }
                };
                let path = dir_entry.path();
                let metadata = match fs::metadata(&path).await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        log::error!("Cannot inspect {:?}: {}", path, err);
                        stats.errors += 1;
                        continue;
                    }
                };

                if metadata.is_dir() {
                    let child_context = match context.classify_directory() {
                        DirectoryRole::Season => match self.register_season(con, &context, &path, stats).await {
                            Some(season_id) => context.enter_season(season_id),
                            None => continue,
                        },
                        DirectoryRole::SeasonSubdirectory => context,
                        DirectoryRole::Series => {
                            log::debug!("{:?} looks like a series below the root - skipping", path);
                            continue;
                        }
                    };
                    search_in.push((path, child_context, depth + 1));
                    continue;
                }

                let season_id = match context.classify_file(&path) {
                    FileRole::Skipped => {
                        stats.skipped_files += 1;
                        continue;
                    }
                    FileRole::Episode { season_id } => season_id,
                    FileRole::LooseEpisode { series_id } => match synthetic_season {
                        Some(season_id) => season_id,
                        None => match self.register_synthetic_season(con, series_id, &dir, stats).await {
                            Some(season_id) => {
                                synthetic_season = Some(season_id);
                                season_id
                            }
                            None => continue,
                        },
                    },
                };
                self.catalog_episode(con, season_id, &path, metadata.len(), stats).await;
            }
        }
    }

    async fn register_season(&self, con: &mut SqliteConnection, context: &WalkContext, path: &Path, stats: &mut ScanStats) -> Option<i64> {
        let series_id = match *context {
            WalkContext::Series { series_id } => series_id,
            _ => return None,
        };
        let name = display_name(path);
        let season_number = extract_season_number(&name);
        match catalog::upsert_season(con, series_id, &name, season_number, &path_text(path)).await {
            Ok(season) => {
                if season.created {
                    stats.seasons_created += 1;
                    match season_number {
                        Some(number) => log::info!("Season added: {} (season {})", name, number),
                        None => log::info!("Season added: {} (season unknown)", name),
                    }
                }
                Some(season.id)
            }
            Err(err) => {
                log::error!("Could not add season {:?}: {}", name, err);
                stats.errors += 1;
                None
            }
        }
    }

    async fn register_synthetic_season(&self, con: &mut SqliteConnection, series_id: i64, series_dir: &Path, stats: &mut ScanStats) -> Option<i64> {
        match catalog::upsert_season(con, series_id, SYNTHETIC_SEASON_NAME, Some(SYNTHETIC_SEASON_NUMBER), &path_text(series_dir)).await {
            Ok(season) => {
                if season.created {
                    stats.seasons_created += 1;
                    log::info!("Season added: {} for {:?}", SYNTHETIC_SEASON_NAME, series_dir);
                }
                Some(season.id)
            }
            Err(err) => {
                log::error!("Could not add the default season of {:?}: {}", series_dir, err);
                stats.errors += 1;
                None
            }
        }
    }

    async fn catalog_episode(&self, con: &mut SqliteConnection, season_id: i64, path: &Path, file_size: u64, stats: &mut ScanStats) {
        let file_path = path_text(path);
        match catalog::episode_exists(con, &file_path).await {
            Ok(true) => {
                log::trace!("{} is already cataloged", file_path);
                return;
            }
            Ok(false) => {}
            Err(err) => {
                log::error!("Could not look up episode {}: {}", file_path, err);
                stats.errors += 1;
                return;
            }
        }

        let metadata = match &self.extractor {
            Some(extractor) => match extractor.extract(path).await {
                Ok(metadata) => Some(metadata),
                Err(err) => {
                    log::warn!("Could not extract metadata from {}: {}", file_path, err);
                    stats.probe_failures += 1;
                    None
                }
            },
            None => None,
        };

        let name = display_name(path);
        let file_extension = path.extension().map(|ext| format!(".{}", ext.to_string_lossy()));
        let episode = NewEpisode::builder()
            .season_id(season_id)
            .name(&name)
            .episode_number(extract_episode_number(&name))
            .file_path(&file_path)
            .file_size(i64::try_from(file_size).ok())
            .file_extension(file_extension.as_deref())
            .metadata(metadata.as_ref())
            .build();
        match catalog::upsert_episode(con, &episode).await {
            Ok(true) => {
                stats.episodes_created += 1;
                log::info!(
                    "Episode added: {} | resolution: {} | codec: {}",
                    name,
                    metadata.as_ref().map_or_else(|| "unknown".to_owned(), |m| m.resolution_label()),
                    metadata.as_ref().and_then(|m| m.video_codec.as_deref()).unwrap_or("unknown"),
                );
            }
            Ok(false) => log::trace!("{} was cataloged concurrently", file_path),
            Err(err) => {
                log::error!("Could not add episode {}: {}", name, err);
                stats.errors += 1;
            }
        }
    }
}
