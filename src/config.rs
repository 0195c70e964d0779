use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct ScanOptions {
    #[builder(setter(into))]
    pub media_path: PathBuf,
    #[builder(default = 5)]
    pub max_depth: usize,
    #[builder(default = 4)]
    pub workers: usize,
}

#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct RefreshOptions {
    #[builder(default, setter(into))]
    pub path_prefix: Option<String>,
    /// Only episodes in seasons of this series.
    #[builder(default)]
    pub series_id: Option<i64>,
    /// Reprocess every selected episode, not only those with incomplete metadata.
    #[builder(default)]
    pub reprocess_all: bool,
    #[builder(default = 4)]
    pub workers: usize,
}

impl RefreshOptions {
    /// Every episode of one series, complete or not.
    pub fn for_series(series_id: i64) -> Self {
        Self::builder().series_id(Some(series_id)).reprocess_all(true).build()
    }
}

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(120);
