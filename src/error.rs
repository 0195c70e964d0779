use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A file could not be probed. Callers treat this as "metadata unknown", never as a reason to
/// stop a walk.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("could not run {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe of {path:?} exited with {status:?}: {stderr}")]
    Failed {
        path: PathBuf,
        status: Option<i32>,
        stderr: String,
    },

    #[error("probe output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("probe output has no media section")]
    MissingMedia,

    #[error("probe of {path:?} did not finish within {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("probe worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("media root {path:?} is unreachable: {source}")]
    RootUnreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
