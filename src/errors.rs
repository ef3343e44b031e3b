use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors. Data-quality problems are reported as validation records instead.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing required layer: {0}")]
    MissingLayer(String),
    #[error("Invalid value for attribute '{field}': {reason}")]
    InvalidAttribute { field: &'static str, reason: String },
}

macro_rules! io_err {
    ($path:expr, $err:expr) => {
        $crate::errors::TopologyError::Io {
            path: $path.to_path_buf(),
            source: $err,
        }
    };
}

pub(crate) use io_err;

pub type Result<T> = std::result::Result<T, TopologyError>;
