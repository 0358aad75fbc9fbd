use std::path::PathBuf;

use thiserror::Error;

/// Problems with the requested run, detected before anything is written.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("the hierarchy needs at least one split factor")]
    EmptyHierarchy,
    #[error("invalid split factor {0}: every factor must be at least 2")]
    InvalidSplitFactor(usize),
    #[error("split factors {0:?} overflow the split count")]
    SplitCountOverflow(Vec<usize>),
    #[error("unknown groupby key '{0}' (expected seg_id, talk_id or speaker_id)")]
    UnknownGroupbyKey(String),
    #[error("unknown group order '{0}' (expected key, first-seen or longest-first)")]
    UnknownGroupOrder(String),
    #[error("sampling fraction must be in (0, 1], got {0}")]
    InvalidFraction(f64),
    #[error("tolerance must be finite and non-negative, got {0}")]
    InvalidTolerance(f64),
    #[error("rayon thread count must be at least 1")]
    InvalidThreadCount,
}

/// Problems reading or writing a segment or level table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to read or write parquet table {path}: {source}")]
    Parquet {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },
    #[error("arrow error on table {path}: {source}")]
    Arrow {
        path: PathBuf,
        #[source]
        source: arrow::error::ArrowError,
    },
    #[error("I/O error on table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("table {path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: String },
    #[error("table {path}, row {row}: {message}")]
    InvalidRow {
        path: PathBuf,
        row: usize,
        message: String,
    },
    #[error("table {path}: segment '{seg_id}' appears more than once")]
    DuplicateSegment { path: PathBuf, seg_id: String },
}

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("failed to prepare directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build the materialization thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid progress bar template: {0}")]
    Progress(#[from] indicatif::style::TemplateError),
}

pub type Result<T, E = PartitionError> = std::result::Result<T, E>;
