use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("tag source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("failed to read tag source {path}: {message}")]
    SourceRead { path: PathBuf, message: String },

    #[error("output store unreadable: {0}")]
    StoreUnreadable(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid variant kind: {0}")]
    InvalidVariant(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("search API returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("malformed search page: {0}")]
    ApiParse(String),

    #[error("asset request returned status {status}: {url}")]
    AssetStatus { status: u16, url: String },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("format conversion failed for {file}: {message}")]
    Conversion { file: String, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("tabular log error: {0}")]
    Csv(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("interrupted")]
    Cancelled,
}

impl HarvestError {
    /// Conditions that abort the whole run without producing a resume line.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::SourceNotFound(_)
                | HarvestError::SourceRead { .. }
                | HarvestError::StoreUnreadable(_)
                | HarvestError::ConfigRead(_)
                | HarvestError::ConfigParse(_)
                | HarvestError::InvalidConfig(_)
                | HarvestError::InvalidVariant(_)
        )
    }
}
