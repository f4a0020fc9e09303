//! CLI error type.

use thiserror::Error;

/// Errors surfaced to the terminal with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Pack(#[from] shardcast::packager::PackError),

    #[error("{0}")]
    Resolve(#[from] shardcast::resolver::ResolveError),

    #[error("{0}")]
    Download(#[from] shardcast::downloader::DownloadError),

    #[error("{0}")]
    Store(#[from] shardcast::StoreError),

    #[error("cache: {0}")]
    Cache(std::io::Error),

    #[error("{0}")]
    Run(String),
}
