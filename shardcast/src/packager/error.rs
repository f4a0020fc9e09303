//! Packager error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::filemap::FilemapError;

/// A CDN basename claimed by two different contents.
#[derive(Debug, Clone)]
pub struct Collision {
    /// Flat CDN object name both contents want.
    pub cdn_name: String,
    /// Virtual paths involved.
    pub virtual_paths: Vec<String>,
}

/// Errors raised while packaging.
#[derive(Debug, Error)]
pub enum PackError {
    /// Bad arguments; nothing was written.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required external tool is missing or broken.
    #[error("required tool '{tool}' unavailable: {reason}")]
    MissingTool { tool: String, reason: String },

    /// The target volume cannot hold the package.
    #[error("insufficient disk space on {volume}: need {needed} bytes, {available} available")]
    DiskSpace {
        volume: PathBuf,
        needed: u64,
        available: u64,
    },

    /// Same CDN basename, different SHA-256. Aborted before writing.
    #[error("cdn filename collision on {}", .0.iter().map(|c| c.cdn_name.as_str()).collect::<Vec<_>>().join(", "))]
    Collision(Vec<Collision>),

    /// The external GGUF splitter failed.
    #[error("gguf split failed: {0}")]
    SplitFailed(String),

    /// An existing filemap in the output directory is invalid.
    #[error(transparent)]
    Filemap(#[from] FilemapError),

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PackError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        PackError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
