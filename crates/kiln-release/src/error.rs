//! Release retrieval error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("no release matching version {version} found in {repository}")]
    NotFound { repository: String, version: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("failed to create target file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to download asset {url} to {path}: {reason}")]
    Copy {
        url: String,
        path: PathBuf,
        reason: String,
    },

    #[error("failed to open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract to target file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ReleaseError>;
