//! Harness failures.

use std::path::PathBuf;

use glibcshim_core::ShimError;
use glibcshim_core::elf::ElfError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed reading '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed writing '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("'{}' is not a usable image: {source}", path.display())]
    Image { path: PathBuf, source: ElfError },

    #[error(transparent)]
    Shim(#[from] ShimError),

    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("this host architecture cannot run foreign images")]
    UnsupportedHost,
}

pub type HarnessResult<T> = Result<T, HarnessError>;
