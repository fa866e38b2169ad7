mod audio_cd;
mod folder;
mod scripted;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use metadata::MetadataError;

use crate::MemoryCollection;

pub use audio_cd::{AudioCdLoader, CdTrackInfo, DiscInfo};
pub use folder::{track_info_from_file, FolderLoader};
pub use scripted::ScriptedLoader;

/// A job that populates one collection from a backend.
///
/// Jobs run on a blocking thread and add entities as they discover them, so
/// queries see partial data while the load is in progress. A job checks the
/// token between entities and stops with [`LoaderError::Cancelled`].
pub trait LoaderJob: Send + Sync {
    fn name(&self) -> &str;

    fn load(
        &self,
        collection: &MemoryCollection,
        cancel: &CancellationToken,
    ) -> Result<LoadStats, LoaderError>;
}

impl<T: LoaderJob + ?Sized> LoaderJob for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load(
        &self,
        collection: &MemoryCollection,
        cancel: &CancellationToken,
    ) -> Result<LoadStats, LoaderError> {
        (**self).load(collection, cancel)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub added: usize,
    pub skipped: usize,
    pub tag_errors: usize,
}

#[derive(Debug)]
pub enum LoaderError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Json(serde_json::Error),
    Watch(notify::Error),
    Cancelled,
    Invalid(String),
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderError::Io(err) => write!(f, "io error: {}", err),
            LoaderError::Metadata(err) => write!(f, "metadata error: {}", err),
            LoaderError::Json(err) => write!(f, "json error: {}", err),
            LoaderError::Watch(err) => write!(f, "watch error: {}", err),
            LoaderError::Cancelled => write!(f, "load cancelled"),
            LoaderError::Invalid(message) => write!(f, "invalid source: {}", message),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        LoaderError::Io(err)
    }
}

impl From<MetadataError> for LoaderError {
    fn from(err: MetadataError) -> Self {
        LoaderError::Metadata(err)
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Json(err)
    }
}

impl From<notify::Error> for LoaderError {
    fn from(err: notify::Error) -> Self {
        LoaderError::Watch(err)
    }
}
