pub mod capability;
pub mod changer;
pub mod delivery;
pub mod loader;
pub mod maps;
pub mod memory_query;
pub mod model;
pub mod query;
pub mod registry;
pub mod watch;

use common::Statistics;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub use capability::{Action, Bookmark, Capability, CapabilityKind, CapabilityRegistry};
pub use changer::MapChanger;
pub use delivery::{QueryEvent, QueryHandle, QueryOutcome, QueryResults, QueryState};
pub use loader::{
    AudioCdLoader, CdTrackInfo, DiscInfo, FolderLoader, LoadStats, LoaderError, LoaderJob,
    ScriptedLoader,
};
pub use maps::{CollectionMaps, CollectionStats};
pub use memory_query::MemoryQueryMaker;
pub use model::{
    Album, AlbumId, AlbumKey, Artist, ArtistId, Composer, ComposerId, EntityRef, Genre, GenreId,
    Track, TrackId, Year, YearId,
};
pub use query::{
    AlbumQueryMode, ArtistQueryMode, Field, NumberComparison, Predicate, Query, QueryMaker,
    QueryType, ReturnFunction, TextFilter,
};
pub use registry::{CollectionLoaded, CollectionRegistry, LoadStatus};
pub use watch::FolderWatcher;

/// The in-memory store of one collection.
///
/// Readers share the lock; loaders mutate through [`MemoryCollection::change`]
/// or the raw [`CollectionMaps`] operations behind [`MemoryCollection::write`].
#[derive(Debug, Default)]
pub struct MemoryCollection {
    maps: RwLock<CollectionMaps>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, CollectionMaps> {
        self.maps.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, CollectionMaps> {
        self.maps.write()
    }

    /// Runs a sequence of changes under one write lock. Readers never see
    /// a partially applied sequence.
    pub fn change<R>(&self, f: impl FnOnce(&mut MapChanger<'_>) -> R) -> R {
        let mut maps = self.maps.write();
        let mut changer = MapChanger::new(&mut maps);
        f(&mut changer)
    }

    pub fn clear(&self) {
        self.change(|changer| changer.clear());
    }

    pub fn is_empty(&self) -> bool {
        self.maps.read().is_empty()
    }

    pub fn stats(&self) -> CollectionStats {
        self.maps.read().stats()
    }

    pub fn track_by_url(&self, url: &str) -> Option<Track> {
        self.maps.read().track_by_url(url).cloned()
    }

    /// Applies `f` to the statistics of the track at `url`. Returns false
    /// when the url is unknown.
    pub fn update_statistics(&self, url: &str, f: impl FnOnce(&mut Statistics)) -> bool {
        let mut maps = self.maps.write();
        let id = match maps.track_id_by_url(url) {
            Some(id) => id,
            None => return false,
        };
        match maps.track_mut(id) {
            Some(track) => {
                f(&mut track.statistics);
                debug!("Updated statistics of {}", url);
                true
            }
            None => false,
        }
    }
}
