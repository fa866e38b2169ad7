use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::loader::{LoadStats, LoaderError, LoaderJob};
use crate::memory_query::MemoryQueryMaker;
use crate::watch::FolderWatcher;
use crate::MemoryCollection;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CollectionLoaded {
    pub id: String,
    pub success: bool,
    pub message: Option<String>,
    pub stats: LoadStats,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Loading { started: SystemTime },
    Ready(LoadStats),
    /// The load failed after gathering some data; the collection is kept.
    Partial(String),
}

struct Entry {
    collection: Arc<MemoryCollection>,
    status: LoadStatus,
    cancel: CancellationToken,
    watcher: Option<FolderWatcher>,
}

#[derive(Default)]
struct RegistryInner {
    entries: RwLock<HashMap<String, Entry>>,
    subscribers: Mutex<Vec<UnboundedSender<CollectionLoaded>>>,
}

/// Owns the collections of one session and the jobs that populate them.
///
/// Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct CollectionRegistry {
    inner: Arc<RegistryInner>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives one [`CollectionLoaded`] per finished load.
    pub fn subscribe(&self) -> UnboundedReceiver<CollectionLoaded> {
        let (tx, rx) = unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Registers an already populated collection.
    pub fn insert(&self, id: impl Into<String>, collection: Arc<MemoryCollection>) {
        let id = id.into();
        let stats = collection.stats();
        let entry = Entry {
            collection,
            status: LoadStatus::Ready(LoadStats {
                added: stats.tracks,
                ..LoadStats::default()
            }),
            cancel: CancellationToken::new(),
            watcher: None,
        };
        self.replace(id, entry);
    }

    /// Starts populating a fresh collection under `id` on the blocking pool.
    /// The collection is visible while it loads. Must be called from within
    /// a tokio runtime.
    pub fn start_load(&self, id: impl Into<String>, job: impl LoaderJob + 'static) {
        let id = id.into();
        let (collection, cancel) = self.begin(&id);

        let registry = self.clone();
        tokio::spawn(async move {
            info!("Loading collection {} from {}", id, job.name());
            let target = Arc::clone(&collection);
            let token = cancel.clone();
            let result = tokio::task::spawn_blocking(move || job.load(&target, &token)).await;
            let result = match result {
                Ok(result) => result,
                Err(err) => Err(LoaderError::Invalid(format!("load join error: {}", err))),
            };
            registry.finish(&id, &collection, result);
        });
    }

    /// Populates a fresh collection under `id` on the calling thread.
    pub fn load_blocking(&self, id: impl Into<String>, job: &dyn LoaderJob) -> CollectionLoaded {
        let id = id.into();
        let (collection, cancel) = self.begin(&id);
        info!("Loading collection {} from {}", id, job.name());
        let result = job.load(&collection, &cancel);
        self.finish(&id, &collection, result)
    }

    /// Stops a load in progress. The job ends at its next cancellation check.
    pub fn cancel_load(&self, id: &str) -> bool {
        match self.inner.entries.read().get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Keeps the collection in step with a directory until it is removed.
    /// Must be called from within a tokio runtime.
    pub fn watch(&self, id: &str, root: PathBuf, debounce: Duration) -> Result<(), LoaderError> {
        let collection = self
            .get(id)
            .ok_or_else(|| LoaderError::Invalid(format!("unknown collection {}", id)))?;
        let watcher = FolderWatcher::start(collection, root, debounce)?;
        if let Some(entry) = self.inner.entries.write().get_mut(id) {
            entry.watcher = Some(watcher);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<MemoryCollection>> {
        self.inner
            .entries
            .read()
            .get(id)
            .map(|entry| Arc::clone(&entry.collection))
    }

    pub fn status(&self, id: &str) -> Option<LoadStatus> {
        self.inner
            .entries
            .read()
            .get(id)
            .map(|entry| entry.status.clone())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn query_maker(&self, id: &str) -> Option<MemoryQueryMaker> {
        self.get(id)
            .map(|collection| MemoryQueryMaker::new(collection, id))
    }

    /// Drops a collection, stopping its load and watcher.
    pub fn remove(&self, id: &str) -> Option<Arc<MemoryCollection>> {
        let entry = self.inner.entries.write().remove(id)?;
        entry.cancel.cancel();
        debug!("Removed collection {}", id);
        Some(entry.collection)
    }

    /// Cancels every load, drops every collection and closes every
    /// subscription.
    pub fn shutdown(&self) {
        let entries: Vec<Entry> = self
            .inner
            .entries
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            entry.cancel.cancel();
        }
        self.inner.subscribers.lock().clear();
        info!("Collection registry shut down ({} collections)", entries.len());
    }

    fn begin(&self, id: &str) -> (Arc<MemoryCollection>, CancellationToken) {
        let collection = Arc::new(MemoryCollection::new());
        let cancel = CancellationToken::new();
        let entry = Entry {
            collection: Arc::clone(&collection),
            status: LoadStatus::Loading {
                started: SystemTime::now(),
            },
            cancel: cancel.clone(),
            watcher: None,
        };
        self.replace(id.to_string(), entry);
        (collection, cancel)
    }

    fn replace(&self, id: String, entry: Entry) {
        if let Some(previous) = self.inner.entries.write().insert(id.clone(), entry) {
            previous.cancel.cancel();
            debug!("Replaced collection {}", id);
        }
    }

    /// Records the outcome of a load. A failed load keeps the collection
    /// only when it gathered data. Outcomes of superseded loads are dropped.
    fn finish(
        &self,
        id: &str,
        collection: &Arc<MemoryCollection>,
        result: Result<LoadStats, LoaderError>,
    ) -> CollectionLoaded {
        let loaded = {
            let mut entries = self.inner.entries.write();
            let current = entries
                .get(id)
                .map(|entry| Arc::ptr_eq(&entry.collection, collection))
                .unwrap_or(false);

            match result {
                Ok(stats) => {
                    if let Some(entry) = entries.get_mut(id).filter(|_| current) {
                        entry.status = LoadStatus::Ready(stats);
                    }
                    info!(
                        "Collection {} ready: {} tracks added, {} skipped",
                        id, stats.added, stats.skipped
                    );
                    CollectionLoaded {
                        id: id.to_string(),
                        success: true,
                        message: None,
                        stats,
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    let stats = LoadStats {
                        added: collection.stats().tracks,
                        ..LoadStats::default()
                    };
                    if current {
                        if collection.is_empty() {
                            entries.remove(id);
                            warn!("Collection {} failed and was discarded: {}", id, message);
                        } else if let Some(entry) = entries.get_mut(id) {
                            entry.status = LoadStatus::Partial(message.clone());
                            warn!(
                                "Collection {} failed, keeping {} tracks: {}",
                                id, stats.added, message
                            );
                        }
                    }
                    CollectionLoaded {
                        id: id.to_string(),
                        success: false,
                        message: Some(message),
                        stats,
                    }
                }
            }
        };

        self.inner
            .subscribers
            .lock()
            .retain(|tx| tx.send(loaded.clone()).is_ok());
        loaded
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::TrackInfo;
    use tokio_util::sync::CancellationToken;

    use super::{CollectionRegistry, LoadStatus};
    use crate::loader::{LoadStats, LoaderError, LoaderJob, ScriptedLoader};
    use crate::query::{QueryMaker, QueryType};
    use crate::MemoryCollection;

    /// Adds some tracks, then fails.
    struct FlakyJob {
        tracks: usize,
    }

    impl LoaderJob for FlakyJob {
        fn name(&self) -> &str {
            "flaky"
        }

        fn load(
            &self,
            collection: &MemoryCollection,
            _cancel: &CancellationToken,
        ) -> Result<LoadStats, LoaderError> {
            for n in 0..self.tracks {
                collection.change(|changer| {
                    changer.add_track(TrackInfo::new(format!("upnp://{}", n), "t"))
                });
            }
            Err(LoaderError::Invalid("device went away".to_string()))
        }
    }

    fn script() -> ScriptedLoader {
        ScriptedLoader::from_text(
            "script",
            r#"[{"url": "s://1", "title": "One"}, {"url": "s://2", "title": "Two"}]"#,
        )
    }

    #[test]
    fn successful_load_is_queryable() {
        let registry = CollectionRegistry::new();
        let loaded = registry.load_blocking("script", &script());
        assert!(loaded.success);
        assert_eq!(loaded.stats.added, 2);
        assert!(matches!(registry.status("script"), Some(LoadStatus::Ready(_))));

        let mut maker = registry.query_maker("script").unwrap();
        maker.set_query_type(QueryType::Track);
        let outcome = maker.run_blocking();
        assert_eq!(outcome.collection_id, "script");
        assert_eq!(outcome.result_count(), 2);
    }

    #[test]
    fn failed_empty_load_is_discarded() {
        let registry = CollectionRegistry::new();
        let mut events = registry.subscribe();
        let loaded = registry.load_blocking("upnp", &FlakyJob { tracks: 0 });
        assert!(!loaded.success);
        assert_eq!(loaded.message.as_deref(), Some("invalid source: device went away"));
        assert!(registry.get("upnp").is_none());
        assert_eq!(events.try_recv().unwrap(), loaded);
    }

    #[test]
    fn failed_partial_load_is_kept() {
        let registry = CollectionRegistry::new();
        let loaded = registry.load_blocking("upnp", &FlakyJob { tracks: 3 });
        assert!(!loaded.success);
        assert_eq!(loaded.stats.added, 3);
        assert_eq!(registry.get("upnp").unwrap().stats().tracks, 3);
        assert!(matches!(registry.status("upnp"), Some(LoadStatus::Partial(_))));
    }

    #[test]
    fn remove_and_shutdown_drop_collections() {
        let registry = CollectionRegistry::new();
        registry.insert("cd", Arc::new(MemoryCollection::new()));
        registry.load_blocking("script", &script());
        assert_eq!(registry.ids(), vec!["cd".to_string(), "script".to_string()]);

        assert!(registry.remove("cd").is_some());
        assert!(registry.remove("cd").is_none());
        assert!(registry.query_maker("cd").is_none());

        registry.shutdown();
        assert!(registry.ids().is_empty());
    }

    #[tokio::test]
    async fn background_load_notifies_subscribers() {
        let registry = CollectionRegistry::new();
        let mut events = registry.subscribe();
        registry.start_load("script", script());

        let loaded = events.recv().await.unwrap();
        assert_eq!(loaded.id, "script");
        assert!(loaded.success);
        assert_eq!(registry.get("script").unwrap().stats().tracks, 2);
    }
}
