use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::{dir_url_prefix, file_url};
use metadata::audio_format;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::loader::{track_info_from_file, LoaderError};
use crate::MemoryCollection;

const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Keeps a folder-backed collection in step with the file system.
///
/// Must be started from within a tokio runtime. Watching stops when the
/// value is dropped or [`FolderWatcher::stop`] is called.
pub struct FolderWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    stop: CancellationToken,
}

impl FolderWatcher {
    pub fn start(
        collection: Arc<MemoryCollection>,
        root: PathBuf,
        debounce: Duration,
    ) -> Result<Self, LoaderError> {
        let debounce = if debounce.is_zero() {
            DEFAULT_DEBOUNCE
        } else {
            debounce
        };

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let stop = CancellationToken::new();
        tokio::spawn(watch_loop(collection, rx, debounce, stop.clone()));
        info!(
            "Watching {} for changes (debounce {}ms)",
            root.display(),
            debounce.as_millis()
        );

        Ok(Self {
            root,
            _watcher: watcher,
            stop,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn watch_loop(
    collection: Arc<MemoryCollection>,
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        let mut pending = BTreeSet::new();
        if !collect_paths(&event, &mut pending) {
            continue;
        }

        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(debounce) => break,
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => {
                        collect_paths(&event, &mut pending);
                    }
                    None => return,
                },
            }
        }

        let paths: Vec<PathBuf> = pending.into_iter().collect();
        let target = Arc::clone(&collection);
        match tokio::task::spawn_blocking(move || apply_changes(&target, &paths)).await {
            Ok(changed) => debug!("Applied {} file changes", changed),
            Err(err) => warn!("Watch update join error: {}", err),
        }
    }
}

/// Adds the paths of a relevant event. Returns false for events that do not
/// concern the collection.
fn collect_paths(event: &Event, pending: &mut BTreeSet<PathBuf>) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    pending.extend(event.paths.iter().cloned());
    true
}

/// Brings the collection in line with the current state of `paths`.
/// Vanished files and directories are removed; audio files that exist are
/// re-read, including everything below a directory that moved in. Returns
/// the number of tracks touched.
pub(crate) fn apply_changes(collection: &MemoryCollection, paths: &[PathBuf]) -> usize {
    let mut changed = 0;
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        changed += usize::from(refresh_file(collection, entry.path()));
                    }
                    Ok(_) => {}
                    Err(err) => warn!("Skipping unreadable entry: {}", err),
                }
            }
            continue;
        }
        if path.is_file() {
            changed += usize::from(refresh_file(collection, path));
            continue;
        }

        let url = file_url(path);
        let prefix = dir_url_prefix(path);
        changed += collection.change(|changer| {
            let removed = usize::from(changer.remove_track(&url));
            removed + changer.remove_tracks_under(&prefix)
        });
    }
    changed
}

fn refresh_file(collection: &MemoryCollection, path: &Path) -> bool {
    if audio_format(path).is_none() {
        return false;
    }
    let (info, _) = track_info_from_file(path);
    collection.change(|changer| changer.track_changed(info));
    true
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use notify::event::{CreateKind, Event, EventKind};
    use tokio_util::sync::CancellationToken;

    use super::{apply_changes, collect_paths, FolderWatcher};
    use crate::loader::{FolderLoader, LoaderJob};
    use crate::MemoryCollection;

    #[test]
    fn removed_directories_drop_their_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join("a.mp3"), b"").unwrap();
        fs::write(album.join("b.mp3"), b"").unwrap();
        fs::write(dir.path().join("single.mp3"), b"").unwrap();

        let collection = MemoryCollection::new();
        FolderLoader::new(dir.path())
            .load(&collection, &CancellationToken::new())
            .unwrap();
        assert_eq!(collection.stats().tracks, 3);

        fs::remove_dir_all(&album).unwrap();
        assert_eq!(apply_changes(&collection, &[album]), 2);
        assert_eq!(collection.stats().tracks, 1);
    }

    #[test]
    fn directories_moved_in_are_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        let staging = dir.path().join("staging").join("album");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(staging.join("disc 2")).unwrap();
        fs::write(staging.join("a.mp3"), b"").unwrap();
        fs::write(staging.join("cover.jpg"), b"").unwrap();
        fs::write(staging.join("disc 2").join("b.mp3"), b"").unwrap();

        let collection = MemoryCollection::new();
        let dest = root.join("album");
        fs::rename(&staging, &dest).unwrap();
        assert_eq!(apply_changes(&collection, &[dest.clone()]), 2);
        assert_eq!(collection.stats().tracks, 2);

        let renamed = root.join("renamed");
        fs::rename(&dest, &renamed).unwrap();
        apply_changes(&collection, &[dest, renamed.clone()]);
        let urls: Vec<String> = collection
            .read()
            .track_map()
            .values()
            .map(|track| track.url.clone())
            .collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|url| url.contains("/renamed/")));
    }

    #[test]
    fn new_files_are_added() {
        let dir = tempfile::tempdir().unwrap();
        let collection = MemoryCollection::new();
        let path = dir.path().join("new.flac");
        fs::write(&path, b"").unwrap();
        fs::write(dir.path().join("readme.txt"), b"").unwrap();

        let changed = apply_changes(
            &collection,
            &[path.clone(), dir.path().join("readme.txt")],
        );
        assert_eq!(changed, 1);
        assert_eq!(collection.read().track_map().values().next().unwrap().name, "new");
    }

    #[test]
    fn irrelevant_events_are_ignored() {
        let mut pending = BTreeSet::new();
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/music/a.mp3"));
        assert!(!collect_paths(&access, &mut pending));

        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/music/a.mp3"));
        assert!(collect_paths(&create, &mut pending));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn watcher_starts_on_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let collection = Arc::new(MemoryCollection::new());
        let watcher = FolderWatcher::start(
            collection,
            dir.path().to_path_buf(),
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(watcher.root(), dir.path());
        watcher.stop();
    }
}
