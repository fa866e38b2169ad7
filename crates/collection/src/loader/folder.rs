use std::fs;
use std::path::{Path, PathBuf};

use common::{file_url, CoverRef, TrackInfo};
use metadata::{audio_format, read_tags, TagInfo};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{LoadStats, LoaderError, LoaderJob};
use crate::MemoryCollection;

const COVERS: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "folder.jpg",
    "folder.jpeg",
    "folder.png",
    "front.jpg",
    "front.jpeg",
    "front.png",
    "album.jpg",
    "album.png",
];

/// Populates a collection from the audio files below one directory.
pub struct FolderLoader {
    name: String,
    root: PathBuf,
}

impl FolderLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("folder:{}", root.display()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LoaderJob for FolderLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(
        &self,
        collection: &MemoryCollection,
        cancel: &CancellationToken,
    ) -> Result<LoadStats, LoaderError> {
        if !self.root.is_dir() {
            return Err(LoaderError::Invalid(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let mut stats = LoadStats::default();
        for entry in WalkDir::new(&self.root).follow_links(false).sort_by_file_name() {
            if cancel.is_cancelled() {
                return Err(LoaderError::Cancelled);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    stats.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if audio_format(path).is_none() {
                continue;
            }

            let (info, tag_error) = track_info_from_file(path);
            if tag_error {
                stats.tag_errors += 1;
            }
            collection.change(|changer| changer.add_track(info));
            stats.added += 1;
        }

        info!(
            "Loaded {}: {} tracks, {} tag errors",
            self.root.display(),
            stats.added,
            stats.tag_errors
        );
        Ok(stats)
    }
}

/// Builds the attribute bag of one audio file. Unreadable tags fall back to
/// the file name as title; the flag reports that fallback.
pub fn track_info_from_file(path: &Path) -> (TrackInfo, bool) {
    let url = file_url(path);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| url.clone());
    let mut info = TrackInfo::new(url, stem);
    info.file_size = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
    info.format = audio_format(path).unwrap_or_default().to_string();

    match read_tags(path) {
        Ok(tags) => {
            apply_tags(&mut info, tags, path);
            (info, false)
        }
        Err(err) => {
            warn!("Failed to read tags from {}: {}", path.display(), err);
            (info, true)
        }
    }
}

fn apply_tags(info: &mut TrackInfo, tags: TagInfo, path: &Path) {
    if let Some(title) = tags.title.filter(|title| !title.trim().is_empty()) {
        info.title = title;
    }
    info.artist = tags.artist;
    info.album = tags.album;
    info.album_artist = tags.album_artist;
    info.compilation = tags.compilation;
    info.composer = tags.composer;
    info.comment = tags.comment;
    info.genre = tags.genres.into_iter().next();
    info.year = tags.year;
    info.track_number = tags.track_no;
    info.disc_number = tags.disc_no;
    info.length_ms = tags.duration_ms.unwrap_or(0);
    info.bit_rate = tags.bitrate;
    info.sample_rate = tags.sample_rate;
    if let Some(format) = tags.format {
        info.format = format;
    }

    info.cover = if tags.has_embedded_cover {
        Some(CoverRef::Embedded {
            track_url: info.url.clone(),
        })
    } else {
        path.parent()
            .and_then(find_folder_cover)
            .map(|cover| CoverRef::File {
                path: cover.to_string_lossy().to_string(),
            })
    };
}

fn find_folder_cover(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_ascii_lowercase(),
            None => continue,
        };
        if COVERS.contains(&name.as_str()) {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tokio_util::sync::CancellationToken;

    use super::{find_folder_cover, track_info_from_file, FolderLoader};
    use crate::loader::{LoaderError, LoaderJob};
    use crate::MemoryCollection;

    #[test]
    fn untagged_files_fall_back_to_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let album = dir.path().join("Some Album");
        fs::create_dir_all(&album).unwrap();
        fs::write(album.join("01 Intro.mp3"), b"not really audio").unwrap();
        fs::write(album.join("02 Outro.flac"), b"still not audio").unwrap();
        fs::write(album.join("notes.txt"), b"ignored").unwrap();

        let collection = MemoryCollection::new();
        let loader = FolderLoader::new(dir.path());
        let stats = loader
            .load(&collection, &CancellationToken::new())
            .unwrap();

        assert_eq!(stats.added, 2);
        assert!(stats.tag_errors <= 2);
        let maps = collection.read();
        let names: Vec<&str> = maps
            .track_map()
            .values()
            .map(|track| track.name.as_str())
            .collect();
        assert_eq!(names, vec!["01 Intro", "02 Outro"]);
        assert_eq!(maps.stats().artists, 0);
    }

    #[test]
    fn fallback_info_keeps_format_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.ogg");
        fs::write(&path, b"12345").unwrap();

        let (info, tag_error) = track_info_from_file(&path);
        assert!(tag_error);
        assert_eq!(info.format, "ogg");
        assert_eq!(info.file_size, 5);
        assert!(info.url.starts_with("file://"));
        assert!(info.url.ends_with("/track.ogg"));
    }

    #[test]
    fn finds_folder_cover_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Folder.JPG"), b"").unwrap();
        let cover = find_folder_cover(dir.path()).unwrap();
        assert_eq!(cover.file_name().unwrap(), "Folder.JPG");
    }

    #[test]
    fn missing_root_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FolderLoader::new(dir.path().join("missing"));
        let err = loader
            .load(&MemoryCollection::new(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LoaderError::Invalid(_)));
    }

    #[test]
    fn cancelled_load_stops() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"").unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let collection = MemoryCollection::new();
        let err = FolderLoader::new(dir.path())
            .load(&collection, &token)
            .unwrap_err();
        assert!(matches!(err, LoaderError::Cancelled));
        assert!(collection.is_empty());
    }
}
