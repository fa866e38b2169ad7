use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use common::TrackInfo;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{LoadStats, LoaderError, LoaderJob};
use crate::MemoryCollection;

enum Source {
    File(PathBuf),
    Text(Mutex<Option<String>>),
}

/// Feeds track records produced by an external script into a collection.
///
/// The input is either one JSON array of track objects or JSON lines with
/// one object per line. Records without a url are skipped.
pub struct ScriptedLoader {
    name: String,
    source: Source,
}

impl ScriptedLoader {
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: Source::File(path.into()),
        }
    }

    /// A loader over already captured script output. It can be loaded once.
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Source::Text(Mutex::new(Some(text.into()))),
        }
    }

    fn read_source(&self) -> Result<String, LoaderError> {
        match &self.source {
            Source::File(path) => {
                let mut text = String::new();
                File::open(path)?.read_to_string(&mut text)?;
                Ok(text)
            }
            Source::Text(text) => text
                .lock()
                .take()
                .ok_or_else(|| LoaderError::Invalid("script output already consumed".to_string())),
        }
    }
}

impl LoaderJob for ScriptedLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(
        &self,
        collection: &MemoryCollection,
        cancel: &CancellationToken,
    ) -> Result<LoadStats, LoaderError> {
        let text = self.read_source()?;
        let records = parse_records(&text)?;

        let mut stats = LoadStats::default();
        for record in records {
            if cancel.is_cancelled() {
                return Err(LoaderError::Cancelled);
            }
            if record.url.trim().is_empty() {
                warn!("{}: skipping record without url", self.name);
                stats.skipped += 1;
                continue;
            }
            collection.change(|changer| changer.add_track(record));
            stats.added += 1;
        }

        info!("Loaded {}: {} tracks", self.name, stats.added);
        Ok(stats)
    }
}

pub(crate) fn parse_records(text: &str) -> Result<Vec<TrackInfo>, LoaderError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut records = Vec::new();
    for line in BufReader::new(text.as_bytes()).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::{parse_records, ScriptedLoader};
    use crate::loader::{LoaderError, LoaderJob};
    use crate::MemoryCollection;

    #[test]
    fn parses_arrays_and_json_lines() {
        let array = r#"[{"url": "script://1", "title": "One", "artist": "A"}]"#;
        let lines = "{\"url\": \"script://1\", \"title\": \"One\"}\n\n{\"url\": \"script://2\", \"year\": 1999}\n";

        assert_eq!(parse_records(array).unwrap()[0].artist.as_deref(), Some("A"));
        let records = parse_records(lines).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].year, Some(1999));
    }

    #[test]
    fn loads_once_and_skips_records_without_url() {
        let text = r#"[
            {"url": "script://a", "title": "A", "artist": "X", "album": "Y"},
            {"title": "nameless"},
            {"url": "script://b", "title": "B", "artist": "X", "album": "Y"}
        ]"#;
        let loader = ScriptedLoader::from_text("script", text);
        let collection = MemoryCollection::new();

        let stats = loader.load(&collection, &CancellationToken::new()).unwrap();
        assert_eq!(stats.added, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(collection.stats().albums, 1);

        let err = loader
            .load(&collection, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LoaderError::Invalid(_)));
    }

    #[test]
    fn malformed_input_is_a_json_error() {
        let loader = ScriptedLoader::from_text("script", "{not json");
        let err = loader
            .load(&MemoryCollection::new(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LoaderError::Json(_)));
    }

    #[test]
    fn reads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracks.jsonl");
        std::fs::write(&path, "{\"url\": \"script://x\", \"title\": \"X\"}\n").unwrap();

        let collection = MemoryCollection::new();
        ScriptedLoader::from_path("file", &path)
            .load(&collection, &CancellationToken::new())
            .unwrap();
        assert!(collection.track_by_url("script://x").is_some());
    }
}
