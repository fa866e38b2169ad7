use serde::{Deserialize, Serialize};
use std::path::Path;

/// Raw attributes of one track as delivered by a backend producer.
///
/// Taxonomy values are plain strings here; the collection resolves them to
/// canonical entities when the track is added.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackInfo {
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub compilation: bool,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub year: Option<i32>,
    pub comment: Option<String>,
    pub length_ms: u64,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub bit_rate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub file_size: u64,
    pub format: String,
    pub cover: Option<CoverRef>,
}

impl TrackInfo {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Album artist the track is grouped under. A compilation without an
    /// explicit album artist has none.
    pub fn effective_album_artist(&self) -> Option<&str> {
        if let Some(artist) = non_empty(self.album_artist.as_deref()) {
            return Some(artist);
        }
        if self.compilation {
            return None;
        }
        non_empty(self.artist.as_deref())
    }

    /// Year tag, with `0` treated as unknown.
    pub fn effective_year(&self) -> Option<i32> {
        self.year.filter(|year| *year != 0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverRef {
    Embedded { track_url: String },
    File { path: String },
    Remote { url: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    /// 0..=10, half stars.
    pub rating: u8,
    pub score: f64,
    pub play_count: u32,
    pub first_played: Option<u64>,
    pub last_played: Option<u64>,
}

impl Statistics {
    pub fn record_play(&mut self, now_secs: u64) {
        self.play_count = self.play_count.saturating_add(1);
        if self.first_played.is_none() {
            self.first_played = Some(now_secs);
        }
        self.last_played = Some(now_secs);
    }

    pub fn set_rating(&mut self, rating: u8) {
        self.rating = rating.min(10);
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path_to_slash_string(path))
}

/// Prefix shared by the urls of every file below `dir`.
pub fn dir_url_prefix(dir: &Path) -> String {
    let mut prefix = file_url(dir);
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    let joined = parts.join("/");
    match joined.strip_prefix("//") {
        Some(rest) => format!("/{}", rest),
        None => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::{dir_url_prefix, file_url, stable_id, Statistics, TrackInfo};
    use std::path::Path;

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("audiocd:180000,200000");
        let second = stable_id("audiocd:180000,200000");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("audiocd:180000,200001"));
    }

    #[test]
    fn album_artist_falls_back_to_track_artist() {
        let mut info = TrackInfo::new("u", "t");
        info.artist = Some("Foo".to_string());
        assert_eq!(info.effective_album_artist(), Some("Foo"));

        info.album_artist = Some("Various".to_string());
        assert_eq!(info.effective_album_artist(), Some("Various"));
    }

    #[test]
    fn compilation_without_album_artist_has_none() {
        let mut info = TrackInfo::new("u", "t");
        info.artist = Some("Foo".to_string());
        info.compilation = true;
        assert_eq!(info.effective_album_artist(), None);
    }

    #[test]
    fn zero_year_is_unknown() {
        let mut info = TrackInfo::new("u", "t");
        info.year = Some(0);
        assert_eq!(info.effective_year(), None);
        info.year = Some(1999);
        assert_eq!(info.effective_year(), Some(1999));
    }

    #[test]
    fn statistics_clamp_rating_and_count_plays() {
        let mut stats = Statistics::default();
        stats.set_rating(42);
        assert_eq!(stats.rating, 10);
        stats.record_play(100);
        stats.record_play(200);
        assert_eq!(stats.play_count, 2);
        assert_eq!(stats.first_played, Some(100));
        assert_eq!(stats.last_played, Some(200));
    }

    #[cfg(unix)]
    #[test]
    fn file_urls_share_directory_prefix() {
        let url = file_url(Path::new("/music/Artist/Album/01.mp3"));
        assert_eq!(url, "file:///music/Artist/Album/01.mp3");
        let prefix = dir_url_prefix(Path::new("/music/Artist"));
        assert_eq!(prefix, "file:///music/Artist/");
        assert!(url.starts_with(&prefix));
    }
}
