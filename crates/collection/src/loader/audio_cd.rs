use common::{non_empty, stable_id, TrackInfo};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{LoadStats, LoaderError, LoaderJob};
use crate::MemoryCollection;

const CD_SAMPLE_RATE: u32 = 44_100;
const CD_BIT_RATE: u32 = 1_411;
const ENCODINGS: &[&str] = &["wav", "flac", "ogg", "mp3", "opus"];

/// Table of contents of one disc, as resolved by whatever looked it up.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscInfo {
    pub disc_id: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub compilation: bool,
    pub tracks: Vec<CdTrackInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdTrackInfo {
    pub number: u32,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub composer: Option<String>,
    pub length_ms: u64,
}

impl DiscInfo {
    /// The given disc id, or one derived from the track layout.
    pub fn id(&self) -> String {
        if let Some(id) = non_empty(self.disc_id.as_deref()) {
            return id.to_string();
        }
        let layout: Vec<String> = self
            .tracks
            .iter()
            .map(|track| format!("{}:{}", track.number, track.length_ms))
            .collect();
        let digest = stable_id(&layout.join(","));
        digest[..16].to_string()
    }
}

/// Enumerates the tracks of an audio disc into a collection.
pub struct AudioCdLoader {
    disc: DiscInfo,
    encoding: String,
}

impl AudioCdLoader {
    /// `encoding` is the preferred rip format. Unknown values fall back to
    /// uncompressed wav.
    pub fn new(disc: DiscInfo, encoding: impl Into<String>) -> Self {
        let requested = encoding.into().trim().to_ascii_lowercase();
        let encoding = if ENCODINGS.contains(&requested.as_str()) {
            requested
        } else {
            if !requested.is_empty() {
                warn!("Unknown encoding {}, using wav", requested);
            }
            "wav".to_string()
        };
        Self { disc, encoding }
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn track_url(disc_id: &str, number: u32) -> String {
        format!("audiocd:/{}/{}", disc_id, number)
    }

    fn track_info(&self, disc_id: &str, track: &CdTrackInfo) -> TrackInfo {
        let title = non_empty(track.title.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Track {:02}", track.number));
        let mut info = TrackInfo::new(Self::track_url(disc_id, track.number), title);
        info.artist = track.artist.clone().or_else(|| self.disc.artist.clone());
        info.album = self.disc.title.clone();
        info.album_artist = if self.disc.compilation {
            None
        } else {
            self.disc.artist.clone()
        };
        info.compilation = self.disc.compilation;
        info.genre = self.disc.genre.clone();
        info.composer = track.composer.clone();
        info.year = self.disc.year;
        info.track_number = Some(track.number);
        info.disc_number = Some(1);
        info.length_ms = track.length_ms;
        info.sample_rate = Some(CD_SAMPLE_RATE);
        if self.encoding == "wav" {
            info.bit_rate = Some(CD_BIT_RATE);
            info.file_size = track.length_ms * u64::from(CD_BIT_RATE) / 8;
        }
        info.format = self.encoding.clone();
        info
    }
}

impl LoaderJob for AudioCdLoader {
    fn name(&self) -> &str {
        "audiocd"
    }

    fn load(
        &self,
        collection: &MemoryCollection,
        cancel: &CancellationToken,
    ) -> Result<LoadStats, LoaderError> {
        if self.disc.tracks.is_empty() {
            return Err(LoaderError::Invalid("disc has no audio tracks".to_string()));
        }

        let disc_id = self.disc.id();
        let mut stats = LoadStats::default();
        for track in &self.disc.tracks {
            if cancel.is_cancelled() {
                return Err(LoaderError::Cancelled);
            }
            if track.number == 0 {
                warn!("Disc {}: skipping track without number", disc_id);
                stats.skipped += 1;
                continue;
            }
            let info = self.track_info(&disc_id, track);
            collection.change(|changer| changer.add_track(info));
            stats.added += 1;
        }

        info!("Loaded disc {}: {} tracks", disc_id, stats.added);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::{AudioCdLoader, CdTrackInfo, DiscInfo};
    use crate::loader::{LoaderError, LoaderJob};
    use crate::MemoryCollection;

    fn disc() -> DiscInfo {
        DiscInfo {
            title: Some("Live".to_string()),
            artist: Some("Band".to_string()),
            year: Some(1977),
            tracks: vec![
                CdTrackInfo {
                    number: 1,
                    title: Some("Opener".to_string()),
                    length_ms: 180_000,
                    ..CdTrackInfo::default()
                },
                CdTrackInfo {
                    number: 2,
                    length_ms: 240_000,
                    ..CdTrackInfo::default()
                },
            ],
            ..DiscInfo::default()
        }
    }

    #[test]
    fn derived_disc_id_is_stable() {
        let a = disc();
        let mut b = disc();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), 16);
        b.tracks[1].length_ms += 1;
        assert_ne!(a.id(), b.id());
        b.disc_id = Some("cafe".to_string());
        assert_eq!(b.id(), "cafe");
    }

    #[test]
    fn loads_one_album_of_numbered_tracks() {
        let disc = disc();
        let id = disc.id();
        let collection = MemoryCollection::new();
        let stats = AudioCdLoader::new(disc, "FLAC")
            .load(&collection, &CancellationToken::new())
            .unwrap();
        assert_eq!(stats.added, 2);

        let maps = collection.read();
        assert_eq!(maps.stats().albums, 1);
        let second = maps
            .track_by_url(&AudioCdLoader::track_url(&id, 2))
            .unwrap();
        assert_eq!(second.name, "Track 02");
        assert_eq!(second.format, "flac");
        assert!(maps.album_by_key("Live", Some("Band")).is_some());
    }

    #[test]
    fn unknown_encoding_falls_back_to_wav() {
        let loader = AudioCdLoader::new(disc(), "vinyl");
        assert_eq!(loader.encoding(), "wav");
    }

    #[test]
    fn empty_disc_fails() {
        let err = AudioCdLoader::new(DiscInfo::default(), "ogg")
            .load(&MemoryCollection::new(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, LoaderError::Invalid(_)));
    }
}
