use std::path::Path;

use lofty::error::LoftyError;
use lofty::file::FileType;
use lofty::prelude::{Accessor, AudioFile, ItemKey, TaggedFileExt};

#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub composer: Option<String>,
    pub comment: Option<String>,
    pub compilation: bool,
    pub track_no: Option<u32>,
    pub disc_no: Option<u32>,
    pub year: Option<i32>,
    pub duration_ms: Option<u64>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub format: Option<String>,
    pub has_embedded_cover: bool,
    pub genres: Vec<String>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u64::MAX)) as u64;
        info.duration_ms = Some(clamped);
    }

    info.sample_rate = properties.sample_rate();
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());
    info.format = format_name(tagged_file.file_type());

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.title().map(|v| v.to_string());
        info.album = tag.album().map(|v| v.to_string());
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|v| v.to_string());
        info.artist = tag.artist().map(|v| v.to_string());
        info.album_artist = album_artist;
        info.composer = tag.get_string(&ItemKey::Composer).map(|v| v.to_string());
        info.comment = tag.comment().map(|v| v.to_string());
        info.compilation = tag
            .get_string(&ItemKey::FlagCompilation)
            .map(parse_flag)
            .unwrap_or(false);
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_number);
        info.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_number);
        info.year = tag.get_string(&ItemKey::Year).and_then(parse_year);
        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            info.genres = parse_genres(value);
        }
        info.has_embedded_cover = !tag.pictures().is_empty();
    }

    Ok(info)
}

/// Lower-case format name for a file extension, `None` for files that are
/// not audio.
pub fn audio_format(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    match ext.as_str() {
        "mp3" => Some("mp3"),
        "flac" => Some("flac"),
        "ogg" | "oga" => Some("ogg"),
        "opus" => Some("opus"),
        "m4a" | "mp4" | "aac" => Some("m4a"),
        "wav" => Some("wav"),
        "aif" | "aiff" => Some("aiff"),
        "wv" => Some("wv"),
        "ape" => Some("ape"),
        _ => None,
    }
}

fn format_name(file_type: FileType) -> Option<String> {
    let name = match file_type {
        FileType::Mpeg => "mp3",
        FileType::Flac => "flac",
        FileType::Vorbis => "ogg",
        FileType::Opus => "opus",
        FileType::Mp4 => "m4a",
        FileType::Wav => "wav",
        FileType::Aiff => "aiff",
        FileType::WavPack => "wv",
        FileType::Ape => "ape",
        _ => return None,
    };
    Some(name.to_string())
}

fn parse_flag(text: &str) -> bool {
    matches!(text.trim(), "1" | "true" | "yes")
}

fn parse_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn parse_genres(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed.to_string());
    }
    if out.is_empty() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{audio_format, parse_flag, parse_genres, parse_number, parse_year};
    use std::path::Path;

    #[test]
    fn parses_track_numbers_with_totals() {
        assert_eq!(parse_number("3/12"), Some(3));
        assert_eq!(parse_number(" 7 "), Some(7));
        assert_eq!(parse_number("x"), None);
    }

    #[test]
    fn parses_year_from_dates() {
        assert_eq!(parse_year("1997-05-01"), Some(1997));
        assert_eq!(parse_year("(2003)"), Some(2003));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn splits_genre_lists() {
        assert_eq!(parse_genres("Rock; Pop"), vec!["Rock", "Pop"]);
        assert_eq!(parse_genres("Jazz"), vec!["Jazz"]);
        assert!(parse_genres("  ").is_empty());
    }

    #[test]
    fn reads_compilation_flags() {
        assert!(parse_flag("1"));
        assert!(!parse_flag("0"));
    }

    #[test]
    fn recognizes_audio_extensions() {
        assert_eq!(audio_format(Path::new("a/b.MP3")), Some("mp3"));
        assert_eq!(audio_format(Path::new("a/cover.jpg")), None);
    }
}
