use std::fmt;

use common::{CoverRef, Statistics};
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }

            pub(crate) fn is_assigned(self) -> bool {
                self.0 != 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

entity_id!(TrackId, "track");
entity_id!(ArtistId, "artist");
entity_id!(AlbumId, "album");
entity_id!(GenreId, "genre");
entity_id!(ComposerId, "composer");
entity_id!(YearId, "year");

/// Reference to one entity of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Track(TrackId),
    Artist(ArtistId),
    Album(AlbumId),
    Genre(GenreId),
    Composer(ComposerId),
    Year(YearId),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub(crate) id: TrackId,
    pub url: String,
    pub name: String,
    pub comment: Option<String>,
    pub length_ms: u64,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub bit_rate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub file_size: u64,
    pub format: String,
    pub statistics: Statistics,
    pub artist: Option<ArtistId>,
    pub album: Option<AlbumId>,
    pub genre: Option<GenreId>,
    pub composer: Option<ComposerId>,
    pub year: Option<YearId>,
}

impl Track {
    /// A detached track. The collection assigns its id on insert.
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TrackId::default(),
            url: url.into(),
            name: name.into(),
            comment: None,
            length_ms: 0,
            track_number: None,
            disc_number: None,
            bit_rate: None,
            sample_rate: None,
            file_size: 0,
            format: String::new(),
            statistics: Statistics::default(),
            artist: None,
            album: None,
            genre: None,
            composer: None,
            year: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub(crate) id: ArtistId,
    pub name: String,
    pub tracks: Vec<TrackId>,
    /// Albums this artist is the album artist of.
    pub albums: Vec<AlbumId>,
}

impl Artist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ArtistId::default(),
            name: name.into(),
            tracks: Vec::new(),
            albums: Vec::new(),
        }
    }

    pub fn id(&self) -> ArtistId {
        self.id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    pub name: String,
    pub artist: Option<String>,
}

impl AlbumKey {
    pub fn new(name: impl Into<String>, artist: Option<&str>) -> Self {
        Self {
            name: name.into(),
            artist: artist.map(|value| value.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub(crate) id: AlbumId,
    pub name: String,
    pub album_artist: Option<ArtistId>,
    pub compilation: bool,
    pub cover: Option<CoverRef>,
    pub tracks: Vec<TrackId>,
}

impl Album {
    pub fn new(name: impl Into<String>, album_artist: Option<ArtistId>) -> Self {
        Self {
            id: AlbumId::default(),
            name: name.into(),
            album_artist,
            compilation: false,
            cover: None,
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> AlbumId {
        self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub(crate) id: GenreId,
    pub name: String,
    pub tracks: Vec<TrackId>,
}

impl Genre {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GenreId::default(),
            name: name.into(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> GenreId {
        self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Composer {
    pub(crate) id: ComposerId,
    pub name: String,
    pub tracks: Vec<TrackId>,
}

impl Composer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ComposerId::default(),
            name: name.into(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> ComposerId {
        self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Year {
    pub(crate) id: YearId,
    pub value: i32,
    pub tracks: Vec<TrackId>,
}

impl Year {
    pub fn new(value: i32) -> Self {
        Self {
            id: YearId::default(),
            value,
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> YearId {
        self.id
    }
}

/// Appends `id` unless already present. Returns whether the list changed.
pub(crate) fn attach<T: PartialEq + Copy>(list: &mut Vec<T>, id: T) -> bool {
    if list.contains(&id) {
        return false;
    }
    list.push(id);
    true
}

pub(crate) fn detach<T: PartialEq + Copy>(list: &mut Vec<T>, id: T) -> bool {
    let before = list.len();
    list.retain(|item| *item != id);
    list.len() != before
}
