use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilityKind, CapabilityRegistry};
use crate::model::{
    Album, AlbumId, AlbumKey, Artist, ArtistId, Composer, ComposerId, EntityRef, Genre, GenreId,
    Track, TrackId, Year, YearId,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub genres: usize,
    pub composers: usize,
    pub years: usize,
}

/// The deduplicating maps of one collection.
///
/// Raw inserts here overwrite by key and never touch back-references;
/// `MapChanger` is the invariant-preserving layer on top. Maps are ordered by
/// id, and ids grow monotonically, so iteration follows insertion order.
#[derive(Debug, Default, Clone)]
pub struct CollectionMaps {
    last_id: u64,
    tracks: BTreeMap<TrackId, Track>,
    track_by_url: HashMap<String, TrackId>,
    artists: BTreeMap<ArtistId, Artist>,
    artist_by_name: HashMap<String, ArtistId>,
    albums: BTreeMap<AlbumId, Album>,
    album_by_key: HashMap<AlbumKey, AlbumId>,
    genres: BTreeMap<GenreId, Genre>,
    genre_by_name: HashMap<String, GenreId>,
    composers: BTreeMap<ComposerId, Composer>,
    composer_by_name: HashMap<String, ComposerId>,
    years: BTreeMap<YearId, Year>,
    year_by_value: HashMap<i32, YearId>,
    capabilities: CapabilityRegistry,
}

impl CollectionMaps {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn add_track(&mut self, mut track: Track) -> TrackId {
        let id = match self.track_by_url.get(&track.url) {
            Some(id) => *id,
            None => TrackId(self.next_id()),
        };
        track.id = id;
        self.track_by_url.insert(track.url.clone(), id);
        self.tracks.insert(id, track);
        id
    }

    pub fn add_artist(&mut self, mut artist: Artist) -> ArtistId {
        let id = match self.artist_by_name.get(&artist.name) {
            Some(id) => *id,
            None => ArtistId(self.next_id()),
        };
        artist.id = id;
        self.artist_by_name.insert(artist.name.clone(), id);
        self.artists.insert(id, artist);
        id
    }

    pub fn add_album(&mut self, mut album: Album) -> AlbumId {
        let key = self.album_key(&album);
        let id = match self.album_by_key.get(&key) {
            Some(id) => *id,
            None => AlbumId(self.next_id()),
        };
        album.id = id;
        self.album_by_key.insert(key, id);
        self.albums.insert(id, album);
        id
    }

    pub fn add_genre(&mut self, mut genre: Genre) -> GenreId {
        let id = match self.genre_by_name.get(&genre.name) {
            Some(id) => *id,
            None => GenreId(self.next_id()),
        };
        genre.id = id;
        self.genre_by_name.insert(genre.name.clone(), id);
        self.genres.insert(id, genre);
        id
    }

    pub fn add_composer(&mut self, mut composer: Composer) -> ComposerId {
        let id = match self.composer_by_name.get(&composer.name) {
            Some(id) => *id,
            None => ComposerId(self.next_id()),
        };
        composer.id = id;
        self.composer_by_name.insert(composer.name.clone(), id);
        self.composers.insert(id, composer);
        id
    }

    pub fn add_year(&mut self, mut year: Year) -> YearId {
        let id = match self.year_by_value.get(&year.value) {
            Some(id) => *id,
            None => YearId(self.next_id()),
        };
        year.id = id;
        self.year_by_value.insert(year.value, id);
        self.years.insert(id, year);
        id
    }

    pub fn track_map(&self) -> &BTreeMap<TrackId, Track> {
        &self.tracks
    }

    pub fn artist_map(&self) -> &BTreeMap<ArtistId, Artist> {
        &self.artists
    }

    pub fn album_map(&self) -> &BTreeMap<AlbumId, Album> {
        &self.albums
    }

    pub fn genre_map(&self) -> &BTreeMap<GenreId, Genre> {
        &self.genres
    }

    pub fn composer_map(&self) -> &BTreeMap<ComposerId, Composer> {
        &self.composers
    }

    pub fn year_map(&self) -> &BTreeMap<YearId, Year> {
        &self.years
    }

    /// Replaces the tracks. Capabilities survive only for ids that still
    /// name the same url.
    pub fn set_track_map(&mut self, tracks: BTreeMap<TrackId, Track>) {
        let previous = std::mem::replace(&mut self.tracks, tracks);
        self.track_by_url.clear();
        for (id, track) in self.tracks.iter_mut() {
            track.id = *id;
            self.track_by_url.insert(track.url.clone(), *id);
        }
        self.bump_last_id(self.tracks.keys().next_back().map(|id| id.0));
        let current = &self.tracks;
        self.capabilities.retain(|entity| match entity {
            EntityRef::Track(id) => same_entity(&previous, current, id, |a, b| a.url == b.url),
            _ => true,
        });
    }

    /// Replaces the artists. Album keys depend on artist names, so the album
    /// index is rebuilt as well.
    pub fn set_artist_map(&mut self, artists: BTreeMap<ArtistId, Artist>) {
        let previous = std::mem::replace(&mut self.artists, artists);
        self.artist_by_name.clear();
        for (id, artist) in self.artists.iter_mut() {
            artist.id = *id;
            self.artist_by_name.insert(artist.name.clone(), *id);
        }
        self.bump_last_id(self.artists.keys().next_back().map(|id| id.0));
        self.reindex_albums();
        let current = &self.artists;
        self.capabilities.retain(|entity| match entity {
            EntityRef::Artist(id) => same_entity(&previous, current, id, |a, b| a.name == b.name),
            _ => true,
        });
    }

    pub fn set_album_map(&mut self, albums: BTreeMap<AlbumId, Album>) {
        let previous = std::mem::replace(&mut self.albums, albums);
        for (id, album) in self.albums.iter_mut() {
            album.id = *id;
        }
        self.bump_last_id(self.albums.keys().next_back().map(|id| id.0));
        self.reindex_albums();
        let current = &self.albums;
        self.capabilities.retain(|entity| match entity {
            EntityRef::Album(id) => same_entity(&previous, current, id, |a, b| {
                a.name == b.name && a.album_artist == b.album_artist
            }),
            _ => true,
        });
    }

    pub fn set_genre_map(&mut self, genres: BTreeMap<GenreId, Genre>) {
        let previous = std::mem::replace(&mut self.genres, genres);
        self.genre_by_name.clear();
        for (id, genre) in self.genres.iter_mut() {
            genre.id = *id;
            self.genre_by_name.insert(genre.name.clone(), *id);
        }
        self.bump_last_id(self.genres.keys().next_back().map(|id| id.0));
        let current = &self.genres;
        self.capabilities.retain(|entity| match entity {
            EntityRef::Genre(id) => same_entity(&previous, current, id, |a, b| a.name == b.name),
            _ => true,
        });
    }

    pub fn set_composer_map(&mut self, composers: BTreeMap<ComposerId, Composer>) {
        let previous = std::mem::replace(&mut self.composers, composers);
        self.composer_by_name.clear();
        for (id, composer) in self.composers.iter_mut() {
            composer.id = *id;
            self.composer_by_name.insert(composer.name.clone(), *id);
        }
        self.bump_last_id(self.composers.keys().next_back().map(|id| id.0));
        let current = &self.composers;
        self.capabilities.retain(|entity| match entity {
            EntityRef::Composer(id) => {
                same_entity(&previous, current, id, |a, b| a.name == b.name)
            }
            _ => true,
        });
    }

    pub fn set_year_map(&mut self, years: BTreeMap<YearId, Year>) {
        let previous = std::mem::replace(&mut self.years, years);
        self.year_by_value.clear();
        for (id, year) in self.years.iter_mut() {
            year.id = *id;
            self.year_by_value.insert(year.value, *id);
        }
        self.bump_last_id(self.years.keys().next_back().map(|id| id.0));
        let current = &self.years;
        self.capabilities.retain(|entity| match entity {
            EntityRef::Year(id) => same_entity(&previous, current, id, |a, b| a.value == b.value),
            _ => true,
        });
    }

    fn bump_last_id(&mut self, max: Option<u64>) {
        if let Some(max) = max {
            self.last_id = self.last_id.max(max);
        }
    }

    fn reindex_albums(&mut self) {
        let keys: Vec<(AlbumKey, AlbumId)> = self
            .albums
            .values()
            .map(|album| (self.album_key(album), album.id))
            .collect();
        self.album_by_key = keys.into_iter().collect();
    }

    pub fn album_key(&self, album: &Album) -> AlbumKey {
        let artist = album
            .album_artist
            .and_then(|id| self.artists.get(&id))
            .map(|artist| artist.name.as_str());
        AlbumKey::new(album.name.clone(), artist)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_by_url(&self, url: &str) -> Option<&Track> {
        self.track_by_url.get(url).and_then(|id| self.tracks.get(id))
    }

    pub fn artist(&self, id: ArtistId) -> Option<&Artist> {
        self.artists.get(&id)
    }

    pub fn artist_by_name(&self, name: &str) -> Option<&Artist> {
        self.artist_by_name.get(name).and_then(|id| self.artists.get(id))
    }

    pub fn album(&self, id: AlbumId) -> Option<&Album> {
        self.albums.get(&id)
    }

    pub fn album_by_key(&self, name: &str, artist: Option<&str>) -> Option<&Album> {
        self.album_by_key
            .get(&AlbumKey::new(name, artist))
            .and_then(|id| self.albums.get(id))
    }

    pub fn genre(&self, id: GenreId) -> Option<&Genre> {
        self.genres.get(&id)
    }

    pub fn genre_by_name(&self, name: &str) -> Option<&Genre> {
        self.genre_by_name.get(name).and_then(|id| self.genres.get(id))
    }

    pub fn composer(&self, id: ComposerId) -> Option<&Composer> {
        self.composers.get(&id)
    }

    pub fn composer_by_name(&self, name: &str) -> Option<&Composer> {
        self.composer_by_name
            .get(name)
            .and_then(|id| self.composers.get(id))
    }

    pub fn year(&self, id: YearId) -> Option<&Year> {
        self.years.get(&id)
    }

    pub fn year_by_value(&self, value: i32) -> Option<&Year> {
        self.year_by_value.get(&value).and_then(|id| self.years.get(id))
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        match entity {
            EntityRef::Track(id) => self.tracks.contains_key(&id),
            EntityRef::Artist(id) => self.artists.contains_key(&id),
            EntityRef::Album(id) => self.albums.contains_key(&id),
            EntityRef::Genre(id) => self.genres.contains_key(&id),
            EntityRef::Composer(id) => self.composers.contains_key(&id),
            EntityRef::Year(id) => self.years.contains_key(&id),
        }
    }

    /// Attaches a capability to a live entity. Returns false if the entity
    /// is not part of this collection.
    pub fn set_capability(&mut self, entity: EntityRef, capability: Capability) -> bool {
        if !self.contains(entity) {
            return false;
        }
        self.capabilities.set(entity, capability);
        true
    }

    pub fn capability(&self, entity: EntityRef, kind: CapabilityKind) -> Option<&Capability> {
        self.capabilities.get(entity, kind)
    }

    pub fn has_capability(&self, entity: EntityRef, kind: CapabilityKind) -> bool {
        self.capabilities.has(entity, kind)
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            tracks: self.tracks.len(),
            artists: self.artists.len(),
            albums: self.albums.len(),
            genres: self.genres.len(),
            composers: self.composers.len(),
            years: self.years.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
            && self.artists.is_empty()
            && self.albums.is_empty()
            && self.genres.is_empty()
            && self.composers.is_empty()
            && self.years.is_empty()
    }

    /// Drops every entity. Ids are not reused afterwards.
    pub fn clear(&mut self) {
        let last_id = self.last_id;
        *self = Self::default();
        self.last_id = last_id;
    }

    pub(crate) fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub(crate) fn track_id_by_url(&self, url: &str) -> Option<TrackId> {
        self.track_by_url.get(url).copied()
    }

    pub(crate) fn artist_mut(&mut self, id: ArtistId) -> Option<&mut Artist> {
        self.artists.get_mut(&id)
    }

    pub(crate) fn album_mut(&mut self, id: AlbumId) -> Option<&mut Album> {
        self.albums.get_mut(&id)
    }

    pub(crate) fn genre_mut(&mut self, id: GenreId) -> Option<&mut Genre> {
        self.genres.get_mut(&id)
    }

    pub(crate) fn composer_mut(&mut self, id: ComposerId) -> Option<&mut Composer> {
        self.composers.get_mut(&id)
    }

    pub(crate) fn year_mut(&mut self, id: YearId) -> Option<&mut Year> {
        self.years.get_mut(&id)
    }

    pub(crate) fn artist_id_by_name(&self, name: &str) -> Option<ArtistId> {
        self.artist_by_name.get(name).copied()
    }

    pub(crate) fn album_id_by_key(&self, key: &AlbumKey) -> Option<AlbumId> {
        self.album_by_key.get(key).copied()
    }

    pub(crate) fn genre_id_by_name(&self, name: &str) -> Option<GenreId> {
        self.genre_by_name.get(name).copied()
    }

    pub(crate) fn composer_id_by_name(&self, name: &str) -> Option<ComposerId> {
        self.composer_by_name.get(name).copied()
    }

    pub(crate) fn year_id_by_value(&self, value: i32) -> Option<YearId> {
        self.year_by_value.get(&value).copied()
    }

    pub(crate) fn remove_track_entry(&mut self, id: TrackId) -> Option<Track> {
        let track = self.tracks.remove(&id)?;
        self.track_by_url.remove(&track.url);
        self.capabilities.forget(EntityRef::Track(id));
        Some(track)
    }

    pub(crate) fn remove_artist_entry(&mut self, id: ArtistId) -> Option<Artist> {
        let artist = self.artists.remove(&id)?;
        self.artist_by_name.remove(&artist.name);
        self.capabilities.forget(EntityRef::Artist(id));
        Some(artist)
    }

    pub(crate) fn remove_album_entry(&mut self, id: AlbumId) -> Option<Album> {
        let key = self.album_key(self.albums.get(&id)?);
        let album = self.albums.remove(&id)?;
        self.album_by_key.remove(&key);
        self.capabilities.forget(EntityRef::Album(id));
        Some(album)
    }

    pub(crate) fn remove_genre_entry(&mut self, id: GenreId) -> Option<Genre> {
        let genre = self.genres.remove(&id)?;
        self.genre_by_name.remove(&genre.name);
        self.capabilities.forget(EntityRef::Genre(id));
        Some(genre)
    }

    pub(crate) fn remove_composer_entry(&mut self, id: ComposerId) -> Option<Composer> {
        let composer = self.composers.remove(&id)?;
        self.composer_by_name.remove(&composer.name);
        self.capabilities.forget(EntityRef::Composer(id));
        Some(composer)
    }

    pub(crate) fn remove_year_entry(&mut self, id: YearId) -> Option<Year> {
        let year = self.years.remove(&id)?;
        self.year_by_value.remove(&year.value);
        self.capabilities.forget(EntityRef::Year(id));
        Some(year)
    }
}

/// True when `id` names the same entity before and after a bulk replace.
fn same_entity<I: Ord, T>(
    previous: &BTreeMap<I, T>,
    current: &BTreeMap<I, T>,
    id: I,
    same: impl Fn(&T, &T) -> bool,
) -> bool {
    match (previous.get(&id), current.get(&id)) {
        (Some(before), Some(after)) => same(before, after),
        _ => false,
    }
}
