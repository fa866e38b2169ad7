use common::{non_empty, TrackInfo};
use tracing::debug;

use crate::maps::CollectionMaps;
use crate::model::{
    attach, detach, Album, AlbumId, AlbumKey, Artist, ArtistId, Composer, ComposerId, Genre,
    GenreId, Track, TrackId, Year, YearId,
};

/// Invariant-preserving mutations over a collection's maps.
///
/// Every operation leaves each track listed exactly once in the taxonomy
/// entities it declares, and prunes taxonomy entities left without tracks.
/// Obtain one through [`crate::MemoryCollection::change`] so the whole
/// sequence runs under the collection's write lock.
pub struct MapChanger<'a> {
    maps: &'a mut CollectionMaps,
}

struct Relations {
    artist: Option<ArtistId>,
    album: Option<AlbumId>,
    genre: Option<GenreId>,
    composer: Option<ComposerId>,
    year: Option<YearId>,
}

impl<'a> MapChanger<'a> {
    pub fn new(maps: &'a mut CollectionMaps) -> Self {
        Self { maps }
    }

    pub fn maps(&self) -> &CollectionMaps {
        self.maps
    }

    /// Adds a track and wires it into its taxonomy entities, creating them
    /// on first reference. A url that is already present is handled as
    /// [`MapChanger::track_changed`].
    pub fn add_track(&mut self, info: TrackInfo) -> TrackId {
        if self.maps.track_id_by_url(&info.url).is_some() {
            return self.track_changed(info);
        }

        let id = self.maps.add_track(track_from_info(&info));
        self.attach_track(id, &info);
        debug!("Added track {} ({})", id, info.url);
        id
    }

    /// Re-reads the attributes of a known track. The track is detached from
    /// its previous taxonomy entities before it is attached to the new ones.
    /// Its id and statistics survive.
    pub fn track_changed(&mut self, info: TrackInfo) -> TrackId {
        let id = match self.maps.track_id_by_url(&info.url) {
            Some(id) => id,
            None => return self.add_track(info),
        };

        self.detach_track(id);
        let statistics = self
            .maps
            .track(id)
            .map(|track| track.statistics.clone())
            .unwrap_or_default();
        let mut track = track_from_info(&info);
        track.statistics = statistics;
        self.maps.add_track(track);
        self.attach_track(id, &info);
        debug!("Updated track {} ({})", id, info.url);
        id
    }

    pub fn remove_track(&mut self, url: &str) -> bool {
        let id = match self.maps.track_id_by_url(url) {
            Some(id) => id,
            None => return false,
        };
        self.detach_track(id);
        self.maps.remove_track_entry(id);
        debug!("Removed track {} ({})", id, url);
        true
    }

    /// Removes every track whose url starts with `prefix`, e.g. all tracks of
    /// an invalidated directory or remote container.
    pub fn remove_tracks_under(&mut self, prefix: &str) -> usize {
        let urls: Vec<String> = self
            .maps
            .track_map()
            .values()
            .filter(|track| track.url.starts_with(prefix))
            .map(|track| track.url.clone())
            .collect();
        let mut removed = 0;
        for url in urls {
            if self.remove_track(&url) {
                removed += 1;
            }
        }
        debug!("Removed {} tracks under {}", removed, prefix);
        removed
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    fn attach_track(&mut self, id: TrackId, info: &TrackInfo) {
        let relations = self.resolve_relations(info);

        if let Some(track) = self.maps.track_mut(id) {
            track.artist = relations.artist;
            track.album = relations.album;
            track.genre = relations.genre;
            track.composer = relations.composer;
            track.year = relations.year;
        }

        if let Some(artist) = relations.artist.and_then(|a| self.maps.artist_mut(a)) {
            attach(&mut artist.tracks, id);
        }
        if let Some(album_id) = relations.album {
            if let Some(album) = self.maps.album_mut(album_id) {
                attach(&mut album.tracks, id);
                if album.cover.is_none() {
                    album.cover = info.cover.clone();
                }
            }
            self.recompute_compilation(album_id);
        }
        if let Some(genre) = relations.genre.and_then(|g| self.maps.genre_mut(g)) {
            attach(&mut genre.tracks, id);
        }
        if let Some(composer) = relations.composer.and_then(|c| self.maps.composer_mut(c)) {
            attach(&mut composer.tracks, id);
        }
        if let Some(year) = relations.year.and_then(|y| self.maps.year_mut(y)) {
            attach(&mut year.tracks, id);
        }
    }

    fn resolve_relations(&mut self, info: &TrackInfo) -> Relations {
        let artist = non_empty(info.artist.as_deref()).map(|name| self.ensure_artist(name));
        let album = non_empty(info.album.as_deref()).map(|name| {
            let album_artist = info
                .effective_album_artist()
                .map(|artist| self.ensure_artist(artist));
            self.ensure_album(name, album_artist)
        });
        let genre = non_empty(info.genre.as_deref()).map(|name| self.ensure_genre(name));
        let composer = non_empty(info.composer.as_deref()).map(|name| self.ensure_composer(name));
        let year = info.effective_year().map(|value| self.ensure_year(value));

        Relations {
            artist,
            album,
            genre,
            composer,
            year,
        }
    }

    fn detach_track(&mut self, id: TrackId) {
        let track = match self.maps.track_mut(id) {
            Some(track) => track,
            None => return,
        };
        let relations = Relations {
            artist: track.artist.take(),
            album: track.album.take(),
            genre: track.genre.take(),
            composer: track.composer.take(),
            year: track.year.take(),
        };

        if let Some(artist) = relations.artist.and_then(|a| self.maps.artist_mut(a)) {
            detach(&mut artist.tracks, id);
        }
        if let Some(album_id) = relations.album {
            if let Some(album) = self.maps.album_mut(album_id) {
                detach(&mut album.tracks, id);
            }
            self.prune_album(album_id);
        }
        if let Some(artist_id) = relations.artist {
            self.prune_artist(artist_id);
        }
        if let Some(genre_id) = relations.genre {
            let empty = match self.maps.genre_mut(genre_id) {
                Some(genre) => {
                    detach(&mut genre.tracks, id);
                    genre.tracks.is_empty()
                }
                None => false,
            };
            if empty {
                self.maps.remove_genre_entry(genre_id);
            }
        }
        if let Some(composer_id) = relations.composer {
            let empty = match self.maps.composer_mut(composer_id) {
                Some(composer) => {
                    detach(&mut composer.tracks, id);
                    composer.tracks.is_empty()
                }
                None => false,
            };
            if empty {
                self.maps.remove_composer_entry(composer_id);
            }
        }
        if let Some(year_id) = relations.year {
            let empty = match self.maps.year_mut(year_id) {
                Some(year) => {
                    detach(&mut year.tracks, id);
                    year.tracks.is_empty()
                }
                None => false,
            };
            if empty {
                self.maps.remove_year_entry(year_id);
            }
        }
    }

    fn prune_album(&mut self, album_id: AlbumId) {
        let (empty, album_artist) = match self.maps.album(album_id) {
            Some(album) => (album.tracks.is_empty(), album.album_artist),
            None => return,
        };
        if !empty {
            self.recompute_compilation(album_id);
            return;
        }

        self.maps.remove_album_entry(album_id);
        if let Some(artist_id) = album_artist {
            if let Some(artist) = self.maps.artist_mut(artist_id) {
                detach(&mut artist.albums, album_id);
            }
            self.prune_artist(artist_id);
        }
    }

    /// An artist stays while it has tracks or is the album artist of a live
    /// album.
    fn prune_artist(&mut self, artist_id: ArtistId) {
        let unused = match self.maps.artist(artist_id) {
            Some(artist) => artist.tracks.is_empty() && artist.albums.is_empty(),
            None => false,
        };
        if unused {
            self.maps.remove_artist_entry(artist_id);
        }
    }

    fn recompute_compilation(&mut self, album_id: AlbumId) {
        let compilation = match self.maps.album(album_id) {
            Some(album) => album.tracks.iter().any(|track_id| {
                self.maps
                    .track(*track_id)
                    .map(|track| track.artist != album.album_artist)
                    .unwrap_or(false)
            }),
            None => return,
        };
        if let Some(album) = self.maps.album_mut(album_id) {
            album.compilation = compilation;
        }
    }

    fn ensure_artist(&mut self, name: &str) -> ArtistId {
        match self.maps.artist_id_by_name(name) {
            Some(id) => id,
            None => self.maps.add_artist(Artist::new(name)),
        }
    }

    fn ensure_album(&mut self, name: &str, album_artist: Option<ArtistId>) -> AlbumId {
        let artist_name = album_artist
            .and_then(|id| self.maps.artist(id))
            .map(|artist| artist.name.clone());
        let key = AlbumKey::new(name, artist_name.as_deref());
        if let Some(id) = self.maps.album_id_by_key(&key) {
            return id;
        }

        let id = self.maps.add_album(Album::new(name, album_artist));
        if let Some(artist) = album_artist.and_then(|a| self.maps.artist_mut(a)) {
            attach(&mut artist.albums, id);
        }
        id
    }

    fn ensure_genre(&mut self, name: &str) -> GenreId {
        match self.maps.genre_id_by_name(name) {
            Some(id) => id,
            None => self.maps.add_genre(Genre::new(name)),
        }
    }

    fn ensure_composer(&mut self, name: &str) -> ComposerId {
        match self.maps.composer_id_by_name(name) {
            Some(id) => id,
            None => self.maps.add_composer(Composer::new(name)),
        }
    }

    fn ensure_year(&mut self, value: i32) -> YearId {
        match self.maps.year_id_by_value(value) {
            Some(id) => id,
            None => self.maps.add_year(Year::new(value)),
        }
    }
}

fn track_from_info(info: &TrackInfo) -> Track {
    let mut track = Track::new(info.url.clone(), info.title.clone());
    track.comment = info.comment.clone();
    track.length_ms = info.length_ms;
    track.track_number = info.track_number;
    track.disc_number = info.disc_number;
    track.bit_rate = info.bit_rate;
    track.sample_rate = info.sample_rate;
    track.file_size = info.file_size;
    track.format = info.format.clone();
    track
}

#[cfg(test)]
pub(crate) mod tests {
    use common::TrackInfo;
    use proptest::prelude::*;

    use super::MapChanger;
    use crate::maps::CollectionMaps;
    use crate::model::TrackId;

    pub(crate) fn info(url: &str, artist: &str, album: &str) -> TrackInfo {
        let mut info = TrackInfo::new(url, url.trim_start_matches("file:///"));
        if !artist.is_empty() {
            info.artist = Some(artist.to_string());
        }
        if !album.is_empty() {
            info.album = Some(album.to_string());
        }
        info
    }

    /// Checks every back-reference in both directions.
    pub(crate) fn assert_consistent(maps: &CollectionMaps) {
        for (id, track) in maps.track_map() {
            assert_eq!(track.id(), *id);
            if let Some(artist) = track.artist {
                let artist = maps.artist(artist).expect("track artist exists");
                assert_eq!(artist.tracks.iter().filter(|t| *t == id).count(), 1);
            }
            if let Some(album) = track.album {
                let album = maps.album(album).expect("track album exists");
                assert_eq!(album.tracks.iter().filter(|t| *t == id).count(), 1);
            }
            if let Some(genre) = track.genre {
                let genre = maps.genre(genre).expect("track genre exists");
                assert_eq!(genre.tracks.iter().filter(|t| *t == id).count(), 1);
            }
            if let Some(composer) = track.composer {
                let composer = maps.composer(composer).expect("track composer exists");
                assert_eq!(composer.tracks.iter().filter(|t| *t == id).count(), 1);
            }
            if let Some(year) = track.year {
                let year = maps.year(year).expect("track year exists");
                assert_eq!(year.tracks.iter().filter(|t| *t == id).count(), 1);
            }
        }
        for artist in maps.artist_map().values() {
            assert!(!artist.tracks.is_empty() || !artist.albums.is_empty());
            for track in &artist.tracks {
                assert_eq!(maps.track(*track).and_then(|t| t.artist), Some(artist.id()));
            }
            for album in &artist.albums {
                assert_eq!(
                    maps.album(*album).and_then(|a| a.album_artist),
                    Some(artist.id())
                );
            }
        }
        for album in maps.album_map().values() {
            assert!(!album.tracks.is_empty());
            for track in &album.tracks {
                assert_eq!(maps.track(*track).and_then(|t| t.album), Some(album.id()));
            }
            if let Some(artist) = album.album_artist {
                let artist = maps.artist(artist).expect("album artist exists");
                assert!(artist.albums.contains(&album.id()));
            }
        }
        for genre in maps.genre_map().values() {
            assert!(!genre.tracks.is_empty());
            for track in &genre.tracks {
                assert_eq!(maps.track(*track).and_then(|t| t.genre), Some(genre.id()));
            }
        }
        for composer in maps.composer_map().values() {
            assert!(!composer.tracks.is_empty());
            for track in &composer.tracks {
                assert_eq!(
                    maps.track(*track).and_then(|t| t.composer),
                    Some(composer.id())
                );
            }
        }
        for year in maps.year_map().values() {
            assert!(!year.tracks.is_empty());
            for track in &year.tracks {
                assert_eq!(maps.track(*track).and_then(|t| t.year), Some(year.id()));
            }
        }
    }

    #[test]
    fn same_artist_resolves_to_one_entry() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        for n in 0..5 {
            changer.add_track(info(&format!("file:///{}.mp3", n), "Foo", ""));
        }

        assert_eq!(maps.artist_map().len(), 1);
        let artist = maps.artist_by_name("Foo").unwrap();
        assert_eq!(artist.tracks.len(), 5);
        assert_consistent(&maps);
    }

    #[test]
    fn changed_artist_moves_the_track() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        changer.add_track(info("file:///1.mp3", "Old", ""));
        let moved = changer.add_track(info("file:///2.mp3", "Old", ""));
        let id = changer.track_changed(info("file:///2.mp3", "New", ""));

        assert_eq!(id, moved);
        assert_eq!(maps.artist_by_name("Old").unwrap().tracks.len(), 1);
        assert_eq!(maps.artist_by_name("New").unwrap().tracks, vec![moved]);
        assert_consistent(&maps);
    }

    #[test]
    fn re_adding_the_same_url_does_not_duplicate() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        let first = changer.add_track(info("file:///1.mp3", "Foo", "Bar"));
        let second = changer.add_track(info("file:///1.mp3", "Foo", "Bar"));

        assert_eq!(first, second);
        assert_eq!(maps.artist_by_name("Foo").unwrap().tracks, vec![first]);
        assert_eq!(maps.album_by_key("Bar", Some("Foo")).unwrap().tracks, vec![first]);
    }

    #[test]
    fn same_album_name_with_different_artists_is_two_albums() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        changer.add_track(info("file:///a.mp3", "A", "X"));
        changer.add_track(info("file:///b.mp3", "B", "X"));

        assert_eq!(maps.album_map().len(), 2);
        assert_eq!(maps.album_by_key("X", Some("A")).unwrap().tracks.len(), 1);
        assert_eq!(maps.album_by_key("X", Some("B")).unwrap().tracks.len(), 1);
        assert_consistent(&maps);
    }

    #[test]
    fn album_artist_change_moves_album_bucket() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        changer.add_track(info("file:///a.mp3", "A", "X"));
        let mut retagged = info("file:///a.mp3", "A", "X");
        retagged.album_artist = Some("Various".to_string());
        changer.track_changed(retagged);

        assert!(maps.album_by_key("X", Some("A")).is_none());
        let album = maps.album_by_key("X", Some("Various")).unwrap();
        assert_eq!(album.tracks.len(), 1);
        assert!(album.compilation);
        assert_consistent(&maps);
    }

    #[test]
    fn compilation_flag_tracks_disagreeing_artists() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        let mut first = info("file:///1.mp3", "A", "Hits");
        first.compilation = true;
        let mut second = info("file:///2.mp3", "B", "Hits");
        second.compilation = true;
        changer.add_track(first);
        changer.add_track(second);

        let album = maps.album_by_key("Hits", None).unwrap();
        assert!(album.compilation);
        assert_eq!(album.tracks.len(), 2);

        let mut changer = MapChanger::new(&mut maps);
        changer.add_track(info("file:///3.mp3", "C", "Solo"));
        assert!(!maps.album_by_key("Solo", Some("C")).unwrap().compilation);
    }

    #[test]
    fn removing_last_track_prunes_taxonomy() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        let mut track = info("file:///1.mp3", "Foo", "Bar");
        track.genre = Some("Rock".to_string());
        track.composer = Some("Bach".to_string());
        track.year = Some(1999);
        changer.add_track(track);

        assert!(changer.remove_track("file:///1.mp3"));
        assert!(!changer.remove_track("file:///1.mp3"));
        assert!(maps.is_empty());
    }

    #[test]
    fn album_artist_survives_while_its_album_lives() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        let mut track = info("file:///1.mp3", "Guest", "Hits");
        track.album_artist = Some("Host".to_string());
        changer.add_track(track);

        let host = maps.artist_by_name("Host").unwrap();
        assert!(host.tracks.is_empty());
        assert_eq!(host.albums.len(), 1);

        let mut changer = MapChanger::new(&mut maps);
        changer.remove_track("file:///1.mp3");
        assert!(maps.artist_by_name("Host").is_none());
    }

    #[test]
    fn removes_whole_containers() {
        let mut maps = CollectionMaps::new();
        let mut changer = MapChanger::new(&mut maps);
        changer.add_track(info("file:///music/a/1.mp3", "A", "One"));
        changer.add_track(info("file:///music/a/2.mp3", "A", "One"));
        changer.add_track(info("file:///music/b/1.mp3", "B", "Two"));

        assert_eq!(changer.remove_tracks_under("file:///music/a/"), 2);
        assert_eq!(maps.track_map().len(), 1);
        assert!(maps.artist_by_name("A").is_none());
        assert_consistent(&maps);
    }

    #[test]
    fn statistics_survive_metadata_changes() {
        let mut maps = CollectionMaps::new();
        let id = MapChanger::new(&mut maps).add_track(info("file:///1.mp3", "A", ""));
        maps.track_mut(id).unwrap().statistics.play_count = 3;

        MapChanger::new(&mut maps).track_changed(info("file:///1.mp3", "B", ""));
        assert_eq!(maps.track(id).unwrap().statistics.play_count, 3);
        assert_eq!(maps.track(TrackId(id.get())).unwrap().name, "1.mp3");
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add(usize, usize, usize, usize, i32),
        Remove(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..8usize, 0..4usize, 0..4usize, 0..3usize, 0..3i32)
                .prop_map(|(url, artist, album, genre, year)| Op::Add(url, artist, album, genre, year)),
            1 => (0..8usize).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn back_references_stay_consistent(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let artists = ["", "A", "B", "C"];
            let albums = ["", "X", "Y", "Z"];
            let genres = ["", "Rock", "Jazz"];

            let mut maps = CollectionMaps::new();
            for op in ops {
                let mut changer = MapChanger::new(&mut maps);
                match op {
                    Op::Add(url, artist, album, genre, year) => {
                        let mut track = info(&format!("file:///{}.mp3", url), artists[artist], albums[album]);
                        if !genres[genre].is_empty() {
                            track.genre = Some(genres[genre].to_string());
                        }
                        track.year = Some(2000 + year);
                        changer.add_track(track);
                    }
                    Op::Remove(url) => {
                        changer.remove_track(&format!("file:///{}.mp3", url));
                    }
                }
                assert_consistent(&maps);
            }
        }
    }
}
