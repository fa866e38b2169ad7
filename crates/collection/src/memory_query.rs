use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::delivery::{QueryEvent, QueryHandle, QueryOutcome, QueryResults, QueryState};
use crate::maps::CollectionMaps;
use crate::model::{EntityRef, Track, TrackId};
use crate::query::{
    AlbumQueryMode, ArtistQueryMode, Field, Ordering, Predicate, Query, QueryMaker, QueryType,
    ReturnFunction,
};
use crate::MemoryCollection;

/// Query maker evaluating against one in-memory collection.
///
/// Runs may overlap. [`QueryMaker::abort_query`] cancels every run still in
/// flight, while [`MemoryQueryMaker::state`] follows the most recent run.
pub struct MemoryQueryMaker {
    collection: Arc<MemoryCollection>,
    collection_id: String,
    query: Query,
    run: Arc<Mutex<RunStatus>>,
    cancel: CancellationToken,
}

/// State of the latest run. Jobs from superseded runs leave it untouched.
#[derive(Debug)]
struct RunStatus {
    generation: u64,
    state: QueryState,
}

impl RunStatus {
    fn finish(&mut self, generation: u64, state: QueryState) {
        if self.generation == generation {
            self.state = state;
        }
    }
}

impl MemoryQueryMaker {
    pub fn new(collection: Arc<MemoryCollection>, collection_id: impl Into<String>) -> Self {
        Self {
            collection,
            collection_id: collection_id.into(),
            query: Query::default(),
            run: Arc::new(Mutex::new(RunStatus {
                generation: 0,
                state: QueryState::Idle,
            })),
            cancel: CancellationToken::new(),
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn state(&self) -> QueryState {
        match self.run.lock().state {
            QueryState::Idle if !self.query.is_empty() => QueryState::Configured,
            state => state,
        }
    }

    /// Evaluates inline and returns once the terminal event is produced.
    pub fn run_blocking(&mut self) -> QueryOutcome {
        let (job, handle) = self.prepare();
        job.execute();
        handle.drain()
    }

    fn prepare(&mut self) -> (QueryJob, QueryHandle) {
        let (tx, rx) = unbounded_channel();
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let cancel = self.cancel.child_token();
        let generation = {
            let mut run = self.run.lock();
            run.generation += 1;
            run.state = QueryState::Running;
            run.generation
        };
        let job = QueryJob {
            collection: Arc::clone(&self.collection),
            collection_id: self.collection_id.clone(),
            query: self.query.clone(),
            run: Arc::clone(&self.run),
            generation,
            cancel: cancel.clone(),
            events: tx,
        };
        let handle = QueryHandle::new(self.collection_id.clone(), rx, cancel);
        (job, handle)
    }
}

impl QueryMaker for MemoryQueryMaker {
    fn query(&self) -> &Query {
        &self.query
    }

    fn query_mut(&mut self) -> &mut Query {
        let mut run = self.run.lock();
        if matches!(run.state, QueryState::Done | QueryState::Aborted) {
            run.state = QueryState::Idle;
        }
        drop(run);
        &mut self.query
    }

    fn run(&mut self) -> QueryHandle {
        let (job, handle) = self.prepare();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || job.execute());
            }
            Err(_) => {
                std::thread::spawn(move || job.execute());
            }
        }
        handle
    }

    fn abort_query(&self) {
        self.cancel.cancel();
    }

    fn reset(&mut self) -> &mut Self {
        self.query = Query::default();
        let mut run = self.run.lock();
        if run.state != QueryState::Running {
            run.state = QueryState::Idle;
        }
        drop(run);
        self
    }
}

struct QueryJob {
    collection: Arc<MemoryCollection>,
    collection_id: String,
    query: Query,
    run: Arc<Mutex<RunStatus>>,
    generation: u64,
    cancel: CancellationToken,
    events: UnboundedSender<QueryEvent>,
}

impl QueryJob {
    fn execute(self) {
        let evaluation = {
            let maps = self.collection.read();
            evaluate(&maps, &self.query, &self.cancel)
        };

        let terminal = match evaluation {
            Evaluation::Aborted => {
                debug!("Query on {} aborted", self.collection_id);
                self.run.lock().finish(self.generation, QueryState::Aborted);
                QueryEvent::Aborted {
                    collection_id: self.collection_id.clone(),
                }
            }
            Evaluation::Finished(results) => {
                if let Some(results) = results.filter(|results| !results.is_empty()) {
                    let _ = self.events.send(QueryEvent::NewResults {
                        collection_id: self.collection_id.clone(),
                        results,
                    });
                }
                self.run.lock().finish(self.generation, QueryState::Done);
                QueryEvent::Done {
                    collection_id: self.collection_id.clone(),
                }
            }
        };
        let _ = self.events.send(terminal);
    }
}

enum Evaluation {
    Finished(Option<QueryResults>),
    Aborted,
}

fn evaluate(
    maps: &CollectionMaps,
    query: &Query,
    cancel: &CancellationToken,
) -> Evaluation {
    let query_type = match query.query_type() {
        Some(query_type) => query_type,
        None => {
            warn!("Query run without a query type; delivering no results");
            return Evaluation::Finished(None);
        }
    };

    let evaluator = Evaluator {
        maps,
        predicate: query.predicate(),
        album_mode: query.album_mode(),
    };
    let mut tracks = match evaluator.matching_tracks(cancel) {
        Some(tracks) => tracks,
        None => return Evaluation::Aborted,
    };

    let results = match query_type {
        QueryType::Track => {
            order(&mut tracks, query, |track, field| track_sort_key(maps, track, field));
            truncate(&mut tracks, query);
            QueryResults::Tracks(tracks.into_iter().cloned().collect())
        }
        QueryType::Custom => {
            order(&mut tracks, query, |track, field| track_sort_key(maps, track, field));
            QueryResults::Custom(custom_rows(maps, &tracks, query))
        }
        QueryType::Artist => {
            let passing = track_set(&tracks);
            let mut artists = Vec::new();
            for artist in maps.artist_map().values() {
                if cancel.is_cancelled() {
                    return Evaluation::Aborted;
                }
                let keep = match query.artist_mode() {
                    ArtistQueryMode::TrackArtists => any_passing(&artist.tracks, &passing),
                    ArtistQueryMode::AlbumArtists => artist.albums.iter().any(|album| {
                        maps.album(*album)
                            .map(|album| any_passing(&album.tracks, &passing))
                            .unwrap_or(false)
                    }),
                };
                if keep {
                    artists.push(artist);
                }
            }
            order(&mut artists, query, |artist, field| match field {
                Field::Artist | Field::AlbumArtist => Some(text_key(&artist.name)),
                _ => None,
            });
            truncate(&mut artists, query);
            QueryResults::Artists(artists.into_iter().cloned().collect())
        }
        QueryType::Album => {
            let passing = track_set(&tracks);
            let mut albums = Vec::new();
            for album in maps.album_map().values() {
                if cancel.is_cancelled() {
                    return Evaluation::Aborted;
                }
                if any_passing(&album.tracks, &passing) {
                    albums.push(album);
                }
            }
            order(&mut albums, query, |album, field| match field {
                Field::Album => Some(text_key(&album.name)),
                Field::AlbumArtist | Field::Artist => album
                    .album_artist
                    .and_then(|id| maps.artist(id))
                    .map(|artist| text_key(&artist.name)),
                _ => None,
            });
            truncate(&mut albums, query);
            QueryResults::Albums(albums.into_iter().cloned().collect())
        }
        QueryType::Genre => {
            let passing = track_set(&tracks);
            let mut genres = Vec::new();
            for genre in maps.genre_map().values() {
                if cancel.is_cancelled() {
                    return Evaluation::Aborted;
                }
                if any_passing(&genre.tracks, &passing) {
                    genres.push(genre);
                }
            }
            order(&mut genres, query, |genre, field| match field {
                Field::Genre => Some(text_key(&genre.name)),
                _ => None,
            });
            truncate(&mut genres, query);
            QueryResults::Genres(genres.into_iter().cloned().collect())
        }
        QueryType::Composer => {
            let passing = track_set(&tracks);
            let mut composers = Vec::new();
            for composer in maps.composer_map().values() {
                if cancel.is_cancelled() {
                    return Evaluation::Aborted;
                }
                if any_passing(&composer.tracks, &passing) {
                    composers.push(composer);
                }
            }
            order(&mut composers, query, |composer, field| match field {
                Field::Composer => Some(text_key(&composer.name)),
                _ => None,
            });
            truncate(&mut composers, query);
            QueryResults::Composers(composers.into_iter().cloned().collect())
        }
        QueryType::Year => {
            let passing = track_set(&tracks);
            let mut years = Vec::new();
            for year in maps.year_map().values() {
                if cancel.is_cancelled() {
                    return Evaluation::Aborted;
                }
                if any_passing(&year.tracks, &passing) {
                    years.push(year);
                }
            }
            order(&mut years, query, |year, field| match field {
                Field::Year => Some(SortKey::Number(i64::from(year.value))),
                _ => None,
            });
            truncate(&mut years, query);
            QueryResults::Years(years.into_iter().cloned().collect())
        }
    };

    Evaluation::Finished(Some(results))
}

struct Evaluator<'m> {
    maps: &'m CollectionMaps,
    predicate: Predicate,
    album_mode: AlbumQueryMode,
}

impl<'m> Evaluator<'m> {
    /// Tracks satisfying the constraints, in id order. `None` when
    /// cancelled during the scan.
    fn matching_tracks(&self, cancel: &CancellationToken) -> Option<Vec<&'m Track>> {
        let mut out = Vec::new();
        for track in self.candidates() {
            if cancel.is_cancelled() {
                return None;
            }
            if self.passes(track) {
                out.push(track);
            }
        }
        Some(out)
    }

    /// When the root requires a match on some entity, only that entity's
    /// tracks can pass, so the scan starts from the smallest such list.
    fn candidates(&self) -> Vec<&'m Track> {
        let maps = self.maps;
        let mut narrowest: Option<Vec<TrackId>> = None;
        if let Predicate::And(children) = &self.predicate {
            for child in children {
                let ids = match child {
                    Predicate::Match(entity) => entity_tracks(maps, *entity),
                    _ => continue,
                };
                if narrowest.as_ref().map_or(true, |best| ids.len() < best.len()) {
                    narrowest = Some(ids);
                }
            }
        }

        match narrowest {
            Some(mut ids) => {
                ids.sort();
                ids.dedup();
                ids.into_iter().filter_map(|id| maps.track(id)).collect()
            }
            None => maps.track_map().values().collect(),
        }
    }

    fn passes(&self, track: &Track) -> bool {
        self.album_mode_allows(track) && self.eval(&self.predicate, track)
    }

    fn album_mode_allows(&self, track: &Track) -> bool {
        let compilation = track
            .album
            .and_then(|id| self.maps.album(id))
            .map(|album| album.compilation)
            .unwrap_or(false);
        match self.album_mode {
            AlbumQueryMode::AllAlbums => true,
            AlbumQueryMode::OnlyCompilations => compilation,
            AlbumQueryMode::OnlyNormalAlbums => !compilation,
        }
    }

    fn eval(&self, predicate: &Predicate, track: &Track) -> bool {
        match predicate {
            Predicate::And(children) => children.iter().all(|child| self.eval(child, track)),
            Predicate::Or(children) => {
                children.is_empty() || children.iter().any(|child| self.eval(child, track))
            }
            Predicate::Match(entity) => matches_entity(track, *entity),
            Predicate::Text { filter, negate } => {
                let value = text_value(self.maps, track, filter.field);
                filter.matches(value.as_deref()) != *negate
            }
            Predicate::Number {
                field,
                value,
                comparison,
                negate,
            } => {
                let matched = number_value(self.maps, track, *field)
                    .map(|actual| comparison.compare(actual, *value))
                    .unwrap_or(false);
                matched != *negate
            }
        }
    }
}

fn matches_entity(track: &Track, entity: EntityRef) -> bool {
    match entity {
        EntityRef::Track(id) => track.id() == id,
        EntityRef::Artist(id) => track.artist == Some(id),
        EntityRef::Album(id) => track.album == Some(id),
        EntityRef::Genre(id) => track.genre == Some(id),
        EntityRef::Composer(id) => track.composer == Some(id),
        EntityRef::Year(id) => track.year == Some(id),
    }
}

fn entity_tracks(maps: &CollectionMaps, entity: EntityRef) -> Vec<TrackId> {
    match entity {
        EntityRef::Track(id) => maps.track(id).map(|_| vec![id]).unwrap_or_default(),
        EntityRef::Artist(id) => maps.artist(id).map(|a| a.tracks.clone()).unwrap_or_default(),
        EntityRef::Album(id) => maps.album(id).map(|a| a.tracks.clone()).unwrap_or_default(),
        EntityRef::Genre(id) => maps.genre(id).map(|g| g.tracks.clone()).unwrap_or_default(),
        EntityRef::Composer(id) => maps
            .composer(id)
            .map(|c| c.tracks.clone())
            .unwrap_or_default(),
        EntityRef::Year(id) => maps.year(id).map(|y| y.tracks.clone()).unwrap_or_default(),
    }
}

pub(crate) fn text_value(maps: &CollectionMaps, track: &Track, field: Field) -> Option<String> {
    if field.is_numeric() {
        return number_value(maps, track, field).map(|value| value.to_string());
    }
    match field {
        Field::Url => Some(track.url.clone()),
        Field::Title => Some(track.name.clone()),
        Field::Artist => track
            .artist
            .and_then(|id| maps.artist(id))
            .map(|artist| artist.name.clone()),
        Field::Album => track
            .album
            .and_then(|id| maps.album(id))
            .map(|album| album.name.clone()),
        Field::AlbumArtist => track
            .album
            .and_then(|id| maps.album(id))
            .and_then(|album| album.album_artist)
            .and_then(|id| maps.artist(id))
            .map(|artist| artist.name.clone()),
        Field::Genre => track
            .genre
            .and_then(|id| maps.genre(id))
            .map(|genre| genre.name.clone()),
        Field::Composer => track
            .composer
            .and_then(|id| maps.composer(id))
            .map(|composer| composer.name.clone()),
        Field::Format => Some(track.format.clone()).filter(|format| !format.is_empty()),
        Field::Comment => track.comment.clone(),
        _ => None,
    }
}

pub(crate) fn number_value(maps: &CollectionMaps, track: &Track, field: Field) -> Option<i64> {
    let stats = &track.statistics;
    match field {
        Field::Year => track
            .year
            .and_then(|id| maps.year(id))
            .map(|year| i64::from(year.value)),
        Field::TrackNumber => track.track_number.map(i64::from),
        Field::DiscNumber => track.disc_number.map(i64::from),
        Field::Length => i64::try_from(track.length_ms).ok(),
        Field::BitRate => track.bit_rate.map(i64::from),
        Field::SampleRate => track.sample_rate.map(i64::from),
        Field::FileSize => i64::try_from(track.file_size).ok(),
        Field::Rating => Some(i64::from(stats.rating)),
        Field::Score => Some(stats.score.round() as i64),
        Field::PlayCount => Some(i64::from(stats.play_count)),
        Field::FirstPlayed => stats.first_played.and_then(|v| i64::try_from(v).ok()),
        Field::LastPlayed => stats.last_played.and_then(|v| i64::try_from(v).ok()),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Number(i64),
    Text(String),
}

fn text_key(value: &str) -> SortKey {
    SortKey::Text(value.to_lowercase())
}

fn track_sort_key(maps: &CollectionMaps, track: &Track, field: Field) -> Option<SortKey> {
    if field.is_numeric() {
        number_value(maps, track, field).map(SortKey::Number)
    } else {
        text_value(maps, track, field).map(|value| text_key(&value))
    }
}

/// Sorts by the configured orderings (stable, so ties keep id order), or
/// shuffles for random order. Missing values sort first in either
/// direction.
fn order<T, F>(items: &mut [T], query: &Query, key: F)
where
    F: Fn(&T, Field) -> Option<SortKey>,
{
    if query.is_random() {
        items.shuffle(&mut rand::rng());
        return;
    }
    let orderings: &[Ordering] = query.orderings();
    if orderings.is_empty() {
        return;
    }
    items.sort_by(|a, b| {
        for ordering in orderings {
            let cmp = match (key(a, ordering.field), key(b, ordering.field)) {
                (None, None) => CmpOrdering::Equal,
                (None, Some(_)) => CmpOrdering::Less,
                (Some(_), None) => CmpOrdering::Greater,
                (Some(left), Some(right)) if ordering.descending => right.cmp(&left),
                (Some(left), Some(right)) => left.cmp(&right),
            };
            if cmp != CmpOrdering::Equal {
                return cmp;
            }
        }
        CmpOrdering::Equal
    });
}

fn truncate<T>(items: &mut Vec<T>, query: &Query) {
    if let Some(limit) = query.limit() {
        items.truncate(limit);
    }
}

fn track_set(tracks: &[&Track]) -> HashSet<TrackId> {
    tracks.iter().map(|track| track.id()).collect()
}

fn any_passing(ids: &[TrackId], passing: &HashSet<TrackId>) -> bool {
    ids.iter().any(|id| passing.contains(id))
}

fn custom_rows(maps: &CollectionMaps, tracks: &[&Track], query: &Query) -> Vec<Vec<String>> {
    if !query.return_functions().is_empty() {
        let row = query
            .return_functions()
            .iter()
            .map(|(function, field)| aggregate(maps, tracks, *function, *field))
            .collect();
        return vec![row];
    }
    if query.return_values().is_empty() {
        return Vec::new();
    }

    let mut rows: Vec<Vec<String>> = tracks
        .iter()
        .map(|track| {
            query
                .return_values()
                .iter()
                .map(|field| text_value(maps, track, *field).unwrap_or_default())
                .collect()
        })
        .collect();
    truncate(&mut rows, query);
    rows
}

fn aggregate(
    maps: &CollectionMaps,
    tracks: &[&Track],
    function: ReturnFunction,
    field: Field,
) -> String {
    if function == ReturnFunction::Count {
        let count = tracks
            .iter()
            .filter(|track| text_value(maps, track, field).is_some())
            .count();
        return count.to_string();
    }

    let values = tracks
        .iter()
        .filter_map(|track| number_value(maps, track, field));
    let result = match function {
        ReturnFunction::Sum => Some(values.sum::<i64>()),
        ReturnFunction::Min => values.min(),
        ReturnFunction::Max => values.max(),
        ReturnFunction::Count => None,
    };
    result.map(|value| value.to_string()).unwrap_or_default()
}
