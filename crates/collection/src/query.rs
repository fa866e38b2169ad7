use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::delivery::QueryHandle;
use crate::model::EntityRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    Track,
    Artist,
    Album,
    Genre,
    Composer,
    Year,
    Custom,
}

impl QueryType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "track" | "tracks" => Some(Self::Track),
            "artist" | "artists" => Some(Self::Artist),
            "album" | "albums" => Some(Self::Album),
            "genre" | "genres" => Some(Self::Genre),
            "composer" | "composers" => Some(Self::Composer),
            "year" | "years" => Some(Self::Year),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Url,
    Title,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Composer,
    Format,
    Comment,
    Year,
    TrackNumber,
    DiscNumber,
    Length,
    BitRate,
    SampleRate,
    FileSize,
    Rating,
    Score,
    PlayCount,
    FirstPlayed,
    LastPlayed,
}

impl Field {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Field::Year
                | Field::TrackNumber
                | Field::DiscNumber
                | Field::Length
                | Field::BitRate
                | Field::SampleRate
                | Field::FileSize
                | Field::Rating
                | Field::Score
                | Field::PlayCount
                | Field::FirstPlayed
                | Field::LastPlayed
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|ch| *ch != '_' && *ch != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "url" => Some(Self::Url),
            "title" | "name" => Some(Self::Title),
            "artist" => Some(Self::Artist),
            "album" => Some(Self::Album),
            "albumartist" => Some(Self::AlbumArtist),
            "genre" => Some(Self::Genre),
            "composer" => Some(Self::Composer),
            "format" | "type" => Some(Self::Format),
            "comment" => Some(Self::Comment),
            "year" => Some(Self::Year),
            "tracknumber" | "track" => Some(Self::TrackNumber),
            "discnumber" | "disc" => Some(Self::DiscNumber),
            "length" => Some(Self::Length),
            "bitrate" => Some(Self::BitRate),
            "samplerate" => Some(Self::SampleRate),
            "filesize" => Some(Self::FileSize),
            "rating" => Some(Self::Rating),
            "score" => Some(Self::Score),
            "playcount" => Some(Self::PlayCount),
            "firstplayed" => Some(Self::FirstPlayed),
            "lastplayed" => Some(Self::LastPlayed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberComparison {
    Less,
    Equals,
    Greater,
}

impl NumberComparison {
    pub fn compare(self, actual: i64, expected: i64) -> bool {
        match self {
            NumberComparison::Less => actual < expected,
            NumberComparison::Equals => actual == expected,
            NumberComparison::Greater => actual > expected,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlbumQueryMode {
    #[default]
    AllAlbums,
    OnlyCompilations,
    OnlyNormalAlbums,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtistQueryMode {
    #[default]
    TrackArtists,
    AlbumArtists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnFunction {
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFilter {
    pub field: Field,
    pub value: String,
    pub match_begin: bool,
    pub match_end: bool,
}

impl TextFilter {
    pub fn matches(&self, actual: Option<&str>) -> bool {
        if self.value.is_empty() {
            return true;
        }
        let actual = match actual {
            Some(actual) => actual.to_lowercase(),
            None => return false,
        };
        let expected = self.value.to_lowercase();
        match (self.match_begin, self.match_end) {
            (true, true) => actual == expected,
            (true, false) => actual.starts_with(&expected),
            (false, true) => actual.ends_with(&expected),
            (false, false) => actual.contains(&expected),
        }
    }
}

/// Accumulated constraint tree. Empty groups impose no constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Match(EntityRef),
    Text {
        filter: TextFilter,
        negate: bool,
    },
    Number {
        field: Field,
        value: i64,
        comparison: NumberComparison,
        negate: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn is_trivial(&self) -> bool {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().all(Predicate::is_trivial)
            }
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GroupKind {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
struct Group {
    kind: GroupKind,
    children: Vec<Predicate>,
}

impl Group {
    fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    fn into_predicate(self) -> Predicate {
        match self.kind {
            GroupKind::And => Predicate::And(self.children),
            GroupKind::Or => Predicate::Or(self.children),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    pub field: Field,
    pub descending: bool,
}

/// Everything a query maker accumulates before `run()`.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    query_type: Option<QueryType>,
    /// Open groups; index 0 is the implicit AND root.
    groups: Vec<Group>,
    orderings: Vec<Ordering>,
    random: bool,
    limit: Option<usize>,
    album_mode: AlbumQueryMode,
    artist_mode: ArtistQueryMode,
    return_values: Vec<Field>,
    return_functions: Vec<(ReturnFunction, Field)>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            query_type: None,
            groups: vec![Group::new(GroupKind::And)],
            orderings: Vec::new(),
            random: false,
            limit: None,
            album_mode: AlbumQueryMode::default(),
            artist_mode: ArtistQueryMode::default(),
            return_values: Vec::new(),
            return_functions: Vec::new(),
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_type(&self) -> Option<QueryType> {
        self.query_type
    }

    pub fn set_query_type(&mut self, query_type: QueryType) {
        self.query_type = Some(query_type);
    }

    pub fn push(&mut self, predicate: Predicate) {
        if let Some(group) = self.groups.last_mut() {
            group.children.push(predicate);
        }
    }

    pub fn begin_and(&mut self) {
        self.groups.push(Group::new(GroupKind::And));
    }

    pub fn begin_or(&mut self) {
        self.groups.push(Group::new(GroupKind::Or));
    }

    /// Closes the innermost open group. A stray close with no open group is
    /// ignored.
    pub fn end_and_or(&mut self) {
        if self.groups.len() <= 1 {
            warn!("endAndOr without matching beginAnd/beginOr ignored");
            return;
        }
        if let Some(group) = self.groups.pop() {
            self.push(group.into_predicate());
        }
    }

    pub fn open_groups(&self) -> usize {
        self.groups.len() - 1
    }

    /// The constraint tree, closing any groups still open.
    pub fn predicate(&self) -> Predicate {
        let mut groups = self.groups.clone();
        while groups.len() > 1 {
            if let Some(group) = groups.pop() {
                if let Some(parent) = groups.last_mut() {
                    parent.children.push(group.into_predicate());
                }
            }
        }
        match groups.pop() {
            Some(root) => root.into_predicate(),
            None => Predicate::And(Vec::new()),
        }
    }

    pub fn add_ordering(&mut self, field: Field, descending: bool) {
        self.orderings.push(Ordering { field, descending });
    }

    pub fn orderings(&self) -> &[Ordering] {
        &self.orderings
    }

    pub fn set_random(&mut self) {
        self.random = true;
    }

    pub fn is_random(&self) -> bool {
        self.random
    }

    /// Negative sizes mean unlimited.
    pub fn set_limit(&mut self, size: i64) {
        self.limit = usize::try_from(size).ok();
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn set_album_mode(&mut self, mode: AlbumQueryMode) {
        self.album_mode = mode;
    }

    pub fn album_mode(&self) -> AlbumQueryMode {
        self.album_mode
    }

    pub fn set_artist_mode(&mut self, mode: ArtistQueryMode) {
        self.artist_mode = mode;
    }

    pub fn artist_mode(&self) -> ArtistQueryMode {
        self.artist_mode
    }

    pub fn add_return_value(&mut self, field: Field) {
        self.return_values.push(field);
    }

    pub fn return_values(&self) -> &[Field] {
        &self.return_values
    }

    pub fn add_return_function(&mut self, function: ReturnFunction, field: Field) {
        self.return_functions.push((function, field));
    }

    pub fn return_functions(&self) -> &[(ReturnFunction, Field)] {
        &self.return_functions
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Builder and execution contract for one query against one collection.
///
/// Builder calls only record constraints; nothing is evaluated before
/// [`QueryMaker::run`]. Results arrive on the returned handle as zero or more
/// batches followed by exactly one terminal event.
pub trait QueryMaker {
    fn query(&self) -> &Query;

    fn query_mut(&mut self) -> &mut Query;

    /// Starts evaluation without blocking the caller.
    fn run(&mut self) -> QueryHandle;

    /// Best-effort cancellation of the running query.
    fn abort_query(&self);

    /// Drops every accumulated constraint.
    fn reset(&mut self) -> &mut Self
    where
        Self: Sized;

    fn set_query_type(&mut self, query_type: QueryType) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().set_query_type(query_type);
        self
    }

    fn add_match(&mut self, entity: EntityRef) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().push(Predicate::Match(entity));
        self
    }

    fn add_filter(
        &mut self,
        field: Field,
        value: impl Into<String>,
        match_begin: bool,
        match_end: bool,
    ) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().push(Predicate::Text {
            filter: TextFilter {
                field,
                value: value.into(),
                match_begin,
                match_end,
            },
            negate: false,
        });
        self
    }

    fn exclude_filter(
        &mut self,
        field: Field,
        value: impl Into<String>,
        match_begin: bool,
        match_end: bool,
    ) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().push(Predicate::Text {
            filter: TextFilter {
                field,
                value: value.into(),
                match_begin,
                match_end,
            },
            negate: true,
        });
        self
    }

    fn add_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().push(Predicate::Number {
            field,
            value,
            comparison,
            negate: false,
        });
        self
    }

    fn exclude_number_filter(
        &mut self,
        field: Field,
        value: i64,
        comparison: NumberComparison,
    ) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().push(Predicate::Number {
            field,
            value,
            comparison,
            negate: true,
        });
        self
    }

    fn begin_and(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().begin_and();
        self
    }

    fn begin_or(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().begin_or();
        self
    }

    fn end_and_or(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().end_and_or();
        self
    }

    fn order_by(&mut self, field: Field, descending: bool) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().add_ordering(field, descending);
        self
    }

    fn order_by_random(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().set_random();
        self
    }

    fn limit_max_result_size(&mut self, size: i64) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().set_limit(size);
        self
    }

    fn set_album_query_mode(&mut self, mode: AlbumQueryMode) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().set_album_mode(mode);
        self
    }

    fn set_artist_query_mode(&mut self, mode: ArtistQueryMode) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().set_artist_mode(mode);
        self
    }

    fn add_return_value(&mut self, field: Field) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().add_return_value(field);
        self
    }

    fn add_return_function(&mut self, function: ReturnFunction, field: Field) -> &mut Self
    where
        Self: Sized,
    {
        self.query_mut().add_return_function(function, field);
        self
    }
}
