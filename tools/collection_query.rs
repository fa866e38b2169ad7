mod config;

use std::env;
use std::fs;
use std::path::Path;

use collection::{
    AlbumQueryMode, ArtistQueryMode, AudioCdLoader, CollectionRegistry, DiscInfo, Field,
    FolderLoader, LoaderJob, MemoryQueryMaker, NumberComparison, QueryMaker, QueryResults,
    QueryType, ReturnFunction, ScriptedLoader,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{
    config_path_from_env, load_or_create_config, resolve_path, SourceConfig, SourceKind,
};

const USAGE: &str = "usage: collection_query <track|artist|album|genre|composer|year|custom> \
[field=value] [field~value] [field^value] [field$value] [field!=value] [field>n] [field<n] \
[field>=n] [field<=n] \
[or( ... )] [and( ... )] [order=field|order=-field] [random] [limit=n] [return=field] \
[count=field|sum=field|min=field|max=field] [albums=compilations|normal] [artists=album]";

/// One parsed command-line constraint.
#[derive(Clone, Debug, PartialEq)]
enum Directive {
    Text {
        field: Field,
        value: String,
        match_begin: bool,
        match_end: bool,
        exclude: bool,
    },
    Number {
        field: Field,
        value: i64,
        comparison: NumberComparison,
        exclude: bool,
    },
    BeginOr,
    BeginAnd,
    End,
    Order { field: Field, descending: bool },
    Random,
    Limit(i64),
    Return(Field),
    Function(ReturnFunction, Field),
    AlbumMode(AlbumQueryMode),
    ArtistMode(ArtistQueryMode),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let query_type = args
        .next()
        .and_then(|value| QueryType::parse(&value))
        .ok_or(USAGE)?;
    let directives = args
        .map(|arg| parse_directive(&arg))
        .collect::<Result<Vec<_>, _>>()?;

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {}", config_path.display());
    }

    let registry = CollectionRegistry::new();
    let mut events = registry.subscribe();
    let mut pending = 0;
    for source in config.sources.iter().filter(|source| source.enabled) {
        match loader_for(&config_path, source) {
            Ok(job) => {
                registry.start_load(source.id.clone(), job);
                pending += 1;
            }
            Err(err) => warn!("Skipping source {}: {}", source.id, err),
        }
    }
    while pending > 0 {
        match events.recv().await {
            Some(loaded) => {
                if let Some(message) = &loaded.message {
                    warn!("Collection {} did not load cleanly: {}", loaded.id, message);
                }
                pending -= 1;
            }
            None => break,
        }
    }

    for id in registry.ids() {
        let Some(mut maker) = registry.query_maker(&id) else {
            continue;
        };
        maker.set_query_type(query_type);
        if config.default_limit >= 0 {
            maker.limit_max_result_size(config.default_limit);
        }
        for directive in &directives {
            apply_directive(&mut maker, directive);
        }
        let outcome = maker.run().collect().await;
        if outcome.aborted {
            warn!("Query on {} was aborted", id);
        }
        for batch in &outcome.batches {
            print_results(&id, batch);
        }
    }

    registry.shutdown();
    Ok(())
}

fn loader_for(
    config_path: &Path,
    source: &SourceConfig,
) -> Result<Box<dyn LoaderJob>, Box<dyn std::error::Error>> {
    let path = resolve_path(config_path, source.path.trim());
    let job: Box<dyn LoaderJob> = match source.kind {
        SourceKind::Folder => Box::new(FolderLoader::new(path)),
        SourceKind::Json => Box::new(ScriptedLoader::from_path(source.id.clone(), path)),
        SourceKind::AudioCd => {
            let contents = fs::read_to_string(&path)?;
            let disc: DiscInfo = serde_yaml::from_str(&contents)?;
            Box::new(AudioCdLoader::new(disc, source.encoding_format.clone()))
        }
    };
    Ok(job)
}

const OPERATORS: &[&str] = &["!=", ">=", "<=", "=", ">", "<", "~", "^", "$"];

fn parse_directive(arg: &str) -> Result<Directive, String> {
    match arg {
        "or(" => return Ok(Directive::BeginOr),
        "and(" => return Ok(Directive::BeginAnd),
        ")" => return Ok(Directive::End),
        "random" => return Ok(Directive::Random),
        _ => {}
    }

    let (key, op, value) =
        split_operator(arg).ok_or_else(|| format!("unrecognized argument {:?}\n{}", arg, USAGE))?;
    if op == "=" {
        if let Some(directive) = parse_option(key, value)? {
            return Ok(directive);
        }
    }

    let field = parse_field(key)?;
    let text = |match_begin: bool, match_end: bool, exclude: bool| Directive::Text {
        field,
        value: value.to_string(),
        match_begin,
        match_end,
        exclude,
    };
    let number = |value: i64, comparison: NumberComparison, exclude: bool| Directive::Number {
        field,
        value,
        comparison,
        exclude,
    };
    let directive = match op {
        "=" | "!=" if field.is_numeric() => {
            number(parse_number(value)?, NumberComparison::Equals, op == "!=")
        }
        "=" | "!=" => text(true, true, op == "!="),
        ">" => number(parse_number(value)?, NumberComparison::Greater, false),
        "<" => number(parse_number(value)?, NumberComparison::Less, false),
        ">=" => number(
            parse_number(value)?.saturating_sub(1),
            NumberComparison::Greater,
            false,
        ),
        "<=" => number(
            parse_number(value)?.saturating_add(1),
            NumberComparison::Less,
            false,
        ),
        "~" => text(false, false, false),
        "^" => text(true, false, false),
        _ => text(false, true, false),
    };
    Ok(directive)
}

/// Splits at the first operator, so values may contain operator characters.
fn split_operator(arg: &str) -> Option<(&str, &'static str, &str)> {
    arg.char_indices().find_map(|(index, _)| {
        let rest = &arg[index..];
        OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .map(|op| (&arg[..index], *op, &rest[op.len()..]))
    })
}

/// Non-filter `key=value` options. `None` when `key` names a field.
fn parse_option(key: &str, value: &str) -> Result<Option<Directive>, String> {
    let directive = match key {
        "order" => {
            let (descending, name) = match value.strip_prefix('-') {
                Some(name) => (true, name),
                None => (false, value),
            };
            Directive::Order {
                field: parse_field(name)?,
                descending,
            }
        }
        "limit" => Directive::Limit(parse_number(value)?),
        "return" => Directive::Return(parse_field(value)?),
        "count" => Directive::Function(ReturnFunction::Count, parse_field(value)?),
        "sum" => Directive::Function(ReturnFunction::Sum, parse_field(value)?),
        "min" => Directive::Function(ReturnFunction::Min, parse_field(value)?),
        "max" => Directive::Function(ReturnFunction::Max, parse_field(value)?),
        "albums" => Directive::AlbumMode(match value {
            "compilations" => AlbumQueryMode::OnlyCompilations,
            "normal" => AlbumQueryMode::OnlyNormalAlbums,
            "all" => AlbumQueryMode::AllAlbums,
            other => return Err(format!("unknown album mode {:?}", other)),
        }),
        "artists" => Directive::ArtistMode(match value {
            "album" => ArtistQueryMode::AlbumArtists,
            "track" => ArtistQueryMode::TrackArtists,
            other => return Err(format!("unknown artist mode {:?}", other)),
        }),
        _ => return Ok(None),
    };
    Ok(Some(directive))
}

fn parse_field(value: &str) -> Result<Field, String> {
    Field::parse(value).ok_or_else(|| format!("unknown field {:?}", value))
}

fn parse_number(value: &str) -> Result<i64, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("not a number: {:?}", value))
}

fn apply_directive(maker: &mut MemoryQueryMaker, directive: &Directive) {
    match directive {
        Directive::Text {
            field,
            value,
            match_begin,
            match_end,
            exclude,
        } => {
            if *exclude {
                maker.exclude_filter(*field, value.clone(), *match_begin, *match_end);
            } else {
                maker.add_filter(*field, value.clone(), *match_begin, *match_end);
            }
        }
        Directive::Number {
            field,
            value,
            comparison,
            exclude,
        } => {
            if *exclude {
                maker.exclude_number_filter(*field, *value, *comparison);
            } else {
                maker.add_number_filter(*field, *value, *comparison);
            }
        }
        Directive::BeginOr => {
            maker.begin_or();
        }
        Directive::BeginAnd => {
            maker.begin_and();
        }
        Directive::End => {
            maker.end_and_or();
        }
        Directive::Order { field, descending } => {
            maker.order_by(*field, *descending);
        }
        Directive::Random => {
            maker.order_by_random();
        }
        Directive::Limit(size) => {
            maker.limit_max_result_size(*size);
        }
        Directive::Return(field) => {
            maker.add_return_value(*field);
        }
        Directive::Function(function, field) => {
            maker.add_return_function(*function, *field);
        }
        Directive::AlbumMode(mode) => {
            maker.set_album_query_mode(*mode);
        }
        Directive::ArtistMode(mode) => {
            maker.set_artist_query_mode(*mode);
        }
    }
}

fn print_results(collection_id: &str, results: &QueryResults) {
    match results {
        QueryResults::Tracks(tracks) => {
            for track in tracks {
                println!("{}\t{}\t{}", collection_id, track.url, track.name);
            }
        }
        QueryResults::Artists(items) => {
            for item in items {
                println!("{}\t{}", collection_id, item.name);
            }
        }
        QueryResults::Albums(items) => {
            for item in items {
                let marker = if item.compilation { " (compilation)" } else { "" };
                println!("{}\t{}{}", collection_id, item.name, marker);
            }
        }
        QueryResults::Genres(items) => {
            for item in items {
                println!("{}\t{}", collection_id, item.name);
            }
        }
        QueryResults::Composers(items) => {
            for item in items {
                println!("{}\t{}", collection_id, item.name);
            }
        }
        QueryResults::Years(items) => {
            for item in items {
                println!("{}\t{}", collection_id, item.value);
            }
        }
        QueryResults::Custom(rows) => {
            for row in rows {
                println!("{}\t{}", collection_id, row.join("\t"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use collection::{AlbumQueryMode, Field, NumberComparison, ReturnFunction};

    use super::{parse_directive, Directive};

    #[test]
    fn parses_text_filters() {
        assert_eq!(
            parse_directive("artist=Miles Davis").unwrap(),
            Directive::Text {
                field: Field::Artist,
                value: "Miles Davis".to_string(),
                match_begin: true,
                match_end: true,
                exclude: false,
            }
        );
        assert_eq!(
            parse_directive("title~blue").unwrap(),
            Directive::Text {
                field: Field::Title,
                value: "blue".to_string(),
                match_begin: false,
                match_end: false,
                exclude: false,
            }
        );
        assert!(matches!(
            parse_directive("genre!=Jazz").unwrap(),
            Directive::Text { exclude: true, .. }
        ));
    }

    #[test]
    fn parses_numeric_filters() {
        assert_eq!(
            parse_directive("year>1990").unwrap(),
            Directive::Number {
                field: Field::Year,
                value: 1990,
                comparison: NumberComparison::Greater,
                exclude: false,
            }
        );
        assert_eq!(
            parse_directive("rating=8").unwrap(),
            Directive::Number {
                field: Field::Rating,
                value: 8,
                comparison: NumberComparison::Equals,
                exclude: false,
            }
        );
        assert!(parse_directive("year>soon").is_err());
        assert_eq!(
            parse_directive("year>=1990").unwrap(),
            Directive::Number {
                field: Field::Year,
                value: 1989,
                comparison: NumberComparison::Greater,
                exclude: false,
            }
        );
    }

    #[test]
    fn values_may_contain_operator_characters() {
        assert_eq!(
            parse_directive("title~a=b").unwrap(),
            Directive::Text {
                field: Field::Title,
                value: "a=b".to_string(),
                match_begin: false,
                match_end: false,
                exclude: false,
            }
        );
        assert_eq!(
            parse_directive("title^<3 >").unwrap(),
            Directive::Text {
                field: Field::Title,
                value: "<3 >".to_string(),
                match_begin: true,
                match_end: false,
                exclude: false,
            }
        );
    }

    #[test]
    fn parses_options_and_groups() {
        assert_eq!(
            parse_directive("order=-year").unwrap(),
            Directive::Order {
                field: Field::Year,
                descending: true,
            }
        );
        assert_eq!(parse_directive("limit=5").unwrap(), Directive::Limit(5));
        assert_eq!(
            parse_directive("count=url").unwrap(),
            Directive::Function(ReturnFunction::Count, Field::Url)
        );
        assert_eq!(
            parse_directive("albums=compilations").unwrap(),
            Directive::AlbumMode(AlbumQueryMode::OnlyCompilations)
        );
        assert_eq!(parse_directive("or(").unwrap(), Directive::BeginOr);
        assert_eq!(parse_directive(")").unwrap(), Directive::End);
        assert!(parse_directive("bogus").is_err());
    }
}
