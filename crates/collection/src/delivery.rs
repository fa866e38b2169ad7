use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::model::{Album, Artist, Composer, Genre, Track, Year};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Configured,
    Running,
    Done,
    Aborted,
}

/// One homogeneous batch of results.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryResults {
    Tracks(Vec<Track>),
    Artists(Vec<Artist>),
    Albums(Vec<Album>),
    Genres(Vec<Genre>),
    Composers(Vec<Composer>),
    Years(Vec<Year>),
    /// One row per matching track, or a single aggregate row.
    Custom(Vec<Vec<String>>),
}

impl QueryResults {
    pub fn len(&self) -> usize {
        match self {
            QueryResults::Tracks(items) => items.len(),
            QueryResults::Artists(items) => items.len(),
            QueryResults::Albums(items) => items.len(),
            QueryResults::Genres(items) => items.len(),
            QueryResults::Composers(items) => items.len(),
            QueryResults::Years(items) => items.len(),
            QueryResults::Custom(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryEvent {
    NewResults {
        collection_id: String,
        results: QueryResults,
    },
    Done {
        collection_id: String,
    },
    Aborted {
        collection_id: String,
    },
}

impl QueryEvent {
    pub fn collection_id(&self) -> &str {
        match self {
            QueryEvent::NewResults { collection_id, .. }
            | QueryEvent::Done { collection_id }
            | QueryEvent::Aborted { collection_id } => collection_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryEvent::NewResults { .. })
    }
}

/// Everything one run delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOutcome {
    pub collection_id: String,
    pub batches: Vec<QueryResults>,
    pub aborted: bool,
}

impl QueryOutcome {
    pub(crate) fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            batches: Vec::new(),
            aborted: false,
        }
    }

    pub fn result_count(&self) -> usize {
        self.batches.iter().map(QueryResults::len).sum()
    }

    pub fn tracks(&self) -> Vec<Track> {
        let mut out = Vec::new();
        for batch in &self.batches {
            if let QueryResults::Tracks(items) = batch {
                out.extend(items.iter().cloned());
            }
        }
        out
    }

    pub fn artists(&self) -> Vec<Artist> {
        let mut out = Vec::new();
        for batch in &self.batches {
            if let QueryResults::Artists(items) = batch {
                out.extend(items.iter().cloned());
            }
        }
        out
    }

    pub fn albums(&self) -> Vec<Album> {
        let mut out = Vec::new();
        for batch in &self.batches {
            if let QueryResults::Albums(items) = batch {
                out.extend(items.iter().cloned());
            }
        }
        out
    }

    pub fn genres(&self) -> Vec<Genre> {
        let mut out = Vec::new();
        for batch in &self.batches {
            if let QueryResults::Genres(items) = batch {
                out.extend(items.iter().cloned());
            }
        }
        out
    }

    pub fn composers(&self) -> Vec<Composer> {
        let mut out = Vec::new();
        for batch in &self.batches {
            if let QueryResults::Composers(items) = batch {
                out.extend(items.iter().cloned());
            }
        }
        out
    }

    pub fn years(&self) -> Vec<Year> {
        let mut out = Vec::new();
        for batch in &self.batches {
            if let QueryResults::Years(items) = batch {
                out.extend(items.iter().cloned());
            }
        }
        out
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        for batch in &self.batches {
            if let QueryResults::Custom(rows) = batch {
                out.extend(rows.iter().cloned());
            }
        }
        out
    }

    /// Folds one event in. Returns true once the terminal event was seen.
    fn apply(&mut self, event: QueryEvent) -> bool {
        match event {
            QueryEvent::NewResults { results, .. } => {
                self.batches.push(results);
                false
            }
            QueryEvent::Done { .. } => true,
            QueryEvent::Aborted { .. } => {
                self.aborted = true;
                true
            }
        }
    }
}

/// Receiving end of one running query.
pub struct QueryHandle {
    collection_id: String,
    events: UnboundedReceiver<QueryEvent>,
    cancel: CancellationToken,
}

impl QueryHandle {
    pub(crate) fn new(
        collection_id: String,
        events: UnboundedReceiver<QueryEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            collection_id,
            events,
            cancel,
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        self.events.recv().await
    }

    /// Waits for the terminal event.
    pub async fn collect(mut self) -> QueryOutcome {
        let mut outcome = QueryOutcome::new(self.collection_id.clone());
        while let Some(event) = self.events.recv().await {
            if outcome.apply(event) {
                return outcome;
            }
        }
        self.lost_terminal(outcome)
    }

    /// Blocking form of [`QueryHandle::collect`]. Must not be called from
    /// within an async context.
    pub fn wait(mut self) -> QueryOutcome {
        let mut outcome = QueryOutcome::new(self.collection_id.clone());
        while let Some(event) = self.events.blocking_recv() {
            if outcome.apply(event) {
                return outcome;
            }
        }
        self.lost_terminal(outcome)
    }

    /// Drains whatever has been delivered so far without waiting.
    pub(crate) fn drain(mut self) -> QueryOutcome {
        let mut outcome = QueryOutcome::new(self.collection_id.clone());
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if outcome.apply(event) {
                        return outcome;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.lost_terminal(outcome)
    }

    fn lost_terminal(&self, mut outcome: QueryOutcome) -> QueryOutcome {
        warn!(
            "Query on {} ended without a terminal event",
            self.collection_id
        );
        outcome.aborted = true;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;
    use tokio_util::sync::CancellationToken;

    use super::{QueryEvent, QueryHandle, QueryResults};

    fn batch(rows: usize) -> QueryEvent {
        QueryEvent::NewResults {
            collection_id: "cd".to_string(),
            results: QueryResults::Custom(vec![vec!["x".to_string()]; rows]),
        }
    }

    #[test]
    fn collects_batches_until_done() {
        let (tx, rx) = unbounded_channel();
        tx.send(batch(2)).unwrap();
        tx.send(batch(1)).unwrap();
        tx.send(QueryEvent::Done {
            collection_id: "cd".to_string(),
        })
        .unwrap();
        tx.send(batch(5)).unwrap();

        let outcome = QueryHandle::new("cd".to_string(), rx, CancellationToken::new()).wait();
        assert_eq!(outcome.batches.len(), 2);
        assert_eq!(outcome.result_count(), 3);
        assert!(!outcome.aborted);
    }

    #[test]
    fn missing_terminal_counts_as_aborted() {
        let (tx, rx) = unbounded_channel();
        tx.send(batch(1)).unwrap();
        drop(tx);

        let outcome = QueryHandle::new("cd".to_string(), rx, CancellationToken::new()).wait();
        assert!(outcome.aborted);
        assert_eq!(outcome.result_count(), 1);
    }

    #[test]
    fn abort_cancels_the_token() {
        let (_tx, rx) = unbounded_channel::<QueryEvent>();
        let token = CancellationToken::new();
        let handle = QueryHandle::new("cd".to_string(), rx, token.clone());
        handle.abort();
        assert!(token.is_cancelled());
        assert_eq!(handle.collection_id(), "cd");
    }

    #[test]
    fn terminal_events_are_tagged() {
        let done = QueryEvent::Done {
            collection_id: "upnp".to_string(),
        };
        assert!(done.is_terminal());
        assert_eq!(done.collection_id(), "upnp");
        assert!(!batch(1).is_terminal());
    }
}
