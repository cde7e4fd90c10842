//! Event store abstraction.
//!
//! One ordered, append-only stream per [`StreamKey`]. Appends are
//! compare-and-append against the stream's last sequence number; reads come
//! back in strict sequence order with no gaps.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Default number of events fetched per `read_page` call.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Identity of a stream: aggregate kind plus instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// Aggregate kind namespace.
    pub aggregate_type: String,
    /// Aggregate instance.
    pub aggregate_id: Uuid,
}

impl StreamKey {
    #[must_use]
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: Uuid) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate kind that owns the stream.
    pub aggregate_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Sequence number within the aggregate stream.
    pub sequence_number: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Actor that caused the change.
    pub recorded_by: String,
    /// Timestamp of event creation.
    pub recorded_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Returns the key of the stream this record belongs to.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.aggregate_type.clone(), self.aggregate_id)
    }
}

/// A stream tail withdrawn by compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retraction {
    pub stream: StreamKey,
    /// Stream version before the retraction.
    pub from_version: i64,
    /// Stream version after the retraction. Later appends reuse the
    /// sequence numbers above it.
    pub revert_to: i64,
}

/// What a feed entry records.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedRecord {
    Event(StoredEvent),
    Retraction(Retraction),
}

/// One entry of the global feed with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    /// Position in commit order across all streams, starting at 1.
    pub global_position: i64,
    pub record: FeedRecord,
}

impl LoggedEvent {
    /// The appended event, or `None` for a retraction marker.
    #[must_use]
    pub fn event(&self) -> Option<&StoredEvent> {
        match &self.record {
            FeedRecord::Event(event) => Some(event),
            FeedRecord::Retraction(_) => None,
        }
    }
}

/// One stream's share of a multi-stream append.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub stream: StreamKey,
    pub expected_version: i64,
    pub events: Vec<StoredEvent>,
}

/// Checks that `events` belong to `stream` and are numbered contiguously
/// from `expected_version + 1`. Backends call this before touching storage.
///
/// # Errors
///
/// Returns `DomainError::InvalidAppend` describing the first offending event.
pub fn validate_append(
    stream: &StreamKey,
    expected_version: i64,
    events: &[StoredEvent],
) -> Result<(), DomainError> {
    if expected_version < 0 {
        return Err(DomainError::InvalidAppend(format!(
            "negative expected version {expected_version} for {stream}"
        )));
    }
    let mut next = expected_version + 1;
    for event in events {
        if event.aggregate_type != stream.aggregate_type || event.aggregate_id != stream.aggregate_id
        {
            return Err(DomainError::InvalidAppend(format!(
                "event {} belongs to {}, not {stream}",
                event.event_id,
                event.stream_key()
            )));
        }
        if event.sequence_number != next {
            return Err(DomainError::InvalidAppend(format!(
                "event {} has sequence number {}, expected {next} on {stream}",
                event.event_id, event.sequence_number
            )));
        }
        next += 1;
    }
    Ok(())
}

/// Append-only persistence with optimistic concurrency control.
///
/// Streams for different keys are independent. For one key, the version
/// check and the write happen as a single atomic step.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` if the stream's last sequence number equals
    /// `expected_version`. Returns the new last sequence number.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` on a version mismatch,
    /// `DomainError::InvalidAppend` for a malformed batch, and
    /// `DomainError::DuplicateEvent` if an event id was already stored.
    /// Nothing is written on failure.
    async fn append(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError>;

    /// Returns up to `limit` events with sequence numbers above
    /// `after_version`, ascending.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if storage cannot be read.
    async fn read_page(
        &self,
        stream: &StreamKey,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Returns the stream's last sequence number, 0 if it has no events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if storage cannot be read.
    async fn stream_version(&self, stream: &StreamKey) -> Result<i64, DomainError>;

    /// Retracts events `revert_to + 1 ..= expected_version` if the stream is
    /// still at `expected_version`. Retracted events are kept for audit but
    /// are invisible to reads and to the stream version. In the feed they
    /// are replaced by a [`Retraction`] marker so projections can revert.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream moved on.
    async fn retract(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        revert_to: i64,
    ) -> Result<(), DomainError>;

    /// Returns up to `limit` feed entries with positions above
    /// `after_position`, in commit order. Entries are live events and
    /// retraction markers; retracted events are left out.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if storage cannot be read.
    async fn read_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<LoggedEvent>, DomainError>;

    /// Whether [`append_all`](Self::append_all) is available.
    fn supports_multi_stream_append(&self) -> bool {
        false
    }

    /// Appends to several streams as one atomic unit: every version check
    /// passes and every batch is written, or nothing is. Returns the new
    /// version of each stream, in request order.
    ///
    /// # Errors
    ///
    /// Same as [`append`](Self::append) for the first failing request.
    async fn append_all(&self, _batch: &[AppendRequest]) -> Result<Vec<i64>, DomainError> {
        Err(DomainError::Infrastructure(
            "multi-stream append is not supported by this store".into(),
        ))
    }
}

/// Lazy, finite, restartable reader over one stream.
///
/// Pages are fetched on demand. Each event is checked to continue the
/// sequence; a gap surfaces as `DomainError::Replay`.
pub struct EventStream<'a> {
    store: &'a dyn EventStore,
    stream: StreamKey,
    from_version: i64,
    cursor: i64,
    page_size: usize,
    buffer: VecDeque<StoredEvent>,
    exhausted: bool,
}

impl<'a> EventStream<'a> {
    /// Opens a reader over events after `from_version`. An empty or missing
    /// stream simply yields nothing.
    #[must_use]
    pub fn open(store: &'a dyn EventStore, stream: StreamKey, from_version: i64) -> Self {
        Self {
            store,
            stream,
            from_version,
            cursor: from_version,
            page_size: DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Opens a reader over a stream that must already have events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` if the stream is empty.
    pub async fn open_existing(
        store: &'a dyn EventStore,
        stream: StreamKey,
        from_version: i64,
    ) -> Result<Self, DomainError> {
        if store.stream_version(&stream).await? == 0 {
            return Err(DomainError::StreamNotFound(stream));
        }
        Ok(Self::open(store, stream, from_version))
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.stream
    }

    /// Sequence number of the last event handed out.
    pub fn position(&self) -> i64 {
        self.cursor - i64::try_from(self.buffer.len()).unwrap_or(i64::MAX)
    }

    /// Returns the next event, or `None` at the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Replay` on a gap or foreign event, or the
    /// store's error if a page cannot be read.
    pub async fn next_event(&mut self) -> Result<Option<StoredEvent>, DomainError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Rewinds to the position the reader was opened at.
    pub fn restart(&mut self) {
        self.cursor = self.from_version;
        self.buffer.clear();
        self.exhausted = false;
    }

    /// Drains the remaining events into a vector.
    ///
    /// # Errors
    ///
    /// Same as [`next_event`](Self::next_event).
    pub async fn collect_all(mut self) -> Result<Vec<StoredEvent>, DomainError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        Ok(events)
    }

    async fn fill(&mut self) -> Result<(), DomainError> {
        let page = self
            .store
            .read_page(&self.stream, self.cursor, self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        for event in page {
            if event.stream_key() != self.stream {
                return Err(DomainError::replay(
                    &self.stream,
                    format!("read returned event {} of {}", event.event_id, event.stream_key()),
                ));
            }
            if event.sequence_number != self.cursor + 1 {
                return Err(DomainError::replay(
                    &self.stream,
                    format!(
                        "expected sequence number {}, got {}",
                        self.cursor + 1,
                        event.sequence_number
                    ),
                ));
            }
            self.cursor = event.sequence_number;
            self.buffer.push_back(event);
        }
        Ok(())
    }
}

impl fmt::Debug for EventStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("stream", &self.stream)
            .field("from_version", &self.from_version)
            .field("cursor", &self.cursor)
            .field("page_size", &self.page_size)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;

    fn make_stored_event(stream: &StreamKey, sequence_number: i64) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_type: stream.aggregate_type.clone(),
            aggregate_id: stream.aggregate_id,
            event_type: "test.happened".to_owned(),
            payload: serde_json::json!({"n": sequence_number}),
            sequence_number,
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            recorded_by: String::new(),
            recorded_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        }
    }

    /// Serves a fixed list of events and counts page reads.
    #[derive(Debug)]
    struct FixedStore {
        events: Vec<StoredEvent>,
        reads: Mutex<usize>,
    }

    #[async_trait]
    impl EventStore for FixedStore {
        async fn append(
            &self,
            _stream: &StreamKey,
            _expected_version: i64,
            _events: &[StoredEvent],
        ) -> Result<i64, DomainError> {
            unimplemented!()
        }

        async fn read_page(
            &self,
            _stream: &StreamKey,
            after_version: i64,
            limit: usize,
        ) -> Result<Vec<StoredEvent>, DomainError> {
            *self.reads.lock().unwrap() += 1;
            Ok(self
                .events
                .iter()
                .filter(|e| e.sequence_number > after_version)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn stream_version(&self, _stream: &StreamKey) -> Result<i64, DomainError> {
            Ok(self.events.last().map_or(0, |e| e.sequence_number))
        }

        async fn retract(
            &self,
            _stream: &StreamKey,
            _expected_version: i64,
            _revert_to: i64,
        ) -> Result<(), DomainError> {
            unimplemented!()
        }

        async fn read_all(
            &self,
            _after_position: i64,
            _limit: usize,
        ) -> Result<Vec<LoggedEvent>, DomainError> {
            unimplemented!()
        }
    }

    fn fixed_store(stream: &StreamKey, count: i64) -> FixedStore {
        FixedStore {
            events: (1..=count).map(|n| make_stored_event(stream, n)).collect(),
            reads: Mutex::new(0),
        }
    }

    #[test]
    fn test_validate_append_accepts_contiguous_batch() {
        let stream = StreamKey::new("test", Uuid::new_v4());
        let events = vec![make_stored_event(&stream, 3), make_stored_event(&stream, 4)];

        assert!(validate_append(&stream, 2, &events).is_ok());
        assert!(validate_append(&stream, 7, &[]).is_ok());
    }

    #[test]
    fn test_validate_append_rejects_wrong_start() {
        let stream = StreamKey::new("test", Uuid::new_v4());
        let events = vec![make_stored_event(&stream, 2)];

        let result = validate_append(&stream, 0, &events);

        assert!(matches!(result, Err(DomainError::InvalidAppend(_))));
    }

    #[test]
    fn test_validate_append_rejects_foreign_event() {
        let stream = StreamKey::new("test", Uuid::new_v4());
        let other = StreamKey::new("test", Uuid::new_v4());

        let result = validate_append(&stream, 0, &[make_stored_event(&other, 1)]);

        assert!(matches!(result, Err(DomainError::InvalidAppend(_))));
    }

    #[tokio::test]
    async fn test_event_stream_pages_lazily_in_order() {
        // Arrange
        let stream = StreamKey::new("test", Uuid::new_v4());
        let store = fixed_store(&stream, 5);
        let mut reader = EventStream::open(&store, stream, 0).with_page_size(2);

        // Act
        let first = reader.next_event().await.unwrap().unwrap();

        // Assert
        assert_eq!(first.sequence_number, 1);
        assert_eq!(*store.reads.lock().unwrap(), 1);
        assert_eq!(reader.position(), 1);

        let rest = reader.collect_all().await.unwrap();
        let numbers: Vec<i64> = rest.iter().map(|e| e.sequence_number).collect();
        assert_eq!(numbers, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_event_stream_starts_after_from_version() {
        let stream = StreamKey::new("test", Uuid::new_v4());
        let store = fixed_store(&stream, 4);

        let events = EventStream::open(&store, stream, 2)
            .collect_all()
            .await
            .unwrap();

        let numbers: Vec<i64> = events.iter().map(|e| e.sequence_number).collect();
        assert_eq!(numbers, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_event_stream_restart_rewinds() {
        // Arrange
        let stream = StreamKey::new("test", Uuid::new_v4());
        let store = fixed_store(&stream, 3);
        let mut reader = EventStream::open(&store, stream, 0);
        while reader.next_event().await.unwrap().is_some() {}

        // Act
        reader.restart();

        // Assert
        let again = reader.collect_all().await.unwrap();
        assert_eq!(again.len(), 3);
        assert_eq!(again[0].sequence_number, 1);
    }

    #[tokio::test]
    async fn test_event_stream_detects_gap() {
        // Arrange
        let stream = StreamKey::new("test", Uuid::new_v4());
        let mut store = fixed_store(&stream, 3);
        store.events.remove(1);

        // Act
        let result = EventStream::open(&store, stream, 0).collect_all().await;

        // Assert
        match result {
            Err(DomainError::Replay { reason, .. }) => {
                assert_eq!(reason, "expected sequence number 2, got 3");
            }
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_stream_reads_as_empty() {
        let stream = StreamKey::new("test", Uuid::new_v4());
        let store = fixed_store(&stream, 0);

        let events = EventStream::open(&store, stream, 0)
            .collect_all()
            .await
            .unwrap();

        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_open_existing_fails_on_empty_stream() {
        let stream = StreamKey::new("test", Uuid::new_v4());
        let store = fixed_store(&stream, 0);

        let result = EventStream::open_existing(&store, stream.clone(), 0).await;

        match result {
            Err(DomainError::StreamNotFound(key)) => assert_eq!(key, stream),
            other => panic!("expected StreamNotFound, got {other:?}"),
        }
    }
}
