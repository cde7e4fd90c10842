//! In-memory implementation of the `EventStore` trait.
//!
//! All streams live in one global log guarded by a single lock, which makes
//! compare-and-append and multi-stream batches trivially atomic. Nothing is
//! awaited while the lock is held, so dropping a pending call never leaves a
//! stream half-written. Retractions flag events in place and add a marker
//! to the feed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use folio_core::error::DomainError;
use folio_core::store::{
    AppendRequest, EventStore, FeedRecord, LoggedEvent, Retraction, StoredEvent, StreamKey,
    validate_append,
};

#[derive(Debug)]
struct EventEntry {
    event: StoredEvent,
    retracted: bool,
}

#[derive(Debug)]
enum FeedSlot {
    /// Index into `Inner::events`.
    Event(usize),
    Retraction(Retraction),
}

#[derive(Debug, Default)]
struct Inner {
    /// Global feed; a slot's position is its index plus one.
    feed: Vec<FeedSlot>,
    /// Every event ever appended, in append order.
    events: Vec<EventEntry>,
    /// Live (non-retracted) event indices per stream, in sequence order.
    streams: HashMap<StreamKey, Vec<usize>>,
    event_ids: HashSet<Uuid>,
}

impl Inner {
    fn version(&self, stream: &StreamKey) -> i64 {
        self.streams
            .get(stream)
            .and_then(|indices| indices.last())
            .map_or(0, |&index| self.events[index].event.sequence_number)
    }

    fn check(&self, request: &AppendRequest, batch_ids: &mut HashSet<Uuid>) -> Result<(), DomainError> {
        validate_append(&request.stream, request.expected_version, &request.events)?;
        let actual = self.version(&request.stream);
        if actual != request.expected_version {
            return Err(DomainError::ConcurrencyConflict {
                stream: request.stream.clone(),
                expected: request.expected_version,
                actual,
            });
        }
        for event in &request.events {
            if self.event_ids.contains(&event.event_id) || !batch_ids.insert(event.event_id) {
                return Err(DomainError::DuplicateEvent(event.event_id));
            }
        }
        Ok(())
    }

    fn write(&mut self, request: &AppendRequest) -> i64 {
        let indices = self.streams.entry(request.stream.clone()).or_default();
        for event in &request.events {
            let index = self.events.len();
            indices.push(index);
            self.event_ids.insert(event.event_id);
            self.events.push(EventEntry {
                event: event.clone(),
                retracted: false,
            });
            self.feed.push(FeedSlot::Event(index));
        }
        self.version(&request.stream)
    }
}

/// Process-local event store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events removed from their streams by compensation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store lock is poisoned.
    pub fn retracted_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        let inner = self.read_lock()?;
        Ok(inner
            .events
            .iter()
            .filter(|entry| entry.retracted)
            .map(|entry| entry.event.clone())
            .collect())
    }

    /// Keys of every stream that currently has live events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store lock is poisoned.
    pub fn stream_keys(&self) -> Result<Vec<StreamKey>, DomainError> {
        let inner = self.read_lock()?;
        let mut keys: Vec<StreamKey> = inner
            .streams
            .iter()
            .filter(|(_, indices)| !indices.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, Inner>, DomainError> {
        self.inner
            .read()
            .map_err(|_| DomainError::Infrastructure("in-memory store lock poisoned".into()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, Inner>, DomainError> {
        self.inner
            .write()
            .map_err(|_| DomainError::Infrastructure("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(stream = %stream, event_count = events.len()))]
    async fn append(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        let request = AppendRequest {
            stream: stream.clone(),
            expected_version,
            events: events.to_vec(),
        };
        let mut inner = self.write_lock()?;
        inner.check(&request, &mut HashSet::new())?;
        let version = inner.write(&request);
        drop(inner);
        tracing::debug!(version, "events appended to stream");
        Ok(version)
    }

    async fn read_page(
        &self,
        stream: &StreamKey,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let inner = self.read_lock()?;
        let Some(indices) = inner.streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(indices
            .iter()
            .map(|&index| &inner.events[index].event)
            .filter(|event| event.sequence_number > after_version)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stream_version(&self, stream: &StreamKey) -> Result<i64, DomainError> {
        Ok(self.read_lock()?.version(stream))
    }

    #[tracing::instrument(skip(self), fields(stream = %stream))]
    async fn retract(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        revert_to: i64,
    ) -> Result<(), DomainError> {
        let mut inner = self.write_lock()?;
        let actual = inner.version(stream);
        if actual != expected_version || revert_to > expected_version {
            return Err(DomainError::ConcurrencyConflict {
                stream: stream.clone(),
                expected: expected_version,
                actual,
            });
        }
        let Inner {
            feed,
            events,
            streams,
            ..
        } = &mut *inner;
        let mut retracted = 0;
        if let Some(indices) = streams.get_mut(stream) {
            while let Some(&index) = indices.last() {
                if events[index].event.sequence_number <= revert_to {
                    break;
                }
                events[index].retracted = true;
                indices.pop();
                retracted += 1;
            }
        }
        if retracted > 0 {
            feed.push(FeedSlot::Retraction(Retraction {
                stream: stream.clone(),
                from_version: expected_version,
                revert_to,
            }));
        }
        drop(inner);
        tracing::warn!(revert_to, retracted, "events retracted from stream");
        Ok(())
    }

    async fn read_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<LoggedEvent>, DomainError> {
        let inner = self.read_lock()?;
        let start = usize::try_from(after_position.max(0)).unwrap_or(usize::MAX);
        Ok(inner
            .feed
            .iter()
            .enumerate()
            .skip(start)
            .filter_map(|(index, slot)| {
                let record = match slot {
                    FeedSlot::Event(event) => {
                        let entry = &inner.events[*event];
                        if entry.retracted {
                            return None;
                        }
                        FeedRecord::Event(entry.event.clone())
                    }
                    FeedSlot::Retraction(retraction) => FeedRecord::Retraction(retraction.clone()),
                };
                Some(LoggedEvent {
                    global_position: i64::try_from(index + 1).unwrap_or(i64::MAX),
                    record,
                })
            })
            .take(limit)
            .collect())
    }

    fn supports_multi_stream_append(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self, batch), fields(streams = batch.len()))]
    async fn append_all(&self, batch: &[AppendRequest]) -> Result<Vec<i64>, DomainError> {
        let mut seen = HashSet::new();
        if let Some(dup) = batch.iter().find(|r| !seen.insert(r.stream.clone())) {
            return Err(DomainError::InvalidAppend(format!(
                "stream {} appears twice in one batch",
                dup.stream
            )));
        }
        let mut inner = self.write_lock()?;
        let mut batch_ids = HashSet::new();
        for request in batch {
            inner.check(request, &mut batch_ids)?;
        }
        let versions: Vec<i64> = batch.iter().map(|request| inner.write(request)).collect();
        drop(inner);
        tracing::debug!("batch appended atomically");
        Ok(versions)
    }
}
