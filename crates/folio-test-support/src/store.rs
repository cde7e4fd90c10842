//! Event store doubles.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use folio_core::error::DomainError;
use folio_core::store::{
    AppendRequest, EventStore, FeedRecord, LoggedEvent, StoredEvent, StreamKey,
};
use uuid::Uuid;

/// Builds a stored event with an empty JSON object payload.
#[must_use]
pub fn stored_event(stream: &StreamKey, sequence_number: i64, event_type: &str) -> StoredEvent {
    StoredEvent {
        event_id: Uuid::new_v4(),
        aggregate_type: stream.aggregate_type.clone(),
        aggregate_id: stream.aggregate_id,
        event_type: event_type.to_owned(),
        payload: serde_json::json!({}),
        sequence_number,
        correlation_id: Uuid::new_v4(),
        causation_id: Uuid::new_v4(),
        recorded_by: String::new(),
        recorded_at: Utc::now(),
    }
}

fn page(events: &[StoredEvent], after_version: i64, limit: usize) -> Vec<StoredEvent> {
    events
        .iter()
        .filter(|e| e.sequence_number > after_version)
        .take(limit)
        .cloned()
        .collect()
}

/// A store that serves a fixed history for every stream and records all
/// appends without checking versions.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    history: Vec<StoredEvent>,
    appended: Mutex<Vec<(StreamKey, i64, Vec<StoredEvent>)>>,
}

impl RecordingEventStore {
    /// Creates a store whose reads return `history`.
    #[must_use]
    pub fn new(history: Vec<StoredEvent>) -> Self {
        Self {
            history,
            appended: Mutex::new(Vec::new()),
        }
    }

    /// Returns every append call as `(stream, expected_version, events)`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_events(&self) -> Vec<(StreamKey, i64, Vec<StoredEvent>)> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn append(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        self.appended
            .lock()
            .unwrap()
            .push((stream.clone(), expected_version, events.to_vec()));
        Ok(expected_version + i64::try_from(events.len()).unwrap_or(i64::MAX))
    }

    async fn read_page(
        &self,
        _stream: &StreamKey,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(page(&self.history, after_version, limit))
    }

    async fn stream_version(&self, _stream: &StreamKey) -> Result<i64, DomainError> {
        Ok(self.history.last().map_or(0, |e| e.sequence_number))
    }

    async fn retract(
        &self,
        _stream: &StreamKey,
        _expected_version: i64,
        _revert_to: i64,
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn read_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<LoggedEvent>, DomainError> {
        Ok(self
            .history
            .iter()
            .zip(1_i64..)
            .filter(|(_, position)| *position > after_position)
            .take(limit)
            .map(|(event, global_position)| LoggedEvent {
                global_position,
                record: FeedRecord::Event(event.clone()),
            })
            .collect())
    }
}

/// A store with no events that silently accepts appends.
#[derive(Debug)]
pub struct EmptyEventStore;

#[async_trait]
impl EventStore for EmptyEventStore {
    async fn append(
        &self,
        _stream: &StreamKey,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        Ok(expected_version + i64::try_from(events.len()).unwrap_or(i64::MAX))
    }

    async fn read_page(
        &self,
        _stream: &StreamKey,
        _after_version: i64,
        _limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn stream_version(&self, _stream: &StreamKey) -> Result<i64, DomainError> {
        Ok(0)
    }

    async fn retract(
        &self,
        _stream: &StreamKey,
        _expected_version: i64,
        _revert_to: i64,
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn read_all(
        &self,
        _after_position: i64,
        _limit: usize,
    ) -> Result<Vec<LoggedEvent>, DomainError> {
        Ok(vec![])
    }
}

/// A store whose every operation fails with an infrastructure error.
#[derive(Debug)]
pub struct FailingEventStore;

fn connection_refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(
        &self,
        _stream: &StreamKey,
        _expected_version: i64,
        _events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        Err(connection_refused())
    }

    async fn read_page(
        &self,
        _stream: &StreamKey,
        _after_version: i64,
        _limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(connection_refused())
    }

    async fn stream_version(&self, _stream: &StreamKey) -> Result<i64, DomainError> {
        Err(connection_refused())
    }

    async fn retract(
        &self,
        _stream: &StreamKey,
        _expected_version: i64,
        _revert_to: i64,
    ) -> Result<(), DomainError> {
        Err(connection_refused())
    }

    async fn read_all(
        &self,
        _after_position: i64,
        _limit: usize,
    ) -> Result<Vec<LoggedEvent>, DomainError> {
        Err(connection_refused())
    }
}

/// Wraps a real store, hides its multi-stream append, and fails appends or
/// retractions for chosen aggregates. Drives the compensation path of a
/// cross-aggregate commit.
pub struct FlakyEventStore {
    inner: Arc<dyn EventStore>,
    failing_appends: Mutex<HashSet<Uuid>>,
    failing_retracts: Mutex<HashSet<Uuid>>,
}

impl FlakyEventStore {
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>) -> Self {
        Self {
            inner,
            failing_appends: Mutex::new(HashSet::new()),
            failing_retracts: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every append to `aggregate_id` fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn fail_appends_to(self, aggregate_id: Uuid) -> Self {
        self.failing_appends.lock().unwrap().insert(aggregate_id);
        self
    }

    /// Makes every retraction on `aggregate_id` fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn fail_retracts_on(self, aggregate_id: Uuid) -> Self {
        self.failing_retracts.lock().unwrap().insert(aggregate_id);
        self
    }

    /// Lets appends to `aggregate_id` through again.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn heal(&self, aggregate_id: Uuid) {
        self.failing_appends.lock().unwrap().remove(&aggregate_id);
        self.failing_retracts.lock().unwrap().remove(&aggregate_id);
    }
}

impl std::fmt::Debug for FlakyEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyEventStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn append(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        if self
            .failing_appends
            .lock()
            .unwrap()
            .contains(&stream.aggregate_id)
        {
            return Err(DomainError::Infrastructure(format!(
                "simulated outage appending to {stream}"
            )));
        }
        self.inner.append(stream, expected_version, events).await
    }

    async fn read_page(
        &self,
        stream: &StreamKey,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.inner.read_page(stream, after_version, limit).await
    }

    async fn stream_version(&self, stream: &StreamKey) -> Result<i64, DomainError> {
        self.inner.stream_version(stream).await
    }

    async fn retract(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        revert_to: i64,
    ) -> Result<(), DomainError> {
        if self
            .failing_retracts
            .lock()
            .unwrap()
            .contains(&stream.aggregate_id)
        {
            return Err(DomainError::Infrastructure(format!(
                "simulated outage retracting {stream}"
            )));
        }
        self.inner.retract(stream, expected_version, revert_to).await
    }

    async fn read_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<LoggedEvent>, DomainError> {
        self.inner.read_all(after_position, limit).await
    }

    fn supports_multi_stream_append(&self) -> bool {
        false
    }

    async fn append_all(&self, _batch: &[AppendRequest]) -> Result<Vec<i64>, DomainError> {
        Err(DomainError::Infrastructure(
            "multi-stream append is disabled".into(),
        ))
    }
}
