//! Aggregate repository: replay-based loading and unit-of-work creation.

use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::clock::Clock;
use crate::error::DomainError;
use crate::store::{DEFAULT_PAGE_SIZE, EventStore, EventStream};
use crate::unit_of_work::{CommitReport, UnitOfWork};

/// Loads aggregates from an event store and opens units of work on it.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl Repository {
    /// Creates a new `Repository`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets how many events are fetched per page while replaying.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Clock used to stamp recorded events.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Replays the aggregate's stream into a fresh instance. An empty stream
    /// yields a new aggregate at version 0.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Replay` for corrupt history, or the store's
    /// error if the stream cannot be read.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub async fn load<A: Aggregate>(&self, id: Uuid) -> Result<AggregateRoot<A>, DomainError> {
        let mut root = AggregateRoot::<A>::new(id);
        let mut reader = EventStream::open(self.store.as_ref(), root.stream_key(), 0)
            .with_page_size(self.page_size);
        while let Some(stored) = reader.next_event().await? {
            root.apply_stored(&stored)?;
        }
        tracing::debug!(version = root.version(), "aggregate loaded");
        Ok(root)
    }

    /// Like [`load`](Self::load), but the stream must have events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` for an empty stream, otherwise
    /// the same errors as `load`.
    pub async fn load_existing<A: Aggregate>(
        &self,
        id: Uuid,
    ) -> Result<AggregateRoot<A>, DomainError> {
        let root = self.load::<A>(id).await?;
        if root.is_new() {
            return Err(DomainError::StreamNotFound(root.stream_key()));
        }
        Ok(root)
    }

    /// Opens a unit of work against this repository's store.
    #[must_use]
    pub fn unit_of_work<'a>(&self) -> UnitOfWork<'a> {
        UnitOfWork::new(Arc::clone(&self.store))
    }

    /// Commits a single aggregate through a one-off unit of work.
    ///
    /// # Errors
    ///
    /// Same as [`UnitOfWork::commit`].
    pub async fn save<A: Aggregate>(
        &self,
        aggregate: &mut AggregateRoot<A>,
    ) -> Result<CommitReport, DomainError> {
        let mut uow = self.unit_of_work();
        uow.register(aggregate)?;
        uow.commit().await
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
