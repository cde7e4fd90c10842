//! Unit of work: the commit boundary for one business transaction.
//!
//! Registered aggregates are appended together. Stores with native
//! multi-stream atomicity get a single `append_all`; otherwise streams are
//! appended one by one and, if a later append fails, the earlier ones are
//! retracted in reverse order before `DomainError::PartialCommit` is raised.
//!
//! Synchronous views are updated after the store accepted every append.
//! They are all-or-nothing among themselves but never undo the append.
//!
//! Dropping an open unit of work rolls it back. Dropping one mid-commit
//! also retracts, on a background task, any append that already landed.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::error::DomainError;
use crate::store::{AppendRequest, EventStore, StoredEvent, StreamKey};
use crate::view::{SyncView, View, ViewFailure, apply_all_or_none};

/// Lifecycle of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Open,
    Committing,
    Committed,
    RolledBack,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// New version of every stream that received events.
    pub versions: Vec<(StreamKey, i64)>,
    /// The events that were appended, in append order.
    pub events: Vec<StoredEvent>,
    /// Synchronous views left unchanged because an update failed.
    pub view_failures: Vec<ViewFailure>,
}

impl CommitReport {
    /// Returns the committed version of `stream`, if it was appended to.
    #[must_use]
    pub fn version_of(&self, stream: &StreamKey) -> Option<i64> {
        self.versions
            .iter()
            .find(|(key, _)| key == stream)
            .map(|(_, version)| *version)
    }

    /// True when every synchronous view reflects the commit.
    #[must_use]
    pub fn views_consistent(&self) -> bool {
        self.view_failures.is_empty()
    }
}

/// An append that reached the store during the current commit.
#[derive(Debug, Clone)]
struct Landed {
    stream: StreamKey,
    expected_version: i64,
    version: i64,
}

/// Type-erased access to a registered aggregate.
trait Participant: Send {
    fn stream_key(&self) -> StreamKey;
    fn expected_version(&self) -> i64;
    fn pending(&self) -> Result<Vec<StoredEvent>, DomainError>;
    fn mark_committed(&mut self);
    fn discard_pending(&mut self);
}

impl<A: Aggregate> Participant for AggregateRoot<A> {
    fn stream_key(&self) -> StreamKey {
        AggregateRoot::stream_key(self)
    }

    fn expected_version(&self) -> i64 {
        self.committed_version()
    }

    fn pending(&self) -> Result<Vec<StoredEvent>, DomainError> {
        self.pending_stored_events()
    }

    fn mark_committed(&mut self) {
        AggregateRoot::mark_committed(self);
    }

    fn discard_pending(&mut self) {
        AggregateRoot::discard_pending(self);
    }
}

/// Atomic commit boundary over one or more aggregates.
pub struct UnitOfWork<'a> {
    store: Arc<dyn EventStore>,
    participants: Vec<&'a mut dyn Participant>,
    views: Vec<Box<dyn SyncView>>,
    landed: Vec<Landed>,
    state: UnitOfWorkState,
}

impl<'a> UnitOfWork<'a> {
    /// Opens a unit of work against `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            participants: Vec::new(),
            views: Vec::new(),
            landed: Vec::new(),
            state: UnitOfWorkState::Open,
        }
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    /// Adds an aggregate and its pending events to the transaction.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidUnitOfWorkState` unless `Open`, or if the
    /// aggregate's stream is already registered.
    pub fn register<A: Aggregate>(
        &mut self,
        aggregate: &'a mut AggregateRoot<A>,
    ) -> Result<(), DomainError> {
        self.ensure_open("register")?;
        let key = aggregate.stream_key();
        if self.participants.iter().any(|p| p.stream_key() == key) {
            return Err(DomainError::InvalidUnitOfWorkState {
                state: self.state,
                operation: "register the same stream twice",
            });
        }
        self.participants.push(aggregate);
        Ok(())
    }

    /// Adds a view updated synchronously after a successful append.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidUnitOfWorkState` unless `Open`, or if the
    /// view is already registered.
    pub fn with_view<V>(&mut self, view: Arc<Mutex<V>>) -> Result<(), DomainError>
    where
        V: View + Clone + 'static,
    {
        self.ensure_open("add a view")?;
        let view: Box<dyn SyncView> = Box::new(view);
        if self.views.iter().any(|v| v.identity() == view.identity()) {
            return Err(DomainError::InvalidUnitOfWorkState {
                state: self.state,
                operation: "add the same view twice",
            });
        }
        self.views.push(view);
        Ok(())
    }

    /// Appends every registered aggregate's pending events as one unit.
    ///
    /// On success each aggregate is marked committed and synchronous views
    /// are updated. On failure every aggregate's pending events are
    /// discarded and the unit of work is rolled back.
    ///
    /// # Errors
    ///
    /// - `DomainError::InvalidUnitOfWorkState` unless `Open`.
    /// - The store's error (typically `ConcurrencyConflict`) when nothing
    ///   was appended.
    /// - `DomainError::PartialCommit` when a later append failed after
    ///   earlier ones succeeded.
    #[tracing::instrument(skip(self), fields(aggregates = self.participants.len()))]
    pub async fn commit(&mut self) -> Result<CommitReport, DomainError> {
        self.ensure_open("commit")?;
        self.state = UnitOfWorkState::Committing;

        let requests = match self.append_requests() {
            Ok(requests) => requests,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        let outcome = if requests.is_empty() {
            Ok(Vec::new())
        } else if self.store.supports_multi_stream_append() {
            self.store.append_all(&requests).await
        } else {
            self.append_sequentially(&requests).await
        };
        let versions = match outcome {
            Ok(versions) => versions,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        for participant in &mut self.participants {
            participant.mark_committed();
        }

        let streams: Vec<StreamKey> = requests.iter().map(|r| r.stream.clone()).collect();
        let events: Vec<StoredEvent> = requests.into_iter().flat_map(|r| r.events).collect();
        let view_failures = apply_all_or_none(&self.views, &events);
        for failure in &view_failures {
            warn!(view = %failure.view, error = %failure.error, "synchronous view update failed; view left unchanged");
        }

        self.state = UnitOfWorkState::Committed;
        debug!(events = events.len(), "unit of work committed");
        Ok(CommitReport {
            versions: streams.into_iter().zip(versions).collect(),
            events,
            view_failures,
        })
    }

    /// Discards every registered aggregate's pending events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidUnitOfWorkState` unless `Open`.
    pub fn rollback(&mut self) -> Result<(), DomainError> {
        self.ensure_open("rollback")?;
        self.abort();
        Ok(())
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), DomainError> {
        if self.state == UnitOfWorkState::Open {
            Ok(())
        } else {
            Err(DomainError::InvalidUnitOfWorkState {
                state: self.state,
                operation,
            })
        }
    }

    fn append_requests(&self) -> Result<Vec<AppendRequest>, DomainError> {
        let mut requests = Vec::with_capacity(self.participants.len());
        for participant in &self.participants {
            let events = participant.pending()?;
            if events.is_empty() {
                continue;
            }
            requests.push(AppendRequest {
                stream: participant.stream_key(),
                expected_version: participant.expected_version(),
                events,
            });
        }
        Ok(requests)
    }

    /// Appends stream by stream; on failure retracts what already landed.
    async fn append_sequentially(
        &mut self,
        requests: &[AppendRequest],
    ) -> Result<Vec<i64>, DomainError> {
        let store = Arc::clone(&self.store);
        let mut versions = Vec::with_capacity(requests.len());
        for request in requests {
            match store
                .append(&request.stream, request.expected_version, &request.events)
                .await
            {
                Ok(version) => {
                    self.landed.push(Landed {
                        stream: request.stream.clone(),
                        expected_version: request.expected_version,
                        version,
                    });
                    versions.push(version);
                }
                Err(cause) if self.landed.is_empty() => return Err(cause),
                Err(cause) => {
                    warn!(
                        failed = %request.stream,
                        error = %cause,
                        appended = self.landed.len(),
                        "append failed mid-commit; retracting earlier appends"
                    );
                    let (compensated, uncompensated) =
                        compensate(store.as_ref(), &mut self.landed).await;
                    return Err(DomainError::PartialCommit {
                        failed: request.stream.clone(),
                        cause: Box::new(cause),
                        compensated,
                        uncompensated,
                    });
                }
            }
        }
        self.landed.clear();
        Ok(versions)
    }

    /// Retracts `landed` on the current runtime after the commit future was
    /// dropped.
    fn compensate_detached(&self, mut landed: Vec<Landed>) {
        let streams: Vec<String> = landed.iter().map(|l| l.stream.to_string()).collect();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(?streams, "commit abandoned outside a runtime; appended events remain visible");
            return;
        };
        let store = Arc::clone(&self.store);
        runtime.spawn(async move {
            let (compensated, uncompensated) = compensate(store.as_ref(), &mut landed).await;
            error!(
                ?streams,
                compensated = compensated.len(),
                ?uncompensated,
                "commit abandoned after a partial append; landed appends retracted"
            );
        });
    }

    fn abort(&mut self) {
        for participant in &mut self.participants {
            participant.discard_pending();
        }
        self.state = UnitOfWorkState::RolledBack;
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        match self.state {
            UnitOfWorkState::Open => {
                debug!("unit of work dropped while open; rolling back");
                self.abort();
            }
            UnitOfWorkState::Committing => {
                warn!("commit abandoned before completion; discarding pending events");
                let landed = std::mem::take(&mut self.landed);
                if !landed.is_empty() {
                    self.compensate_detached(landed);
                }
                self.abort();
            }
            UnitOfWorkState::Committed | UnitOfWorkState::RolledBack => {}
        }
    }
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .field(
                "streams",
                &self
                    .participants
                    .iter()
                    .map(|p| p.stream_key())
                    .collect::<Vec<_>>(),
            )
            .field("views", &self.views.len())
            .finish_non_exhaustive()
    }
}

/// Retracts `landed` newest first. An entry leaves the list only once its
/// retraction has resolved, so an interrupted run can be resumed.
async fn compensate(
    store: &dyn EventStore,
    landed: &mut Vec<Landed>,
) -> (Vec<StreamKey>, Vec<StreamKey>) {
    let mut compensated = Vec::new();
    let mut uncompensated = Vec::new();
    while let Some(done) = landed.last().cloned() {
        let result = store
            .retract(&done.stream, done.version, done.expected_version)
            .await;
        landed.pop();
        match result {
            Ok(()) => compensated.push(done.stream),
            Err(e) => {
                error!(stream = %done.stream, error = %e, "compensation failed; appended events remain visible");
                uncompensated.push(done.stream);
            }
        }
    }
    (compensated, uncompensated)
}
