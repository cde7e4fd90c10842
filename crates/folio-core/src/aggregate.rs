//! Aggregate root abstraction.
//!
//! Domain state implements [`Aggregate`]: a pure fold over its payload enum
//! plus the business rules that decide whether a payload may be recorded.
//! [`AggregateRoot`] wraps that state with identity, versioning and the
//! pending-event buffer. State is reachable only through `&` accessors, so
//! `record`, `apply` and `replay` are the only ways it changes.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{Event, EventContext, EventPayload};
use crate::store::{StoredEvent, StreamKey};

/// Domain state rebuilt from events of a single aggregate kind.
pub trait Aggregate: Default + Clone + fmt::Debug + Send + Sync + 'static {
    /// Namespace of this kind's streams.
    const AGGREGATE_TYPE: &'static str;

    /// The event payload enum this aggregate produces and consumes.
    type Payload: EventPayload;

    /// Checks business invariants before `payload` is recorded.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if the operation is not
    /// permitted in the current state.
    fn validate(&self, payload: &Self::Payload) -> Result<(), DomainError>;

    /// Applies a payload to the state.
    ///
    /// Runs identically during replay and live recording, so it must not
    /// perform I/O, read the clock, or draw random numbers.
    fn apply(&mut self, payload: &Self::Payload);
}

#[derive(Debug, Clone)]
struct CommittedState<A> {
    state: A,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

/// An aggregate instance: identity, version, state and pending events.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: Uuid,
    version: i64,
    committed_version: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    state: A,
    pending: Vec<Event<A::Payload>>,
    committed: Option<Box<CommittedState<A>>>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a new, empty aggregate at version 0.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            committed_version: 0,
            created_at: None,
            updated_at: None,
            state: A::default(),
            pending: Vec::new(),
            committed: None,
        }
    }

    /// Builds an aggregate by replaying its committed history.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Replay` if the history is not a contiguous,
    /// 1-based sequence of events for this aggregate.
    pub fn from_history<'a, I>(id: Uuid, events: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = &'a Event<A::Payload>>,
    {
        let mut root = Self::new(id);
        root.replay(events)?;
        Ok(root)
    }

    /// Returns the aggregate identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the key of this aggregate's stream.
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(A::AGGREGATE_TYPE, self.id)
    }

    /// Sequence number of the last applied event, pending events included.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Sequence number of the last durably appended event. This is the
    /// expected version for the next append.
    pub fn committed_version(&self) -> i64 {
        self.committed_version
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// True while no event has ever been applied.
    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// Returns the events recorded since the last commit, in order.
    pub fn pending_events(&self) -> &[Event<A::Payload>] {
        &self.pending
    }

    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Validates `payload` against the current state and, if permitted,
    /// records it as the next pending event and applies it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` from [`Aggregate::validate`];
    /// nothing is recorded in that case.
    pub fn record(
        &mut self,
        payload: A::Payload,
        context: &EventContext,
        clock: &dyn Clock,
    ) -> Result<&Event<A::Payload>, DomainError> {
        self.state.validate(&payload)?;

        let event = Event::recorded(
            &self.stream_key(),
            self.version + 1,
            payload,
            context,
            clock.now(),
        );
        if self.pending.is_empty() {
            self.committed = Some(Box::new(CommittedState {
                state: self.state.clone(),
                created_at: self.created_at,
                updated_at: self.updated_at,
            }));
        }
        self.fold(&event);
        self.pending.push(event);
        Ok(&self.pending[self.pending.len() - 1])
    }

    /// Applies one committed event on top of the current state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Replay` if the event belongs to another stream,
    /// its sequence number is not `version + 1`, or pending events exist.
    pub fn apply(&mut self, event: &Event<A::Payload>) -> Result<(), DomainError> {
        if !self.pending.is_empty() {
            return Err(DomainError::replay(
                &self.stream_key(),
                format!(
                    "cannot apply committed event {} over {} pending events",
                    event.sequence_number(),
                    self.pending.len()
                ),
            ));
        }
        self.check(event)?;
        self.fold(event);
        self.committed_version = self.version;
        Ok(())
    }

    /// Decodes a stored record and applies it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Replay` if the record does not decode or does
    /// not apply.
    pub fn apply_stored(&mut self, stored: &StoredEvent) -> Result<(), DomainError> {
        let event = Event::from_stored(stored)?;
        self.apply(&event)
    }

    /// Resets to the empty state, then applies `events` in order.
    ///
    /// A failed replay leaves the instance partially rebuilt; discard it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Replay` unless the events are contiguous from 1.
    pub fn replay<'a, I>(&mut self, events: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = &'a Event<A::Payload>>,
    {
        self.reset();
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Encodes the pending events as storage records.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if a payload cannot be encoded.
    pub fn pending_stored_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        self.pending.iter().map(Event::to_stored).collect()
    }

    /// Drops pending events and reverts the state to the last committed fold.
    pub fn discard_pending(&mut self) {
        if let Some(committed) = self.committed.take() {
            self.state = committed.state;
            self.created_at = committed.created_at;
            self.updated_at = committed.updated_at;
        }
        self.pending.clear();
        self.version = self.committed_version;
    }

    /// Rebases the committed version onto the pending events and clears
    /// them. Called by the unit of work after a successful append.
    pub(crate) fn mark_committed(&mut self) {
        if let Some(last) = self.pending.last() {
            self.committed_version = last.sequence_number();
        }
        self.pending.clear();
        self.committed = None;
    }

    fn reset(&mut self) {
        self.version = 0;
        self.committed_version = 0;
        self.created_at = None;
        self.updated_at = None;
        self.state = A::default();
        self.pending.clear();
        self.committed = None;
    }

    fn check(&self, event: &Event<A::Payload>) -> Result<(), DomainError> {
        if event.aggregate_id() != self.id {
            return Err(DomainError::replay(
                &self.stream_key(),
                format!("event belongs to aggregate {}", event.aggregate_id()),
            ));
        }
        if event.aggregate_type() != A::AGGREGATE_TYPE {
            return Err(DomainError::replay(
                &self.stream_key(),
                format!("event belongs to aggregate type {}", event.aggregate_type()),
            ));
        }
        if event.sequence_number() != self.version + 1 {
            return Err(DomainError::replay(
                &self.stream_key(),
                format!(
                    "expected sequence number {}, got {}",
                    self.version + 1,
                    event.sequence_number()
                ),
            ));
        }
        Ok(())
    }

    fn fold(&mut self, event: &Event<A::Payload>) {
        self.state.apply(event.payload());
        self.version = event.sequence_number();
        self.created_at.get_or_insert(event.recorded_at());
        self.updated_at = Some(event.recorded_at());
    }
}
