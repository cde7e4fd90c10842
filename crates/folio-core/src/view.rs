//! Read-model projections.
//!
//! A [`View`] folds committed events into a query-friendly shape. Delivery
//! is at-least-once, so `apply` must tolerate redelivery; [`StreamPositions`]
//! is the usual way to get that. Views may lag the store and never cause an
//! append to fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::DomainError;
use crate::store::{StoredEvent, StreamKey};

/// A projection consumer of committed events.
pub trait View: Send + Sync {
    /// Stable name used in logs and commit reports.
    fn name(&self) -> &str;

    /// Applies one committed event. Applying the same event twice must leave
    /// the projection as if it were applied once.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be projected.
    fn apply(&mut self, event: &StoredEvent) -> Result<(), DomainError>;

    /// Discards all projected state.
    fn reset(&mut self);

    /// Discards everything projected from `stream`, including its applied
    /// position.
    fn forget_stream(&mut self, stream: &StreamKey);

    /// Replaces what was projected from `stream` with `history`, its
    /// surviving events in order. Used when the stream's tail was retracted.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by [`apply`](Self::apply).
    fn revert_stream(
        &mut self,
        stream: &StreamKey,
        history: &[StoredEvent],
    ) -> Result<(), DomainError> {
        self.forget_stream(stream);
        for event in history {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Discards current state and reapplies the full ordered sequence.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by [`apply`](Self::apply).
    fn rebuild(&mut self, events: &[StoredEvent]) -> Result<(), DomainError> {
        self.reset();
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }
}

/// Last applied sequence number per stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPositions {
    positions: HashMap<StreamKey, i64>,
}

impl StreamPositions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `event` lies beyond what was already applied for its stream.
    #[must_use]
    pub fn is_new(&self, event: &StoredEvent) -> bool {
        event.sequence_number > self.position(&event.stream_key())
    }

    /// Records `event` as applied.
    pub fn advance(&mut self, event: &StoredEvent) {
        let position = self.positions.entry(event.stream_key()).or_insert(0);
        *position = (*position).max(event.sequence_number);
    }

    /// Last applied sequence number of `stream`, 0 if none.
    #[must_use]
    pub fn position(&self, stream: &StreamKey) -> i64 {
        self.positions.get(stream).copied().unwrap_or(0)
    }

    /// Drops what was recorded for `stream`.
    pub fn forget(&mut self, stream: &StreamKey) {
        self.positions.remove(stream);
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }
}

/// A synchronous view staged on a copy and published only when every
/// synchronous view of the commit succeeded.
pub(crate) trait SyncView: Send + Sync {
    fn name(&self) -> String;

    /// Address of the shared view, used to reject duplicate registration.
    fn identity(&self) -> usize;

    fn prepare(&self, events: &[StoredEvent]) -> Result<Box<dyn PreparedView + '_>, DomainError>;
}

pub(crate) trait PreparedView {
    fn publish(self: Box<Self>);
}

struct Prepared<'g, V> {
    guard: MutexGuard<'g, V>,
    staged: V,
}

impl<V> PreparedView for Prepared<'_, V> {
    fn publish(self: Box<Self>) {
        let Prepared { mut guard, staged } = *self;
        *guard = staged;
    }
}

impl<V: View + Clone + 'static> SyncView for Arc<Mutex<V>> {
    fn name(&self) -> String {
        match self.lock() {
            Ok(view) => view.name().to_owned(),
            Err(poisoned) => poisoned.into_inner().name().to_owned(),
        }
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(self).cast::<()>() as usize
    }

    fn prepare(&self, events: &[StoredEvent]) -> Result<Box<dyn PreparedView + '_>, DomainError> {
        let guard = self
            .lock()
            .map_err(|_| DomainError::Infrastructure("view lock poisoned".into()))?;
        let mut staged = (*guard).clone();
        for event in events {
            staged.apply(event)?;
        }
        Ok(Box::new(Prepared { guard, staged }))
    }
}

/// A synchronous view that could not be updated during a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFailure {
    pub view: String,
    pub error: String,
}

/// Applies `events` to every view, or to none of them.
pub(crate) fn apply_all_or_none(
    views: &[Box<dyn SyncView>],
    events: &[StoredEvent],
) -> Vec<ViewFailure> {
    let mut prepared = Vec::with_capacity(views.len());
    let mut failures = Vec::new();
    for view in views {
        match view.prepare(events) {
            Ok(update) => prepared.push(update),
            Err(e) => failures.push(ViewFailure {
                view: view.name(),
                error: e.to_string(),
            }),
        }
    }
    if failures.is_empty() {
        for update in prepared {
            update.publish();
        }
    }
    failures
}
