//! Asynchronous projection over the global event feed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use folio_core::error::DomainError;
use folio_core::store::{DEFAULT_PAGE_SIZE, EventStore, EventStream, FeedRecord, Retraction};
use folio_core::view::View;

/// Keeps one [`View`] caught up with [`EventStore::read_all`].
///
/// The checkpoint is the global position of the last feed entry the view
/// accepted. It only moves forward after `apply` succeeds, so an event may
/// be delivered again after a failure but is never skipped. A retraction
/// marker reverts the view's copy of that stream to its surviving events.
pub struct Projector<V: View> {
    store: Arc<dyn EventStore>,
    view: Arc<Mutex<V>>,
    checkpoint: i64,
    batch_size: usize,
}

impl<V: View> Projector<V> {
    /// Creates a projector starting at the beginning of the feed.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, view: Arc<Mutex<V>>) -> Self {
        Self {
            store,
            view,
            checkpoint: 0,
            batch_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Resumes from a previously saved checkpoint.
    #[must_use]
    pub fn starting_after(mut self, checkpoint: i64) -> Self {
        self.checkpoint = checkpoint.max(0);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Global position of the last applied event.
    pub fn checkpoint(&self) -> i64 {
        self.checkpoint
    }

    pub fn view(&self) -> &Arc<Mutex<V>> {
        &self.view
    }

    /// Applies every entry currently available in the feed. Returns how
    /// many entries were applied, retraction markers included.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the feed cannot be read, or the view's
    /// error for the first event it rejects. Entries before that one stay
    /// applied and checkpointed.
    pub async fn catch_up(&mut self) -> Result<usize, DomainError> {
        let mut applied = 0;
        loop {
            let batch = self.store.read_all(self.checkpoint, self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            for logged in &batch {
                match &logged.record {
                    FeedRecord::Event(event) => {
                        self.lock_view()?.apply(event)?;
                    }
                    FeedRecord::Retraction(retraction) => {
                        self.revert(retraction).await?;
                    }
                }
                self.checkpoint = logged.global_position;
                applied += 1;
            }
            if batch.len() < self.batch_size {
                break;
            }
        }
        if applied > 0 {
            tracing::debug!(applied, checkpoint = self.checkpoint, "projector caught up");
        }
        Ok(applied)
    }

    /// Resets the view and replays the feed from the beginning.
    ///
    /// # Errors
    ///
    /// Same as [`catch_up`](Self::catch_up).
    pub async fn rebuild(&mut self) -> Result<usize, DomainError> {
        self.lock_view()?.reset();
        self.checkpoint = 0;
        tracing::info!("rebuilding view from the start of the feed");
        self.catch_up().await
    }

    /// Polls the feed every `interval` until `shutdown` turns true or its
    /// sender goes away. Failures are logged and retried on the next tick.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let name = self.view_name();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(view = %name, checkpoint = self.checkpoint, "projector started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.catch_up().await {
                        tracing::warn!(
                            view = %name,
                            checkpoint = self.checkpoint,
                            %error,
                            "projection failed, retrying on next poll"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!(view = %name, checkpoint = self.checkpoint, "projector stopped");
    }

    /// Re-reads the stream up to `revert_to` and hands it to the view.
    /// Events above that point arrive later in the feed.
    async fn revert(&self, retraction: &Retraction) -> Result<(), DomainError> {
        let mut reader = EventStream::open(self.store.as_ref(), retraction.stream.clone(), 0);
        let mut surviving = Vec::new();
        while let Some(event) = reader.next_event().await? {
            if event.sequence_number > retraction.revert_to {
                break;
            }
            surviving.push(event);
        }
        self.lock_view()?.revert_stream(&retraction.stream, &surviving)?;
        tracing::info!(
            stream = %retraction.stream,
            revert_to = retraction.revert_to,
            "view reverted after retraction"
        );
        Ok(())
    }

    fn lock_view(&self) -> Result<MutexGuard<'_, V>, DomainError> {
        self.view
            .lock()
            .map_err(|_| DomainError::Infrastructure("view lock poisoned".into()))
    }

    fn view_name(&self) -> String {
        match self.view.lock() {
            Ok(view) => view.name().to_owned(),
            Err(poisoned) => poisoned.into_inner().name().to_owned(),
        }
    }
}

impl<V: View> std::fmt::Debug for Projector<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projector")
            .field("checkpoint", &self.checkpoint)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
