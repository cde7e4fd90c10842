//! Shared test doubles for Folio crates.

mod clock;
mod store;

pub use clock::FixedClock;
pub use store::{
    EmptyEventStore, FailingEventStore, FlakyEventStore, RecordingEventStore, stored_event,
};
