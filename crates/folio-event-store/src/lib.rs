//! Folio event store backends.
//!
//! - [`InMemoryEventStore`]: process-local store with native multi-stream
//!   atomicity, used by tests and single-process deployments.
//! - [`PgEventStore`]: PostgreSQL store built on sqlx.
//!
//! Also hosts the asynchronous [`Projector`] that keeps views caught up
//! with the global feed, plus configuration and tracing setup.

pub mod config;
pub mod in_memory_event_store;
pub mod pg_event_store;
pub mod projector;
pub mod schema;
pub mod telemetry;

pub use config::{ConfigError, LogFormat, StoreConfig};
pub use in_memory_event_store::InMemoryEventStore;
pub use pg_event_store::PgEventStore;
pub use projector::Projector;
