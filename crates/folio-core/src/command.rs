//! Command abstractions.
//!
//! Commands are self-describing, immutable requests. Their handlers load
//! aggregates, run domain operations and commit through a `UnitOfWork`.

use uuid::Uuid;

use crate::event::EventContext;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// Actor issuing the command. Empty when unknown.
    fn issued_by(&self) -> &str {
        ""
    }

    /// Context stamped on every event this command records.
    fn event_context(&self) -> EventContext {
        EventContext::new(self.correlation_id()).recorded_by(self.issued_by())
    }
}
