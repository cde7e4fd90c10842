//! Domain event abstractions.
//!
//! An [`Event`] is the immutable record of one state change of exactly one
//! aggregate kind. Its payload is a variant of that kind's [`EventPayload`]
//! enum; the aggregate dispatches on it with an exhaustive `match`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::store::{StoredEvent, StreamKey};

/// Payload capability implemented by the event enum of one aggregate kind.
pub trait EventPayload:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;
}

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate kind that owns the stream.
    pub aggregate_type: String,
    /// Monotonically increasing, 1-based version within the aggregate stream.
    pub sequence_number: i64,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Actor that caused the change. Empty when unknown.
    pub recorded_by: String,
    /// Timestamp of event creation.
    pub recorded_at: DateTime<Utc>,
}

/// Caller-supplied context for events recorded by a domain operation.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Actor performing the operation.
    pub recorded_by: String,
}

impl EventContext {
    /// Creates a context whose causation is the command itself.
    #[must_use]
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            causation_id: correlation_id,
            recorded_by: String::new(),
        }
    }

    /// Sets the causation ID.
    #[must_use]
    pub fn caused_by(mut self, causation_id: Uuid) -> Self {
        self.causation_id = causation_id;
        self
    }

    /// Sets the acting user or service.
    #[must_use]
    pub fn recorded_by(mut self, actor: impl Into<String>) -> Self {
        self.recorded_by = actor.into();
        self
    }
}

/// An immutable, sequence-numbered state change of one aggregate.
///
/// Two events are equal when they share `(aggregate_id, sequence_number)`.
#[derive(Debug, Clone)]
pub struct Event<P> {
    metadata: EventMetadata,
    payload: P,
}

impl<P: EventPayload> Event<P> {
    pub(crate) fn recorded(
        stream: &StreamKey,
        sequence_number: i64,
        payload: P,
        context: &EventContext,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: payload.event_type().to_owned(),
                aggregate_id: stream.aggregate_id,
                aggregate_type: stream.aggregate_type.clone(),
                sequence_number,
                correlation_id: context.correlation_id,
                causation_id: context.causation_id,
                recorded_by: context.recorded_by.clone(),
                recorded_at,
            },
            payload,
        }
    }

    /// Decodes a stored record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Replay` if the payload does not decode into `P`
    /// or decodes into a variant other than the recorded `event_type`.
    pub fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
        let stream = stored.stream_key();
        let payload: P = serde_json::from_value(stored.payload.clone()).map_err(|e| {
            DomainError::replay(
                &stream,
                format!(
                    "event {} (sequence {}) does not decode: {e}",
                    stored.event_id, stored.sequence_number
                ),
            )
        })?;
        if payload.event_type() != stored.event_type {
            return Err(DomainError::replay(
                &stream,
                format!(
                    "event {} is recorded as {} but decodes as {}",
                    stored.event_id,
                    stored.event_type,
                    payload.event_type()
                ),
            ));
        }
        Ok(Self {
            metadata: EventMetadata {
                event_id: stored.event_id,
                event_type: stored.event_type.clone(),
                aggregate_id: stored.aggregate_id,
                aggregate_type: stored.aggregate_type.clone(),
                sequence_number: stored.sequence_number,
                correlation_id: stored.correlation_id,
                causation_id: stored.causation_id,
                recorded_by: stored.recorded_by.clone(),
                recorded_at: stored.recorded_at,
            },
            payload,
        })
    }

    /// Encodes the event as a storage record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn to_stored(&self) -> Result<StoredEvent, DomainError> {
        let payload = serde_json::to_value(&self.payload)
            .map_err(|e| DomainError::Serialization(format!("{}: {e}", self.metadata.event_type)))?;
        let meta = &self.metadata;
        Ok(StoredEvent {
            event_id: meta.event_id,
            aggregate_type: meta.aggregate_type.clone(),
            aggregate_id: meta.aggregate_id,
            event_type: meta.event_type.clone(),
            payload,
            sequence_number: meta.sequence_number,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            recorded_by: meta.recorded_by.clone(),
            recorded_at: meta.recorded_at,
        })
    }
}

impl<P> Event<P> {
    /// Returns the metadata for this event.
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Returns the state-change payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn event_id(&self) -> Uuid {
        self.metadata.event_id
    }

    pub fn aggregate_id(&self) -> Uuid {
        self.metadata.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.metadata.aggregate_type
    }

    pub fn sequence_number(&self) -> i64 {
        self.metadata.sequence_number
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.metadata.recorded_at
    }

    /// Returns the key of the stream this event belongs to.
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.metadata.aggregate_type.clone(), self.metadata.aggregate_id)
    }
}

impl<P> PartialEq for Event<P> {
    fn eq(&self, other: &Self) -> bool {
        self.metadata.aggregate_id == other.metadata.aggregate_id
            && self.metadata.sequence_number == other.metadata.sequence_number
    }
}

impl<P> Eq for Event<P> {}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum LampEvent {
        SwitchedOn,
        Dimmed { level: u8 },
    }

    impl EventPayload for LampEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::SwitchedOn => "lamp.switched_on",
                Self::Dimmed { .. } => "lamp.dimmed",
            }
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_recorded_event_carries_context_and_stream() {
        // Arrange
        let stream = StreamKey::new("lamp", Uuid::new_v4());
        let correlation_id = Uuid::new_v4();
        let context = EventContext::new(correlation_id).recorded_by("alice");

        // Act
        let event = Event::recorded(
            &stream,
            3,
            LampEvent::Dimmed { level: 40 },
            &context,
            fixed_now(),
        );

        // Assert
        let meta = event.metadata();
        assert_eq!(meta.event_type, "lamp.dimmed");
        assert_eq!(meta.aggregate_id, stream.aggregate_id);
        assert_eq!(meta.aggregate_type, "lamp");
        assert_eq!(meta.sequence_number, 3);
        assert_eq!(meta.correlation_id, correlation_id);
        assert_eq!(meta.causation_id, correlation_id);
        assert_eq!(meta.recorded_by, "alice");
        assert_eq!(meta.recorded_at, fixed_now());
        assert_eq!(event.stream_key(), stream);
    }

    #[test]
    fn test_stored_record_decodes_back_to_same_event() {
        // Arrange
        let stream = StreamKey::new("lamp", Uuid::new_v4());
        let event = Event::recorded(
            &stream,
            1,
            LampEvent::SwitchedOn,
            &EventContext::new(Uuid::new_v4()),
            fixed_now(),
        );

        // Act
        let stored = event.to_stored().unwrap();
        let decoded = Event::<LampEvent>::from_stored(&stored).unwrap();

        // Assert
        assert_eq!(decoded.metadata(), event.metadata());
        assert_eq!(decoded.payload(), &LampEvent::SwitchedOn);
    }

    #[test]
    fn test_from_stored_rejects_mismatched_event_type() {
        // Arrange
        let stream = StreamKey::new("lamp", Uuid::new_v4());
        let mut stored = Event::recorded(
            &stream,
            1,
            LampEvent::SwitchedOn,
            &EventContext::new(Uuid::new_v4()),
            fixed_now(),
        )
        .to_stored()
        .unwrap();
        stored.event_type = "lamp.dimmed".to_owned();

        // Act
        let result = Event::<LampEvent>::from_stored(&stored);

        // Assert
        match result {
            Err(DomainError::Replay { stream: s, reason }) => {
                assert_eq!(s, stream);
                assert!(reason.contains("decodes as lamp.switched_on"));
            }
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[test]
    fn test_from_stored_rejects_undecodable_payload() {
        // Arrange
        let stream = StreamKey::new("lamp", Uuid::new_v4());
        let mut stored = Event::recorded(
            &stream,
            1,
            LampEvent::SwitchedOn,
            &EventContext::new(Uuid::new_v4()),
            fixed_now(),
        )
        .to_stored()
        .unwrap();
        stored.payload = serde_json::json!({"Exploded": {}});

        // Act
        let result = Event::<LampEvent>::from_stored(&stored);

        // Assert
        assert!(matches!(result, Err(DomainError::Replay { .. })));
    }

    #[test]
    fn test_equality_is_by_aggregate_and_sequence() {
        let stream = StreamKey::new("lamp", Uuid::new_v4());
        let context = EventContext::new(Uuid::new_v4());
        let a = Event::recorded(&stream, 1, LampEvent::SwitchedOn, &context, fixed_now());
        let b = Event::recorded(
            &stream,
            1,
            LampEvent::Dimmed { level: 10 },
            &context,
            fixed_now(),
        );
        let c = Event::recorded(&stream, 2, LampEvent::SwitchedOn, &context, fixed_now());

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
