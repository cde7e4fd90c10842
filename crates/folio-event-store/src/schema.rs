//! Event store database schema.
//!
//! Kept identical to `migrations/0001_domain_events.sql` and
//! `migrations/0002_stream_retractions.sql`, which sqlx test fixtures apply.
//! Requires PostgreSQL 13+ for `xid8`.

/// SQL to create the events table.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS domain_events (
    global_position BIGSERIAL PRIMARY KEY,
    event_id        UUID NOT NULL,
    aggregate_type  VARCHAR(255) NOT NULL,
    aggregate_id    UUID NOT NULL,
    event_type      VARCHAR(255) NOT NULL,
    payload         JSONB NOT NULL,
    sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
    correlation_id  UUID NOT NULL,
    causation_id    UUID NOT NULL,
    recorded_by     TEXT NOT NULL DEFAULT '',
    recorded_at     TIMESTAMPTZ NOT NULL,
    transaction_id  XID8 NOT NULL DEFAULT pg_current_xact_id(),
    retracted_at    TIMESTAMPTZ NULL,
    CONSTRAINT domain_events_event_id_key UNIQUE (event_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS domain_events_stream_sequence_key
    ON domain_events (aggregate_type, aggregate_id, sequence_number)
    WHERE retracted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_domain_events_correlation_id
    ON domain_events (correlation_id);
";

/// SQL to create the retraction marker table. Run after
/// [`CREATE_EVENTS_TABLE`], whose position sequence it shares.
pub const CREATE_RETRACTIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS stream_retractions (
    global_position BIGINT PRIMARY KEY DEFAULT nextval('domain_events_global_position_seq'),
    aggregate_type  VARCHAR(255) NOT NULL,
    aggregate_id    UUID NOT NULL,
    from_version    BIGINT NOT NULL,
    revert_to       BIGINT NOT NULL CHECK (revert_to >= 0 AND revert_to < from_version),
    retracted_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    transaction_id  XID8 NOT NULL DEFAULT pg_current_xact_id()
);
";

/// Name of the unique index enforcing one live event per stream position.
pub const STREAM_SEQUENCE_CONSTRAINT: &str = "domain_events_stream_sequence_key";

/// Name of the unique constraint on event identifiers.
pub const EVENT_ID_CONSTRAINT: &str = "domain_events_event_id_key";
