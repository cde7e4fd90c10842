//! `PostgreSQL` implementation of the `EventStore` trait.
//!
//! Every write runs in one transaction that first takes a per-stream
//! advisory lock, so the version check and the insert cannot interleave
//! with another writer on the same stream. Different streams never contend.
//! The partial unique index on live stream positions backs this up.
//! Dropping an in-flight call drops its transaction, which rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgConnection, PgPool, Transaction};
use uuid::Uuid;

use folio_core::error::DomainError;
use folio_core::store::{
    AppendRequest, EventStore, FeedRecord, LoggedEvent, Retraction, StoredEvent, StreamKey,
    validate_append,
};

use crate::config::{ConfigError, StoreConfig};
use crate::schema::{
    CREATE_EVENTS_TABLE, CREATE_RETRACTIONS_TABLE, EVENT_ID_CONSTRAINT,
    STREAM_SEQUENCE_CONSTRAINT,
};

const EVENT_COLUMNS: &str = "event_id, aggregate_type, aggregate_id, event_type, payload, \
     sequence_number, correlation_id, causation_id, recorded_by, recorded_at";

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    aggregate_type: String,
    aggregate_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    sequence_number: i64,
    correlation_id: Uuid,
    causation_id: Uuid,
    recorded_by: String,
    recorded_at: DateTime<Utc>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            event_id: row.event_id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            sequence_number: row.sequence_number,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            recorded_by: row.recorded_by,
            recorded_at: row.recorded_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LoggedRow {
    global_position: i64,
    #[sqlx(flatten)]
    event: EventRow,
}

#[derive(Debug, sqlx::FromRow)]
struct RetractionRow {
    global_position: i64,
    aggregate_type: String,
    aggregate_id: Uuid,
    from_version: i64,
    revert_to: i64,
}

impl From<RetractionRow> for LoggedEvent {
    fn from(row: RetractionRow) -> Self {
        Self {
            global_position: row.global_position,
            record: FeedRecord::Retraction(Retraction {
                stream: StreamKey::new(row.aggregate_type, row.aggregate_id),
                from_version: row.from_version,
                revert_to: row.revert_to,
            }),
        }
    }
}

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {err}"))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool using `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` without a database URL, or
    /// `DomainError::Infrastructure` if the connection fails.
    pub async fn connect(config: &StoreConfig) -> Result<Self, ConnectError> {
        let url = config.require_database_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await
            .map_err(infrastructure)?;
        tracing::info!(max_connections = config.max_connections, "connected to event store");
        Ok(Self::new(pool))
    }

    /// Creates the events and retraction tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        for ddl in [CREATE_EVENTS_TABLE, CREATE_RETRACTIONS_TABLE] {
            sqlx::raw_sql(ddl)
                .execute(&self.pool)
                .await
                .map_err(infrastructure)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DomainError> {
        self.pool.begin().await.map_err(infrastructure)
    }
}

/// Failure to build a [`PgEventStore`] from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Serializes writers on one stream until the transaction ends.
async fn lock_stream(conn: &mut PgConnection, stream: &StreamKey) -> Result<(), DomainError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(stream.to_string())
        .execute(conn)
        .await
        .map_err(infrastructure)?;
    Ok(())
}

async fn live_version(conn: &mut PgConnection, stream: &StreamKey) -> Result<i64, DomainError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(sequence_number), 0)::BIGINT FROM domain_events \
         WHERE aggregate_type = $1 AND aggregate_id = $2 AND retracted_at IS NULL",
    )
    .bind(&stream.aggregate_type)
    .bind(stream.aggregate_id)
    .fetch_one(conn)
    .await
    .map_err(infrastructure)
}

/// Version check plus inserts, inside the caller's transaction.
async fn append_locked(
    conn: &mut PgConnection,
    request: &AppendRequest,
) -> Result<i64, DomainError> {
    let stream = &request.stream;
    validate_append(stream, request.expected_version, &request.events)?;
    lock_stream(conn, stream).await?;

    let actual = live_version(conn, stream).await?;
    if actual != request.expected_version {
        return Err(DomainError::ConcurrencyConflict {
            stream: stream.clone(),
            expected: request.expected_version,
            actual,
        });
    }

    for event in &request.events {
        sqlx::query(
            "INSERT INTO domain_events (event_id, aggregate_type, aggregate_id, event_type, \
             payload, sequence_number, correlation_id, causation_id, recorded_by, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.event_id)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.sequence_number)
        .bind(event.correlation_id)
        .bind(event.causation_id)
        .bind(&event.recorded_by)
        .bind(event.recorded_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| insert_error(e, request, event))?;
    }

    let appended = i64::try_from(request.events.len())
        .map_err(|_| DomainError::InvalidAppend("batch too large".into()))?;
    Ok(request.expected_version + appended)
}

fn insert_error(err: sqlx::Error, request: &AppendRequest, event: &StoredEvent) -> DomainError {
    if let sqlx::Error::Database(db) = &err {
        match db.constraint() {
            Some(STREAM_SEQUENCE_CONSTRAINT) => {
                return DomainError::ConcurrencyConflict {
                    stream: request.stream.clone(),
                    expected: request.expected_version,
                    actual: event.sequence_number,
                };
            }
            Some(EVENT_ID_CONSTRAINT) => return DomainError::DuplicateEvent(event.event_id),
            _ => {}
        }
    }
    infrastructure(err)
}

#[async_trait]
impl EventStore for PgEventStore {
    #[tracing::instrument(skip(self, events), fields(stream = %stream, event_count = events.len()))]
    async fn append(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        let request = AppendRequest {
            stream: stream.clone(),
            expected_version,
            events: events.to_vec(),
        };
        let mut tx = self.begin().await?;
        let version = append_locked(&mut tx, &request).await?;
        tx.commit().await.map_err(infrastructure)?;
        tracing::debug!(version, "events appended to stream");
        Ok(version)
    }

    async fn read_page(
        &self,
        stream: &StreamKey,
        after_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM domain_events \
             WHERE aggregate_type = $1 AND aggregate_id = $2 AND sequence_number > $3 \
             AND retracted_at IS NULL ORDER BY sequence_number LIMIT $4"
        ))
        .bind(&stream.aggregate_type)
        .bind(stream.aggregate_id)
        .bind(after_version)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    async fn stream_version(&self, stream: &StreamKey) -> Result<i64, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(infrastructure)?;
        live_version(&mut conn, stream).await
    }

    #[tracing::instrument(skip(self), fields(stream = %stream))]
    async fn retract(
        &self,
        stream: &StreamKey,
        expected_version: i64,
        revert_to: i64,
    ) -> Result<(), DomainError> {
        let mut tx = self.begin().await?;
        lock_stream(&mut tx, stream).await?;
        let actual = live_version(&mut tx, stream).await?;
        if actual != expected_version || revert_to > expected_version {
            return Err(DomainError::ConcurrencyConflict {
                stream: stream.clone(),
                expected: expected_version,
                actual,
            });
        }
        let retracted = sqlx::query(
            "UPDATE domain_events SET retracted_at = NOW() \
             WHERE aggregate_type = $1 AND aggregate_id = $2 AND sequence_number > $3 \
             AND retracted_at IS NULL",
        )
        .bind(&stream.aggregate_type)
        .bind(stream.aggregate_id)
        .bind(revert_to)
        .execute(&mut *tx)
        .await
        .map_err(infrastructure)?
        .rows_affected();
        if retracted > 0 {
            sqlx::query(
                "INSERT INTO stream_retractions (aggregate_type, aggregate_id, from_version, revert_to) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&stream.aggregate_type)
            .bind(stream.aggregate_id)
            .bind(expected_version)
            .bind(revert_to)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;
        }
        tx.commit().await.map_err(infrastructure)?;
        tracing::warn!(revert_to, retracted, "events retracted from stream");
        Ok(())
    }

    /// Rows written by transactions that may still be in flight are held
    /// back, so a reader never advances past a position that could still
    /// become visible. Events and markers are read from one snapshot.
    async fn read_all(
        &self,
        after_position: i64,
        limit: usize,
    ) -> Result<Vec<LoggedEvent>, DomainError> {
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;
        let events = sqlx::query_as::<_, LoggedRow>(&format!(
            "SELECT global_position, {EVENT_COLUMNS} FROM domain_events \
             WHERE global_position > $1 AND retracted_at IS NULL \
             AND transaction_id < pg_snapshot_xmin(pg_current_snapshot()) \
             ORDER BY global_position LIMIT $2"
        ))
        .bind(after_position)
        .bind(limit_param(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(infrastructure)?;
        let markers = sqlx::query_as::<_, RetractionRow>(
            "SELECT global_position, aggregate_type, aggregate_id, from_version, revert_to \
             FROM stream_retractions \
             WHERE global_position > $1 \
             AND transaction_id < pg_snapshot_xmin(pg_current_snapshot()) \
             ORDER BY global_position LIMIT $2",
        )
        .bind(after_position)
        .bind(limit_param(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(infrastructure)?;
        tx.commit().await.map_err(infrastructure)?;

        let mut feed: Vec<LoggedEvent> = events
            .into_iter()
            .map(|row| LoggedEvent {
                global_position: row.global_position,
                record: FeedRecord::Event(row.event.into()),
            })
            .chain(markers.into_iter().map(LoggedEvent::from))
            .collect();
        feed.sort_by_key(|logged| logged.global_position);
        feed.truncate(limit);
        Ok(feed)
    }

    fn supports_multi_stream_append(&self) -> bool {
        true
    }

    #[tracing::instrument(skip(self, batch), fields(streams = batch.len()))]
    async fn append_all(&self, batch: &[AppendRequest]) -> Result<Vec<i64>, DomainError> {
        // Lock streams in key order so concurrent batches cannot deadlock.
        let mut order: Vec<usize> = (0..batch.len()).collect();
        order.sort_by(|&a, &b| batch[a].stream.cmp(&batch[b].stream));
        if order
            .windows(2)
            .any(|w| batch[w[0]].stream == batch[w[1]].stream)
        {
            return Err(DomainError::InvalidAppend(
                "a stream appears twice in one batch".into(),
            ));
        }

        let mut tx = self.begin().await?;
        let mut versions = vec![0; batch.len()];
        for index in order {
            versions[index] = append_locked(&mut tx, &batch[index]).await?;
        }
        tx.commit().await.map_err(infrastructure)?;
        tracing::debug!("batch appended atomically");
        Ok(versions)
    }
}
