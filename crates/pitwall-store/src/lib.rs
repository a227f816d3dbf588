//! External collaborators for the sync engine: the remote API gateway and
//! the PostgreSQL-backed metadata store, sink and round calendar.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pitwall_core::{Record, Registry, SqlValue, SyncLogEntry, SyncState, SyncStatus, Watermark};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "pitwall-store";

// ---------------------------------------------------------------------------
// Source gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SourceError {
    /// Network failures, timeouts, 5xx and rate limits. Retried inside the
    /// gateway; surfaces only once the retry budget is exhausted.
    #[error("transient source failure: {message}")]
    Transient { message: String },
    /// Client errors other than rate limiting. Aborts the task immediately.
    #[error("permanent source failure: {message}")]
    Permanent { message: String },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_request_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Explicit gateway configuration, passed into the constructor so tests
/// can point the client at a fake server.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.jolpi.ca/ergast/f1".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: "pitwall/0.1".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Abstraction over the remote read-only API.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    async fn fetch(
        &self,
        entity: &str,
        year: i32,
        round: Option<i32>,
    ) -> Result<JsonValue, SourceError>;
}

/// Resolve the API path for an entity load window. Round-scoped entities
/// require a round number; the planner always supplies one.
pub fn endpoint_for(entity: &str, year: i32, round: Option<i32>) -> Result<String, SourceError> {
    let round_or = |suffix: &str| -> Result<String, SourceError> {
        let round = round.ok_or_else(|| SourceError::Permanent {
            message: format!("{entity} requires a round number"),
        })?;
        Ok(format!("/{year}/{round}/{suffix}"))
    };

    match entity {
        "circuit" => Ok("/circuits.json?limit=500".to_string()),
        "season" => Ok("/seasons.json?limit=500".to_string()),
        "team" => Ok(format!("/{year}/constructors.json?limit=100")),
        "driver" => Ok(format!("/{year}/drivers.json?limit=100")),
        "round" | "session" => Ok(format!("/{year}.json?limit=100")),
        "team_driver" => Ok(format!("/{year}/driverStandings.json")),
        "sprint_result" => round_or("sprint.json"),
        "qualifying_result" => round_or("qualifying.json"),
        "race_result" => round_or("results.json"),
        "driver_championship" => round_or("driverStandings.json"),
        "team_championship" => round_or("constructorStandings.json"),
        other => Err(SourceError::Permanent {
            message: format!("no endpoint known for entity {other}"),
        }),
    }
}

/// The canonical empty payload the API returns for windows with no data.
/// HTTP 404 is mapped onto this so downstream sees a zero-record load.
pub fn empty_payload() -> JsonValue {
    serde_json::json!({ "MRData": { "total": "0", "RaceTable": { "Races": [] } } })
}

/// HTTP client for the Jolpica (Ergast-compatible) API with retry on
/// transient failures.
#[derive(Debug)]
pub struct JolpicaGateway {
    client: reqwest::Client,
    base_url: String,
    backoff: BackoffPolicy,
}

impl JolpicaGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url,
            backoff: config.backoff,
        })
    }
}

#[async_trait]
impl SourceGateway for JolpicaGateway {
    async fn fetch(
        &self,
        entity: &str,
        year: i32,
        round: Option<i32>,
    ) -> Result<JsonValue, SourceError> {
        let path = endpoint_for(entity, year, round)?;
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = String::new();

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        debug!(entity, year, "window has no data yet (404)");
                        return Ok(empty_payload());
                    }
                    if status.is_success() {
                        match resp.json::<JsonValue>().await {
                            Ok(body) => return Ok(body),
                            Err(err) => {
                                last_error = format!("decoding response body: {err}");
                            }
                        }
                    } else if classify_status(status) == RetryDisposition::Retryable {
                        last_error = format!("http status {} for {url}", status.as_u16());
                    } else {
                        return Err(SourceError::Permanent {
                            message: format!("http status {} for {url}", status.as_u16()),
                        });
                    }
                }
                Err(err) => {
                    if classify_request_error(&err) == RetryDisposition::NonRetryable {
                        return Err(SourceError::Permanent {
                            message: format!("request failed: {err}"),
                        });
                    }
                    last_error = err.to_string();
                }
            }

            if attempt < self.backoff.max_retries {
                let delay = self.backoff.delay_for_attempt(attempt);
                warn!(entity, attempt = attempt + 1, ?delay, %last_error, "retrying fetch");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SourceError::Transient {
            message: format!(
                "request failed after {} attempts: {last_error}",
                self.backoff.max_retries + 1
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Relational store
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {0} has no provisioned sync state")]
    NotProvisioned(String),
    #[error("another sync is already running for {0}")]
    ConcurrentSyncInProgress(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("database connection lost: {0}")]
    ConnectionLost(String),
    #[error("invalid stored value: {0}")]
    Invalid(String),
    #[error(transparent)]
    Database(sqlx::Error),
}

fn classify_db_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().map(|c| c.starts_with("23")).unwrap_or(false) => {
            StoreError::ConstraintViolation(db.message().to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::ConnectionLost(err.to_string())
        }
        _ => StoreError::Database(err),
    }
}

/// Per-entity sync state, mutated only by the planner. Status doubles as
/// an advisory cross-run lock.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_state(&self, entity: &str) -> Result<SyncState, StoreError>;

    /// Transition to `running`. A pre-existing `running` row older than
    /// `stale_after` is reclaimed; a fresh one refuses with
    /// `ConcurrentSyncInProgress`.
    async fn begin(&self, entity: &str, stale_after: chrono::Duration) -> Result<(), StoreError>;

    /// running -> success: watermark advances to the attempted window,
    /// error cleared, success log entry appended, all in one transaction.
    async fn commit(
        &self,
        entity: &str,
        year: i32,
        round: Option<i32>,
        records: i64,
        duration_seconds: i64,
    ) -> Result<(), StoreError>;

    /// running -> failed: watermark unchanged, failure log entry appended,
    /// all in one transaction.
    async fn fail(
        &self,
        entity: &str,
        error_message: &str,
        records: i64,
        duration_seconds: i64,
    ) -> Result<(), StoreError>;

    /// Advisory log append for attempts that never acquired the entity
    /// lock.
    async fn append_log(&self, entry: &SyncLogEntry) -> Result<(), StoreError>;

    /// Ensure a pending row exists for every registry entity.
    async fn provision(&self, registry: &Registry) -> Result<(), StoreError>;
}

/// Upsert-by-natural-key writer over the relational store.
#[async_trait]
pub trait Sink: Send + Sync {
    /// At most one row per conflict-key value after the call; the whole
    /// batch runs inside one transaction.
    async fn upsert(
        &self,
        table: &str,
        conflict_key: &[&str],
        rows: &[Record],
    ) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundWindow {
    pub number: i32,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The persisted race calendar, input to the incremental due-ness rule.
#[async_trait]
pub trait RoundCalendar: Send + Sync {
    async fn rounds(&self, year: i32) -> Result<Vec<RoundWindow>, StoreError>;
}

/// PostgreSQL implementation of the metadata store, sink and calendar.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the two metadata relations if absent. Domain tables are
    /// provisioned externally.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_status (
                entity_name          TEXT PRIMARY KEY,
                status               TEXT NOT NULL DEFAULT 'pending',
                last_successful_sync TIMESTAMPTZ,
                last_season_year     INT,
                last_round_number    INT,
                total_records        BIGINT NOT NULL DEFAULT 0,
                error_message        TEXT,
                last_updated         TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify_db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_log (
                id               BIGSERIAL PRIMARY KEY,
                entity_name      TEXT NOT NULL,
                sync_timestamp   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                status           TEXT NOT NULL,
                records_affected BIGINT NOT NULL DEFAULT 0,
                duration_seconds BIGINT NOT NULL DEFAULT 0,
                error_message    TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(classify_db_error)?;

        Ok(())
    }
}

fn state_from_row(row: &PgRow) -> Result<SyncState, StoreError> {
    let status_text: String = row.try_get("status").map_err(classify_db_error)?;
    let status = SyncStatus::parse(&status_text)
        .ok_or_else(|| StoreError::Invalid(format!("unknown sync status {status_text}")))?;
    Ok(SyncState {
        entity: row.try_get("entity_name").map_err(classify_db_error)?,
        status,
        last_successful_sync: row
            .try_get("last_successful_sync")
            .map_err(classify_db_error)?,
        watermark: Watermark {
            season_year: row.try_get("last_season_year").map_err(classify_db_error)?,
            round_number: row
                .try_get("last_round_number")
                .map_err(classify_db_error)?,
        },
        total_records: row.try_get("total_records").map_err(classify_db_error)?,
        error_message: row.try_get("error_message").map_err(classify_db_error)?,
        last_updated: row.try_get("last_updated").map_err(classify_db_error)?,
    })
}

const SELECT_STATE: &str = r#"
    SELECT entity_name, status, last_successful_sync, last_season_year,
           last_round_number, total_records, error_message, last_updated
      FROM sync_status
     WHERE entity_name = $1
"#;

#[async_trait]
impl MetadataStore for PgStore {
    async fn get_state(&self, entity: &str) -> Result<SyncState, StoreError> {
        let row = sqlx::query(SELECT_STATE)
            .bind(entity)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify_db_error)?
            .ok_or_else(|| StoreError::NotProvisioned(entity.to_string()))?;
        state_from_row(&row)
    }

    async fn begin(&self, entity: &str, stale_after: chrono::Duration) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify_db_error)?;

        let row = sqlx::query(&format!("{SELECT_STATE} FOR UPDATE"))
            .bind(entity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify_db_error)?
            .ok_or_else(|| StoreError::NotProvisioned(entity.to_string()))?;
        let state = state_from_row(&row)?;

        if state.status == SyncStatus::Running {
            let age = Utc::now() - state.last_updated;
            if age <= stale_after {
                return Err(StoreError::ConcurrentSyncInProgress(entity.to_string()));
            }
            warn!(entity, age_minutes = age.num_minutes(), "reclaiming stale running lock");
        }

        sqlx::query(
            r#"
            UPDATE sync_status
               SET status = 'running', last_updated = NOW()
             WHERE entity_name = $1
            "#,
        )
        .bind(entity)
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        tx.commit().await.map_err(classify_db_error)
    }

    async fn commit(
        &self,
        entity: &str,
        year: i32,
        round: Option<i32>,
        records: i64,
        duration_seconds: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify_db_error)?;

        let row = sqlx::query(&format!("{SELECT_STATE} FOR UPDATE"))
            .bind(entity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(classify_db_error)?
            .ok_or_else(|| StoreError::NotProvisioned(entity.to_string()))?;
        let watermark = state_from_row(&row)?.watermark.advanced(year, round);

        sqlx::query(
            r#"
            UPDATE sync_status
               SET status = 'success',
                   last_successful_sync = NOW(),
                   last_updated = NOW(),
                   last_season_year = $2,
                   last_round_number = $3,
                   total_records = $4,
                   error_message = NULL
             WHERE entity_name = $1
            "#,
        )
        .bind(entity)
        .bind(watermark.season_year)
        .bind(watermark.round_number)
        .bind(records)
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        sqlx::query(
            r#"
            INSERT INTO sync_log (entity_name, sync_timestamp, status, records_affected, duration_seconds)
            VALUES ($1, NOW(), 'success', $2, $3)
            "#,
        )
        .bind(entity)
        .bind(records)
        .bind(duration_seconds)
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        tx.commit().await.map_err(classify_db_error)
    }

    async fn fail(
        &self,
        entity: &str,
        error_message: &str,
        records: i64,
        duration_seconds: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify_db_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE sync_status
               SET status = 'failed', last_updated = NOW(), error_message = $2
             WHERE entity_name = $1
            "#,
        )
        .bind(entity)
        .bind(error_message)
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotProvisioned(entity.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO sync_log (entity_name, sync_timestamp, status, records_affected, duration_seconds, error_message)
            VALUES ($1, NOW(), 'failed', $2, $3, $4)
            "#,
        )
        .bind(entity)
        .bind(records)
        .bind(duration_seconds)
        .bind(error_message)
        .execute(&mut *tx)
        .await
        .map_err(classify_db_error)?;

        tx.commit().await.map_err(classify_db_error)
    }

    async fn append_log(&self, entry: &SyncLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_log (entity_name, sync_timestamp, status, records_affected, duration_seconds, error_message)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.entity)
        .bind(entry.sync_timestamp)
        .bind(entry.status.as_str())
        .bind(entry.records_affected)
        .bind(entry.duration_seconds)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await
        .map_err(classify_db_error)?;
        Ok(())
    }

    async fn provision(&self, registry: &Registry) -> Result<(), StoreError> {
        for entity in registry.entities() {
            sqlx::query(
                r#"
                INSERT INTO sync_status (entity_name, status)
                VALUES ($1, 'pending')
                ON CONFLICT (entity_name) DO NOTHING
                "#,
            )
            .bind(entity.name)
            .execute(&self.pool)
            .await
            .map_err(classify_db_error)?;
        }
        Ok(())
    }
}

/// SQL for one row's upsert. NULL columns are inlined so the bound
/// parameters stay typed; returns the indices of the columns to bind.
fn build_row_upsert_sql(
    table: &str,
    conflict_key: &[&str],
    row: &Record,
) -> (String, Vec<usize>) {
    let columns: Vec<&str> = row.columns.iter().map(|(name, _)| *name).collect();

    let mut placeholders = Vec::with_capacity(columns.len());
    let mut bind_indices = Vec::new();
    for (index, (_, value)) in row.columns.iter().enumerate() {
        if matches!(value, SqlValue::Null) {
            placeholders.push("NULL".to_string());
        } else {
            bind_indices.push(index);
            placeholders.push(format!("${}", bind_indices.len()));
        }
    }

    let updates: Vec<String> = columns
        .iter()
        .filter(|name| !conflict_key.contains(name))
        .map(|name| format!("{name} = EXCLUDED.{name}"))
        .collect();
    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) {conflict_action}",
        columns.join(", "),
        placeholders.join(", "),
        conflict_key.join(", "),
    );
    (sql, bind_indices)
}

#[async_trait]
impl Sink for PgStore {
    async fn upsert(
        &self,
        table: &str,
        conflict_key: &[&str],
        rows: &[Record],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(classify_db_error)?;
        let mut written = 0u64;

        for row in rows {
            let (sql, bind_indices) = build_row_upsert_sql(table, conflict_key, row);
            let mut query = sqlx::query(&sql);
            for index in bind_indices {
                query = match &row.columns[index].1 {
                    SqlValue::Text(v) => query.bind(v),
                    SqlValue::Int(v) => query.bind(v),
                    SqlValue::Float(v) => query.bind(v),
                    SqlValue::Bool(v) => query.bind(v),
                    SqlValue::Date(v) => query.bind(v),
                    SqlValue::Timestamp(v) => query.bind(v),
                    SqlValue::Null => query,
                };
            }
            written += query
                .execute(&mut *tx)
                .await
                .map_err(classify_db_error)?
                .rows_affected();
        }

        tx.commit().await.map_err(classify_db_error)?;
        Ok(written)
    }
}

#[async_trait]
impl RoundCalendar for PgStore {
    async fn rounds(&self, year: i32) -> Result<Vec<RoundWindow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT number, race_start
              FROM round
             WHERE season_year = $1
             ORDER BY number
            "#,
        )
        .bind(year)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_db_error)?;

        let mut windows = Vec::with_capacity(rows.len());
        for row in rows {
            windows.push(RoundWindow {
                number: row.try_get("number").map_err(classify_db_error)?,
                completed_at: row.try_get("race_start").map_err(classify_db_error)?,
            });
        }
        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn round_scoped_endpoints_require_a_round() {
        let err = endpoint_for("race_result", 2024, None).unwrap_err();
        assert!(matches!(err, SourceError::Permanent { .. }));

        let path = endpoint_for("race_result", 2024, Some(3)).expect("path");
        assert_eq!(path, "/2024/3/results.json");
    }

    #[test]
    fn seasonal_endpoints_ignore_the_round() {
        assert_eq!(
            endpoint_for("driver", 2024, None).expect("path"),
            "/2024/drivers.json?limit=100"
        );
        assert_eq!(
            endpoint_for("circuit", 2024, Some(9)).expect("path"),
            "/circuits.json?limit=500"
        );
    }

    #[test]
    fn unknown_entity_has_no_endpoint() {
        assert!(endpoint_for("pit_stop", 2024, Some(1)).is_err());
    }

    #[test]
    fn empty_payload_reports_zero_total() {
        let payload = empty_payload();
        assert_eq!(payload["MRData"]["total"], "0");
        assert!(payload["MRData"]["RaceTable"]["Races"]
            .as_array()
            .expect("races array")
            .is_empty());
    }

    #[test]
    fn upsert_sql_updates_non_key_columns() {
        let row = Record::new()
            .set("season_year", SqlValue::Int(2024))
            .set("number", SqlValue::Int(3))
            .set("name", SqlValue::Text("Australian Grand Prix".into()));
        let (sql, binds) = build_row_upsert_sql("round", &["season_year", "number"], &row);
        assert_eq!(
            sql,
            "INSERT INTO round (season_year, number, name) VALUES ($1, $2, $3) \
             ON CONFLICT (season_year, number) DO UPDATE SET name = EXCLUDED.name"
        );
        assert_eq!(binds, vec![0, 1, 2]);
    }

    #[test]
    fn upsert_sql_inlines_nulls_and_renumbers_binds() {
        let row = Record::new()
            .set("reference", SqlValue::Text("albert_park".into()))
            .set("locality", SqlValue::Null)
            .set("country", SqlValue::Text("Australia".into()));
        let (sql, binds) = build_row_upsert_sql("circuit", &["reference"], &row);
        assert_eq!(
            sql,
            "INSERT INTO circuit (reference, locality, country) VALUES ($1, NULL, $2) \
             ON CONFLICT (reference) DO UPDATE SET locality = EXCLUDED.locality, \
             country = EXCLUDED.country"
        );
        assert_eq!(binds, vec![0, 2]);
    }

    #[test]
    fn all_key_upsert_degrades_to_do_nothing() {
        let row = Record::new().set("year", SqlValue::Int(2024));
        let (sql, _) = build_row_upsert_sql("season", &["year"], &row);
        assert!(sql.ends_with("ON CONFLICT (year) DO NOTHING"));
    }
}
