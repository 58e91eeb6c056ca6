//! `PostgreSQL` implementation of [`HistoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use estoque_core::{
    BatchId, ChangePayload, EntityType, HistoryId, HistoryRecord, NewHistoryRecord, UserId,
};

use super::{BatchPage, BatchRef, HistoryStore, RepositoryError};

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    timestamp: DateTime<Utc>,
    entity_type: EntityType,
    entity_id: String,
    batch_id: String,
    user_id: Option<i32>,
    changes: Value,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = RepositoryError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let payload = ChangePayload::from_parts(row.entity_type, row.changes).map_err(|e| {
            RepositoryError::DataCorruption(format!(
                "history record {} has a malformed {} payload: {e}",
                row.id, row.entity_type
            ))
        })?;

        Ok(Self {
            id: HistoryId::new(row.id),
            timestamp: row.timestamp,
            entity_id: row.entity_id,
            batch_id: BatchId::new(row.batch_id),
            user_id: row.user_id.map(UserId::new),
            payload,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    batch_id: String,
    earliest_timestamp: DateTime<Utc>,
}

const SELECT_COLUMNS: &str =
    r#"SELECT id, "timestamp", entity_type, entity_id, batch_id, user_id, changes FROM history"#;

fn decode_rows(rows: Vec<HistoryRow>) -> Result<Vec<HistoryRecord>, RepositoryError> {
    rows.into_iter().map(HistoryRecord::try_from).collect()
}

// =============================================================================
// Repository
// =============================================================================

/// History store backed by the `history` table.
#[derive(Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    /// Create a new history store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(
        conn: &mut PgConnection,
        record: NewHistoryRecord,
    ) -> Result<HistoryRecord, RepositoryError> {
        let record = record.into_record();
        let changes = record.payload.to_json().map_err(|e| {
            RepositoryError::DataCorruption(format!("cannot encode history payload: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO history
                (id, "timestamp", entity_type, entity_id, batch_id, user_id, changes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.timestamp)
        .bind(record.entity_type())
        .bind(&record.entity_id)
        .bind(&record.batch_id)
        .bind(record.user_id.map(|id| id.as_i32()))
        .bind(changes)
        .execute(conn)
        .await
        .map_err(|e| super::conflict_on_unique(e, "history record id already exists"))?;

        Ok(record)
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn insert_one(&self, record: NewHistoryRecord) -> Result<HistoryRecord, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut *conn, record).await
    }

    async fn insert_many(
        &self,
        records: Vec<NewHistoryRecord>,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut written = Vec::with_capacity(records.len());
        for record in records {
            // Dropping `tx` on error rolls the whole batch back.
            written.push(Self::insert(&mut *tx, record).await?);
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"{SELECT_COLUMNS}
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY "timestamp" DESC, seq DESC"#
        ))
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        decode_rows(rows)
    }

    async fn find_by_batch(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"{SELECT_COLUMNS}
            WHERE batch_id = $1
            ORDER BY "timestamp" ASC, seq ASC"#
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        decode_rows(rows)
    }

    async fn list_recent(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            r#"{SELECT_COLUMNS}
            ORDER BY "timestamp" DESC, seq DESC
            LIMIT $1 OFFSET $2"#
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        decode_rows(rows)
    }

    async fn list_distinct_batches(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<BatchPage, RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT batch_id) FROM history")
            .fetch_one(&self.pool)
            .await?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT batch_id, MIN("timestamp") AS earliest_timestamp
            FROM history
            GROUP BY batch_id
            ORDER BY earliest_timestamp DESC, batch_id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(BatchPage {
            batches: rows
                .into_iter()
                .map(|row| BatchRef {
                    batch_id: BatchId::new(row.batch_id),
                    earliest_timestamp: row.earliest_timestamp,
                })
                .collect(),
            total_batches: u64::try_from(total).unwrap_or_default(),
        })
    }
}
