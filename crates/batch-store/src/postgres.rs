use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Amount, BatchId, Currency};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Batch, BatchFilter, BatchPage, BatchStatus, Result, SortOrder, StoreError,
    store::{BatchStore, Write},
};

const COLUMNS: &str =
    "id, user_id, currency, amount, transaction_ids, status, created_at, updated_at, settled_at";

/// Name of the partial unique index allowing one open batch per user and currency.
const ONE_OPEN_BATCH_INDEX: &str = "batches_one_open_per_user_currency";

const CHECK_VIOLATION: &str = "23514";

/// SQLSTATE class of invalid values such as numeric overflow.
const DATA_EXCEPTION_CLASS: &str = "22";

/// PostgreSQL-backed batch store implementation.
///
/// [`BatchStore::atomically`] runs inside a database transaction and locks
/// the selected row `FOR UPDATE`. Concurrent inserts of an open batch for the
/// same user and currency are caught by a partial unique index.
#[derive(Clone)]
pub struct PostgresBatchStore {
    pool: PgPool,
}

impl PostgresBatchStore {
    /// Creates a new PostgreSQL batch store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations, creating the table and its indexes.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_batch(row: PgRow) -> Result<Batch> {
        let currency: String = row.try_get("currency")?;
        let status: String = row.try_get("status")?;

        Ok(Batch {
            id: BatchId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: row.try_get("user_id")?,
            currency: Currency::from_code(&currency)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            amount: Amount::from_decimal(row.try_get::<Decimal, _>("amount")?),
            transaction_ids: row.try_get("transaction_ids")?,
            status: status
                .parse::<BatchStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            settled_at: row.try_get::<Option<DateTime<Utc>>, _>("settled_at")?,
        })
    }

    async fn select(
        conn: &mut PgConnection,
        filter: &BatchFilter,
        lock: bool,
    ) -> Result<Option<Batch>> {
        let lock_clause = if lock { " FOR UPDATE" } else { "" };

        let row = match filter {
            BatchFilter::Accumulation {
                user_id,
                currency,
                transaction_id,
            } => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM batches \
                     WHERE user_id = $1 AND currency = $2 \
                       AND (status = 'open' OR $3 = ANY(transaction_ids)) \
                     ORDER BY ($3 = ANY(transaction_ids)) DESC \
                     LIMIT 1{lock_clause}"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(currency.as_str())
                    .bind(transaction_id)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            BatchFilter::Open { user_id, currency } => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM batches \
                     WHERE user_id = $1 AND currency = $2 AND status = 'open' \
                     LIMIT 1{lock_clause}"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(currency.as_str())
                    .fetch_optional(&mut *conn)
                    .await?
            }
            BatchFilter::IdAndStatus { id, status } => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM batches WHERE id = $1 AND status = $2{lock_clause}"
                );
                sqlx::query(&sql)
                    .bind(id.as_uuid())
                    .bind(status.as_str())
                    .fetch_optional(&mut *conn)
                    .await?
            }
        };

        row.map(Self::row_to_batch).transpose()
    }

    async fn insert(conn: &mut PgConnection, batch: &Batch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (id, user_id, currency, amount, transaction_ids, status, created_at, updated_at, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(batch.id.as_uuid())
        .bind(&batch.user_id)
        .bind(batch.currency.as_str())
        .bind(batch.amount.as_decimal())
        .bind(&batch.transaction_ids)
        .bind(batch.status.as_str())
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .bind(batch.settled_at)
        .execute(&mut *conn)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn update(conn: &mut PgConnection, batch: &Batch) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET amount = $2, transaction_ids = $3, status = $4, updated_at = $5, settled_at = $6
            WHERE id = $1
            "#,
        )
        .bind(batch.id.as_uuid())
        .bind(batch.amount.as_decimal())
        .bind(&batch.transaction_ids)
        .bind(batch.status.as_str())
        .bind(batch.updated_at)
        .bind(batch.settled_at)
        .execute(&mut *conn)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!("batch {} vanished", batch.id)));
        }
        Ok(())
    }
}

/// Maps unique violations, serialization failures and deadlocks to a retryable conflict.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        let code = db_err.code();
        let code = code.as_deref();
        if db_err.constraint() == Some(ONE_OPEN_BATCH_INDEX)
            || code == Some("40001")
            || code == Some("40P01")
        {
            return StoreError::Conflict(db_err.message().to_string());
        }
        if code == Some(CHECK_VIOLATION)
            || code.is_some_and(|c| c.starts_with(DATA_EXCEPTION_CLASS))
        {
            return StoreError::Rejected(db_err.message().to_string());
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl BatchStore for PostgresBatchStore {
    async fn atomically<T, E, F>(&self, filter: &BatchFilter, transition: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(Option<Batch>) -> std::result::Result<(Write, T), E> + Send,
    {
        // Rolled back on drop unless committed.
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let matched = Self::select(&mut tx, filter, true).await?;
        let matched_id = matched.as_ref().map(|b| b.id);

        let (write, output) = transition(matched)?;

        match write {
            Write::Put(batch) => {
                if matched_id.is_some() {
                    Self::update(&mut tx, &batch).await?;
                } else {
                    Self::insert(&mut tx, &batch).await?;
                }
                tx.commit().await.map_err(map_write_error)?;
                tracing::debug!(batch_id = %batch.id, status = %batch.status, "batch written");
            }
            Write::Skip => {
                tx.rollback().await.map_err(StoreError::from)?;
            }
        }

        Ok(output)
    }

    async fn find(&self, filter: &BatchFilter) -> Result<Option<Batch>> {
        let mut conn = self.pool.acquire().await?;
        Self::select(&mut conn, filter, false).await
    }

    async fn get(&self, id: BatchId) -> Result<Option<Batch>> {
        let sql = format!("SELECT {COLUMNS} FROM batches WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_batch).transpose()
    }

    async fn paginate(&self, page: BatchPage) -> Result<Vec<Batch>> {
        let direction = match page.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        // Values past i64 select everything there is.
        let limit = i64::try_from(page.limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);

        let rows = if let Some(status) = page.status {
            let sql = format!(
                "SELECT {COLUMNS} FROM batches WHERE status = $1 \
                 ORDER BY created_at {direction} LIMIT $2 OFFSET $3"
            );
            sqlx::query(&sql)
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        } else {
            let sql = format!(
                "SELECT {COLUMNS} FROM batches ORDER BY created_at {direction} LIMIT $1 OFFSET $2"
            );
            sqlx::query(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
        };

        rows.into_iter().map(Self::row_to_batch).collect()
    }
}
