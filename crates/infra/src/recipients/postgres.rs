//! Postgres-backed recipient store.
//!
//! ## Claiming
//!
//! `claim_one_pending` opens a transaction and selects one claimable row with
//! `FOR UPDATE SKIP LOCKED`. The row lock lives as long as the returned
//! [`PostgresClaim`], so concurrent batch runs (in this process or another
//! worker) each get a different row. The claim either commits the terminal
//! status or is rolled back; dropping it uncommitted rolls back as well.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `DuplicateWallet` (register only) |
//! | Database (other) | any | `Storage` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Connection` |
//! | Other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{field, instrument, warn, Span};

use airdrop_core::{
    AirdropStatistics, AirdropStatus, MintOutcome, Recipient, RecipientId, RecordStatus,
    WalletAddress,
};

use super::schema;
use super::{RecipientClaim, RecipientStore, StoreConnector, StoreError};

const RECIPIENT_COLUMNS: &str =
    "id, wallet, tx_hash, airdrop_status, record_status, created_at, updated_at";

/// Recipient store over a shared sqlx pool.
#[derive(Debug, Clone)]
pub struct PostgresRecipientStore {
    pool: Arc<PgPool>,
}

impl PostgresRecipientStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecipientStore for PostgresRecipientStore {
    type Claim = PostgresClaim;

    #[instrument(skip(self, wallet), fields(wallet = %wallet), err)]
    async fn register(&self, wallet: WalletAddress) -> Result<Recipient, StoreError> {
        let recipient = Recipient::register(wallet, Utc::now());

        let sql = format!(
            r#"
            INSERT INTO airdrop_recipients (
                id, wallet, tx_hash, airdrop_status, record_status, created_at, updated_at
            )
            VALUES ($1, $2, NULL, $3, $4, $5, $5)
            RETURNING {RECIPIENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(recipient.id.as_uuid())
            .bind(recipient.wallet.as_str())
            .bind(recipient.airdrop_status.code())
            .bind(recipient.record_status.code())
            .bind(recipient.created_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateWallet(recipient.wallet.to_string())
                } else {
                    map_sqlx_error("register", e)
                }
            })?;

        decode_recipient(&row)
    }

    #[instrument(skip(self, id), fields(recipient_id = %id), err)]
    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>, StoreError> {
        let sql = format!("SELECT {RECIPIENT_COLUMNS} FROM airdrop_recipients WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .map(|row| decode_recipient(&row))
            .transpose()
    }

    #[instrument(skip(self, wallet), fields(wallet = %wallet), err)]
    async fn find_by_wallet(
        &self,
        wallet: &WalletAddress,
    ) -> Result<Option<Recipient>, StoreError> {
        let sql = format!("SELECT {RECIPIENT_COLUMNS} FROM airdrop_recipients WHERE wallet = $1");
        sqlx::query(&sql)
            .bind(wallet.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_wallet", e))?
            .map(|row| decode_recipient(&row))
            .transpose()
    }

    #[instrument(skip(self, id), fields(recipient_id = %id), err)]
    async fn deactivate(&self, id: RecipientId) -> Result<Recipient, StoreError> {
        let sql = format!(
            r#"
            UPDATE airdrop_recipients
            SET record_status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {RECIPIENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(RecordStatus::Inactive.code())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("deactivate", e))?
            .ok_or(StoreError::NotFound(id))?;

        decode_recipient(&row)
    }

    #[instrument(
        skip(self, exclude),
        fields(excluded = exclude.len(), recipient_id = field::Empty),
        err
    )]
    async fn claim_one_pending(
        &self,
        exclude: &[RecipientId],
    ) -> Result<Option<PostgresClaim>, StoreError> {
        let excluded: Vec<uuid::Uuid> = exclude.iter().map(|id| *id.as_uuid()).collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!(
            r#"
            SELECT {RECIPIENT_COLUMNS}
            FROM airdrop_recipients
            WHERE airdrop_status = $1
                AND record_status = $2
                AND NOT (id = ANY($3))
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        );
        let row = sqlx::query(&sql)
            .bind(AirdropStatus::Pending.code())
            .bind(RecordStatus::Active.code())
            .bind(excluded)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_one_pending", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };

        let recipient = decode_recipient(&row)?;
        Span::current().record("recipient_id", field::display(recipient.id));
        Ok(Some(PostgresClaim { tx, recipient }))
    }

    #[instrument(skip(self), fields(confirmed = field::Empty), err)]
    async fn confirm_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE airdrop_recipients
            SET airdrop_status = $1, updated_at = NOW()
            WHERE airdrop_status = $2 AND record_status = $3
            "#,
        )
        .bind(AirdropStatus::Pending.code())
        .bind(AirdropStatus::Unconfirmed.code())
        .bind(RecordStatus::Active.code())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("confirm_all", e))?;

        let confirmed = result.rows_affected();
        Span::current().record("confirmed", confirmed);
        Ok(confirmed)
    }

    #[instrument(skip(self), err)]
    async fn statistics(&self) -> Result<AirdropStatistics, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE airdrop_status = $1) AS unconfirmed,
                COUNT(*) FILTER (WHERE airdrop_status = $2) AS pending,
                COUNT(*) FILTER (WHERE airdrop_status = $3) AS completed,
                COUNT(*) FILTER (WHERE airdrop_status = $4) AS error
            FROM airdrop_recipients
            "#,
        )
        .bind(AirdropStatus::Unconfirmed.code())
        .bind(AirdropStatus::Pending.code())
        .bind(AirdropStatus::Completed.code())
        .bind(AirdropStatus::Error.code())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("statistics", e))?;

        StatisticsRow::from_row(&row)
            .map(Into::into)
            .map_err(|e| StoreError::Storage(format!("failed to decode statistics row: {e}")))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// A row locked by an open transaction.
pub struct PostgresClaim {
    tx: Transaction<'static, Postgres>,
    recipient: Recipient,
}

impl std::fmt::Debug for PostgresClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresClaim")
            .field("recipient", &self.recipient)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RecipientClaim for PostgresClaim {
    fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    #[instrument(
        skip(self, outcome),
        fields(recipient_id = field::Empty, status = ?outcome.status()),
        err
    )]
    async fn record_outcome(self, outcome: &MintOutcome) -> Result<Recipient, StoreError> {
        let PostgresClaim { mut tx, recipient } = self;
        Span::current().record("recipient_id", field::display(recipient.id));

        let mut updated = recipient.clone();
        if let Err(err) = updated.apply_outcome(outcome, Utc::now()) {
            rollback_quietly(tx).await;
            return Err(err.into());
        }

        let sql = format!(
            r#"
            UPDATE airdrop_recipients
            SET airdrop_status = $2, tx_hash = $3, updated_at = $4
            WHERE id = $1 AND airdrop_status = $5
            RETURNING {RECIPIENT_COLUMNS}
            "#
        );
        let written = sqlx::query(&sql)
            .bind(updated.id.as_uuid())
            .bind(updated.airdrop_status.code())
            .bind(updated.tx_hash.as_deref())
            .bind(updated.updated_at)
            .bind(AirdropStatus::Pending.code())
            .fetch_optional(&mut *tx)
            .await;

        let row = match written {
            Ok(Some(row)) => row,
            Ok(None) => {
                rollback_quietly(tx).await;
                return Err(StoreError::Storage(format!(
                    "recipient {} is no longer pending",
                    recipient.id
                )));
            }
            Err(e) => {
                rollback_quietly(tx).await;
                return Err(map_sqlx_error("record_outcome", e));
            }
        };

        let stored = decode_recipient(&row)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(stored)
    }

    #[instrument(skip(self), fields(recipient_id = field::Empty), err)]
    async fn release(self) -> Result<(), StoreError> {
        Span::current().record("recipient_id", field::display(self.recipient.id));
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn rollback_quietly(tx: Transaction<'static, Postgres>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rollback failed; connection will be discarded");
    }
}

/// Opens a [`PostgresRecipientStore`] on demand.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    database_url: String,
    max_connections: u32,
    apply_schema: bool,
}

impl PostgresConnector {
    pub fn new(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections,
            apply_schema: true,
        }
    }

    /// Skip `ensure_schema` on connect (schema managed elsewhere).
    pub fn without_schema(mut self) -> Self {
        self.apply_schema = false;
        self
    }
}

#[async_trait]
impl StoreConnector for PostgresConnector {
    type Store = PostgresRecipientStore;

    #[instrument(skip(self), err)]
    async fn connect(&self) -> Result<PostgresRecipientStore, StoreError> {
        let store =
            PostgresRecipientStore::connect(&self.database_url, self.max_connections).await?;
        if self.apply_schema {
            if let Err(e) = schema::ensure_schema(store.pool()).await {
                store.close().await;
                return Err(e);
            }
        }
        Ok(store)
    }
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Connection(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Connection(format!("timed out acquiring connection in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Connection(format!("tls error in {operation}: {e}")),
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn decode_recipient(row: &PgRow) -> Result<Recipient, StoreError> {
    RecipientRow::from_row(row)
        .map_err(|e| StoreError::Storage(format!("failed to decode recipient row: {e}")))?
        .try_into()
}

// SQLx row types

#[derive(Debug)]
struct RecipientRow {
    id: uuid::Uuid,
    wallet: String,
    tx_hash: Option<String>,
    airdrop_status: i16,
    record_status: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RecipientRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RecipientRow {
            id: row.try_get("id")?,
            wallet: row.try_get("wallet")?,
            tx_hash: row.try_get("tx_hash")?,
            airdrop_status: row.try_get("airdrop_status")?,
            record_status: row.try_get("record_status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<RecipientRow> for Recipient {
    type Error = StoreError;

    fn try_from(row: RecipientRow) -> Result<Self, Self::Error> {
        Ok(Recipient {
            id: RecipientId::from_uuid(row.id),
            wallet: WalletAddress::parse(row.wallet)?,
            tx_hash: row.tx_hash,
            airdrop_status: AirdropStatus::from_code(row.airdrop_status)?,
            record_status: RecordStatus::from_code(row.record_status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct StatisticsRow {
    total: i64,
    unconfirmed: i64,
    pending: i64,
    completed: i64,
    error: i64,
}

impl<'r> FromRow<'r, PgRow> for StatisticsRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StatisticsRow {
            total: row.try_get("total")?,
            unconfirmed: row.try_get("unconfirmed")?,
            pending: row.try_get("pending")?,
            completed: row.try_get("completed")?,
            error: row.try_get("error")?,
        })
    }
}

impl From<StatisticsRow> for AirdropStatistics {
    fn from(row: StatisticsRow) -> Self {
        AirdropStatistics {
            total: row.total as u64,
            unconfirmed: row.unconfirmed as u64,
            pending: row.pending as u64,
            completed: row.completed as u64,
            error: row.error as u64,
        }
    }
}
