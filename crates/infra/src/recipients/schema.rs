//! Postgres schema for the recipient table.
//!
//! Statements are idempotent and applied in order. There is no version table;
//! a change to an existing column needs a hand-written migration.

use sqlx::PgPool;
use tracing::{debug, instrument};

use super::postgres::map_sqlx_error;
use super::StoreError;

/// Advisory lock key serializing concurrent `ensure_schema` calls.
const SCHEMA_LOCK_KEY: i64 = 0x6169_7264_726f_7031;

/// DDL for the recipient table, in application order.
pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS airdrop_recipients (
        id UUID PRIMARY KEY,
        wallet VARCHAR(80) NOT NULL,
        tx_hash TEXT NULL,
        airdrop_status SMALLINT NOT NULL DEFAULT 1,
        record_status SMALLINT NOT NULL DEFAULT 5,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT airdrop_recipients_airdrop_status_chk
            CHECK (airdrop_status IN (1, 2, 3, 4)),
        CONSTRAINT airdrop_recipients_record_status_chk
            CHECK (record_status IN (3, 5)),
        CONSTRAINT airdrop_recipients_tx_hash_chk
            CHECK ((airdrop_status = 3) = (tx_hash IS NOT NULL))
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS airdrop_recipients_wallet_uidx
        ON airdrop_recipients (wallet)
    "#,
    // Keeps the claim query an index scan once most rows are terminal.
    r#"
    CREATE INDEX IF NOT EXISTS airdrop_recipients_claimable_idx
        ON airdrop_recipients (id)
        WHERE airdrop_status = 2 AND record_status = 5
    "#,
];

/// Apply [`MIGRATIONS`] inside one transaction.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("begin_transaction", e))?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("schema_lock", e))?;

    for (idx, statement) in MIGRATIONS.iter().enumerate() {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        debug!(statement = idx, "schema statement applied");
    }

    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))?;
    Ok(())
}
