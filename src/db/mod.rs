use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::checkpoint::CheckpointStore;
use crate::ledger::{normalize_address, BridgeLedger};
use crate::types::{BridgeStatus, Chain, IdempotencyKey};

pub mod models;

pub use models::*;

/// Columns of `bridge_transactions` with NUMERIC fields cast to text
const BRIDGE_TX_COLUMNS: &str = r#"
    id, source_chain, dest_chain, kind, user_address, amount::TEXT AS amount,
    source_tx_hash, log_index, block_number, dest_tx_hash, nonce::TEXT AS nonce,
    status, attempts, error_message, claim_tx_hash, created_at, updated_at
"#;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

// ============================================================================
// Checkpoints
// ============================================================================

/// Get the last processed block for a chain
pub async fn get_checkpoint(pool: &PgPool, chain: Chain) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as(r#"SELECT last_processed_block FROM chain_checkpoints WHERE chain = $1"#)
            .bind(chain)
            .fetch_optional(pool)
            .await
            .wrap_err_with(|| format!("Failed to get checkpoint for {}", chain))?;

    Ok(row.map(|r| r.0))
}

/// Create the checkpoint row if absent and return the stored value
pub async fn init_checkpoint(pool: &PgPool, chain: Chain, initial: i64) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO chain_checkpoints (chain, last_processed_block)
        VALUES ($1, $2)
        ON CONFLICT (chain) DO NOTHING
        "#,
    )
    .bind(chain)
    .bind(initial)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to seed checkpoint for {}", chain))?;

    get_checkpoint(pool, chain)
        .await?
        .ok_or_else(|| eyre::eyre!("Checkpoint for {} missing after seeding", chain))
}

/// Advance the checkpoint; a single statement so concurrent writers never
/// move it backwards. Returns whether the row changed.
pub async fn advance_checkpoint(pool: &PgPool, chain: Chain, block: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO chain_checkpoints (chain, last_processed_block)
        VALUES ($1, $2)
        ON CONFLICT (chain) DO UPDATE
            SET last_processed_block = EXCLUDED.last_processed_block, updated_at = NOW()
            WHERE chain_checkpoints.last_processed_block < EXCLUDED.last_processed_block
        "#,
    )
    .bind(chain)
    .bind(block)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to advance checkpoint for {} to {}", chain, block))?;

    Ok(result.rows_affected() > 0)
}

/// All checkpoints, logged on startup
pub async fn list_checkpoints(pool: &PgPool) -> Result<Vec<ChainCheckpoint>> {
    sqlx::query_as::<_, ChainCheckpoint>(
        r#"SELECT chain, last_processed_block, updated_at FROM chain_checkpoints ORDER BY chain"#,
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list checkpoints")
}

// ============================================================================
// Bridge transactions
// ============================================================================

/// Find a bridge transaction by its idempotency key
pub async fn find_bridge_tx(
    pool: &PgPool,
    key: &IdempotencyKey,
) -> Result<Option<BridgeTransaction>> {
    let sql = format!(
        "SELECT {} FROM bridge_transactions \
         WHERE source_chain = $1 AND source_tx_hash = $2 AND log_index = $3",
        BRIDGE_TX_COLUMNS
    );
    sqlx::query_as::<_, BridgeTransaction>(&sql)
        .bind(key.source_chain)
        .bind(&key.source_tx_hash)
        .bind(key.log_index)
        .fetch_optional(pool)
        .await
        .wrap_err_with(|| format!("Failed to look up bridge transaction {}", key))
}

pub async fn get_bridge_tx(pool: &PgPool, id: i64) -> Result<Option<BridgeTransaction>> {
    let sql = format!("SELECT {} FROM bridge_transactions WHERE id = $1", BRIDGE_TX_COLUMNS);
    sqlx::query_as::<_, BridgeTransaction>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .wrap_err_with(|| format!("Failed to get bridge transaction {}", id))
}

/// Insert a new row as `initiated`, or re-open an existing non-relayed one.
pub async fn open_bridge_tx_attempt(
    pool: &PgPool,
    tx: &NewBridgeTransaction,
) -> Result<OpenAttempt> {
    // ON CONFLICT ... WHERE leaves relayed rows untouched; RETURNING then
    // yields nothing and we report the existing row.
    let sql = format!(
        r#"
        INSERT INTO bridge_transactions (source_chain, dest_chain, kind, user_address, amount,
            source_tx_hash, log_index, block_number, nonce, status, attempts)
        VALUES ($1, $2, $3, $4, $5::NUMERIC, $6, $7, $8, $9::NUMERIC, 'initiated', 1)
        ON CONFLICT (source_chain, source_tx_hash, log_index) DO UPDATE SET
            status = 'initiated',
            attempts = bridge_transactions.attempts + 1,
            error_message = NULL,
            updated_at = NOW()
        WHERE bridge_transactions.status <> 'relayed'
        RETURNING {}
        "#,
        BRIDGE_TX_COLUMNS
    );

    let opened = sqlx::query_as::<_, BridgeTransaction>(&sql)
        .bind(tx.source_chain)
        .bind(tx.dest_chain)
        .bind(tx.kind)
        .bind(&tx.user_address)
        .bind(&tx.amount)
        .bind(&tx.source_tx_hash)
        .bind(tx.log_index)
        .bind(tx.block_number)
        .bind(&tx.nonce)
        .fetch_optional(pool)
        .await
        .wrap_err_with(|| format!("Failed to open relay attempt for {}", tx.key()))?;

    match opened {
        Some(row) => Ok(OpenAttempt::Opened(row)),
        None => {
            let existing = find_bridge_tx(pool, &tx.key())
                .await?
                .ok_or_else(|| eyre::eyre!("Bridge transaction {} vanished", tx.key()))?;
            Ok(OpenAttempt::AlreadyRelayed(existing))
        }
    }
}

pub async fn update_bridge_tx_relayed(
    pool: &PgPool,
    id: i64,
    dest_tx_hash: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE bridge_transactions
        SET status = 'relayed', dest_tx_hash = COALESCE($2, dest_tx_hash),
            error_message = NULL, updated_at = NOW()
        WHERE id = $1 AND status <> 'relayed'
        "#,
    )
    .bind(id)
    .bind(dest_tx_hash)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to mark bridge transaction {} relayed", id))?;

    Ok(())
}

pub async fn update_bridge_tx_failed(pool: &PgPool, id: i64, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE bridge_transactions
        SET status = 'failed', error_message = $2, updated_at = NOW()
        WHERE id = $1 AND status <> 'relayed'
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to mark bridge transaction {} failed", id))?;

    Ok(())
}

pub async fn requeue_bridge_tx(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE bridge_transactions
        SET status = 'initiated', attempts = 0, error_message = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'failed'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to requeue bridge transaction {}", id))?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_stale_initiated(
    pool: &PgPool,
    chain: Chain,
    older_than: Duration,
) -> Result<Vec<BridgeTransaction>> {
    let sql = format!(
        r#"
        SELECT {} FROM bridge_transactions
        WHERE source_chain = $1 AND status = 'initiated'
          AND (attempts = 0 OR updated_at < NOW() - make_interval(secs => $2))
        ORDER BY block_number ASC, log_index ASC
        LIMIT 100
        "#,
        BRIDGE_TX_COLUMNS
    );
    sqlx::query_as::<_, BridgeTransaction>(&sql)
        .bind(chain)
        .bind(older_than.as_secs_f64())
        .fetch_all(pool)
        .await
        .wrap_err_with(|| format!("Failed to get stale initiated rows for {}", chain))
}

pub async fn get_unclaimed_for_user(pool: &PgPool, user: &str) -> Result<PendingSummary> {
    let sql = format!(
        r#"
        SELECT {} FROM bridge_transactions
        WHERE user_address = $1 AND claim_tx_hash IS NULL
        ORDER BY created_at DESC, id DESC
        "#,
        BRIDGE_TX_COLUMNS
    );
    let transactions = sqlx::query_as::<_, BridgeTransaction>(&sql)
        .bind(user)
        .fetch_all(pool)
        .await
        .wrap_err_with(|| format!("Failed to get pending rows for {}", user))?;

    let (claimable_amount,): (String,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(amount), 0)::TEXT FROM bridge_transactions
        WHERE user_address = $1 AND claim_tx_hash IS NULL AND status = 'relayed'
        "#,
    )
    .bind(user)
    .fetch_one(pool)
    .await
    .wrap_err_with(|| format!("Failed to sum claimable amount for {}", user))?;

    Ok(PendingSummary {
        claimable_amount,
        transactions,
    })
}

pub async fn get_history_for_user(pool: &PgPool, user: &str) -> Result<Vec<BridgeTransaction>> {
    let sql = format!(
        "SELECT {} FROM bridge_transactions WHERE user_address = $1 \
         ORDER BY created_at DESC, id DESC",
        BRIDGE_TX_COLUMNS
    );
    sqlx::query_as::<_, BridgeTransaction>(&sql)
        .bind(user)
        .fetch_all(pool)
        .await
        .wrap_err_with(|| format!("Failed to get history for {}", user))
}

pub async fn update_claim(
    pool: &PgPool,
    user: &str,
    ids: &[i64],
    claim_tx_hash: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE bridge_transactions
        SET claim_tx_hash = $3, updated_at = NOW()
        WHERE user_address = $1 AND id = ANY($2)
          AND status = 'relayed' AND claim_tx_hash IS NULL
        "#,
    )
    .bind(user)
    .bind(ids)
    .bind(claim_tx_hash)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to record claim {} for {}", claim_tx_hash, user))?;

    Ok(result.rows_affected())
}

pub async fn count_bridge_txs_by_status(pool: &PgPool) -> Result<StatusCounts> {
    let rows: Vec<(BridgeStatus, i64)> = sqlx::query_as(
        r#"SELECT status, COUNT(*) FROM bridge_transactions GROUP BY status"#,
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to count bridge transactions")?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        match status {
            BridgeStatus::Initiated => counts.initiated = count,
            BridgeStatus::Relayed => counts.relayed = count,
            BridgeStatus::Failed => counts.failed = count,
        }
    }
    Ok(counts)
}

// ============================================================================
// Store handle
// ============================================================================

/// Postgres-backed checkpoint store and ledger
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_block(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_db_block(block: u64) -> Result<i64> {
    i64::try_from(block).map_err(|_| eyre::eyre!("Block number {} out of range", block))
}

#[async_trait]
impl CheckpointStore for PgStore {
    async fn get(&self, chain: Chain) -> Result<Option<u64>> {
        Ok(get_checkpoint(&self.pool, chain).await?.map(to_block))
    }

    async fn get_or_init(&self, chain: Chain, initial: u64) -> Result<u64> {
        let stored = init_checkpoint(&self.pool, chain, to_db_block(initial)?).await?;
        Ok(to_block(stored))
    }

    async fn advance(&self, chain: Chain, block: u64) -> Result<bool> {
        advance_checkpoint(&self.pool, chain, to_db_block(block)?).await
    }
}

#[async_trait]
impl BridgeLedger for PgStore {
    async fn find(&self, key: &IdempotencyKey) -> Result<Option<BridgeTransaction>> {
        find_bridge_tx(&self.pool, key).await
    }

    async fn get(&self, id: i64) -> Result<Option<BridgeTransaction>> {
        get_bridge_tx(&self.pool, id).await
    }

    async fn open_attempt(&self, tx: &NewBridgeTransaction) -> Result<OpenAttempt> {
        open_bridge_tx_attempt(&self.pool, tx).await
    }

    async fn mark_relayed(&self, id: i64, dest_tx_hash: Option<&str>) -> Result<()> {
        update_bridge_tx_relayed(&self.pool, id, dest_tx_hash).await
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        update_bridge_tx_failed(&self.pool, id, error).await
    }

    async fn requeue(&self, id: i64) -> Result<bool> {
        requeue_bridge_tx(&self.pool, id).await
    }

    async fn stale_initiated(
        &self,
        chain: Chain,
        older_than: Duration,
    ) -> Result<Vec<BridgeTransaction>> {
        get_stale_initiated(&self.pool, chain, older_than).await
    }

    async fn pending_for_user(&self, user: &str) -> Result<PendingSummary> {
        get_unclaimed_for_user(&self.pool, &normalize_address(user)).await
    }

    async fn history_for_user(&self, user: &str) -> Result<Vec<BridgeTransaction>> {
        get_history_for_user(&self.pool, &normalize_address(user)).await
    }

    async fn record_claim(&self, user: &str, ids: &[i64], claim_tx_hash: &str) -> Result<u64> {
        update_claim(
            &self.pool,
            &normalize_address(user),
            ids,
            &claim_tx_hash.to_lowercase(),
        )
        .await
    }

    async fn count_by_status(&self) -> Result<StatusCounts> {
        count_bridge_txs_by_status(&self.pool).await
    }
}
