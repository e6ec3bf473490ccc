//! PostgreSQL raffle store for multi-instance deployments.
//!
//! Each aggregate is one row in `raffles` carrying the version counter, plus
//! its rows in `raffle_entries` and `consumed_proofs`. A commit locks the
//! raffle row with `SELECT ... FOR UPDATE`, so concurrent commits against one
//! raffle serialize on that lock. `consumed_proofs.proof` is the primary key,
//! which keeps a proof single-use across raffles even when two commits on
//! different raffles race.

use std::time::Duration;

use async_trait::async_trait;
use raffle_types::{Entry, EntryId, Raffle, RaffleId, TxSignature};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{AggregateCommit, ClaimCursor, RaffleAggregate};
use crate::error::{StoreError, StoreResult};
use crate::traits::RaffleStore;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS raffles (
        id UUID PRIMARY KEY,
        version BIGINT NOT NULL DEFAULT 0,
        body JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS raffle_entries (
        id UUID PRIMARY KEY,
        raffle_id UUID NOT NULL REFERENCES raffles (id),
        seq BIGSERIAL,
        status TEXT NOT NULL,
        has_proof BOOLEAN NOT NULL,
        claimed_since TIMESTAMPTZ NOT NULL,
        body JSONB NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS raffle_entries_by_raffle
        ON raffle_entries (raffle_id, seq)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS raffle_entries_pending_claims
        ON raffle_entries (claimed_since, id)
        WHERE status = 'pending' AND has_proof
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consumed_proofs (
        proof TEXT PRIMARY KEY,
        raffle_id UUID NOT NULL REFERENCES raffles (id),
        entry_id UUID NOT NULL REFERENCES raffle_entries (id)
    )
    "#,
];

fn to_version(raw: i64) -> StoreResult<u64> {
    u64::try_from(raw).map_err(|_| StoreError::Backend(format!("negative version {raw}")))
}

fn to_proof(raw: &str) -> StoreResult<TxSignature> {
    TxSignature::parse(raw).map_err(|e| StoreError::Backend(format!("stored proof: {e}")))
}

/// A [`RaffleStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgRaffleStore {
    pool: PgPool,
}

impl PgRaffleStore {
    /// Open a pool and make sure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(max_connections, "postgres raffle store ready");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Lock the raffle row and return its version.
    async fn lock_raffle(
        tx: &mut Transaction<'_, Postgres>,
        raffle: &RaffleId,
    ) -> StoreResult<u64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM raffles WHERE id = $1 FOR UPDATE")
                .bind(raffle.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
        to_version(version.ok_or(StoreError::RaffleNotFound(*raffle))?)
    }

    async fn bump_version(
        tx: &mut Transaction<'_, Postgres>,
        raffle: &RaffleId,
    ) -> StoreResult<u64> {
        let version: i64 = sqlx::query_scalar(
            "UPDATE raffles SET version = version + 1 WHERE id = $1 RETURNING version",
        )
        .bind(raffle.as_uuid())
        .fetch_one(&mut **tx)
        .await?;
        to_version(version)
    }

    /// Fail unless `entry` exists and belongs to `raffle`.
    async fn check_owned(
        tx: &mut Transaction<'_, Postgres>,
        raffle: &RaffleId,
        entry: &EntryId,
    ) -> StoreResult<()> {
        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT raffle_id FROM raffle_entries WHERE id = $1")
                .bind(entry.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
        match owner {
            Some(owner) if owner == *raffle.as_uuid() => Ok(()),
            Some(_) => Err(StoreError::ForeignEntry {
                entry: *entry,
                raffle: *raffle,
            }),
            None => Err(StoreError::EntryNotFound(*entry)),
        }
    }

    async fn consumed_by(
        tx: &mut Transaction<'_, Postgres>,
        proof: &TxSignature,
    ) -> StoreResult<Option<EntryId>> {
        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT entry_id FROM consumed_proofs WHERE proof = $1")
                .bind(proof.as_str())
                .fetch_optional(&mut **tx)
                .await?;
        Ok(owner.map(EntryId::from_uuid))
    }
}

#[async_trait]
impl RaffleStore for PgRaffleStore {
    async fn insert_raffle(&self, raffle: &Raffle) -> StoreResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO raffles (id, version, body)
            VALUES ($1, 0, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(raffle.id.as_uuid())
        .bind(Json(raffle))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::RaffleExists(raffle.id));
        }
        Ok(())
    }

    async fn insert_entry(&self, entry: &Entry) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_raffle(&mut tx, &entry.raffle_id).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO raffle_entries (id, raffle_id, status, has_proof, claimed_since, body)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.raffle_id.as_uuid())
        .bind(entry.status.to_string())
        .bind(entry.proof.is_some())
        .bind(entry.claimed_since())
        .bind(Json(entry))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::EntryExists(entry.id));
        }

        Self::bump_version(&mut tx, &entry.raffle_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn raffle(&self, id: &RaffleId) -> StoreResult<Option<Raffle>> {
        let row: Option<Json<Raffle>> = sqlx::query_scalar("SELECT body FROM raffles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|Json(raffle)| raffle))
    }

    async fn entry(&self, id: &EntryId) -> StoreResult<Option<Entry>> {
        let row: Option<Json<Entry>> =
            sqlx::query_scalar("SELECT body FROM raffle_entries WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(entry)| entry))
    }

    async fn entries(&self, raffle: &RaffleId) -> StoreResult<Vec<Entry>> {
        self.snapshot(raffle)
            .await?
            .map(|aggregate| aggregate.entries)
            .ok_or(StoreError::RaffleNotFound(*raffle))
    }

    async fn snapshot(&self, raffle: &RaffleId) -> StoreResult<Option<RaffleAggregate>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let row: Option<(Json<Raffle>, i64)> =
            sqlx::query_as("SELECT body, version FROM raffles WHERE id = $1")
                .bind(raffle.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        let Some((Json(body), version)) = row else {
            return Ok(None);
        };

        let entries: Vec<Json<Entry>> = sqlx::query_scalar(
            "SELECT body FROM raffle_entries WHERE raffle_id = $1 ORDER BY seq",
        )
        .bind(raffle.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let consumed: Vec<(String, Uuid)> =
            sqlx::query_as("SELECT proof, entry_id FROM consumed_proofs WHERE raffle_id = $1")
                .bind(raffle.as_uuid())
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        let mut aggregate = RaffleAggregate::new(body);
        aggregate.version = to_version(version)?;
        aggregate.entries = entries.into_iter().map(|Json(e)| e).collect();
        for (proof, entry) in consumed {
            aggregate
                .consumed
                .insert(to_proof(&proof)?, EntryId::from_uuid(entry));
        }
        Ok(Some(aggregate))
    }

    async fn commit(&self, commit: &AggregateCommit) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let actual = Self::lock_raffle(&mut tx, &commit.raffle_id).await?;
        if actual != commit.expected_version {
            return Err(StoreError::VersionConflict {
                raffle: commit.raffle_id,
                expected: commit.expected_version,
                actual,
            });
        }

        if let Some(raffle) = &commit.raffle {
            if raffle.id != commit.raffle_id {
                return Err(StoreError::RaffleNotFound(raffle.id));
            }
            sqlx::query("UPDATE raffles SET body = $2 WHERE id = $1")
                .bind(raffle.id.as_uuid())
                .bind(Json(raffle))
                .execute(&mut *tx)
                .await?;
        }

        for entry in &commit.entries {
            Self::check_owned(&mut tx, &commit.raffle_id, &entry.id).await?;
            if entry.raffle_id != commit.raffle_id {
                return Err(StoreError::ForeignEntry {
                    entry: entry.id,
                    raffle: commit.raffle_id,
                });
            }
            sqlx::query(
                r#"
                UPDATE raffle_entries
                SET status = $2, has_proof = $3, claimed_since = $4, body = $5
                WHERE id = $1
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.status.to_string())
            .bind(entry.proof.is_some())
            .bind(entry.claimed_since())
            .bind(Json(entry))
            .execute(&mut *tx)
            .await?;
        }

        for (proof, entry) in &commit.consume {
            Self::check_owned(&mut tx, &commit.raffle_id, entry).await?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO consumed_proofs (proof, raffle_id, entry_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (proof) DO NOTHING
                "#,
            )
            .bind(proof.as_str())
            .bind(commit.raffle_id.as_uuid())
            .bind(entry.as_uuid())
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                match Self::consumed_by(&mut tx, proof).await? {
                    Some(owner) if owner == *entry => {}
                    Some(owner) => {
                        return Err(StoreError::ProofConsumed {
                            proof: proof.clone(),
                            owner,
                        })
                    }
                    None => {
                        return Err(StoreError::Backend(format!(
                            "proof {} conflicted but has no owner",
                            proof.short()
                        )))
                    }
                }
            }
        }

        let version = Self::bump_version(&mut tx, &commit.raffle_id).await?;
        tx.commit().await?;

        debug!(
            raffle_id = %commit.raffle_id,
            version,
            entries = commit.entries.len(),
            consumed = commit.consume.len(),
            "aggregate committed"
        );
        Ok(version)
    }

    async fn proof_owner(&self, proof: &TxSignature) -> StoreResult<Option<(RaffleId, EntryId)>> {
        let row: Option<(Uuid, Uuid)> =
            sqlx::query_as("SELECT raffle_id, entry_id FROM consumed_proofs WHERE proof = $1")
                .bind(proof.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(raffle, entry)| (RaffleId::from_uuid(raffle), EntryId::from_uuid(entry))))
    }

    async fn pending_claims(
        &self,
        after: Option<ClaimCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Entry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<Json<Entry>> = sqlx::query_scalar(
            r#"
            SELECT body FROM raffle_entries
            WHERE status = 'pending' AND has_proof
              AND ($1::timestamptz IS NULL OR (claimed_since, id) > ($1, $2))
            ORDER BY claimed_since, id
            LIMIT $3
            "#,
        )
        .bind(after.map(|c| c.claimed_since))
        .bind(after.map(|c| *c.entry.as_uuid()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(e)| e).collect())
    }
}
