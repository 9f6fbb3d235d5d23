//! Lab persistence over Postgres.
//!
//! `PgLabStore` owns the `labs` table and the one piece of locking logic
//! the teardown worker depends on: claiming a batch of `ENDING` rows with
//! `FOR UPDATE SKIP LOCKED` so two worker ticks (in this process or a
//! replica) never process the same lab.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use octolab_core::lab::{EvidenceState, Lab, LabStatus, RuntimeKind};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS labs (
            id                    UUID PRIMARY KEY,
            owner_id              UUID NOT NULL,
            recipe_id             UUID NOT NULL,
            status                TEXT NOT NULL,
            runtime               TEXT,
            runtime_meta          JSONB NOT NULL DEFAULT '{}',
            connection_url        TEXT,
            requested_intent      JSONB NOT NULL DEFAULT '{}',
            expires_at            TIMESTAMPTZ,
            evidence_state        TEXT NOT NULL,
            evidence_finalized_at TIMESTAMPTZ,
            created_at            TIMESTAMPTZ NOT NULL,
            updated_at            TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to ensure labs table exists")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS labs_owner_id_idx ON labs (owner_id)")
        .execute(pool)
        .await
        .context("failed to ensure labs_owner_id_idx exists")?;
    sqlx::query("CREATE INDEX IF NOT EXISTS labs_status_updated_at_idx ON labs (status, updated_at)")
        .execute(pool)
        .await
        .context("failed to ensure labs_status_updated_at_idx exists")?;

    Ok(())
}

#[derive(FromRow)]
struct LabRow {
    id: Uuid,
    owner_id: Uuid,
    recipe_id: Uuid,
    status: String,
    runtime: Option<String>,
    runtime_meta: serde_json::Value,
    connection_url: Option<String>,
    requested_intent: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
    evidence_state: String,
    evidence_finalized_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_to_db(s: LabStatus) -> &'static str {
    match s {
        LabStatus::Requested => "requested",
        LabStatus::Provisioning => "provisioning",
        LabStatus::Ready => "ready",
        LabStatus::Degraded => "degraded",
        LabStatus::Ending => "ending",
        LabStatus::Finished => "finished",
        LabStatus::Failed => "failed",
    }
}

fn status_from_db(s: &str) -> Result<LabStatus> {
    Ok(match s {
        "requested" => LabStatus::Requested,
        "provisioning" => LabStatus::Provisioning,
        "ready" => LabStatus::Ready,
        "degraded" => LabStatus::Degraded,
        "ending" => LabStatus::Ending,
        "finished" => LabStatus::Finished,
        "failed" => LabStatus::Failed,
        other => anyhow::bail!("unknown lab status in db: {other}"),
    })
}

fn runtime_to_db(r: RuntimeKind) -> &'static str {
    match r {
        RuntimeKind::Compose => "compose",
        RuntimeKind::Firecracker => "firecracker",
    }
}

fn runtime_from_db(r: &str) -> Result<RuntimeKind> {
    Ok(match r {
        "compose" => RuntimeKind::Compose,
        "firecracker" => RuntimeKind::Firecracker,
        other => anyhow::bail!("unknown runtime kind in db: {other}"),
    })
}

fn evidence_to_db(e: EvidenceState) -> &'static str {
    match e {
        EvidenceState::Collecting => "collecting",
        EvidenceState::Ready => "ready",
        EvidenceState::Partial => "partial",
        EvidenceState::Unavailable => "unavailable",
    }
}

fn evidence_from_db(e: &str) -> Result<EvidenceState> {
    Ok(match e {
        "collecting" => EvidenceState::Collecting,
        "ready" => EvidenceState::Ready,
        "partial" => EvidenceState::Partial,
        "unavailable" => EvidenceState::Unavailable,
        other => anyhow::bail!("unknown evidence state in db: {other}"),
    })
}

impl TryFrom<LabRow> for Lab {
    type Error = anyhow::Error;

    fn try_from(row: LabRow) -> Result<Self> {
        Ok(Lab {
            id: row.id,
            owner_id: row.owner_id,
            recipe_id: row.recipe_id,
            status: status_from_db(&row.status)?,
            runtime: row.runtime.as_deref().map(runtime_from_db).transpose()?,
            runtime_meta: serde_json::from_value(row.runtime_meta)
                .context("failed to deserialize runtime_meta")?,
            connection_url: row.connection_url,
            requested_intent: row.requested_intent,
            expires_at: row.expires_at,
            evidence_state: evidence_from_db(&row.evidence_state)?,
            evidence_finalized_at: row.evidence_finalized_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgLabStore {
    pool: PgPool,
}

impl PgLabStore {
    pub fn new(pool: PgPool) -> Self {
        PgLabStore { pool }
    }

    pub async fn insert(&self, lab: &Lab) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO labs (
                id, owner_id, recipe_id, status, runtime, runtime_meta,
                connection_url, requested_intent, expires_at,
                evidence_state, evidence_finalized_at, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
        )
        .bind(lab.id)
        .bind(lab.owner_id)
        .bind(lab.recipe_id)
        .bind(status_to_db(lab.status))
        .bind(lab.runtime.map(runtime_to_db))
        .bind(serde_json::to_value(&lab.runtime_meta)?)
        .bind(&lab.connection_url)
        .bind(&lab.requested_intent)
        .bind(lab.expires_at)
        .bind(evidence_to_db(lab.evidence_state))
        .bind(lab.evidence_finalized_at)
        .bind(lab.created_at)
        .bind(lab.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to insert lab row")?;
        Ok(())
    }

    /// Fetch a lab scoped by owner: a non-matching owner behaves exactly
    /// like a missing row, so cross-tenant lookups never leak existence.
    pub async fn get_for_owner(&self, owner_id: Uuid, lab_id: Uuid) -> Result<Option<Lab>> {
        let row: Option<LabRow> =
            sqlx::query_as("SELECT * FROM labs WHERE id = $1 AND owner_id = $2")
                .bind(lab_id)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to fetch lab")?;
        row.map(Lab::try_from).transpose()
    }

    /// Admin path: fetch a lab regardless of owner.
    pub async fn get(&self, lab_id: Uuid) -> Result<Option<Lab>> {
        let row: Option<LabRow> = sqlx::query_as("SELECT * FROM labs WHERE id = $1")
            .bind(lab_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch lab")?;
        row.map(Lab::try_from).transpose()
    }

    pub async fn list_by_owner(&self, owner_id: Uuid) -> Result<Vec<Lab>> {
        let rows: Vec<LabRow> =
            sqlx::query_as("SELECT * FROM labs WHERE owner_id = $1 ORDER BY created_at DESC")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await
                .context("failed to list labs")?;
        rows.into_iter().map(Lab::try_from).collect()
    }

    pub async fn update(&self, lab: &Lab) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE labs SET
                status = $2, runtime = $3, runtime_meta = $4,
                connection_url = $5, expires_at = $6,
                evidence_state = $7, evidence_finalized_at = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(lab.id)
        .bind(status_to_db(lab.status))
        .bind(lab.runtime.map(runtime_to_db))
        .bind(serde_json::to_value(&lab.runtime_meta)?)
        .bind(&lab.connection_url)
        .bind(lab.expires_at)
        .bind(evidence_to_db(lab.evidence_state))
        .bind(lab.evidence_finalized_at)
        .bind(lab.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to update lab row")?;
        Ok(())
    }

    /// Idempotent: moves a lab to `ENDING` iff it's currently in a
    /// terminable state. Returns `None` if the lab doesn't exist, owner
    /// doesn't match, or the lab is in a non-terminable state (e.g.
    /// already `ENDING`, or `FINISHED`) — the caller treats all of these
    /// as "nothing to do" except a true not-found, which it reports
    /// explicitly by re-checking existence.
    pub async fn mark_ending(&self, owner_id: Uuid, lab_id: Uuid) -> Result<Option<Lab>> {
        let mut tx = self.pool.begin().await?;
        let row: Option<LabRow> =
            sqlx::query_as("SELECT * FROM labs WHERE id = $1 AND owner_id = $2 FOR UPDATE")
                .bind(lab_id)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await
                .context("failed to fetch lab for termination")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut lab = Lab::try_from(row)?;

        if lab.status == LabStatus::Ending {
            tx.commit().await?;
            return Ok(Some(lab));
        }
        if !lab.status.terminable() {
            anyhow::bail!("lab {lab_id} is not in a terminable state: {}", lab.status);
        }

        octolab_core::lab::validate_transition(lab.status, LabStatus::Ending)?;
        lab.status = LabStatus::Ending;
        lab.updated_at = Utc::now();

        sqlx::query("UPDATE labs SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(lab.id)
            .bind(status_to_db(lab.status))
            .bind(lab.updated_at)
            .execute(&mut *tx)
            .await
            .context("failed to mark lab ending")?;
        tx.commit().await?;
        Ok(Some(lab))
    }

    /// Labs in `REQUESTED`/`PROVISIONING` as of process start — candidates
    /// for startup reconciliation.
    pub async fn list_in_flight_provisioning(&self) -> Result<Vec<Lab>> {
        let rows: Vec<LabRow> =
            sqlx::query_as("SELECT * FROM labs WHERE status IN ('requested', 'provisioning')")
                .fetch_all(&self.pool)
                .await
                .context("failed to list in-flight labs")?;
        rows.into_iter().map(Lab::try_from).collect()
    }

    /// Open a teardown batch: claims up to `batch_size` `ENDING` rows with
    /// `FOR UPDATE SKIP LOCKED`, ordered oldest-first, and holds them
    /// locked until the returned batch is committed or dropped.
    pub async fn begin_teardown_batch(&self, batch_size: i64) -> Result<TeardownBatch<'_>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<LabRow> = sqlx::query_as(
            r#"
            SELECT * FROM labs
            WHERE status = 'ending'
            ORDER BY updated_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await
        .context("failed to claim ending batch")?;
        let labs = rows.into_iter().map(Lab::try_from).collect::<Result<Vec<_>>>()?;
        Ok(TeardownBatch { tx, labs })
    }
}

/// A held claim over a batch of `ENDING` labs. The underlying transaction
/// (and its row locks) stays open until [`TeardownBatch::commit`] is
/// called; dropping it without committing rolls back, leaving the rows
/// `ENDING` and unclaimed for the next tick.
pub struct TeardownBatch<'a> {
    tx: Transaction<'a, Postgres>,
    labs: Vec<Lab>,
}

impl<'a> TeardownBatch<'a> {
    pub fn labs(&self) -> &[Lab] {
        &self.labs
    }

    /// Record the terminal outcome for one claimed lab within the batch's
    /// transaction. `status` must be `FINISHED` or `FAILED`.
    pub async fn finish(
        &mut self,
        lab_id: Uuid,
        status: LabStatus,
        evidence_state: EvidenceState,
        reason: Option<&str>,
    ) -> Result<()> {
        debug_assert!(matches!(status, LabStatus::Finished | LabStatus::Failed));
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE labs SET
                status = $2, evidence_state = $3, evidence_finalized_at = $4,
                runtime_meta = CASE WHEN $2 = 'finished' THEN '{}'::jsonb ELSE runtime_meta END,
                connection_url = NULL,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(lab_id)
        .bind(status_to_db(status))
        .bind(evidence_to_db(evidence_state))
        .bind(now)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .with_context(|| format!("failed to finish teardown for lab {lab_id} (reason: {reason:?})"))?;
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("failed to commit teardown batch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_through_db_strings() {
        for s in [
            LabStatus::Requested,
            LabStatus::Provisioning,
            LabStatus::Ready,
            LabStatus::Degraded,
            LabStatus::Ending,
            LabStatus::Finished,
            LabStatus::Failed,
        ] {
            assert_eq!(status_from_db(status_to_db(s)).unwrap(), s);
        }
    }

    #[test]
    fn test_runtime_roundtrip_through_db_strings() {
        for r in [RuntimeKind::Compose, RuntimeKind::Firecracker] {
            assert_eq!(runtime_from_db(runtime_to_db(r)).unwrap(), r);
        }
    }

    #[test]
    fn test_evidence_roundtrip_through_db_strings() {
        for e in [
            EvidenceState::Collecting,
            EvidenceState::Ready,
            EvidenceState::Partial,
            EvidenceState::Unavailable,
        ] {
            assert_eq!(evidence_from_db(evidence_to_db(e)).unwrap(), e);
        }
    }

    #[test]
    fn test_status_from_db_rejects_unknown() {
        assert!(status_from_db("sideways").is_err());
    }
}
