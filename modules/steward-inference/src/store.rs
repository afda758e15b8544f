// Postgres backing for the evidence cache. Rows are upserted per key and
// read back with their age; expiry is decided by the in-memory layer.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use steward_common::StewardError;

use crate::cache::{CacheBackend, CacheKey, Evidence, StoredEvidence};

pub struct PgCacheBackend {
    pool: PgPool,
}

impl PgCacheBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StewardError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StewardError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<(), StewardError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StewardError::Database(e.to_string()))
    }

    /// Delete rows older than `ttl`. Returns the number removed.
    pub async fn purge_expired(&self, ttl: Duration) -> Result<u64, StewardError> {
        let result = sqlx::query(
            "DELETE FROM evidence_cache WHERE inserted_at < now() - make_interval(secs => $1)",
        )
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| StewardError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheBackend for PgCacheBackend {
    async fn load(&self, key: &CacheKey) -> anyhow::Result<Option<StoredEvidence>> {
        let row = sqlx::query_as::<_, (serde_json::Value, DateTime<Utc>)>(
            "SELECT value, inserted_at FROM evidence_cache WHERE bucket = $1 AND name = $2",
        )
        .bind(&key.bucket)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await?;

        let Some((value, inserted_at)) = row else {
            return Ok(None);
        };
        let evidence: Evidence =
            serde_json::from_value(value).context("Malformed evidence_cache row")?;
        let age = (Utc::now() - inserted_at).to_std().unwrap_or_default();
        Ok(Some(StoredEvidence { evidence, age }))
    }

    async fn store(&self, key: &CacheKey, evidence: &Evidence) -> anyhow::Result<()> {
        let value = serde_json::to_value(evidence)?;
        sqlx::query(
            r#"
            INSERT INTO evidence_cache (bucket, name, value, inserted_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (bucket, name)
            DO UPDATE SET value = EXCLUDED.value, inserted_at = EXCLUDED.inserted_at
            "#,
        )
        .bind(&key.bucket)
        .bind(&key.name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
