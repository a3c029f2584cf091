//! C1 — Seed store: the commitment chain.
//!
//! Separates commitment (public hash, published before a round) from
//! revelation (the seed itself, published only after the round crashes),
//! per spec.md §4.1.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::domain::SeedCommit;
use crate::error::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait SeedStore: Send + Sync {
    async fn latest(&self) -> CoreResult<Option<SeedCommit>>;

    /// Idempotent under concurrent callers: uniqueness on `idx` at the
    /// storage layer means at most one caller wins the insert for any
    /// given `max(idx) + 1`.
    async fn ensure_next(&self) -> CoreResult<SeedCommit>;

    /// Recovers the seed for `idx`. When a master secret is configured,
    /// this is deterministic (`HMAC_SHA256(master_secret, ascii(idx))`);
    /// otherwise a fresh random seed is handed back and the caller is
    /// expected to have already logged the degraded-fairness warning when
    /// the commit was first minted.
    async fn seed_for(&self, idx: i64) -> CoreResult<Vec<u8>>;
}

pub fn hash_seed(seed: &[u8]) -> Vec<u8> {
    Sha256::digest(seed).to_vec()
}

fn derive_seed(master_secret: &str, idx: i64) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(master_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(idx.to_string().as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// In-memory seed store backing unit tests and the degraded-boot path.
pub struct InMemorySeedStore {
    master_secret: Option<String>,
    commits: parking_lot::Mutex<Vec<SeedCommit>>,
}

impl InMemorySeedStore {
    pub fn new(master_secret: Option<String>) -> Self {
        Self {
            master_secret,
            commits: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SeedStore for InMemorySeedStore {
    async fn latest(&self) -> CoreResult<Option<SeedCommit>> {
        Ok(self.commits.lock().last().cloned())
    }

    async fn ensure_next(&self) -> CoreResult<SeedCommit> {
        let mut commits = self.commits.lock();
        let next_idx = commits.last().map(|c| c.idx + 1).unwrap_or(0);
        if let Some(existing) = commits.iter().find(|c| c.idx == next_idx) {
            return Ok(existing.clone());
        }

        let seed = match &self.master_secret {
            Some(secret) => derive_seed(secret, next_idx),
            None => {
                tracing::warn!(
                    idx = next_idx,
                    degraded_fairness = true,
                    "no SEED_MASTER configured; minting an ephemeral, unrecoverable seed"
                );
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };

        let commit = SeedCommit {
            idx: next_idx,
            seed_hash: hash_seed(&seed),
            created_at: Utc::now(),
        };
        commits.push(commit.clone());
        Ok(commit)
    }

    async fn seed_for(&self, idx: i64) -> CoreResult<Vec<u8>> {
        match &self.master_secret {
            Some(secret) => Ok(derive_seed(secret, idx)),
            None => Err(CoreError::Internal(
                "cannot recover seed without SEED_MASTER configured".into(),
            )),
        }
    }
}

/// Postgres-backed seed store over the `seed_commits` table (spec §6).
pub struct PostgresSeedStore {
    pool: sqlx::PgPool,
    master_secret: Option<String>,
}

impl PostgresSeedStore {
    pub fn new(pool: sqlx::PgPool, master_secret: Option<String>) -> Self {
        Self { pool, master_secret }
    }
}

#[async_trait]
impl SeedStore for PostgresSeedStore {
    async fn latest(&self) -> CoreResult<Option<SeedCommit>> {
        let row = sqlx::query_as::<_, SeedCommit>(
            "SELECT idx, seed_hash, created_at FROM seed_commits ORDER BY idx DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn ensure_next(&self) -> CoreResult<SeedCommit> {
        let mut tx = self.pool.begin().await?;

        let next_idx: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(idx), -1) + 1 FROM seed_commits FOR UPDATE",
        )
        .fetch_one(&mut *tx)
        .await?;

        let seed = match &self.master_secret {
            Some(secret) => derive_seed(secret, next_idx),
            None => {
                tracing::warn!(
                    idx = next_idx,
                    degraded_fairness = true,
                    "no SEED_MASTER configured; minting an ephemeral, unrecoverable seed"
                );
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };
        let seed_hash = hash_seed(&seed);

        let commit = sqlx::query_as::<_, SeedCommit>(
            r#"
            INSERT INTO seed_commits (idx, seed_hash, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (idx) DO UPDATE SET idx = seed_commits.idx
            RETURNING idx, seed_hash, created_at
            "#,
        )
        .bind(next_idx)
        .bind(&seed_hash)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(commit)
    }

    async fn seed_for(&self, idx: i64) -> CoreResult<Vec<u8>> {
        match &self.master_secret {
            Some(secret) => Ok(derive_seed(secret, idx)),
            None => Err(CoreError::Internal(
                "cannot recover seed without SEED_MASTER configured".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_next_is_idempotent_for_idx() {
        let store = InMemorySeedStore::new(Some("test-secret".to_string()));
        let a = store.ensure_next().await.unwrap();
        let b = store.ensure_next().await.unwrap();
        assert_eq!(a.idx, b.idx);
        assert_eq!(a.seed_hash, b.seed_hash);
    }

    #[tokio::test]
    async fn seed_for_is_deterministic_with_master_secret() {
        let store = InMemorySeedStore::new(Some("test-secret".to_string()));
        let commit = store.ensure_next().await.unwrap();
        let seed = store.seed_for(commit.idx).await.unwrap();
        assert_eq!(hash_seed(&seed), commit.seed_hash);

        let seed_again = store.seed_for(commit.idx).await.unwrap();
        assert_eq!(seed, seed_again);
    }

    #[tokio::test]
    async fn seed_for_fails_without_master_secret() {
        let store = InMemorySeedStore::new(None);
        let commit = store.ensure_next().await.unwrap();
        assert!(store.seed_for(commit.idx).await.is_err());
    }
}
