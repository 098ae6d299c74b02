//! Key store - durable storage for keys and their expiring grants.
//!
//! # Atomicity Guarantees
//!
//! Redemption is a single conditional `UPDATE ... WHERE state = 0`. SQLite
//! serializes writers, so when several requests race for one code exactly
//! one update affects a row. The grant for a temporary key is written in the
//! same transaction as that update.

use async_trait::async_trait;
use mockall::automock;

use crate::{
    db::DbPool,
    error::StoreError,
    models::{
        grant::{Grant, PendingExpiry},
        ids::UserId,
        key::{Key, KeyState},
    },
};

#[automock]
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Create an unused key. Fails with `DuplicateKey` if the code exists.
    async fn insert(&self, code: &str, duration_minutes: u32) -> Result<(), StoreError>;

    /// Fetch a key by code.
    async fn lookup(&self, code: &str) -> Result<Option<Key>, StoreError>;

    /// Mark the key used by `user_id` if it is still unused.
    ///
    /// Returns `false` when the key was already used (or does not exist), in
    /// which case nothing is written.
    async fn mark_redeemed(
        &self,
        code: &str,
        user_id: &UserId,
        expiry: Option<PendingExpiry>,
    ) -> Result<bool, StoreError>;

    /// All grants whose role has not been revoked yet, soonest first.
    async fn pending_grants(&self) -> Result<Vec<Grant>, StoreError>;

    /// Record that the role of a grant has been removed.
    async fn mark_grant_revoked(&self, code: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteKeyStore {
    pool: DbPool,
}

impl SqliteKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn insert(&self, code: &str, duration_minutes: u32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO keys (code, state, redeemed_by, duration_minutes) VALUES ($1, $2, NULL, $3)",
        )
        .bind(code)
        .bind(KeyState::Unused.as_i64())
        .bind(i64::from(duration_minutes))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateKey)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(&self, code: &str) -> Result<Option<Key>, StoreError> {
        let key = sqlx::query_as::<_, Key>(
            "SELECT code, state, redeemed_by, duration_minutes FROM keys WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn mark_redeemed(
        &self,
        code: &str,
        user_id: &UserId,
        expiry: Option<PendingExpiry>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated_count = sqlx::query(
            "UPDATE keys SET state = $1, redeemed_by = $2 WHERE code = $3 AND state = $4",
        )
        .bind(KeyState::Used.as_i64())
        .bind(user_id.as_str())
        .bind(code)
        .bind(KeyState::Unused.as_i64())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated_count == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(expiry) = expiry {
            sqlx::query(
                r#"
                INSERT INTO grants (code, user_id, guild_id, role_id, granted_at, expires_at, revoked)
                VALUES ($1, $2, $3, $4, $5, $6, 0)
                "#,
            )
            .bind(code)
            .bind(user_id.as_str())
            .bind(expiry.guild_id.as_str())
            .bind(expiry.role_id.as_str())
            .bind(expiry.granted_at.timestamp())
            .bind(expiry.expires_at.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(true)
    }

    async fn pending_grants(&self) -> Result<Vec<Grant>, StoreError> {
        let grants = sqlx::query_as::<_, Grant>(
            "SELECT * FROM grants WHERE revoked = 0 ORDER BY expires_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(grants)
    }

    async fn mark_grant_revoked(&self, code: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE grants SET revoked = 1 WHERE code = $1")
            .bind(code)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use testresult::TestResult;

    use super::*;
    use crate::{
        db::test_db::TestDb,
        models::ids::{GuildId, RoleId},
    };

    #[tokio::test]
    async fn inserted_key_starts_unused() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());

        store.insert("AAAAAAAAAAAAAAAAA", 15).await?;

        let key = store.lookup("AAAAAAAAAAAAAAAAA").await?;

        assert_eq!(
            key,
            Some(Key {
                code: "AAAAAAAAAAAAAAAAA".to_string(),
                state: KeyState::Unused,
                redeemed_by: None,
                duration_minutes: 15,
            })
        );

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());

        store.insert("dup", 0).await?;
        let result = store.insert("dup", 5).await;

        assert!(
            matches!(result, Err(StoreError::DuplicateKey)),
            "expected DuplicateKey, got {result:?}"
        );
        assert_eq!(store.lookup("dup").await?.map(|k| k.duration_minutes), Some(0));

        Ok(())
    }

    #[tokio::test]
    async fn lookup_of_unknown_code_is_none() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());

        assert_eq!(store.lookup("missing").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_state_is_reported_as_corrupt() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());
        sqlx::query("INSERT INTO keys (code, state, redeemed_by, duration_minutes) VALUES ($1, 7, NULL, 0)")
            .bind("BROKENBROKENBROKE")
            .execute(&db.pool)
            .await?;

        let result = store.lookup("BROKENBROKENBROKE").await;

        assert!(
            matches!(&result, Err(StoreError::Corrupt(msg)) if msg.contains("state")),
            "got {result:?}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn second_mark_redeemed_loses() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());
        let alice = UserId::new("1");
        let bob = UserId::new("2");

        store.insert("once", 0).await?;

        assert!(store.mark_redeemed("once", &alice, None).await?);
        assert!(!store.mark_redeemed("once", &bob, None).await?);

        let key = store.lookup("once").await?;
        assert_eq!(key.as_ref().map(|k| k.state), Some(KeyState::Used));
        assert_eq!(key.and_then(|k| k.redeemed_by), Some(alice));

        Ok(())
    }

    #[tokio::test]
    async fn mark_redeemed_of_unknown_code_writes_nothing() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());

        assert!(!store.mark_redeemed("ghost", &UserId::new("1"), None).await?);

        Ok(())
    }

    #[tokio::test]
    async fn temporary_redemption_persists_grant_until_revoked() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());
        let user = UserId::new("7");
        let expiry =
            PendingExpiry::after_minutes(GuildId::new("g"), RoleId::new("r"), Utc::now(), 30);

        store.insert("temp", 30).await?;
        assert!(store.mark_redeemed("temp", &user, Some(expiry.clone())).await?);

        let pending = store.pending_grants().await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, user);
        assert_eq!(pending[0].expires_at.timestamp(), expiry.expires_at.timestamp());
        assert!(!pending[0].revoked);

        store.mark_grant_revoked("temp").await?;
        assert!(store.pending_grants().await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn losing_redemption_does_not_write_a_grant() -> TestResult {
        let db = TestDb::initialized().await?;
        let store = SqliteKeyStore::new(db.pool.clone());
        let expiry =
            PendingExpiry::after_minutes(GuildId::new("g"), RoleId::new("r"), Utc::now(), 30);

        store.insert("temp", 30).await?;
        assert!(store.mark_redeemed("temp", &UserId::new("1"), Some(expiry.clone())).await?);
        assert!(!store.mark_redeemed("temp", &UserId::new("2"), Some(expiry)).await?);

        let pending = store.pending_grants().await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, UserId::new("1"));

        Ok(())
    }
}
