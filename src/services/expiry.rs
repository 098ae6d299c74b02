//! Expiry scheduler for temporary role grants.
//!
//! Each grant gets its own detached task that sleeps until the grant
//! expires, removes the role, tells the user and finally marks the grant
//! revoked in the store. Grants are persisted, so [`ExpiryScheduler::recover`]
//! re-arms whatever was still pending when the process last stopped.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::{
    error::StoreError,
    models::grant::Grant,
    services::{
        key_store::KeyStore,
        platform::{DirectMessage, Notifier, RoleBinder},
    },
};

/// How often a failed revocation is attempted before giving up until the next startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct ExpiryScheduler {
    store: Arc<dyn KeyStore>,
    roles: Arc<dyn RoleBinder>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl ExpiryScheduler {
    pub fn new(
        store: Arc<dyn KeyStore>,
        roles: Arc<dyn RoleBinder>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            roles,
            notifier,
            retry,
        }
    }

    /// Arm a grant using its absolute expiry; overdue grants fire immediately.
    pub fn schedule(&self, grant: Grant) -> JoinHandle<()> {
        let delay = grant.remaining(Utc::now());
        self.schedule_after(grant, delay)
    }

    /// Arm a grant to expire after `delay` on the runtime clock.
    ///
    /// The task never fires before `delay` has elapsed. It cannot be cancelled.
    pub fn schedule_after(&self, grant: Grant, delay: Duration) -> JoinHandle<()> {
        tracing::info!(
            code = %grant.code,
            user_id = %grant.user_id,
            delay_secs = delay.as_secs(),
            "Scheduled role expiry"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.expire(&grant).await;
        })
    }

    /// Re-arm every grant that was not revoked before the last shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending grants cannot be loaded.
    pub async fn recover(&self) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let grants = self.store.pending_grants().await?;
        let now = Utc::now();
        let overdue = grants.iter().filter(|g| g.expires_at <= now).count();

        tracing::info!(
            pending = grants.len(),
            overdue,
            "Recovering role expiries"
        );

        Ok(grants.into_iter().map(|grant| self.schedule(grant)).collect())
    }

    async fn expire(&self, grant: &Grant) {
        if !self.revoke_with_retry(grant).await {
            tracing::error!(
                code = %grant.code,
                user_id = %grant.user_id,
                "Giving up on role revocation, grant stays pending until next startup"
            );
            return;
        }

        if let Err(e) = self
            .notifier
            .send_direct(&grant.user_id, &DirectMessage::expired())
            .await
        {
            tracing::warn!(user_id = %grant.user_id, "Failed to send expiry notice: {}", e);
        }

        if let Err(e) = self.store.mark_grant_revoked(&grant.code).await {
            tracing::error!(code = %grant.code, "Failed to mark grant revoked: {}", e);
        }
    }

    async fn revoke_with_retry(&self, grant: &Grant) -> bool {
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            match self
                .roles
                .revoke(&grant.guild_id, &grant.user_id, &grant.role_id)
                .await
            {
                Ok(()) => {
                    tracing::info!(code = %grant.code, user_id = %grant.user_id, "Revoked expired role");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        code = %grant.code,
                        user_id = %grant.user_id,
                        attempt,
                        "Failed to revoke expired role: {}",
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        false
    }
}
