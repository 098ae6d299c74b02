//! Shared fakes for tests.

use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    error::PlatformError,
    models::ids::{GuildId, RoleId, UserId},
    services::platform::{Authorizer, DirectMessage, Notifier, RoleBinder},
};

/// Role id handed out by [`RecordingPlatform::ensure_role`].
pub const BUYER_ROLE_ID: &str = "buyer-role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureRole(String),
    Grant { user: UserId, role: RoleId },
    Revoke { user: UserId, role: RoleId },
    Direct { user: UserId, message: DirectMessage },
}

/// In-memory platform that records every call and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    owners: HashSet<UserId>,
    calls: Mutex<Vec<Call>>,
    fail_grants: AtomicBool,
    fail_directs: AtomicBool,
    stall_directs: AtomicBool,
    revoke_failures: AtomicU32,
    revoke_attempts: AtomicU32,
}

impl RecordingPlatform {
    pub fn with_owners(owners: &[&str]) -> Self {
        Self {
            owners: owners.iter().map(|id| UserId::new(*id)).collect(),
            ..Self::default()
        }
    }

    pub fn set_grant_failure(&self, fail: bool) {
        self.fail_grants.store(fail, Ordering::SeqCst);
    }

    pub fn fail_directs(&self) {
        self.fail_directs.store(true, Ordering::SeqCst);
    }

    /// Make every direct message hang forever.
    pub fn stall_directs(&self) {
        self.stall_directs.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` revocations fail.
    pub fn fail_next_revokes(&self, count: u32) {
        self.revoke_failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn grants(&self) -> Vec<UserId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Grant { user, .. } => Some(user),
                _ => None,
            })
            .collect()
    }

    /// Successful revocations, in order.
    pub fn revokes(&self) -> Vec<UserId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Revoke { user, .. } => Some(user),
                _ => None,
            })
            .collect()
    }

    /// Whether `user` ends up with the role after every recorded grant and revoke.
    pub fn holds_role(&self, user: &UserId) -> bool {
        self.calls().into_iter().fold(false, |held, call| match call {
            Call::Grant { user: to, .. } if &to == user => true,
            Call::Revoke { user: to, .. } if &to == user => false,
            _ => held,
        })
    }

    pub fn revoke_attempts(&self) -> u32 {
        self.revoke_attempts.load(Ordering::SeqCst)
    }

    pub fn directs_to(&self, user: &UserId) -> Vec<DirectMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Direct { user: to, message } if &to == user => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl Authorizer for RecordingPlatform {
    async fn is_owner(&self, _guild: &GuildId, user: &UserId) -> Result<bool, PlatformError> {
        Ok(self.owners.contains(user))
    }

    async fn owners(&self, _guild: &GuildId) -> Result<Vec<UserId>, PlatformError> {
        let mut owners: Vec<UserId> = self.owners.iter().cloned().collect();
        owners.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(owners)
    }
}

#[async_trait]
impl RoleBinder for RecordingPlatform {
    async fn ensure_role(&self, _guild: &GuildId, name: &str) -> Result<RoleId, PlatformError> {
        self.record(Call::EnsureRole(name.to_string()));
        Ok(RoleId::new(BUYER_ROLE_ID))
    }

    async fn holds(
        &self,
        _guild: &GuildId,
        user: &UserId,
        _role: &RoleId,
    ) -> Result<bool, PlatformError> {
        Ok(self.holds_role(user))
    }

    async fn grant(
        &self,
        _guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError> {
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(PlatformError::Other("grant refused".to_string()));
        }
        self.record(Call::Grant {
            user: user.clone(),
            role: role.clone(),
        });
        Ok(())
    }

    async fn revoke(
        &self,
        _guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError> {
        self.revoke_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.revoke_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.revoke_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PlatformError::Other("revoke refused".to_string()));
        }
        self.record(Call::Revoke {
            user: user.clone(),
            role: role.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingPlatform {
    async fn send_direct(
        &self,
        user: &UserId,
        message: &DirectMessage,
    ) -> Result<(), PlatformError> {
        if self.stall_directs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_directs.load(Ordering::SeqCst) {
            return Err(PlatformError::Other("dms closed".to_string()));
        }
        self.record(Call::Direct {
            user: user.clone(),
            message: message.clone(),
        });
        Ok(())
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
