//! Key lifecycle service - minting and redeeming keys.
//!
//! This service handles:
//! - Owner checks before minting
//! - Code generation and insertion
//! - Redemption: grant the buyer role, then consume the key
//! - Receipts for the redeemer and owners
//! - Arming the expiry for temporary keys
//!
//! # Redemption ordering
//!
//! The role is granted before the key is marked used. If the grant fails the
//! key is left untouched and can be redeemed again. If the grant succeeds but
//! the conditional update loses a race (or the store fails), the role is
//! taken back unless the redeemer already held it or the key went to the
//! redeemer anyway.
//!
//! Redemptions by the same member run one at a time, so whether they already
//! hold the role is read fresh from the platform and cannot be invalidated by
//! another of their own redemptions in flight.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::AppError,
    models::{
        grant::{Grant, PendingExpiry},
        ids::{GuildId, RoleId, UserId},
        key::{Key, KeyState, generate_code},
    },
    services::{
        expiry::ExpiryScheduler,
        key_store::KeyStore,
        platform::{Authorizer, DirectMessage, Notifier, RoleBinder},
    },
};

/// Who is invoking a privileged command.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: UserId,
    pub guild_id: GuildId,
}

/// Who is redeeming, with the roles they held when they invoked the command.
#[derive(Debug, Clone)]
pub struct Redeemer {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub roles: Vec<RoleId>,
}

/// Outcome of a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub code: String,
    pub duration_minutes: u32,

    /// `None` for permanent keys.
    pub expires_at: Option<DateTime<Utc>>,
}

type MemberSlot = (GuildId, UserId);

pub struct KeyService {
    store: Arc<dyn KeyStore>,
    authorizer: Arc<dyn Authorizer>,
    roles: Arc<dyn RoleBinder>,
    notifier: Arc<dyn Notifier>,
    expiry: ExpiryScheduler,
    buyer_role: String,

    /// Per-member turn locks, present only while that member has a redemption queued.
    redeeming: Mutex<HashMap<MemberSlot, Arc<Mutex<()>>>>,
}

impl KeyService {
    pub fn new(
        store: Arc<dyn KeyStore>,
        authorizer: Arc<dyn Authorizer>,
        roles: Arc<dyn RoleBinder>,
        notifier: Arc<dyn Notifier>,
        expiry: ExpiryScheduler,
        buyer_role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            authorizer,
            roles,
            notifier,
            expiry,
            buyer_role: buyer_role.into(),
            redeeming: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a key that grants the buyer role forever.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied`: caller is not an owner
    /// - `GenerationFailed`: the store rejected the key
    pub async fn generate_permanent_key(&self, caller: &Caller) -> Result<String, AppError> {
        self.require_owner(caller).await?;
        self.mint(caller, 0).await
    }

    /// Mint a key that grants the buyer role for `minutes` after redemption.
    ///
    /// There is no upper bound beyond what fits in 32 bits.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied`: caller is not an owner
    /// - `InvalidDuration`: `minutes` is not positive or too large
    /// - `GenerationFailed`: the store rejected the key
    pub async fn generate_temporary_key(
        &self,
        caller: &Caller,
        minutes: i64,
    ) -> Result<String, AppError> {
        self.require_owner(caller).await?;

        let duration = u32::try_from(minutes)
            .ok()
            .filter(|m| *m > 0)
            .ok_or(AppError::InvalidDuration(minutes))?;

        self.mint(caller, duration).await
    }

    /// Redeem `code` for `redeemer`.
    ///
    /// # Process
    ///
    /// 1. Wait for any other redemption by the same member to finish
    /// 2. Look the key up, reject unknown or used keys
    /// 3. Find or create the buyer role and grant it
    /// 4. Conditionally mark the key used (persisting the expiry for temporary keys)
    /// 5. Send receipts in the background (failures only logged)
    /// 6. Arm the expiry for temporary keys
    ///
    /// # Errors
    ///
    /// - `InvalidKey` / `AlreadyUsedOrInvalid`: nothing to redeem
    /// - `GrantFailed`: the role could not be granted, key left unused
    /// - `Store`: the store failed, key left unused
    pub async fn redeem(&self, redeemer: &Redeemer, code: &str) -> Result<Redemption, AppError> {
        let slot = (redeemer.guild_id.clone(), redeemer.user_id.clone());

        let turn = self.wait_turn(&slot).await;
        let result = self.redeem_in_turn(redeemer, code).await;
        drop(turn);
        self.release_turn(&slot).await;

        result
    }

    async fn redeem_in_turn(
        &self,
        redeemer: &Redeemer,
        code: &str,
    ) -> Result<Redemption, AppError> {
        let key = self.store.lookup(code).await?.ok_or(AppError::InvalidKey)?;

        if key.state != KeyState::Unused {
            return Err(AppError::AlreadyUsedOrInvalid);
        }

        let role = self
            .roles
            .ensure_role(&redeemer.guild_id, &self.buyer_role)
            .await
            .map_err(AppError::GrantFailed)?;
        let already_held = redeemer.roles.contains(&role)
            || self
                .roles
                .holds(&redeemer.guild_id, &redeemer.user_id, &role)
                .await
                .map_err(AppError::GrantFailed)?;

        self.roles
            .grant(&redeemer.guild_id, &redeemer.user_id, &role)
            .await
            .map_err(AppError::GrantFailed)?;

        let expiry = (!key.is_permanent()).then(|| {
            PendingExpiry::after_minutes(
                redeemer.guild_id.clone(),
                role.clone(),
                Utc::now(),
                key.duration_minutes,
            )
        });

        match self
            .store
            .mark_redeemed(code, &redeemer.user_id, expiry.clone())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(code, user_id = %redeemer.user_id, "Lost redemption race");
                if !already_held && !self.went_to(code, &redeemer.user_id).await {
                    self.take_back(redeemer, &role).await;
                }
                return Err(AppError::AlreadyUsedOrInvalid);
            }
            Err(e) => {
                if !already_held {
                    self.take_back(redeemer, &role).await;
                }
                return Err(e.into());
            }
        }

        tracing::info!(
            code,
            user_id = %redeemer.user_id,
            guild_id = %redeemer.guild_id,
            duration_minutes = key.duration_minutes,
            "Key redeemed"
        );

        self.spawn_receipts(redeemer, &key);

        let expires_at = expiry.map(|expiry| {
            let expires_at = expiry.expires_at;
            self.expiry.schedule_after(
                Grant {
                    code: code.to_string(),
                    user_id: redeemer.user_id.clone(),
                    guild_id: expiry.guild_id,
                    role_id: expiry.role_id,
                    granted_at: expiry.granted_at,
                    expires_at,
                    revoked: false,
                },
                Duration::from_secs(u64::from(key.duration_minutes) * 60),
            );
            expires_at
        });

        Ok(Redemption {
            code: key.code,
            duration_minutes: key.duration_minutes,
            expires_at,
        })
    }

    async fn wait_turn(&self, slot: &MemberSlot) -> OwnedMutexGuard<()> {
        let lock = self
            .redeeming
            .lock()
            .await
            .entry(slot.clone())
            .or_default()
            .clone();

        lock.lock_owned().await
    }

    /// Drop the member's lock once nobody else is queued on it.
    async fn release_turn(&self, slot: &MemberSlot) {
        let mut redeeming = self.redeeming.lock().await;
        if redeeming
            .get(slot)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            redeeming.remove(slot);
        }
    }

    async fn require_owner(&self, caller: &Caller) -> Result<(), AppError> {
        if self
            .authorizer
            .is_owner(&caller.guild_id, &caller.user_id)
            .await?
        {
            Ok(())
        } else {
            tracing::warn!(user_id = %caller.user_id, "Non-owner tried to generate a key");
            Err(AppError::PermissionDenied)
        }
    }

    async fn mint(&self, caller: &Caller, duration_minutes: u32) -> Result<String, AppError> {
        let code = generate_code();

        self.store
            .insert(&code, duration_minutes)
            .await
            .map_err(|e| {
                tracing::error!("Error inserting key: {}", e);
                AppError::GenerationFailed(e)
            })?;

        tracing::info!(
            code = %code,
            user_id = %caller.user_id,
            duration_minutes,
            "Key generated"
        );

        Ok(code)
    }

    /// Whether the key, though this attempt lost, ended up redeemed by `user`.
    ///
    /// A lookup failure counts as a yes so a legitimately won role is never stripped.
    async fn went_to(&self, code: &str, user: &UserId) -> bool {
        match self.store.lookup(code).await {
            Ok(key) => key.and_then(|k| k.redeemed_by).as_ref() == Some(user),
            Err(e) => {
                tracing::error!(code, "Could not re-read key after lost race: {}", e);
                true
            }
        }
    }

    async fn take_back(&self, redeemer: &Redeemer, role: &RoleId) {
        if let Err(e) = self
            .roles
            .revoke(&redeemer.guild_id, &redeemer.user_id, role)
            .await
        {
            tracing::error!(
                user_id = %redeemer.user_id,
                "Failed to take back role after aborted redemption: {}",
                e
            );
        }
    }

    fn spawn_receipts(&self, redeemer: &Redeemer, key: &Key) {
        let authorizer = self.authorizer.clone();
        let notifier = self.notifier.clone();
        let redeemer = redeemer.clone();
        let key = key.clone();

        tokio::spawn(async move {
            send_receipts(authorizer.as_ref(), notifier.as_ref(), &redeemer, &key).await;
        });
    }
}

async fn send_receipts(
    authorizer: &dyn Authorizer,
    notifier: &dyn Notifier,
    redeemer: &Redeemer,
    key: &Key,
) {
    let receipt = DirectMessage::redeemed(&key.code, key.duration_minutes);
    if let Err(e) = notifier.send_direct(&redeemer.user_id, &receipt).await {
        tracing::warn!(user_id = %redeemer.user_id, "Error sending DM to redeemer: {}", e);
    }

    let owners = match authorizer.owners(&redeemer.guild_id).await {
        Ok(owners) => owners,
        Err(e) => {
            tracing::warn!(guild_id = %redeemer.guild_id, "Could not list owners: {}", e);
            return;
        }
    };

    let summary = DirectMessage::owner_summary(&redeemer.user_id, &key.code, key.duration_minutes);
    for owner in owners {
        if let Err(e) = notifier.send_direct(&owner, &summary).await {
            tracing::warn!(user_id = %owner, "Error sending DM to owner: {}", e);
        }
    }
}
