//! Collaborator contracts for the chat platform.
//!
//! The key lifecycle never talks to Discord directly. It asks an
//! [`Authorizer`] who may mint keys, a [`RoleBinder`] to manage the buyer
//! role, and a [`Notifier`] to deliver direct messages.

use async_trait::async_trait;
use mockall::automock;

use crate::{
    error::PlatformError,
    models::ids::{GuildId, RoleId, UserId},
};

/// Embed colour used for every bot message (Discord "gold").
pub const GOLD: u32 = 0xF1C40F;

/// Capability checks for privileged commands.
#[automock]
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether `user` holds the owner capability in `guild`.
    async fn is_owner(&self, guild: &GuildId, user: &UserId) -> Result<bool, PlatformError>;

    /// Every member of `guild` holding the owner capability.
    async fn owners(&self, guild: &GuildId) -> Result<Vec<UserId>, PlatformError>;
}

/// Role management.
#[automock]
#[async_trait]
pub trait RoleBinder: Send + Sync {
    /// Find the role called `name`, creating it when missing.
    async fn ensure_role(&self, guild: &GuildId, name: &str) -> Result<RoleId, PlatformError>;

    /// Whether `user` currently holds `role`, as the platform sees it now.
    async fn holds(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<bool, PlatformError>;

    async fn grant(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError>;

    async fn revoke(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError>;
}

/// Direct message delivery. Callers treat every failure as non-fatal.
#[automock]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_direct(&self, user: &UserId, message: &DirectMessage)
    -> Result<(), PlatformError>;
}

/// A direct message, rendered as an embed when it has a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub title: Option<String>,
    pub body: String,
}

impl DirectMessage {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            title: None,
            body: body.into(),
        }
    }

    /// Receipt sent to the redeemer so the code is not lost.
    pub fn redeemed(code: &str, duration_minutes: u32) -> Self {
        if duration_minutes > 0 {
            Self {
                title: Some("🔒 Temporary Key Redeemed".to_string()),
                body: format!(
                    "Hey! This is your temporary lifetime code.\n\
                     You have been granted BUYER access for {duration_minutes} minutes.\n\n\
                     I'm here to make sure you don't lose your key:\n\n```\n{code}\n```"
                ),
            }
        } else {
            Self {
                title: Some("🔒 Key Redeemed".to_string()),
                body: format!(
                    "Hey! This is your lifetime code.\n\
                     I'm here to make sure you don't lose your key:\n\n```\n{code}\n```"
                ),
            }
        }
    }

    /// Summary sent to every owner after a redemption.
    pub fn owner_summary(redeemer: &UserId, code: &str, duration_minutes: u32) -> Self {
        if duration_minutes > 0 {
            Self {
                title: Some("Temporary Key Redeemed Notification".to_string()),
                body: format!(
                    "<@{redeemer}> has redeemed a temporary key: `{code}` (Duration: {duration_minutes} minutes)"
                ),
            }
        } else {
            Self {
                title: Some("Key Redeemed Notification".to_string()),
                body: format!("<@{redeemer}> has redeemed key: `{code}`"),
            }
        }
    }

    /// Notice sent when a temporary grant runs out.
    pub fn expired() -> Self {
        Self::plain(
            "Hey you lost your buyer. Your time ran out. Buy more time or get the real thing.",
        )
    }
}
