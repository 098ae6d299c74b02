//! Time-limited role grants.
//!
//! Redeeming a temporary key persists a grant with an absolute expiry so the
//! revocation survives a restart.

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, Row, sqlite::SqliteRow};

use crate::models::ids::{GuildId, RoleId, UserId};

/// Expiry details recorded alongside a temporary redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExpiry {
    pub guild_id: GuildId,
    pub role_id: RoleId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingExpiry {
    /// Expiry for a role granted at `granted_at` that lasts `minutes`.
    pub fn after_minutes(
        guild_id: GuildId,
        role_id: RoleId,
        granted_at: DateTime<Utc>,
        minutes: u32,
    ) -> Self {
        Self {
            guild_id,
            role_id,
            granted_at,
            expires_at: granted_at + Duration::minutes(i64::from(minutes)),
        }
    }
}

/// A persisted grant awaiting (or past) revocation.
///
/// # Database Table
///
/// Maps to the `grants` table. `expires_at` and `granted_at` are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub code: String,
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub role_id: RoleId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Grant {
    /// Time left until expiry, zero when already overdue.
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

fn timestamp(row: &SqliteRow, column: &str) -> sqlx::Result<DateTime<Utc>> {
    let secs: i64 = row.try_get(column)?;

    DateTime::from_timestamp(secs, 0).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("timestamp {secs} out of range").into(),
    })
}

impl<'r> FromRow<'r, SqliteRow> for Grant {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            code: row.try_get("code")?,
            user_id: UserId(row.try_get("user_id")?),
            guild_id: GuildId(row.try_get("guild_id")?),
            role_id: RoleId(row.try_get("role_id")?),
            granted_at: timestamp(row, "granted_at")?,
            expires_at: timestamp(row, "expires_at")?,
            revoked: row.try_get::<i64, _>("revoked")? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_at: DateTime<Utc>) -> Grant {
        Grant {
            code: "abc".to_string(),
            user_id: UserId::new("1"),
            guild_id: GuildId::new("2"),
            role_id: RoleId::new("3"),
            granted_at: expires_at - Duration::minutes(5),
            expires_at,
            revoked: false,
        }
    }

    #[test]
    fn expiry_is_offset_by_the_key_duration() {
        let now = Utc::now();
        let expiry = PendingExpiry::after_minutes(GuildId::new("g"), RoleId::new("r"), now, 5);

        assert_eq!(expiry.expires_at - expiry.granted_at, Duration::minutes(5));
    }

    #[test]
    fn overdue_grants_have_no_time_remaining() {
        let now = Utc::now();

        assert_eq!(
            grant(now - Duration::minutes(1)).remaining(now),
            std::time::Duration::ZERO
        );
        assert_eq!(
            grant(now + Duration::seconds(90)).remaining(now),
            std::time::Duration::from_secs(90)
        );
    }
}
