//! Redemption key model.
//!
//! A key is a 17-character alphanumeric code that can be exchanged once for
//! the buyer role. Keys are never deleted; the redeemed rows stay behind as a
//! record of who used what.

use rand::{Rng, distr::Alphanumeric};
use sqlx::{FromRow, Row, sqlite::SqliteRow};

use crate::models::ids::UserId;

/// Length of every generated code.
pub const CODE_LENGTH: usize = 17;

/// Usage state of a key.
///
/// Stored as an integer: `0` for unused, `1` for used. The only transition is
/// `Unused -> Used`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Unused,
    Used,
}

impl KeyState {
    pub fn as_i64(self) -> i64 {
        match self {
            KeyState::Unused => 0,
            KeyState::Used => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(KeyState::Unused),
            1 => Some(KeyState::Used),
            _ => None,
        }
    }
}

/// Represents a key record from the database.
///
/// # Database Table
///
/// Maps to the `keys` table with columns:
/// - `code`: the key itself (primary key)
/// - `state`: 0 unused, 1 used
/// - `redeemed_by`: user id of the redeemer, NULL while unused
/// - `duration_minutes`: 0 for permanent keys, otherwise minutes of access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub code: String,

    pub state: KeyState,

    /// Set if and only if `state` is `Used`.
    pub redeemed_by: Option<UserId>,

    pub duration_minutes: u32,
}

impl Key {
    /// Permanent keys grant the role with no expiry.
    pub fn is_permanent(&self) -> bool {
        self.duration_minutes == 0
    }
}

impl<'r> FromRow<'r, SqliteRow> for Key {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let raw_state: i64 = row.try_get("state")?;
        let state = KeyState::from_i64(raw_state).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "state".to_string(),
            source: format!("unknown key state {raw_state}").into(),
        })?;

        let raw_duration: i64 = row.try_get("duration_minutes")?;
        let duration_minutes =
            u32::try_from(raw_duration).map_err(|e| sqlx::Error::ColumnDecode {
                index: "duration_minutes".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            code: row.try_get("code")?,
            state,
            redeemed_by: row.try_get::<Option<String>, _>("redeemed_by")?.map(UserId),
            duration_minutes,
        })
    }
}

/// Generate a random code of [`CODE_LENGTH`] characters.
///
/// Characters are drawn uniformly from `[A-Za-z0-9]`. Uniqueness is enforced
/// by the store's primary key, not here.
pub fn generate_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect()
}
