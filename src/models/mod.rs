//! Data models representing database entities and platform payloads.

/// Discord snowflake identifiers
pub mod ids;
/// Redemption key model and code generation
pub mod key;
/// Time-limited role grants
pub mod grant;
/// Discord interaction payloads and responses
pub mod interaction;
