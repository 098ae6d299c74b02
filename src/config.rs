//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DISCORD_BOT_TOKEN` (required): bot token used for REST calls
/// - `DISCORD_PUBLIC_KEY` (required): hex-encoded Ed25519 key used to verify interactions
/// - `DISCORD_APPLICATION_ID` (optional): enables slash command registration at startup
/// - `DISCORD_API_BASE` (optional): REST base URL, defaults to `https://discord.com/api/v10`
/// - `DATABASE_URL` (optional): SQLite connection string, defaults to `sqlite://keys.db`
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 8080
/// - `OWNER_ROLE_NAME` (optional): role allowed to mint keys, defaults to `OWNER`
/// - `BUYER_ROLE_NAME` (optional): role granted on redemption, defaults to `buyer`
/// - `EXPIRY_RETRY_ATTEMPTS` (optional): revocation attempts per expiry, defaults to 3
/// - `EXPIRY_RETRY_BACKOFF_SECS` (optional): pause between attempts, defaults to 30
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord_bot_token: String,

    pub discord_public_key: String,

    #[serde(default)]
    pub discord_application_id: Option<String>,

    #[serde(default = "default_api_base")]
    pub discord_api_base: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_owner_role")]
    pub owner_role_name: String,

    #[serde(default = "default_buyer_role")]
    pub buyer_role_name: String,

    #[serde(default = "default_retry_attempts")]
    pub expiry_retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub expiry_retry_backoff_secs: u64,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_database_url() -> String {
    "sqlite://keys.db".to_string()
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    8080
}

fn default_owner_role() -> String {
    "OWNER".to_string()
}

fn default_buyer_role() -> String {
    "buyer".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DISCORD_BOT_TOKEN)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    /// Build a config from an explicit list of variables instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_only_secrets_are_set() -> TestResult {
        let config = Config::from_vars(vars(&[
            ("DISCORD_BOT_TOKEN", "token"),
            ("DISCORD_PUBLIC_KEY", "abcd"),
        ]))?;

        assert_eq!(config.database_url, "sqlite://keys.db");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.owner_role_name, "OWNER");
        assert_eq!(config.buyer_role_name, "buyer");
        assert_eq!(config.expiry_retry_attempts, 3);
        assert!(config.discord_application_id.is_none());

        Ok(())
    }

    #[test]
    fn missing_bot_token_is_rejected() {
        let result = Config::from_vars(vars(&[("DISCORD_PUBLIC_KEY", "abcd")]));

        assert!(result.is_err());
    }

    #[test]
    fn overrides_are_parsed() -> TestResult {
        let config = Config::from_vars(vars(&[
            ("DISCORD_BOT_TOKEN", "token"),
            ("DISCORD_PUBLIC_KEY", "abcd"),
            ("SERVER_PORT", "9000"),
            ("OWNER_ROLE_NAME", "Admin"),
            ("DISCORD_APPLICATION_ID", "123"),
        ]))?;

        assert_eq!(config.server_port, 9000);
        assert_eq!(config.owner_role_name, "Admin");
        assert_eq!(config.discord_application_id.as_deref(), Some("123"));

        Ok(())
    }
}
