//! Discord REST client.
//!
//! Implements the platform contracts ([`Authorizer`], [`RoleBinder`],
//! [`Notifier`]) on top of the Discord HTTP API, and registers the slash
//! commands at startup.
//!
//! # Headers Sent
//!
//! - `Authorization: Bot <token>`
//! - `User-Agent: DiscordBot (redeem_key_server, <version>)`
//!
//! # Timeout
//!
//! 10 seconds per request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, Method, RequestBuilder, Response,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use crate::{
    error::PlatformError,
    models::ids::{GuildId, RoleId, UserId},
    services::platform::{Authorizer, DirectMessage, GOLD, Notifier, RoleBinder},
};

/// Page size for guild member listing (Discord maximum).
const MEMBER_PAGE: usize = 1000;

#[derive(Debug, Deserialize)]
struct RoleObject {
    id: RoleId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberObject {
    user: UserObject,
    #[serde(default)]
    roles: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
struct UserObject {
    id: UserId,
}

#[derive(Debug, Deserialize)]
struct ChannelObject {
    id: String,
}

#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: Client,
    base: Url,
    owner_role: String,
}

impl DiscordClient {
    /// Build a client for the API rooted at `api_base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or token is malformed.
    pub fn new(
        api_base: &str,
        bot_token: &str,
        owner_role: impl Into<String>,
    ) -> Result<Self, PlatformError> {
        let mut base = Url::parse(api_base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bot {bot_token}"))
            .map_err(|e| PlatformError::Other(format!("invalid bot token: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .user_agent(concat!(
                "DiscordBot (redeem_key_server, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()?;

        Ok(Self {
            http,
            base,
            owner_role: owner_role.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, PlatformError> {
        Ok(self.http.request(method, self.base.join(path)?))
    }

    async fn send(request: RequestBuilder) -> Result<Response, PlatformError> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(PlatformError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let response = Self::send(self.request(Method::GET, path)?).await?;
        Ok(response.json().await?)
    }

    async fn guild_roles(&self, guild: &GuildId) -> Result<Vec<RoleObject>, PlatformError> {
        self.get(&format!("guilds/{guild}/roles")).await
    }

    async fn role_named(
        &self,
        guild: &GuildId,
        name: &str,
    ) -> Result<Option<RoleId>, PlatformError> {
        Ok(self
            .guild_roles(guild)
            .await?
            .into_iter()
            .find(|role| role.name == name)
            .map(|role| role.id))
    }

    /// All members of a guild, following `after` pagination.
    async fn members(&self, guild: &GuildId) -> Result<Vec<MemberObject>, PlatformError> {
        let mut all = Vec::new();
        let mut after = "0".to_string();

        loop {
            let page: Vec<MemberObject> = self
                .get(&format!(
                    "guilds/{guild}/members?limit={MEMBER_PAGE}&after={after}"
                ))
                .await?;
            let full = page.len() == MEMBER_PAGE;

            if let Some(last) = page.last() {
                after = last.user.id.to_string();
            }
            all.extend(page);

            if !full {
                return Ok(all);
            }
        }
    }

    /// Overwrite the global slash commands with `gen_key`, `time_key` and `redeem`.
    ///
    /// # Errors
    ///
    /// Returns an error if Discord rejects the registration.
    pub async fn register_commands(&self, application_id: &str) -> Result<(), PlatformError> {
        let request = self
            .request(Method::PUT, &format!("applications/{application_id}/commands"))?
            .json(&command_definitions());
        Self::send(request).await?;

        Ok(())
    }
}

/// Slash command definitions in Discord's registration format.
pub fn command_definitions() -> Value {
    json!([
        {
            "name": "gen_key",
            "type": 1,
            "description": "Generate a permanent key (Owner-only command)"
        },
        {
            "name": "time_key",
            "type": 1,
            "description": "Generate a temporary key for limited buyer access",
            "options": [{
                "name": "minutes",
                "type": 4,
                "description": "Minutes of buyer access once redeemed",
                "required": true,
                "min_value": 1
            }]
        },
        {
            "name": "redeem",
            "type": 1,
            "description": "Redeem a key to receive the buyer role",
            "options": [{
                "name": "key",
                "type": 3,
                "description": "The key to redeem",
                "required": true
            }]
        }
    ])
}

#[async_trait]
impl Authorizer for DiscordClient {
    async fn is_owner(&self, guild: &GuildId, user: &UserId) -> Result<bool, PlatformError> {
        let Some(owner_role) = self.role_named(guild, &self.owner_role).await? else {
            return Ok(false);
        };
        let member: MemberObject = self.get(&format!("guilds/{guild}/members/{user}")).await?;

        Ok(member.roles.contains(&owner_role))
    }

    async fn owners(&self, guild: &GuildId) -> Result<Vec<UserId>, PlatformError> {
        let Some(owner_role) = self.role_named(guild, &self.owner_role).await? else {
            return Ok(Vec::new());
        };

        Ok(self
            .members(guild)
            .await?
            .into_iter()
            .filter(|member| member.roles.contains(&owner_role))
            .map(|member| member.user.id)
            .collect())
    }
}

#[async_trait]
impl RoleBinder for DiscordClient {
    async fn ensure_role(&self, guild: &GuildId, name: &str) -> Result<RoleId, PlatformError> {
        if let Some(role) = self.role_named(guild, name).await? {
            return Ok(role);
        }

        tracing::info!(guild_id = %guild, role = name, "Creating missing role");
        let request = self
            .request(Method::POST, &format!("guilds/{guild}/roles"))?
            .json(&json!({ "name": name, "color": GOLD }));
        let role: RoleObject = Self::send(request).await?.json().await?;

        Ok(role.id)
    }

    async fn holds(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<bool, PlatformError> {
        let member: MemberObject = self.get(&format!("guilds/{guild}/members/{user}")).await?;
        Ok(member.roles.contains(role))
    }

    async fn grant(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError> {
        let path = format!("guilds/{guild}/members/{user}/roles/{role}");
        Self::send(self.request(Method::PUT, &path)?).await?;
        Ok(())
    }

    async fn revoke(
        &self,
        guild: &GuildId,
        user: &UserId,
        role: &RoleId,
    ) -> Result<(), PlatformError> {
        let path = format!("guilds/{guild}/members/{user}/roles/{role}");
        Self::send(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordClient {
    async fn send_direct(
        &self,
        user: &UserId,
        message: &DirectMessage,
    ) -> Result<(), PlatformError> {
        let open = self
            .request(Method::POST, "users/@me/channels")?
            .json(&json!({ "recipient_id": user }));
        let channel: ChannelObject = Self::send(open).await?.json().await?;

        let body = match &message.title {
            Some(title) => json!({
                "embeds": [{ "title": title, "description": message.body, "color": GOLD }]
            }),
            None => json!({ "content": message.body }),
        };
        let post = self
            .request(Method::POST, &format!("channels/{}/messages", channel.id))?
            .json(&body);
        Self::send(post).await?;

        Ok(())
    }
}
