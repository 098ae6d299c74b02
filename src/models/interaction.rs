//! Discord interaction payloads and responses.
//!
//! Only the fields the bot reads are modelled; everything else in the
//! payload is ignored during deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ids::{GuildId, RoleId, UserId};

/// Interaction type sent by Discord to validate the endpoint.
pub const INTERACTION_PING: u8 = 1;
/// Interaction type for slash command invocations.
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

const RESPONSE_PONG: u8 = 1;
const RESPONSE_CHANNEL_MESSAGE: u8 = 4;

/// Message flag that makes a reply visible only to the invoking user.
pub const FLAG_EPHEMERAL: u64 = 1 << 6;

/// Incoming interaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,

    #[serde(default)]
    pub guild_id: Option<GuildId>,

    /// Present only when invoked inside a guild.
    #[serde(default)]
    pub member: Option<Member>,

    #[serde(default)]
    pub data: Option<CommandData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub user: User,

    #[serde(default)]
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandData {
    pub name: String,

    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,

    #[serde(default)]
    pub value: Value,
}

impl Interaction {
    fn option(&self, name: &str) -> Option<&Value> {
        self.data
            .as_ref()?
            .options
            .iter()
            .find(|option| option.name == name)
            .map(|option| &option.value)
    }

    pub fn integer_option(&self, name: &str) -> Option<i64> {
        self.option(name).and_then(Value::as_i64)
    }

    pub fn string_option(&self, name: &str) -> Option<&str> {
        self.option(name).and_then(Value::as_str)
    }
}

/// Reply body returned from the interactions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub content: String,
    pub flags: u64,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: RESPONSE_PONG,
            data: None,
        }
    }

    /// A message only the invoking user can see.
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(ResponseData {
                content: content.into(),
                flags: FLAG_EPHEMERAL,
            }),
        }
    }
}
