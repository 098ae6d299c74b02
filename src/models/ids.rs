//! Strongly typed platform identifiers.
//!
//! Discord identifies users, guilds and roles with snowflakes that are sent
//! as decimal strings. They are kept as strings end to end so they can be
//! stored and echoed back without loss.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

snowflake!(
    /// A platform user.
    UserId
);
snowflake!(
    /// A server (guild) the bot is installed in.
    GuildId
);
snowflake!(
    /// A role inside a guild.
    RoleId
);
