//! Discord interactions endpoint.
//!
//! Discord POSTs every slash command invocation here (after the signature
//! middleware has verified it). All replies are ephemeral, so errors are
//! returned as private messages rather than HTTP failures.
//!
//! - `gen_key` - owner only, mints a permanent key
//! - `time_key minutes:<int>` - owner only, mints a temporary key
//! - `redeem key:<string>` - anyone, redeems a key for the buyer role

use axum::{Json, extract::State};

use crate::{
    error::AppError,
    models::interaction::{
        INTERACTION_APPLICATION_COMMAND, INTERACTION_PING, Interaction, InteractionResponse,
    },
    services::lifecycle::{Caller, KeyService, Redeemer},
    state::AppState,
};

/// Interaction handler.
///
/// # Response
///
/// - `PING` → `{"type": 1}`
/// - application command → ephemeral channel message with the outcome
/// - anything else → 400
pub async fn handle_interaction(
    State(state): State<AppState>,
    Json(interaction): Json<Interaction>,
) -> Result<Json<InteractionResponse>, AppError> {
    match interaction.kind {
        INTERACTION_PING => Ok(Json(InteractionResponse::pong())),
        INTERACTION_APPLICATION_COMMAND => {
            let content = match run_command(&state.keys, &interaction).await {
                Ok(content) => content,
                Err(e) => {
                    log_failure(&e);
                    e.user_message()
                }
            };
            Ok(Json(InteractionResponse::ephemeral(content)))
        }
        other => Err(AppError::InvalidRequest(format!(
            "Unsupported interaction type {other}"
        ))),
    }
}

async fn run_command(keys: &KeyService, interaction: &Interaction) -> Result<String, AppError> {
    let data = interaction
        .data
        .as_ref()
        .ok_or_else(|| AppError::InvalidRequest("Missing command data".to_string()))?;
    let guild_id = interaction.guild_id.clone().ok_or(AppError::NotInGuild)?;
    let member = interaction.member.as_ref().ok_or(AppError::NotInGuild)?;

    match data.name.as_str() {
        "gen_key" => {
            let caller = Caller {
                user_id: member.user.id.clone(),
                guild_id,
            };
            let code = keys.generate_permanent_key(&caller).await?;

            Ok(format!("Generated key: `{code}`"))
        }
        "time_key" => {
            let minutes = interaction
                .integer_option("minutes")
                .ok_or_else(|| AppError::InvalidRequest("Missing `minutes` option.".to_string()))?;
            let caller = Caller {
                user_id: member.user.id.clone(),
                guild_id,
            };
            let code = keys.generate_temporary_key(&caller, minutes).await?;

            Ok(format!(
                "Temporary key generated: `{code}`\nIt is valid for {minutes} minutes once redeemed."
            ))
        }
        "redeem" => {
            let code = interaction
                .string_option("key")
                .ok_or_else(|| AppError::InvalidRequest("Missing `key` option.".to_string()))?;
            let redeemer = Redeemer {
                user_id: member.user.id.clone(),
                guild_id,
                roles: member.roles.clone(),
            };
            keys.redeem(&redeemer, code.trim()).await?;

            Ok("Thank you for Buying".to_string())
        }
        other => Err(AppError::UnknownCommand(other.to_string())),
    }
}

fn log_failure(error: &AppError) {
    match error {
        AppError::GenerationFailed(_)
        | AppError::GrantFailed(_)
        | AppError::Platform(_)
        | AppError::Store(_) => tracing::error!("Command failed: {:?}", error),
        _ => tracing::info!("Command rejected: {}", error),
    }
}
