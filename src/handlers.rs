//! Command handlers.
//!
//! Each handler receives the shared [`Bot`] and the triggering
//! [`Interaction`], answers it through the Discord REST client and reports
//! REST failures as [`HandlerError`]. Handlers never panic on user input.

use tracing::{info, warn};

use crate::bot::Bot;
use crate::commands::HandlerFuture;
use crate::http::HttpError;
use crate::logging::{log_activity, ActivityEntry};
use crate::types::*;

// ---------------------------------------------------------------------------
// Replies and limits
// ---------------------------------------------------------------------------

pub const EMPTY_MESSAGE_REPLY: &str = "❌ That message doesn't contain any text.";
pub const NOT_OWNER_REPLY: &str = "You must be the bot owner to do that!";
pub const RESTART_REPLY: &str = "Restarting...";
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command.";

/// Discord's cap on message `content`.
pub const MESSAGE_CONTENT_LIMIT: usize = 2000;
/// Discord's cap on an embed description.
pub const EMBED_DESCRIPTION_LIMIT: usize = 4096;
pub const EMBED_COLOR_BLUE: u32 = 0x3498DB;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("interaction is missing {0}")]
    MissingData(&'static str),
}

/// Who gets to see a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Ephemeral,
}

impl Visibility {
    fn flags(self) -> MessageFlags {
        match self {
            Visibility::Public => MessageFlags::empty(),
            Visibility::Ephemeral => MessageFlags::EPHEMERAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// True iff an owner is configured and `user_id` is that owner.
pub fn is_bot_owner(user_id: &str, owner_id: Option<u64>) -> bool {
    match owner_id {
        Some(owner) => user_id.parse::<u64>().is_ok_and(|id| id == owner),
        None => false,
    }
}

/// Cut `text` to at most `limit` characters, marking the cut with `…`.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(limit - 1).collect();
    out.push('…');
    out
}

fn ephemeral_text(content: impl Into<String>) -> InteractionCallbackData {
    InteractionCallbackData::text(content).with_flags(MessageFlags::EPHEMERAL)
}

/// Initial response carrying a message.
pub(crate) async fn reply(
    bot: &Bot,
    interaction: &Interaction,
    data: InteractionCallbackData,
) -> Result<(), HandlerError> {
    let response = InteractionResponse {
        kind: InteractionCallbackType::ChannelMessageWithSource,
        data: Some(data),
    };
    bot.http
        .create_interaction_response(&interaction.id, &interaction.token, &response)
        .await?;
    Ok(())
}

/// Acknowledge now, answer later with a follow-up.
async fn defer(
    bot: &Bot,
    interaction: &Interaction,
    visibility: Visibility,
) -> Result<(), HandlerError> {
    let data = InteractionCallbackData::default().with_flags(visibility.flags());
    let response = InteractionResponse {
        kind: InteractionCallbackType::DeferredChannelMessageWithSource,
        data: (visibility == Visibility::Ephemeral).then_some(data),
    };
    bot.http
        .create_interaction_response(&interaction.id, &interaction.token, &response)
        .await?;
    Ok(())
}

async fn followup(
    bot: &Bot,
    interaction: &Interaction,
    data: &InteractionCallbackData,
) -> Result<(), HandlerError> {
    bot.http
        .create_followup_message(&interaction.application_id, &interaction.token, data)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// /restart
// ---------------------------------------------------------------------------

/// Owner-only: acknowledge, then ask the runtime to stop.
pub fn restart<'a>(bot: &'a Bot, interaction: &'a Interaction) -> HandlerFuture<'a> {
    Box::pin(async move {
        let user = interaction.author().ok_or(HandlerError::MissingData("user"))?;

        if !is_bot_owner(&user.id, bot.owner_id) {
            warn!(user = %user.tag(), user_id = %user.id, "restart denied: not the bot owner");
            return reply(bot, interaction, ephemeral_text(NOT_OWNER_REPLY)).await;
        }

        log_activity(&ActivityEntry::new(user, "/restart", None));
        info!(user = %user.tag(), "restart requested by owner");

        reply(bot, interaction, ephemeral_text(RESTART_REPLY)).await?;
        bot.request_shutdown();
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// De-idiotize context menus
// ---------------------------------------------------------------------------

/// Rewrite the target message and post the result publicly.
pub fn deidiotize<'a>(bot: &'a Bot, interaction: &'a Interaction) -> HandlerFuture<'a> {
    Box::pin(rewrite_target(bot, interaction, Visibility::Public))
}

/// Rewrite the target message and show the result only to the invoker.
pub fn deidiotize_ephemeral<'a>(bot: &'a Bot, interaction: &'a Interaction) -> HandlerFuture<'a> {
    Box::pin(rewrite_target(bot, interaction, Visibility::Ephemeral))
}

async fn rewrite_target(
    bot: &Bot,
    interaction: &Interaction,
    visibility: Visibility,
) -> Result<(), HandlerError> {
    let user = interaction.author().ok_or(HandlerError::MissingData("user"))?;
    let message = interaction
        .target_message()
        .ok_or(HandlerError::MissingData("target message"))?;
    let action = interaction.command_name().unwrap_or("De-idiotize");

    log_activity(&ActivityEntry::new(user, action, Some(message)));

    if message.content.is_empty() {
        return reply(bot, interaction, ephemeral_text(EMPTY_MESSAGE_REPLY)).await;
    }

    defer(bot, interaction, visibility).await?;

    let fixed = bot.rewriter.rewrite_to_message(&message.content).await;

    let data = match visibility {
        Visibility::Public => {
            InteractionCallbackData::text(truncate(&fixed, MESSAGE_CONTENT_LIMIT))
        }
        Visibility::Ephemeral => InteractionCallbackData::embed(
            Embed::new()
                .description(truncate(&fixed, EMBED_DESCRIPTION_LIMIT))
                .color(EMBED_COLOR_BLUE)
                .footer(format!("Original by {}", message.author.display_name())),
        )
        .with_flags(MessageFlags::EPHEMERAL),
    };

    if let Err(e) = followup(bot, interaction, &data).await {
        warn!(error = %e, command = action, "follow-up failed, reporting to user");
        let apology = ephemeral_text(truncate(
            &format!("Something went wrong: {e}"),
            MESSAGE_CONTENT_LIMIT,
        ));
        followup(bot, interaction, &apology).await?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
