//! Application command definitions and routing.
//!
//! [`CommandTable`] pairs each registered command definition with the
//! function that handles it. The table is built once at startup; its
//! definitions are what gets sent to Discord on READY.

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::bot::Bot;
use crate::handlers::{self, HandlerError, UNKNOWN_COMMAND_REPLY};
use crate::types::*;

pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), HandlerError>>;

/// Signature every command handler has.
pub type CommandHandler = for<'a> fn(&'a Bot, &'a Interaction) -> HandlerFuture<'a>;

pub const RESTART: &str = "restart";
pub const DEIDIOTIZE: &str = "De-idiotize";
pub const DEIDIOTIZE_EPHEMERAL: &str = "De-idiotize_Ephemeral";

// ---------------------------------------------------------------------------
// CommandTable
// ---------------------------------------------------------------------------

/// Command definitions with their handlers, in registration order.
#[derive(Default)]
pub struct CommandTable {
    entries: Vec<(ApplicationCommand, CommandHandler)>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. A later registration with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, command: ApplicationCommand, handler: CommandHandler) -> &mut Self {
        match self.entries.iter_mut().find(|(c, _)| c.name == command.name) {
            Some(slot) => *slot = (command, handler),
            None => self.entries.push((command, handler)),
        }
        self
    }

    /// Definitions to register with Discord.
    pub fn definitions(&self) -> Vec<ApplicationCommand> {
        self.entries.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn handler(&self, name: &str) -> Option<CommandHandler> {
        self.entries
            .iter()
            .find(|(c, _)| c.name == name)
            .map(|(_, h)| *h)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Route an interaction to its handler.
    pub async fn dispatch(&self, bot: &Bot, interaction: &Interaction) -> Result<(), HandlerError> {
        match interaction.kind {
            InteractionType::Ping => {
                let pong = InteractionResponse {
                    kind: InteractionCallbackType::Pong,
                    data: None,
                };
                bot.http
                    .create_interaction_response(&interaction.id, &interaction.token, &pong)
                    .await?;
                Ok(())
            }
            InteractionType::ApplicationCommand => {
                let name = interaction
                    .command_name()
                    .ok_or(HandlerError::MissingData("command name"))?;

                match self.handler(name) {
                    Some(handler) => {
                        debug!(command = name, interaction_id = %interaction.id, "dispatching command");
                        handler(bot, interaction).await
                    }
                    None => {
                        warn!(command = name, "no handler registered for command");
                        let data = InteractionCallbackData::text(UNKNOWN_COMMAND_REPLY)
                            .with_flags(MessageFlags::EPHEMERAL);
                        handlers::reply(bot, interaction, data).await
                    }
                }
            }
            other => {
                debug!(kind = ?other, "ignoring unsupported interaction type");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(c, _)| &c.name))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Default commands
// ---------------------------------------------------------------------------

/// `/restart` plus the two De-idiotize message context menus.
pub fn default_commands() -> CommandTable {
    let everywhere = [
        InteractionContextType::Guild,
        InteractionContextType::BotDm,
        InteractionContextType::PrivateChannel,
    ];
    let any_install = [IntegrationType::GuildInstall, IntegrationType::UserInstall];

    let mut table = CommandTable::new();
    table
        .register(
            ApplicationCommandBuilder::chat_input(RESTART, "Restart the bot")
                .integration_types([IntegrationType::GuildInstall])
                .contexts([InteractionContextType::Guild])
                .build(),
            handlers::restart,
        )
        .register(
            ApplicationCommandBuilder::message(DEIDIOTIZE)
                .integration_types(any_install)
                .contexts(everywhere)
                .build(),
            handlers::deidiotize,
        )
        .register(
            ApplicationCommandBuilder::message(DEIDIOTIZE_EPHEMERAL)
                .integration_types(any_install)
                .contexts(everywhere)
                .build(),
            handlers::deidiotize_ephemeral,
        );
    table
}
