//! Bot runtime: shared state, gateway bridge and the async event loop.
//!
//! [`run`] owns the process lifetime. It connects the gateway, records the
//! bot's identity on READY, registers commands once per session, and hands
//! every interaction to the [`CommandTable`] on its own task so a slow
//! rewrite never stalls the gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tracing::{error, info, trace, warn};

use crate::commands::{default_commands, CommandTable};
use crate::config::{Config, ConfigError};
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, GatewayError, Intents};
use crate::http::DiscordHttpClient;
use crate::rewrite::RewriteClient;
use crate::types::{Interaction, ReadyEvent};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Core bot identity and lifecycle state.
#[derive(Debug)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    pub bot_user_id: Option<String>,
    /// The application ID (set on READY).
    pub application_id: Option<String>,
    /// Whether commands have been registered this session.
    pub commands_registered: bool,
    pub start_time: Instant,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            bot_user_id: None,
            application_id: None,
            commands_registered: false,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Everything a handler needs, shared across interaction tasks.
pub struct Bot {
    pub http: DiscordHttpClient,
    pub rewriter: RewriteClient,
    pub owner_id: Option<u64>,
    commands: CommandTable,
    state: Mutex<BotState>,
    /// Masked API key shown in the startup banner.
    api_key_hint: Option<String>,
    shutdown: Notify,
    shutdown_requested: AtomicBool,
}

impl Bot {
    pub fn new(http: DiscordHttpClient, rewriter: RewriteClient, owner_id: Option<u64>) -> Self {
        Self {
            http,
            rewriter,
            owner_id,
            commands: default_commands(),
            state: Mutex::new(BotState::default()),
            api_key_hint: None,
            shutdown: Notify::new(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Build the production bot from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let http = DiscordHttpClient::new(config.discord_token()?.clone());
        let mut bot = Self::new(http, RewriteClient::new(&config.gemini), config.owner_id);
        bot.api_key_hint = config.gemini.masked_api_key();
        Ok(bot)
    }

    pub fn with_commands(mut self, commands: CommandTable) -> Self {
        self.commands = commands;
        self
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    // ------------------------------------------------------------------
    // Shutdown signalling
    // ------------------------------------------------------------------

    /// Ask the event loop to stop. Safe to call from any task, any number of times.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolves once [`request_shutdown`](Self::request_shutdown) has been called.
    pub async fn shutdown_requested(&self) {
        loop {
            let notified = self.shutdown.notified();
            if self.is_shutdown_requested() {
                return;
            }
            notified.await;
        }
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    /// Record identity, log the startup banner and register commands once.
    pub async fn on_ready(&self, ready: &ReadyEvent) {
        info!(
            user = %ready.user.tag(),
            user_id = %ready.user.id,
            guilds = ready.guilds.len(),
            "logged in to Discord"
        );
        info!("Discord token loaded");
        match &self.api_key_hint {
            Some(hint) => info!(api_key = %hint, endpoint = %self.rewriter.endpoint(), "Google API key loaded"),
            None if self.rewriter.has_api_key() => info!("Google API key loaded"),
            None => warn!("GOOGLE_API_KEY is missing, rewrites will report an error"),
        }
        if self.owner_id.is_none() {
            warn!("BOT_OWNER_ID is not set, /restart is disabled");
        }

        let app_id = ready.application.id.clone();
        let already_registered = {
            let mut state = self.state.lock().await;
            state.bot_user_id = Some(ready.user.id.clone());
            state.application_id = Some(app_id.clone());
            state.commands_registered
        };

        if already_registered {
            return;
        }

        match self
            .http
            .bulk_overwrite_global_commands(&app_id, &self.commands.definitions())
            .await
        {
            Ok(registered) => {
                info!(count = registered.len(), "registered global commands");
                self.state.lock().await.commands_registered = true;
            }
            Err(e) => warn!(error = %e, "failed to register global commands"),
        }
    }

    pub async fn handle_interaction(&self, interaction: &Interaction) {
        if let Err(e) = self.commands.dispatch(self, interaction).await {
            error!(
                error = %e,
                command = interaction.command_name().unwrap_or("?"),
                interaction_id = %interaction.id,
                "failed to handle interaction"
            );
        }
    }

    pub async fn uptime(&self) -> Duration {
        self.state.lock().await.start_time.elapsed()
    }

    pub async fn commands_registered(&self) -> bool {
        self.state.lock().await.commands_registered
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("http", &self.http)
            .field("rewriter", &self.rewriter)
            .field("owner_id", &self.owner_id)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Gateway intents
// ---------------------------------------------------------------------------

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
pub fn gateway_intents() -> Intents {
    Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES | Intents::MESSAGE_CONTENT
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Connect to Discord and serve commands until the gateway gives up or a
/// shutdown is requested.
pub async fn run(config: Config) -> Result<(), BotError> {
    let token = config.discord_token()?.clone();
    let bot = Arc::new(Bot::from_config(&config)?);
    info!(
        model = %config.gemini.model,
        activity_log = %config.activity_log.display(),
        "starting bot"
    );

    serve(bot, GatewayConfig::new(token, gateway_intents())).await
}

/// Event loop for an already-built bot.
///
/// A requested shutdown (`/restart`) is `Ok`. A gateway that stops on its own
/// reports why as [`BotError::Gateway`].
pub async fn serve(bot: Arc<Bot>, gateway_config: GatewayConfig) -> Result<(), BotError> {
    let mut gw = gateway::connect(gateway_config);
    info!("gateway connecting, entering event loop");

    let mut shutdown_requested = false;
    loop {
        let event = tokio::select! {
            event = gw.events.recv() => event,
            _ = bot.shutdown_requested() => {
                info!("shutdown requested");
                shutdown_requested = true;
                break;
            }
        };

        let Some(event) = event else {
            warn!("event stream ended, bot shutting down");
            break;
        };

        match event {
            GatewayEvent::Ready(ready) => bot.on_ready(&ready).await,

            GatewayEvent::InteractionCreate(interaction) => {
                let bot = Arc::clone(&bot);
                tokio::spawn(async move {
                    bot.handle_interaction(&interaction).await;
                });
            }

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => trace!(event = %name, "unhandled gateway event"),

            // Heartbeats, reconnects and invalid sessions are handled by the gateway driver.
            _ => {}
        }
    }

    let result = if shutdown_requested {
        gw.shutdown();
        Ok(())
    } else {
        gw.join().await.map_err(BotError::from)
    };

    let uptime_secs = bot.uptime().await.as_secs();
    info!(uptime_secs, "bot stopped");
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
