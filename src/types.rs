//! Typed representations of the Discord API objects this bot touches.
//!
//! These mirror the Discord API docs closely enough to deserialize gateway
//! events and build REST bodies without passing `serde_json::Value` around
//! the rest of the codebase. Fields the bot never reads are left out; serde
//! ignores them on the way in.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Discord IDs are snowflakes transmitted as strings in JSON.
pub type Snowflake = String;

bitflags! {
    /// Message flags relevant to interaction responses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u64 {
        /// Only the invoking user can see the message.
        const EPHEMERAL = 1 << 6;
    }
}

// ---------------------------------------------------------------------------
// Gateway payload (the envelope that wraps every WS message)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Option<serde_json::Value>,
    pub s: Option<u64>,
    pub t: Option<String>,
}

// ---------------------------------------------------------------------------
// User / member
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    pub global_name: Option<String>,
}

impl User {
    /// `Username#Discriminator` or just `Username` for the new username system.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some("0") | None => self.username.clone(),
            Some(disc) => format!("{}#{}", self.username, disc),
        }
    }

    /// The name Discord shows in the UI: global display name, else username.
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuildMember {
    pub user: Option<User>,
    pub nick: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub author: User,
    /// Empty for attachment-only messages or without the MESSAGE_CONTENT intent.
    #[serde(default)]
    pub content: String,
    pub timestamp: Option<String>,
}

// ---------------------------------------------------------------------------
// Embed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

// ---------------------------------------------------------------------------
// READY event payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyEvent {
    pub v: u8,
    pub user: User,
    pub session_id: String,
    pub resume_gateway_url: String,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub application: ReadyApplication,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadyApplication {
    pub id: Snowflake,
    pub flags: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

// ---------------------------------------------------------------------------
// Interactions
// ---------------------------------------------------------------------------

/// Top-level interaction received via INTERACTION_CREATE.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Interaction {
    pub id: Snowflake,
    pub application_id: Snowflake,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub data: Option<InteractionData>,
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    /// Present in guilds.
    pub member: Option<GuildMember>,
    /// Present in DMs and private channels.
    pub user: Option<User>,
    pub token: String,
}

impl Interaction {
    /// The user who triggered the interaction.
    pub fn author(&self) -> Option<&User> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
    }

    /// Name of the invoked application command.
    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref()?.name.as_deref()
    }

    /// For message context-menu commands: the message the menu was opened on.
    pub fn target_message(&self) -> Option<&Message> {
        let data = self.data.as_ref()?;
        let target_id = data.target_id.as_ref()?;
        data.resolved.as_ref()?.messages.get(target_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum InteractionType {
    Ping = 1,
    ApplicationCommand = 2,
    MessageComponent = 3,
    ApplicationCommandAutocomplete = 4,
    ModalSubmit = 5,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InteractionData {
    pub id: Option<Snowflake>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<CommandType>,
    /// For context-menu commands: the targeted user or message.
    pub target_id: Option<Snowflake>,
    pub resolved: Option<ResolvedData>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolvedData {
    #[serde(default)]
    pub messages: HashMap<Snowflake, Message>,
}

// ---------------------------------------------------------------------------
// Interaction responses (what we send back)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: InteractionCallbackType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<InteractionCallbackData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum InteractionCallbackType {
    Pong = 1,
    ChannelMessageWithSource = 4,
    DeferredChannelMessageWithSource = 5,
}

/// Body of an interaction callback, and of a follow-up webhook message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionCallbackData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Vec<Embed>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

impl InteractionCallbackData {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: Some(vec![embed]),
            ..Default::default()
        }
    }

    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = if flags.is_empty() {
            None
        } else {
            Some(flags.bits())
        };
        self
    }
}

// ---------------------------------------------------------------------------
// Application command registration payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CommandType {
    ChatInput = 1,
    User = 2,
    Message = 3,
}

/// Where a command can be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum IntegrationType {
    GuildInstall = 0,
    UserInstall = 1,
}

/// Where a command can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum InteractionContextType {
    Guild = 0,
    BotDm = 1,
    PrivateChannel = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Snowflake>,
    pub name: String,
    /// Must be empty for context-menu commands.
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: CommandType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub integration_types: Vec<IntegrationType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<InteractionContextType>,
}

/// Ergonomic builder for [`ApplicationCommand`].
///
/// ```ignore
/// let cmd = ApplicationCommandBuilder::message("De-idiotize")
///     .integration_types([IntegrationType::GuildInstall, IntegrationType::UserInstall])
///     .build();
/// ```
pub struct ApplicationCommandBuilder {
    inner: ApplicationCommand,
}

impl ApplicationCommandBuilder {
    /// Start building a CHAT_INPUT (slash) command.
    pub fn chat_input(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(CommandType::ChatInput, name.into(), description.into())
    }

    /// Start building a MESSAGE context-menu command.
    pub fn message(name: impl Into<String>) -> Self {
        Self::with_kind(CommandType::Message, name.into(), String::new())
    }

    fn with_kind(kind: CommandType, name: String, description: String) -> Self {
        Self {
            inner: ApplicationCommand {
                id: None,
                name,
                description,
                kind,
                integration_types: Vec::new(),
                contexts: Vec::new(),
            },
        }
    }

    pub fn integration_types(mut self, types: impl IntoIterator<Item = IntegrationType>) -> Self {
        self.inner.integration_types = types.into_iter().collect();
        self
    }

    pub fn contexts(mut self, contexts: impl IntoIterator<Item = InteractionContextType>) -> Self {
        self.inner.contexts = contexts.into_iter().collect();
        self
    }

    pub fn build(self) -> ApplicationCommand {
        self.inner
    }
}

// ---------------------------------------------------------------------------
// Rate-limit info parsed from response headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
    pub is_global: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_test::{assert_ser_tokens, Token};

    fn message_command_interaction() -> serde_json::Value {
        json!({
            "id": "1200000000000000001",
            "application_id": "1100000000000000000",
            "type": 2,
            "token": "interaction-token",
            "guild_id": "900",
            "channel_id": "1000",
            "member": {
                "nick": null,
                "user": {
                    "id": "42",
                    "username": "nelly",
                    "discriminator": "0",
                    "avatar": null,
                    "global_name": "Nelly"
                },
                "roles": []
            },
            "data": {
                "id": "1300",
                "name": "De-idiotize",
                "type": 3,
                "target_id": "555",
                "resolved": {
                    "messages": {
                        "555": {
                            "id": "555",
                            "channel_id": "1000",
                            "author": {
                                "id": "7",
                                "username": "pepa",
                                "discriminator": "0",
                                "avatar": null,
                                "global_name": null
                            },
                            "content": "ahoj Pepik123 jak se mas",
                            "timestamp": "2025-01-31T18:04:12.000000+00:00",
                            "embeds": [],
                            "attachments": []
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn interaction_resolves_target_message() {
        let interaction: Interaction =
            serde_json::from_value(message_command_interaction()).expect("valid interaction");

        assert_eq!(interaction.kind, InteractionType::ApplicationCommand);
        assert_eq!(interaction.command_name(), Some("De-idiotize"));
        let target = interaction.target_message().expect("resolved target");
        assert_eq!(target.id, "555");
        assert_eq!(target.content, "ahoj Pepik123 jak se mas");
        assert_eq!(target.author.display_name(), "pepa");
    }

    #[test]
    fn interaction_author_prefers_member_then_user() {
        let mut raw = message_command_interaction();
        let guild: Interaction = serde_json::from_value(raw.clone()).expect("valid");
        assert_eq!(guild.author().map(|u| u.id.as_str()), Some("42"));

        raw["member"] = serde_json::Value::Null;
        raw["user"] = json!({
            "id": "43",
            "username": "dm-user",
            "discriminator": "0",
            "avatar": null
        });
        let dm: Interaction = serde_json::from_value(raw).expect("valid");
        assert_eq!(dm.author().map(|u| u.id.as_str()), Some("43"));
    }

    #[test]
    fn target_message_absent_without_resolved_data() {
        let mut raw = message_command_interaction();
        raw["data"]["resolved"] = serde_json::Value::Null;
        let interaction: Interaction = serde_json::from_value(raw).expect("valid");
        assert!(interaction.target_message().is_none());
    }

    #[test]
    fn user_tag_and_display_name() {
        let user: User = serde_json::from_value(json!({
            "id": "1",
            "username": "legacy",
            "discriminator": "0420",
            "avatar": null,
            "global_name": null
        }))
        .expect("valid user");
        assert_eq!(user.tag(), "legacy#0420");
        assert_eq!(user.display_name(), "legacy");

        let modern: User = serde_json::from_value(json!({
            "id": "2",
            "username": "modern",
            "discriminator": "0",
            "avatar": null,
            "global_name": "Modern Person"
        }))
        .expect("valid user");
        assert_eq!(modern.tag(), "modern");
        assert_eq!(modern.display_name(), "Modern Person");
    }

    #[test]
    fn callback_type_serializes_as_integer() {
        assert_ser_tokens(
            &InteractionCallbackType::DeferredChannelMessageWithSource,
            &[Token::U8(5)],
        );
        assert_ser_tokens(&CommandType::Message, &[Token::U8(3)]);
    }

    #[test]
    fn ephemeral_flag_is_bit_six() {
        assert_eq!(MessageFlags::EPHEMERAL.bits(), 64);
        let data = InteractionCallbackData::text("hi").with_flags(MessageFlags::EPHEMERAL);
        assert_eq!(data.flags, Some(64));
        let public = InteractionCallbackData::text("hi").with_flags(MessageFlags::empty());
        assert_eq!(public.flags, None);
    }

    #[test]
    fn callback_data_omits_unset_fields() {
        let value = serde_json::to_value(InteractionCallbackData::text("hello"))
            .expect("serializable");
        assert_eq!(value, json!({ "content": "hello" }));
    }

    #[test]
    fn message_command_builder_has_empty_description() {
        let cmd = ApplicationCommandBuilder::message("De-idiotize")
            .integration_types([IntegrationType::GuildInstall, IntegrationType::UserInstall])
            .contexts([InteractionContextType::Guild, InteractionContextType::BotDm])
            .build();
        let value = serde_json::to_value(&cmd).expect("serializable");
        assert_eq!(
            value,
            json!({
                "name": "De-idiotize",
                "description": "",
                "type": 3,
                "integration_types": [0, 1],
                "contexts": [0, 1]
            })
        );
    }

    #[test]
    fn embed_builder_sets_fields() {
        let embed = Embed::new()
            .description("body")
            .color(0x3498DB)
            .footer("Original by Pepa");
        let value = serde_json::to_value(&embed).expect("serializable");
        assert_eq!(
            value,
            json!({
                "description": "body",
                "color": 0x3498DB,
                "footer": { "text": "Original by Pepa" }
            })
        );
    }
}
