//! Process-wide configuration, read once from the environment.
//!
//! [`Config::from_env`] is a thin wrapper around [`Config::from_lookup`] so
//! tests can feed variables without touching the real process environment.

use std::path::PathBuf;

use secrecy::{ExposeSecret, Secret};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const GEMINI_MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_ACTIVITY_LOG: &str = "bot_activity.log";

pub const DISCORD_TOKEN_VAR: &str = "DISCORD_TOKEN";
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";
pub const BOT_OWNER_ID_VAR: &str = "BOT_OWNER_ID";
pub const GEMINI_MODEL_VAR: &str = "GEMINI_MODEL";
pub const GEMINI_ENDPOINT_VAR: &str = "GEMINI_ENDPOINT";
pub const ACTIVITY_LOG_VAR: &str = "ACTIVITY_LOG";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DISCORD_TOKEN is missing from the environment / .env file")]
    MissingDiscordToken,
}

// ---------------------------------------------------------------------------
// Gemini section
// ---------------------------------------------------------------------------

/// Everything the rewrite client needs.
#[derive(Clone)]
pub struct GeminiConfig {
    /// `None` is a valid, degraded state: rewrites report a configuration error.
    pub api_key: Option<Secret<String>>,
    pub endpoint_url: String,
    pub model: String,
}

impl GeminiConfig {
    /// `generateContent` URL for a model on the public Gemini API.
    pub fn endpoint_for_model(model: &str) -> String {
        format!("{GEMINI_MODELS_URL}/{model}:generateContent")
    }

    /// The API key masked for display, e.g. `AIza...9xQw`.
    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key
            .as_ref()
            .map(|key| mask_secret(key.expose_secret()))
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint_url: Self::endpoint_for_model(DEFAULT_MODEL),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.masked_api_key())
            .field("endpoint_url", &self.endpoint_url)
            .field("model", &self.model)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Config {
    pub discord_token: Option<Secret<String>>,
    pub gemini: GeminiConfig,
    /// Only this user may run owner-only commands. `None` means nobody can.
    pub owner_id: Option<u64>,
    pub activity_log: PathBuf,
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// Call `dotenv::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup. Blank values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let model = get(GEMINI_MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let endpoint_url =
            get(GEMINI_ENDPOINT_VAR).unwrap_or_else(|| GeminiConfig::endpoint_for_model(&model));

        Self {
            discord_token: get(DISCORD_TOKEN_VAR).map(Secret::new),
            gemini: GeminiConfig {
                api_key: get(GOOGLE_API_KEY_VAR).map(Secret::new),
                endpoint_url,
                model,
            },
            owner_id: get(BOT_OWNER_ID_VAR).as_deref().and_then(parse_owner_id),
            activity_log: get(ACTIVITY_LOG_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ACTIVITY_LOG)),
        }
    }

    /// The bot token, required to connect to Discord.
    pub fn discord_token(&self) -> Result<&Secret<String>, ConfigError> {
        self.discord_token
            .as_ref()
            .ok_or(ConfigError::MissingDiscordToken)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "discord_token",
                &self.discord_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("gemini", &self.gemini)
            .field("owner_id", &self.owner_id)
            .field("activity_log", &self.activity_log)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Digits only; anything else (or zero) means "no owner".
fn parse_owner_id(raw: &str) -> Option<u64> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u64>().ok().filter(|&id| id != 0)
}

/// Mask a secret for logs: first and last four characters of long secrets,
/// nothing at all of short ones.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = Config::default();
        assert!(cfg.discord_token.is_none());
        assert!(cfg.gemini.api_key.is_none());
        assert_eq!(cfg.gemini.model, DEFAULT_MODEL);
        assert_eq!(
            cfg.gemini.endpoint_url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(cfg.owner_id, None);
        assert_eq!(cfg.activity_log, PathBuf::from("bot_activity.log"));
    }

    #[test]
    fn reads_all_variables() {
        let cfg = config_from(&[
            ("DISCORD_TOKEN", "discord-token"),
            ("GOOGLE_API_KEY", "AIzaSyExampleKey1234"),
            ("BOT_OWNER_ID", "123456789012345678"),
            ("ACTIVITY_LOG", "/var/log/deidiotize.log"),
        ]);
        assert_eq!(
            cfg.discord_token().map(|t| t.expose_secret().clone()).ok(),
            Some("discord-token".to_string())
        );
        assert_eq!(
            cfg.gemini.api_key.as_ref().map(|k| k.expose_secret().as_str()),
            Some("AIzaSyExampleKey1234")
        );
        assert_eq!(cfg.owner_id, Some(123_456_789_012_345_678));
        assert_eq!(cfg.activity_log, PathBuf::from("/var/log/deidiotize.log"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let cfg = config_from(&[("GOOGLE_API_KEY", "   ")]);
        assert!(cfg.gemini.api_key.is_none());
    }

    #[test]
    fn missing_token_is_an_error() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.discord_token(),
            Err(ConfigError::MissingDiscordToken)
        ));
    }

    #[test]
    fn owner_id_must_be_a_positive_number() {
        assert_eq!(config_from(&[("BOT_OWNER_ID", "abc")]).owner_id, None);
        assert_eq!(config_from(&[("BOT_OWNER_ID", "-5")]).owner_id, None);
        assert_eq!(config_from(&[("BOT_OWNER_ID", "0")]).owner_id, None);
        assert_eq!(config_from(&[("BOT_OWNER_ID", " 42 ")]).owner_id, Some(42));
    }

    #[test]
    fn model_override_changes_derived_endpoint() {
        let cfg = config_from(&[("GEMINI_MODEL", "gemini-2.5-pro")]);
        assert_eq!(cfg.gemini.model, "gemini-2.5-pro");
        assert!(cfg
            .gemini
            .endpoint_url
            .ends_with("/models/gemini-2.5-pro:generateContent"));
    }

    #[test]
    fn explicit_endpoint_wins_over_model() {
        let cfg = config_from(&[
            ("GEMINI_MODEL", "gemini-2.5-pro"),
            ("GEMINI_ENDPOINT", "http://localhost:8080/generate"),
        ]);
        assert_eq!(cfg.gemini.endpoint_url, "http://localhost:8080/generate");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cfg = config_from(&[
            ("DISCORD_TOKEN", "very-secret-discord-token"),
            ("GOOGLE_API_KEY", "AIzaSyVerySecretKey9xQw"),
        ]);
        let output = format!("{cfg:?}");
        assert!(!output.contains("very-secret-discord-token"));
        assert!(!output.contains("AIzaSyVerySecretKey9xQw"));
        assert!(output.contains("AIza...9xQw"));
    }

    #[test]
    fn mask_secret_hides_short_secrets_entirely() {
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcd...mnop");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret(""), "****");
    }
}
