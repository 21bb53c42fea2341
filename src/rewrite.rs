//! Text-rewrite client for Google's Gemini `generateContent` endpoint.
//!
//! One request in, one string out. Every failure (missing key, transport
//! fault, non-2xx status, unexpected JSON) comes back as a [`RewriteError`]
//! whose `Display` is safe to show to end users: the API key only ever
//! travels in the `x-goog-api-key` header.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GeminiConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed directive prepended to every rewrite request.
pub const SYSTEM_INSTRUCTIONS: &str = concat!(
    "You are a technical support editor. Your task is to rewrite the user's text into ",
    "clear, concise, and grammatically correct standard language (keep the same language as input). ",
    "Guidelines:\n",
    "1. Fix spelling, grammar, and punctuation.\n",
    "2. Remove slang, aggression, and excessive abbreviations.\n",
    "3. IDENTITY PRESERVATION (CRITICAL): Detect usernames, nicknames, exact error codes, or file paths. ",
    "Keep them EXACTLY as they appear (case-sensitive) and WRAP THEM in single backticks (`). ",
    "Example: 'user_name' -> `user_name`. This prevents Discord formatting issues.\n",
    "4. FORMATTING: Use Discord Markdown to improve readability where useful. ",
    "Use **bold** for emphasis or key concepts. Use bullet points (*) if the input contains a list of items or steps.\n",
    "5. Output ONLY the rewritten text.\n\n",
    "Examples:\n",
    "Input: ahoj Pepik123 jak se mas\n",
    "Output: Ahoj `Pepik123`, jak se máš?\n",
    "Input: ban user xX_Destroyer_Xx pls because he griefed\n",
    "Output: Please ban user `xX_Destroyer_Xx` because he **griefed**.\n",
    "Input: mam problem nejde mi mc, pise to error 500 a nevim heslo\n",
    "Output: Mám problém:\n* Nejde mi **Minecraft**\n* Píše to `error 500`\n* Nevím heslo",
);

/// Separates the system instructions from the user's text.
pub const INPUT_SEPARATOR: &str = "\n\nInput Text:\n";

const API_KEY_HEADER: &str = "x-goog-api-key";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a rewrite produced no text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    /// No API key configured. No request was sent.
    #[error("[Error: API Key is missing. Check your .env file]")]
    MissingApiKey,

    /// The request never produced an HTTP response (DNS, refused, TLS, ...).
    #[error("[Error: Could not reach Google AI: {0}]")]
    Transport(String),

    /// Non-2xx status; carries the raw body for diagnostics.
    #[error("[API Error {status}]: {body}")]
    Api { status: u16, body: String },

    /// 2xx status but `candidates[0].content.parts[0].text` was not there.
    #[error("[Error: Unexpected response format from Google AI]")]
    UnexpectedFormat,
}

/// `Ok` carries the rewritten text verbatim.
pub type RewriteResult = Result<String, RewriteError>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

impl GenerateContentRequest {
    /// A request with exactly one content holding exactly one text part.
    fn single_prompt(text: String) -> Self {
        Self {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text }],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// `candidates[0].content.parts[0].text`, if every step is present.
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

/// Build the single prompt part sent to the model.
///
/// The user's text is appended byte for byte, without trimming.
pub fn build_prompt(input: &str) -> String {
    let mut prompt =
        String::with_capacity(SYSTEM_INSTRUCTIONS.len() + INPUT_SEPARATOR.len() + input.len());
    prompt.push_str(SYSTEM_INSTRUCTIONS);
    prompt.push_str(INPUT_SEPARATOR);
    prompt.push_str(input);
    prompt
}

// ---------------------------------------------------------------------------
// RewriteClient
// ---------------------------------------------------------------------------

/// Calls the generative-language endpoint to rewrite user text.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct RewriteClient {
    http: reqwest::Client,
    api_key: Option<Secret<String>>,
    endpoint: String,
}

impl RewriteClient {
    /// Create a client from the Gemini section of the configuration.
    pub fn new(config: &GeminiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Like [`RewriteClient::new`] but reuses an existing `reqwest` client.
    pub fn with_client(http: reqwest::Client, config: &GeminiConfig) -> Self {
        Self {
            http,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint_url.clone(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Rewrite `input` with a single `generateContent` call.
    ///
    /// Never panics and never retries.
    pub async fn rewrite(&self, input: &str) -> RewriteResult {
        let Some(api_key) = self.api_key.as_ref() else {
            warn!("rewrite requested but no API key is configured");
            return Err(RewriteError::MissingApiKey);
        };

        let mut key_header = HeaderValue::from_str(api_key.expose_secret()).map_err(|_| {
            RewriteError::Transport("API key is not a valid header value".to_string())
        })?;
        key_header.set_sensitive(true);

        let payload = GenerateContentRequest::single_prompt(build_prompt(input));

        debug!(
            endpoint = %self.endpoint,
            input_len = input.len(),
            "sending rewrite request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(API_KEY_HEADER, key_header)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(status = status.as_u16(), "rewrite endpoint returned an error status");
            return Err(RewriteError::Api {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_slice::<GenerateContentResponse>(&body) {
            Ok(parsed) => parsed.into_text().ok_or_else(|| {
                warn!("rewrite response has no candidate text");
                RewriteError::UnexpectedFormat
            }),
            Err(e) => {
                warn!(error = %e, "rewrite response is not the expected JSON");
                Err(RewriteError::UnexpectedFormat)
            }
        }
    }

    /// Rewrite and collapse the outcome into a displayable string: either the
    /// rewritten text or the bracketed diagnostic.
    pub async fn rewrite_to_message(&self, input: &str) -> String {
        match self.rewrite(input).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        }
    }
}

impl std::fmt::Debug for RewriteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteClient")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

fn transport_error(e: reqwest::Error) -> RewriteError {
    RewriteError::Transport(e.without_url().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
