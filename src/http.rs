//! HTTP client for the Discord REST API.
//!
//! All outbound Discord calls go through [`DiscordHttpClient`] so that auth
//! headers, rate-limit back-off, and error handling live in one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
const USER_AGENT_VALUE: &str = concat!("DiscordBot (deidiotize, ", env!("CARGO_PKG_VERSION"), ")");
const MAX_RETRIES: u32 = 5;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Rate-limit tracker (per-bucket)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BucketState {
    remaining: u32,
    resets_at: Instant,
}

#[derive(Debug, Default)]
struct RateLimiter {
    /// Route-key → bucket id mapping.
    route_buckets: HashMap<String, String>,
    /// Bucket id → state.
    buckets: HashMap<String, BucketState>,
    /// While set and in the future, nothing may be sent.
    global_until: Option<Instant>,
}

impl RateLimiter {
    /// How long to wait before sending on `route_key`, if at all.
    fn delay_for(&self, route_key: &str, now: Instant) -> Option<Duration> {
        if let Some(until) = self.global_until.filter(|&until| until > now) {
            return Some(until - now);
        }

        let bucket_id = self.route_buckets.get(route_key)?;
        let state = self.buckets.get(bucket_id)?;

        (state.remaining == 0 && state.resets_at > now).then(|| state.resets_at - now)
    }

    fn update(&mut self, route_key: &str, info: &RateLimitInfo, now: Instant) {
        let reset_in = info
            .reset_after
            .map(|secs| Duration::from_secs_f64(secs.clamp(0.0, MAX_BACKOFF.as_secs_f64())))
            .unwrap_or(Duration::from_secs(1));

        if info.is_global {
            self.global_until = Some(now + reset_in);
        }

        if let Some(bucket) = &info.bucket {
            self.route_buckets
                .insert(route_key.to_string(), bucket.clone());
            self.buckets.insert(
                bucket.clone(),
                BucketState {
                    remaining: info.remaining.unwrap_or(1),
                    resets_at: now + reset_in,
                },
            );
        }
    }
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    RateLimitInfo {
        remaining: get("x-ratelimit-remaining").and_then(|s| s.parse().ok()),
        reset_after: get("x-ratelimit-reset-after").and_then(|s| s.parse().ok()),
        bucket: get("x-ratelimit-bucket").map(str::to_string),
        is_global: get("x-ratelimit-global") == Some("true"),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Non-success status from Discord.
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    /// Transport / network error.
    #[error("HTTP transport error: {0}")]
    Transport(String),
    /// Serialisation error.
    #[error("Serialisation error: {0}")]
    Serde(String),
}

impl From<reqwest::Error> for HttpError {
    /// The request URL carries interaction tokens, so it never reaches the message.
    fn from(e: reqwest::Error) -> Self {
        HttpError::Transport(e.without_url().to_string())
    }
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// A thin, rate-limit-aware HTTP client for the Discord REST API.
///
/// Cheap to clone (internals are behind `Arc`).
#[derive(Clone)]
pub struct DiscordHttpClient {
    client: reqwest::Client,
    token: Secret<String>,
    base_url: String,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl DiscordHttpClient {
    /// Create a new client with the given bot token.
    pub fn new(token: Secret<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Point the client somewhere other than `discord.com` (tests, proxies).
    pub fn with_base_url(token: Secret<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: Arc::new(Mutex::new(RateLimiter::default())),
        }
    }

    // ------------------------------------------------------------------
    // Low-level: the single request method everything funnels through
    // ------------------------------------------------------------------

    /// Send a request to `{base_url}/{path}`.
    ///
    /// `route_key` is used for per-route rate-limit bucketing. It should be a
    /// template like `POST /interactions/callback`.
    ///
    /// Returns the raw response body on success.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        for attempt in 0..=MAX_RETRIES {
            let delay = self.limiter.lock().await.delay_for(route_key, Instant::now());
            if let Some(delay) = delay {
                let delay = delay.min(MAX_BACKOFF);
                debug!(
                    route = route_key,
                    delay_ms = delay.as_millis() as u64,
                    "rate-limit pre-emptive backoff"
                );
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bot {}", self.token.expose_secret()))
                .header(USER_AGENT, USER_AGENT_VALUE);
            if let Some(json) = body {
                req = req.json(json);
            }

            let resp = req.send().await?;
            let status = resp.status();
            let rl_info = parse_rate_limit_headers(resp.headers());

            self.limiter
                .lock()
                .await
                .update(route_key, &rl_info, Instant::now());

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let retry_after = rl_info.reset_after.unwrap_or(1.0).clamp(0.0, 60.0);
                warn!(
                    route = route_key,
                    attempt,
                    retry_after_s = retry_after,
                    global = rl_info.is_global,
                    "rate-limited by Discord, backing off"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                continue;
            }

            let bytes = resp.bytes().await?;

            if status.is_success() {
                return Ok(bytes.to_vec());
            }

            return Err(HttpError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                route: route_key.to_string(),
            });
        }

        Err(HttpError::Api {
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            body: "rate-limited after max retries".to_string(),
            route: route_key.to_string(),
        })
    }

    /// Like [`request`](Self::request) but deserialises the response body as JSON.
    pub async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, route_key, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            let raw = String::from_utf8_lossy(&bytes);
            let preview: String = raw.chars().take(200).collect();
            HttpError::Serde(format!("{}: {}", e, preview))
        })
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    /// Respond to an interaction (initial response).
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError> {
        let path = format!(
            "interactions/{}/{}/callback",
            interaction_id, interaction_token
        );
        let body = serde_json::to_value(response).map_err(|e| HttpError::Serde(e.to_string()))?;
        // 204 No Content on success, nothing to parse.
        self.request(
            Method::POST,
            &path,
            "POST /interactions/callback",
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Send a follow-up message for an interaction that was already
    /// acknowledged (usually with a deferred response).
    pub async fn create_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        message: &InteractionCallbackData,
    ) -> Result<(), HttpError> {
        let path = format!("webhooks/{}/{}", application_id, interaction_token);
        let body = serde_json::to_value(message).map_err(|e| HttpError::Serde(e.to_string()))?;
        self.request(
            Method::POST,
            &path,
            "POST /webhooks/interaction",
            Some(&body),
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Command registration
    // ------------------------------------------------------------------

    /// Register (or overwrite) global application commands.
    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let path = format!("applications/{}/commands", application_id);
        let route_key = format!("PUT /applications/{}/commands", application_id);
        let body = serde_json::to_value(commands).map_err(|e| HttpError::Serde(e.to_string()))?;
        self.request_json(Method::PUT, &path, &route_key, Some(&body))
            .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    static_assertions::assert_impl_all!(DiscordHttpClient: Send, Sync, Clone);

    fn client_for(server: &MockServer) -> DiscordHttpClient {
        DiscordHttpClient::with_base_url(Secret::new("bot-token".to_string()), server.uri())
    }

    // -- RateLimiter -------------------------------------------------------

    #[test]
    fn unknown_route_has_no_delay() {
        let limiter = RateLimiter::default();
        assert!(limiter.delay_for("GET /x", Instant::now()).is_none());
    }

    #[test]
    fn exhausted_bucket_delays_until_reset() {
        let mut limiter = RateLimiter::default();
        let now = Instant::now();
        let info = RateLimitInfo {
            remaining: Some(0),
            reset_after: Some(2.0),
            bucket: Some("abc".into()),
            is_global: false,
        };
        limiter.update("POST /x", &info, now);

        let delay = limiter.delay_for("POST /x", now).expect("should wait");
        assert_eq!(delay, Duration::from_secs(2));
        assert!(limiter.delay_for("POST /other", now).is_none());
        assert!(limiter
            .delay_for("POST /x", now + Duration::from_secs(3))
            .is_none());
    }

    #[test]
    fn bucket_with_remaining_requests_does_not_delay() {
        let mut limiter = RateLimiter::default();
        let now = Instant::now();
        let info = RateLimitInfo {
            remaining: Some(4),
            reset_after: Some(2.0),
            bucket: Some("abc".into()),
            is_global: false,
        };
        limiter.update("POST /x", &info, now);
        assert!(limiter.delay_for("POST /x", now).is_none());
    }

    #[test]
    fn global_limit_applies_to_every_route() {
        let mut limiter = RateLimiter::default();
        let now = Instant::now();
        let info = RateLimitInfo {
            reset_after: Some(1.5),
            is_global: true,
            ..Default::default()
        };
        limiter.update("POST /x", &info, now);
        assert_eq!(
            limiter.delay_for("GET /anything", now),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn parses_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "3".parse().expect("header"));
        headers.insert("x-ratelimit-reset-after", "0.25".parse().expect("header"));
        headers.insert("x-ratelimit-bucket", "b1".parse().expect("header"));
        let info = parse_rate_limit_headers(&headers);
        assert_eq!(info.remaining, Some(3));
        assert_eq!(info.reset_after, Some(0.25));
        assert_eq!(info.bucket.as_deref(), Some("b1"));
        assert!(!info.is_global);
    }

    // -- DiscordHttpClient -------------------------------------------------

    #[tokio::test]
    async fn interaction_response_is_authenticated_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interactions/1/tok/callback"))
            .and(header("authorization", "Bot bot-token"))
            .and(body_json(json!({ "type": 5, "data": { "flags": 64 } })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let response = InteractionResponse {
            kind: InteractionCallbackType::DeferredChannelMessageWithSource,
            data: Some(InteractionCallbackData::default().with_flags(MessageFlags::EPHEMERAL)),
        };
        client_for(&server)
            .create_interaction_response("1", "tok", &response)
            .await
            .expect("callback accepted");
    }

    #[tokio::test]
    async fn followup_posts_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhooks/app/tok"))
            .and(body_json(json!({ "content": "fixed" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1" })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .create_followup_message("app", "tok", &InteractionCallbackData::text("fixed"))
            .await
            .expect("follow-up accepted");
    }

    #[tokio::test]
    async fn api_error_carries_status_body_and_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown interaction"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_followup_message("app", "tok", &InteractionCallbackData::text("x"))
            .await
            .unwrap_err();

        match err {
            HttpError::Api {
                status,
                body,
                route,
            } => {
                assert_eq!(status, 404);
                assert_eq!(body, "Unknown interaction");
                assert_eq!(route, "POST /webhooks/interaction");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("x-ratelimit-reset-after", "0")
                    .set_body_json(json!({ "message": "You are being rate limited." })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let response = InteractionResponse {
            kind: InteractionCallbackType::Pong,
            data: None,
        };
        client_for(&server)
            .create_interaction_response("1", "tok", &response)
            .await
            .expect("second attempt succeeds");

        let received = server.received_requests().await.expect("recording enabled");
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn bulk_overwrite_parses_registered_commands() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/applications/app/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "10", "name": "restart", "description": "Restart the bot", "type": 1 },
                { "id": "11", "name": "De-idiotize", "description": "", "type": 3 }
            ])))
            .mount(&server)
            .await;

        let commands = vec![
            ApplicationCommandBuilder::chat_input("restart", "Restart the bot").build(),
            ApplicationCommandBuilder::message("De-idiotize").build(),
        ];
        let registered = client_for(&server)
            .bulk_overwrite_global_commands("app", &commands)
            .await
            .expect("registration succeeds");

        assert_eq!(registered.len(), 2);
        assert_eq!(registered[1].kind, CommandType::Message);
        assert_eq!(registered[0].id.as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn transport_error_hides_interaction_token() {
        let client = DiscordHttpClient::with_base_url(
            Secret::new("bot-token".to_string()),
            "http://127.0.0.1:1",
        );
        let err = client
            .create_followup_message("app", "live-interaction-token", &InteractionCallbackData::text("x"))
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Transport(_)), "got {err:?}");
        let shown = format!("Something went wrong: {err}");
        assert!(!shown.contains("live-interaction-token"), "{shown}");
        assert!(!shown.contains("/webhooks/"), "{shown}");
    }

    #[test]
    fn debug_redacts_token() {
        let client = DiscordHttpClient::new(Secret::new("abc.def.ghi".to_string()));
        let output = format!("{client:?}");
        assert!(!output.contains("abc.def.ghi"));
    }
}
