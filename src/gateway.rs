//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY (or RESUME)
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - reconnect with exponential backoff
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The rest of the crate consumes a channel of [`GatewayEvent`] values and
//! never touches `tokio_tungstenite` directly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::{GatewayEvent, OP_HEARTBEAT, OP_HELLO, OP_IDENTIFY, OP_RESUME};
use crate::types::GatewayPayload;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: usize = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Consecutive failed connections before the driver gives up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 256;

bitflags! {
    /// Gateway intents bitmask sent with IDENTIFY.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intents: u32 {
        const GUILDS = 1 << 0;
        const GUILD_MESSAGES = 1 << 9;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("timed out waiting for HELLO")]
    HelloTimeout,
    #[error("stream ended before HELLO")]
    ClosedBeforeHello,
    #[error("expected HELLO (op 10), got op {0}")]
    UnexpectedOpcode(u8),
    #[error("HELLO missing heartbeat_interval")]
    MissingHeartbeatInterval,
    #[error("expected a text frame, got {0}")]
    UnexpectedFrame(String),
    #[error("invalid gateway payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("gateway closed the connection with fatal code {0}")]
    FatalClose(u16),
    #[error("gave up after {0} failed reconnect attempts")]
    ReconnectsExhausted(u32),
    #[error("gateway driver stopped unexpectedly: {0}")]
    Driver(String),
}

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window limiter for outbound gateway messages.
struct SendRateLimiter {
    sent: VecDeque<Instant>,
    budget: usize,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: usize, window: Duration) -> Self {
        Self {
            sent: VecDeque::with_capacity(budget),
            budget,
            window,
        }
    }

    /// How long to wait before the next send. Does not record anything.
    fn delay(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.sent.len() < self.budget {
            return None;
        }
        self.sent
            .front()
            .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
    }

    fn record(&mut self, now: Instant) {
        self.prune(now);
        self.sent.push_back(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            self.sent.pop_front();
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: Secret<String>,
    pub intents: Intents,
    /// Initial gateway URL; Discord's resume URL replaces it after READY.
    pub url: String,
}

impl GatewayConfig {
    pub fn new(token: Secret<String>, intents: Intents) -> Self {
        Self {
            token,
            intents,
            url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionState {
    /// Session id and last sequence, when the session can be resumed.
    fn resume_info(&self) -> Option<(&str, u64)> {
        Some((self.session_id.as_deref()?, self.sequence?))
    }

    fn connect_url(&self, default_url: &str) -> String {
        with_gateway_params(self.resume_gateway_url.as_deref().unwrap_or(default_url))
    }

    /// Forget the session but keep the resume URL for the next attempt.
    fn invalidate(&mut self) {
        self.session_id = None;
        self.sequence = None;
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, WsMessage>>>;
type WsSource = SplitStream<WsStream>;
type SharedLimiter = Arc<Mutex<SendRateLimiter>>;
type SharedSession = Arc<Mutex<SessionState>>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// A running gateway connection.
///
/// Dropping the handle closes the event channel, which stops the driver at
/// the next dispatched event; [`GatewayHandle::shutdown`] stops it at once.
pub struct GatewayHandle {
    pub events: mpsc::Receiver<GatewayEvent>,
    driver: JoinHandle<Result<(), GatewayError>>,
}

impl GatewayHandle {
    pub fn shutdown(self) {
        self.driver.abort();
    }

    /// Wait for the driver to stop and report why it did.
    ///
    /// `Ok` means the event channel was closed on our side; an error means the
    /// gateway refused us or could not be reached again.
    pub async fn join(self) -> Result<(), GatewayError> {
        match self.driver.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(GatewayError::Driver(e.to_string())),
        }
    }
}

/// Spawn the gateway driver and return a handle to its event stream.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let driver = tokio::spawn(gateway_driver(config, event_tx));
    GatewayHandle { events, driver }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal(u16),
    EventChannelClosed,
}

async fn gateway_driver(
    config: GatewayConfig,
    event_tx: mpsc::Sender<GatewayEvent>,
) -> Result<(), GatewayError> {
    let session: SharedSession = Arc::new(Mutex::new(SessionState::default()));
    let mut attempts: u32 = 0;

    loop {
        let reason = match run_session(&config, &session, &event_tx, &mut attempts).await {
            Ok(reason) => reason,
            Err(e) => {
                error!(error = %e, "gateway session failed");
                DisconnectReason::ShouldResume
            }
        };

        match reason {
            DisconnectReason::ShouldResume => info!("will attempt RESUME"),
            DisconnectReason::ShouldReidentify => {
                info!("session invalidated, will re-IDENTIFY");
                session.lock().await.invalidate();
            }
            DisconnectReason::Fatal(code) => {
                error!(close_code = code, "fatal gateway error, shutting down");
                return Err(GatewayError::FatalClose(code));
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return Ok(());
            }
        }

        attempts += 1;
        if attempts > MAX_RECONNECT_ATTEMPTS {
            error!("exceeded max reconnect attempts, giving up");
            return Err(GatewayError::ReconnectsExhausted(MAX_RECONNECT_ATTEMPTS));
        }
        let backoff = backoff_delay(attempts);
        warn!(
            delay_ms = backoff.as_millis() as u64,
            attempt = attempts,
            "reconnecting after backoff"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// One WebSocket connection, from connect to disconnect. `attempts` is reset
/// once the session is established (READY or RESUMED), not on connect.
async fn run_session(
    config: &GatewayConfig,
    session: &SharedSession,
    event_tx: &mpsc::Sender<GatewayEvent>,
    attempts: &mut u32,
) -> Result<DisconnectReason, GatewayError> {
    let url = session.lock().await.connect_url(&config.url);
    info!(url = %url, "connecting to Discord gateway");

    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;

    let (ws_write, mut ws_read) = ws_stream.split();
    let ws_write: WsSink = Arc::new(Mutex::new(ws_write));
    let limiter: SharedLimiter = Arc::new(Mutex::new(SendRateLimiter::new(
        SEND_BUDGET_MAX,
        SEND_BUDGET_WINDOW,
    )));

    let heartbeat_interval = read_hello(&mut ws_read).await?;
    info!(
        interval_ms = heartbeat_interval.as_millis() as u64,
        "received HELLO"
    );

    let (opening, label) = match session.lock().await.resume_info() {
        Some((session_id, seq)) => (resume_payload(&config.token, session_id, seq), "RESUME"),
        None => (identify_payload(config), "IDENTIFY"),
    };
    rate_limited_send(&ws_write, &limiter, &opening).await?;
    info!("sent {label}");

    let heartbeat = tokio::spawn(heartbeat_task(
        heartbeat_interval,
        Arc::clone(&ws_write),
        Arc::clone(&limiter),
        Arc::clone(session),
    ));

    let reason = read_loop(&mut ws_read, &ws_write, &limiter, event_tx, session, attempts).await;

    heartbeat.abort();
    if let Err(e) = ws_write.lock().await.send(WsMessage::Close(None)).await {
        debug!(error = %e, "close frame not sent");
    }

    Ok(reason)
}

async fn heartbeat_task(
    interval: Duration,
    ws_write: WsSink,
    limiter: SharedLimiter,
    session: SharedSession,
) {
    // First beat after `interval * jitter`, jitter ∈ [0, 1).
    tokio::time::sleep(interval.mul_f64(rand::random::<f64>())).await;

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let seq = session.lock().await.sequence;
        if let Err(e) = rate_limited_send(&ws_write, &limiter, &heartbeat_payload(seq)).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(?seq, "sent heartbeat");
    }
}

async fn read_loop(
    ws_read: &mut WsSource,
    ws_write: &WsSink,
    limiter: &SharedLimiter,
    event_tx: &mpsc::Sender<GatewayEvent>,
    session: &SharedSession,
    attempts: &mut u32,
) -> DisconnectReason {
    while let Some(frame) = ws_read.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(close)) => {
                let code = close.map(|c| u16::from(c.code));
                warn!(close_code = ?code, "WebSocket closed by server");
                return code.map_or(DisconnectReason::ShouldResume, classify_close);
            }
            // Ping/Pong/Binary: ignore.
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket read error");
                return DisconnectReason::ShouldResume;
            }
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                continue;
            }
        };

        if let Some(s) = payload.s {
            session.lock().await.sequence = Some(s);
        }

        let event = GatewayEvent::from_payload(payload);

        if session_established(&event) {
            *attempts = 0;
        }

        match &event {
            GatewayEvent::Ready(ready) => {
                let mut s = session.lock().await;
                s.session_id = Some(ready.session_id.clone());
                s.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                info!(
                    session_id = %ready.session_id,
                    user = %ready.user.username,
                    "gateway READY"
                );
            }
            GatewayEvent::Resumed => info!("session resumed"),
            GatewayEvent::HeartbeatRequest => {
                let seq = session.lock().await.sequence;
                if let Err(e) = rate_limited_send(ws_write, limiter, &heartbeat_payload(seq)).await
                {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                continue;
            }
            GatewayEvent::HeartbeatAck => {
                debug!("heartbeat acknowledged");
                continue;
            }
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect (op 7)");
                return DisconnectReason::ShouldResume;
            }
            GatewayEvent::InvalidSession(resumable) => {
                warn!(resumable, "session invalidated (op 9)");
                let (pause, reason) = if *resumable {
                    (Duration::from_secs(2), DisconnectReason::ShouldResume)
                } else {
                    (Duration::from_secs(3), DisconnectReason::ShouldReidentify)
                };
                tokio::time::sleep(pause).await;
                return reason;
            }
            _ => {}
        }

        if event_tx.send(event).await.is_err() {
            return DisconnectReason::EventChannelClosed;
        }
    }

    info!("WebSocket stream ended");
    DisconnectReason::ShouldResume
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn read_hello(stream: &mut WsSource) -> Result<Duration, GatewayError> {
    let frame = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .map_err(|_| GatewayError::HelloTimeout)?
        .ok_or(GatewayError::ClosedBeforeHello)??;

    let text = match frame {
        WsMessage::Text(t) => t,
        other => return Err(GatewayError::UnexpectedFrame(format!("{other:?}"))),
    };

    parse_hello(&text)
}

fn parse_hello(text: &str) -> Result<Duration, GatewayError> {
    let payload: GatewayPayload = serde_json::from_str(text)?;
    if payload.op != OP_HELLO {
        return Err(GatewayError::UnexpectedOpcode(payload.op));
    }
    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
        .ok_or(GatewayError::MissingHeartbeatInterval)
}

fn identify_payload(config: &GatewayConfig) -> serde_json::Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": config.token.expose_secret(),
            "properties": {
                "os": std::env::consts::OS,
                "browser": "deidiotize",
                "device": "deidiotize"
            },
            "intents": config.intents.bits(),
        }
    })
}

fn resume_payload(token: &Secret<String>, session_id: &str, seq: u64) -> serde_json::Value {
    json!({
        "op": OP_RESUME,
        "d": {
            "token": token.expose_secret(),
            "session_id": session_id,
            "seq": seq,
        }
    })
}

fn heartbeat_payload(seq: Option<u64>) -> serde_json::Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

/// Only READY or RESUMED prove the gateway accepted us.
fn session_established(event: &GatewayEvent) -> bool {
    matches!(event, GatewayEvent::Ready(_) | GatewayEvent::Resumed)
}

/// Close codes that mean reconnecting is pointless, or that the session is gone.
fn classify_close(code: u16) -> DisconnectReason {
    match code {
        4004 => error!("authentication failed (close 4004)"),
        4010 => error!("invalid shard (close 4010)"),
        4011 => error!("sharding required (close 4011)"),
        4012 => error!("invalid API version (close 4012)"),
        4013 => error!("invalid intents (close 4013)"),
        4014 => error!("disallowed intents (close 4014)"),
        // Invalid seq or session timed out.
        4007 | 4009 => return DisconnectReason::ShouldReidentify,
        _ => return DisconnectReason::ShouldResume,
    }
    DisconnectReason::Fatal(code)
}

/// Append `v=10&encoding=json` unless the URL already carries a version.
fn with_gateway_params(url: &str) -> String {
    if url.contains("v=10") {
        url.to_string()
    } else if url.contains('?') {
        format!("{url}&v=10&encoding=json")
    } else {
        format!("{url}/?v=10&encoding=json")
    }
}

async fn rate_limited_send(
    ws_write: &WsSink,
    limiter: &SharedLimiter,
    payload: &serde_json::Value,
) -> Result<(), GatewayError> {
    loop {
        let delay = limiter.lock().await.delay(Instant::now());
        match delay {
            Some(d) => {
                debug!(
                    delay_ms = d.as_millis() as u64,
                    "gateway send rate-limited, waiting"
                );
                tokio::time::sleep(d).await;
            }
            None => break,
        }
    }
    limiter.lock().await.record(Instant::now());

    let text = serde_json::to_string(payload)?;
    ws_write.lock().await.send(WsMessage::Text(text)).await?;
    Ok(())
}

/// Exponential backoff with ±25% jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.pow(attempt.min(6));
    let jittered = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jittered.min(60_000.0) as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
