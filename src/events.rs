//! Typed gateway events.
//!
//! The gateway module deserialises dispatch payloads into [`GatewayEvent`] so
//! the bot loop pattern-matches on typed data instead of raw
//! `(op, t, serde_json::Value)` tuples.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RESUME: u8 = 6;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// IDENTIFY succeeded; the bot is ready.
    Ready(Box<ReadyEvent>),

    /// A RESUME was accepted and missed events have been replayed.
    Resumed,

    /// A slash command or context-menu command was invoked.
    InteractionCreate(Box<Interaction>),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9). `true` if it can be resumed.
    InvalidSession(bool),

    /// Anything we don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
    },
}

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// Never fails: unrecognised or unparsable events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            OP_DISPATCH => Self::parse_dispatch(payload.t, payload.d),
            OP_HEARTBEAT => GatewayEvent::HeartbeatRequest,
            OP_RECONNECT => GatewayEvent::Reconnect,
            OP_INVALID_SESSION => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            OP_HEARTBEAT_ACK => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown {
                event_name: payload.t,
                op,
            },
        }
    }

    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let unknown = |event_name: Option<String>| GatewayEvent::Unknown {
            event_name,
            op: OP_DISPATCH,
        };

        if event_name.as_deref() == Some("RESUMED") {
            return GatewayEvent::Resumed;
        }

        let Some(d) = data else {
            return unknown(event_name);
        };

        let parsed = match event_name.as_deref() {
            Some(name @ "READY") => parse_typed::<ReadyEvent>(name, d)
                .map(|ready| GatewayEvent::Ready(Box::new(ready))),
            Some(name @ "INTERACTION_CREATE") => parse_typed::<Interaction>(name, d)
                .map(|interaction| GatewayEvent::InteractionCreate(Box::new(interaction))),
            _ => None,
        };

        parsed.unwrap_or_else(|| unknown(event_name))
    }

    /// Short name for logging.
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::Resumed => "RESUMED",
            GatewayEvent::InteractionCreate(_) => "INTERACTION_CREATE",
            GatewayEvent::HeartbeatAck => "HEARTBEAT_ACK",
            GatewayEvent::HeartbeatRequest => "HEARTBEAT",
            GatewayEvent::Reconnect => "RECONNECT",
            GatewayEvent::InvalidSession(_) => "INVALID_SESSION",
            GatewayEvent::Unknown {
                event_name: Some(name),
                ..
            } => name.as_str(),
            GatewayEvent::Unknown { .. } => "UNKNOWN",
        }
    }
}

fn parse_typed<T: DeserializeOwned>(name: &str, data: serde_json::Value) -> Option<T> {
    serde_json::from_value(data)
        .map_err(|e| warn!(event = name, error = %e, "failed to parse dispatch payload"))
        .ok()
}
