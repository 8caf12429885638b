//! Server → client envelope and the typed replies the reader produces.

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::models::{HassConfig, HassEvent, HassState};

/// The `type` discriminant of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    AuthRequired,
    AuthOk,
    AuthInvalid,
    Result,
    Event,
    Pong,
    /// Anything this client does not understand. Logged and discarded.
    #[serde(other)]
    Unknown,
}

/// One parsed inbound message.
///
/// The `result` field stays an undecoded subtree until the reader has
/// looked up which command the reply answers; only then is the expected
/// shape known.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: InboundKind,

    #[serde(default)]
    pub id: Option<u64>,

    #[serde(default)]
    pub success: Option<bool>,

    /// Lazily-typed `result` subtree.
    #[serde(default)]
    pub result: Option<Box<RawValue>>,

    /// Payload of `event`-typed messages.
    #[serde(default)]
    pub event: Option<HassEvent>,

    /// Human-readable detail on `auth_invalid`.
    #[serde(default)]
    pub message: Option<String>,

    /// Server version advertised on `auth_required` / `auth_ok`.
    #[serde(default)]
    pub ha_version: Option<String>,
}

impl InboundMessage {
    /// The `result` subtree, treating a literal JSON `null` as absent.
    pub fn result_value(&self) -> Option<&RawValue> {
        self.result.as_deref().filter(|raw| raw.get() != "null")
    }
}

/// A reply delivered to the caller that issued the matching command.
#[derive(Debug)]
pub struct CommandReply {
    pub id: u64,
    pub success: Option<bool>,
    pub payload: ReplyPayload,
}

/// Reply payload, decoded to the shape the issuing command expects.
///
/// `call_service` and `subscribe_events` results are deliberately left
/// raw; callers that care can decode them.
#[derive(Debug)]
pub enum ReplyPayload {
    Config(HassConfig),
    States(Vec<HassState>),
    Raw(Option<Box<RawValue>>),
    Pong,
}

// ── Tests ────────────────────────────────────────────────────────────
