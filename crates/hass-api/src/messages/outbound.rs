//! Client → server messages.
//!
//! Serialization rules: compact JSON, lower_snake_case keys, `None` fields
//! omitted entirely (the server rejects explicit nulls in some payloads).

use serde::Serialize;
use serde_json::Value;

/// Every message the client can put on the wire.
///
/// The `type` tag is derived from the variant name, so the enum *is* the
/// wire format. Commands carry the id the session assigned at enqueue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Auth {
        access_token: String,
    },
    GetConfig {
        id: u64,
    },
    GetStates {
        id: u64,
    },
    CallService {
        id: u64,
        domain: String,
        service: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        service_data: Option<Value>,
    },
    SubscribeEvents {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },
    Ping {
        id: u64,
    },
}

impl OutboundMessage {
    /// The message id, for commands. The auth message carries none.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Auth { .. } => None,
            Self::GetConfig { id }
            | Self::GetStates { id }
            | Self::CallService { id, .. }
            | Self::SubscribeEvents { id, .. }
            | Self::Ping { id } => Some(*id),
        }
    }
}

/// Command discriminant recorded in the pending-commands map so the reader
/// knows how to decode the polymorphic `result` field of the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    GetConfig,
    GetStates,
    CallService,
    SubscribeEvents,
    Ping,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetConfig => "get_config",
            Self::GetStates => "get_states",
            Self::CallService => "call_service",
            Self::SubscribeEvents => "subscribe_events",
            Self::Ping => "ping",
        }
    }
}

/// An unsent command. The session assigns the id when it enqueues the
/// command, so callers never see or choose ids.
#[derive(Debug, Clone)]
pub enum CommandRequest {
    GetConfig,
    GetStates,
    CallService {
        domain: String,
        service: String,
        service_data: Option<Value>,
    },
    SubscribeEvents {
        event_type: Option<String>,
    },
    Ping,
}

impl CommandRequest {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::GetConfig => CommandKind::GetConfig,
            Self::GetStates => CommandKind::GetStates,
            Self::CallService { .. } => CommandKind::CallService,
            Self::SubscribeEvents { .. } => CommandKind::SubscribeEvents,
            Self::Ping => CommandKind::Ping,
        }
    }

    /// Attach the assigned id and produce the wire message.
    pub fn into_message(self, id: u64) -> OutboundMessage {
        match self {
            Self::GetConfig => OutboundMessage::GetConfig { id },
            Self::GetStates => OutboundMessage::GetStates { id },
            Self::CallService {
                domain,
                service,
                service_data,
            } => OutboundMessage::CallService {
                id,
                domain,
                service,
                service_data,
            },
            Self::SubscribeEvents { event_type } => {
                OutboundMessage::SubscribeEvents { id, event_type }
            }
            Self::Ping => OutboundMessage::Ping { id },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_message_has_no_id() {
        let msg = OutboundMessage::Auth {
            access_token: "TOKEN".into(),
        };
        assert_eq!(msg.id(), None);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"auth","access_token":"TOKEN"}"#
        );
    }

    #[test]
    fn call_service_omits_absent_service_data() {
        let msg = CommandRequest::CallService {
            domain: "light".into(),
            service: "turn_off".into(),
            service_data: None,
        }
        .into_message(7);

        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            text,
            r#"{"type":"call_service","id":7,"domain":"light","service":"turn_off"}"#
        );
    }

    #[test]
    fn call_service_includes_present_service_data() {
        let msg = CommandRequest::CallService {
            domain: "light".into(),
            service: "turn_on".into(),
            service_data: Some(json!({ "entity_id": "light.kitchen" })),
        }
        .into_message(3);

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "call_service");
        assert_eq!(value["service_data"]["entity_id"], "light.kitchen");
    }

    #[test]
    fn subscribe_events_without_filter_is_minimal() {
        let msg = CommandRequest::SubscribeEvents { event_type: None }.into_message(2);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"subscribe_events","id":2}"#
        );
    }

    #[test]
    fn command_kinds_match_wire_types() {
        let pairs = [
            (CommandRequest::GetConfig, "get_config"),
            (CommandRequest::GetStates, "get_states"),
            (CommandRequest::Ping, "ping"),
        ];
        for (cmd, expected) in pairs {
            assert_eq!(cmd.kind().as_str(), expected);
            let value: serde_json::Value =
                serde_json::to_value(cmd.into_message(1)).unwrap();
            assert_eq!(value["type"], expected);
        }
    }
}
