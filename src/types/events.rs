//! Connection lifecycle types and event payloads.
//!
//! These are published on the event bus when the connection changes state
//! and delivered to waiters when replies arrive.

use serde_json::Value;

use crate::binary::Node;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Reason attached to a connection teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller closed the connection.
    Intentional,
    /// The idle debounce fired.
    TimedOut,
    /// The server closed the socket.
    Close,
    /// The server invalidated the session mid-stream (599).
    BadSession,
    /// Another client took over the session.
    Replaced,
    /// The stored credentials were rejected.
    InvalidSession,
    /// A transport-level error tore the socket down.
    Error,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectReason::Intentional => "intentional",
            DisconnectReason::TimedOut => "timed out",
            DisconnectReason::Close => "closed",
            DisconnectReason::BadSession => "bad session",
            DisconnectReason::Replaced => "replaced",
            DisconnectReason::InvalidSession => "invalid session",
            DisconnectReason::Error => "error",
        };
        f.write_str(s)
    }
}

/// Reconnect policy applied after an unexpected disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectMode {
    /// Never reconnect automatically.
    Off,
    /// Reconnect unless the session was replaced or invalidated.
    OnConnectionLost,
    /// Reconnect on everything except credential invalidation.
    #[default]
    OnAllErrors,
}

impl ReconnectMode {
    /// Whether a disconnect for `reason` should schedule a reconnect.
    pub fn should_reconnect(self, reason: DisconnectReason) -> bool {
        match self {
            ReconnectMode::Off => false,
            ReconnectMode::OnConnectionLost => !matches!(
                reason,
                DisconnectReason::Replaced | DisconnectReason::InvalidSession
            ),
            ReconnectMode::OnAllErrors => reason != DisconnectReason::InvalidSession,
        }
    }
}

/// A decoded server payload, either a JSON frame or an unsealed binary node.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Json(Value),
    Node(Node),
}

impl ServerMessage {
    /// HTTP-like `status` field of a JSON object reply, if present.
    pub fn status(&self) -> Option<u16> {
        match self {
            ServerMessage::Json(Value::Object(map)) => match map.get("status") {
                Some(Value::Number(n)) => n.as_u64().map(|n| n as u16),
                Some(Value::String(s)) => s.parse().ok(),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match self {
            ServerMessage::Json(v) => Some(v),
            ServerMessage::Node(_) => None,
        }
    }

    pub fn node(&self) -> Option<&Node> {
        match self {
            ServerMessage::Node(n) => Some(n),
            ServerMessage::Json(_) => None,
        }
    }
}

/// Payloads published on the event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection reached `Open`.
    Open,
    /// The connection closed.
    Close {
        reason: DisconnectReason,
        is_reconnecting: bool,
    },
    /// The underlying socket went away.
    WsClose { reason: DisconnectReason },
    /// The phone-connectivity estimate flipped.
    PhoneChange { connected: bool },
    /// A server payload on a tag-specific or domain-update topic.
    Message(ServerMessage),
}

/// One captured frame in the optional message ring log.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageLogEntry {
    pub tag: String,
    pub payload: String,
    pub from_me: bool,
    pub binary_flags: Option<(u8, u8)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reconnect_decision_table() {
        use DisconnectReason::*;
        use ReconnectMode::*;

        assert!(!Off.should_reconnect(Close));
        assert!(!Off.should_reconnect(Error));

        assert!(OnConnectionLost.should_reconnect(Close));
        assert!(OnConnectionLost.should_reconnect(TimedOut));
        assert!(!OnConnectionLost.should_reconnect(Replaced));
        assert!(!OnConnectionLost.should_reconnect(InvalidSession));

        assert!(OnAllErrors.should_reconnect(Close));
        assert!(OnAllErrors.should_reconnect(Replaced));
        assert!(OnAllErrors.should_reconnect(BadSession));
        assert!(!OnAllErrors.should_reconnect(InvalidSession));
    }

    #[test]
    fn status_extraction() {
        let ok = ServerMessage::Json(json!({"status": 200}));
        assert_eq!(ok.status(), Some(200));

        let stringly = ServerMessage::Json(json!({"status": "599"}));
        assert_eq!(stringly.status(), Some(599));

        let none = ServerMessage::Json(json!(["Conn", {}]));
        assert_eq!(none.status(), None);
    }
}
