//! Token dictionary for the binary wire format.
//!
//! Common strings are replaced by a single dictionary byte instead of being
//! sent in full. Bytes above the dictionary range are structural markers.

/// Marker bytes used by the encoder and decoder.
pub const LIST_EMPTY: u8 = 0;
pub const LIST_8: u8 = 248;
pub const LIST_16: u8 = 249;
pub const JID_PAIR: u8 = 250;
pub const HEX_8: u8 = 251;
pub const BINARY_8: u8 = 252;
pub const BINARY_20: u8 = 253;
pub const BINARY_32: u8 = 254;
pub const NIBBLE_8: u8 = 255;

/// Single-byte tokens. Indices 0..=2 are reserved and never emitted.
pub static SINGLE_BYTE_TOKENS: &[&str] = &[
    "", "", "", "200", "400", "404", "500", "501", "502", "action", "add", "after", "archive",
    "author", "available", "battery", "before", "body", "capability", "challenge", "chat", "clear",
    "code", "composing", "contacts", "count", "create", "debug", "delete", "demote", "duplicate",
    "encoding", "error", "false", "filehash", "from", "g.us", "group", "groups_v2", "height", "id",
    "image", "in", "index", "invis", "item", "jid", "kind", "last", "leave", "live", "log", "media",
    "message", "mimetype", "missing", "modify", "name", "notification", "notify", "out", "owner",
    "participant", "paused", "picture", "played", "presence", "preview", "promote", "query", "raw",
    "read", "receipt", "received", "recipient", "recording", "relay", "remove", "response",
    "resume", "retry", "s.whatsapp.net", "seconds", "set", "size", "status", "subject", "subscribe",
    "t", "text", "to", "true", "type", "unarchive", "unavailable", "url", "user", "value", "web",
    "width", "mute", "read_only", "admin", "announce",
];

use std::collections::HashMap;
use std::sync::OnceLock;

/// Get the token index for a string (reverse lookup)
pub fn get_token_index(s: &str) -> Option<u8> {
    static TOKEN_MAP: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();

    let map = TOKEN_MAP.get_or_init(|| {
        let mut m = HashMap::new();
        for (i, token) in SINGLE_BYTE_TOKENS.iter().enumerate() {
            if !token.is_empty() {
                m.insert(*token, i as u8);
            }
        }
        m
    });

    map.get(s).copied()
}

/// Get the string for a token index
pub fn get_token(index: u8) -> Option<&'static str> {
    match index {
        0..=2 => None,
        _ => SINGLE_BYTE_TOKENS.get(index as usize).copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lookup() {
        assert_eq!(get_token(3), Some("200"));
        assert_eq!(get_token(9), Some("action"));
        assert_eq!(get_token(37), Some("group"));
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(get_token_index("action"), Some(9));
        assert_eq!(get_token_index("s.whatsapp.net"), Some(81));
        assert_eq!(get_token_index("group"), Some(37));
    }

    #[test]
    fn test_reserved_indices() {
        assert_eq!(get_token(0), None);
        assert_eq!(get_token_index(""), None);
    }

    #[test]
    fn test_unknown_token() {
        assert_eq!(get_token_index("unknown_string_xyz"), None);
    }
}
