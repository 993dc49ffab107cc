//! WhatsApp JID (Jabber ID) type.
//!
//! JIDs identify users, groups and broadcast lists. The pre-multidevice wire
//! uses plain `user@server` pairs without agent or device parts.

use std::fmt;
use std::str::FromStr;

/// Known JID servers on WhatsApp
pub mod servers {
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const GROUP: &str = "g.us";
    pub const LEGACY_USER: &str = "c.us";
    pub const BROADCAST: &str = "broadcast";
}

/// JID represents a WhatsApp user, group or broadcast address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JID {
    pub user: String,
    pub server: String,
}

impl JID {
    /// Creates a new JID.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// JID for a phone number on the default user server.
    pub fn from_phone(phone: impl Into<String>) -> Self {
        Self::new(phone, servers::DEFAULT_USER)
    }

    /// Returns true if this JID addresses a group.
    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    /// Returns true if this is a broadcast list (not status broadcast).
    pub fn is_broadcast_list(&self) -> bool {
        self.server == servers::BROADCAST && self.user != "status"
    }

    /// Returns true if the JID is empty (no server).
    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }

    /// The `c.us` spelling some legacy endpoints reply with.
    pub fn to_legacy(&self) -> Self {
        if self.server == servers::DEFAULT_USER {
            Self::new(self.user.clone(), servers::LEGACY_USER)
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for JID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

/// Error type for JID parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseJIDError(pub String);

impl fmt::Display for ParseJIDError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse JID: {}", self.0)
    }
}

impl std::error::Error for ParseJIDError {}

impl FromStr for JID {
    type Err = ParseJIDError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            None => Ok(JID::new("", s)),
            Some((user, server)) => {
                if server.contains('@') {
                    return Err(ParseJIDError("unexpected number of @ signs".to_string()));
                }
                Ok(JID::new(user, server))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_jid() {
        let jid: JID = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::DEFAULT_USER);
    }

    #[test]
    fn test_group_jid() {
        let jid: JID = "123456789-1234567890@g.us".parse().unwrap();
        assert_eq!(jid.user, "123456789-1234567890");
        assert!(jid.is_group());
    }

    #[test]
    fn test_jid_to_string() {
        let jid = JID::from_phone("1234567890");
        assert_eq!(jid.to_string(), "1234567890@s.whatsapp.net");
    }

    #[test]
    fn test_legacy_spelling() {
        let jid = JID::from_phone("15551234567");
        assert_eq!(jid.to_legacy().to_string(), "15551234567@c.us");
    }

    #[test]
    fn test_server_only() {
        let jid: JID = "g.us".parse().unwrap();
        assert!(jid.user.is_empty());
        assert_eq!(jid.to_string(), "g.us");
    }
}
