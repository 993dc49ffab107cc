//! Core types: JIDs, connection lifecycle states and event payloads.

pub mod events;
pub mod jid;

pub use events::{
    ConnectionState, DisconnectReason, Event, MessageLogEntry, ReconnectMode, ServerMessage,
};
pub use jid::{servers, ParseJIDError, JID};
