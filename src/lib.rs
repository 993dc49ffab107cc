//! wawire: WhatsApp Web connection engine
//!
//! The authenticated, framed, request/response transport behind a WhatsApp
//! Web client: one WebSocket carrying tagged JSON and encrypted binary
//! frames, a correlator matching replies to requests, liveness probes, and
//! a reconnecting state machine. Pairing, message decoding, media and
//! storage are external collaborators built on the [`Connection`] type and
//! its event bus.
//!
//! ## Modules
//!
//! - `conn` - the connection engine and query façade
//! - `types` - JIDs, lifecycle states and event payloads
//! - `binary` - node tree encoding/decoding
//! - `crypto` - the encrypt-then-MAC frame envelope
//! - `socket` - WebSocket transport and framing
//! - `auth` - credential lifecycle and bootstrap files
//! - `queries` - user-level helpers as free functions

pub mod auth;
pub mod binary;
pub mod bus;
pub mod conn;
pub mod correlator;
pub mod crypto;
pub mod error;
pub mod http;
pub mod options;
pub mod queries;
pub mod socket;
pub mod sync;
pub mod tagger;
pub mod types;

pub use auth::AuthInfo;
pub use binary::{decode, encode, Node};
pub use bus::{topic, EventBus, SubscriptionId};
pub use conn::{Connection, QueryOptions};
pub use error::WaError;
pub use options::ConnectOptions;
pub use socket::framer::{flags, Metric};
pub use types::{
    ConnectionState, DisconnectReason, Event, ReconnectMode, ServerMessage, JID,
};
