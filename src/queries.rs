//! User-level query helpers.
//!
//! Higher-level features extend the engine as free functions over
//! [`Connection`] instead of wrapping or subclassing it. These cover the
//! handful of operations the engine itself needs; richer surfaces live in
//! their own crates built the same way.

use serde_json::{json, Value};

use crate::conn::{Connection, QueryOptions};
use crate::error::WaError;
use crate::http;
use crate::socket::framer::{flags, Metric};
use crate::types::{ServerMessage, JID};

/// Round-trip check that the paired phone answers.
pub async fn admin_test(conn: &Connection) -> Result<ServerMessage, WaError> {
    conn.query(QueryOptions::json(json!(["admin", "test"])).requires_phone(false))
        .await
}

/// Block a contact. Mutations on the same JID are serialized.
pub async fn block_user(conn: &Connection, jid: &JID) -> Result<ServerMessage, WaError> {
    set_block(conn, jid, "add").await
}

/// Undo [`block_user`].
pub async fn unblock_user(conn: &Connection, jid: &JID) -> Result<ServerMessage, WaError> {
    set_block(conn, jid, "remove").await
}

async fn set_block(conn: &Connection, jid: &JID, action: &str) -> Result<ServerMessage, WaError> {
    let jid = jid.to_string();
    let _guard = conn.jid_locks().lock(&jid).await;
    conn.set_query(
        vec![json!(["block", {"type": action}, [["user", {"jid": jid}, null]]])],
        Some((Metric::Block, flags::IGNORE)),
        None,
    )
    .await
}

/// Whether a phone number is registered, asked over the open connection.
pub async fn query_exists(conn: &Connection, phone: &str) -> Result<Option<JID>, WaError> {
    let reply = conn
        .query(
            QueryOptions::json(json!(["query", "exist", phone]))
                .expect_2xx(true)
                .requires_phone(false),
        )
        .await?;
    Ok(parse_exist_reply(&reply))
}

/// [`query_exists`] over HTTP when no socket is up.
pub async fn query_exists_noconn(phone: &str) -> Result<Option<JID>, WaError> {
    http::is_on_whatsapp_noconn(phone).await
}

fn parse_exist_reply(reply: &ServerMessage) -> Option<JID> {
    reply
        .json()?
        .get("jid")
        .and_then(Value::as_str)
        .and_then(|jid| jid.parse().ok())
}
