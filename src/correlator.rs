//! Reply correlation: a registry from frame tag to waiting request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::WaError;
use crate::types::ServerMessage;

type Reply = Result<ServerMessage, WaError>;
type Registry = Arc<Mutex<HashMap<String, Waiter>>>;

#[derive(Debug)]
struct Waiter {
    serial: u64,
    requires_phone: bool,
    tx: oneshot::Sender<Reply>,
}

/// Registry of pending requests keyed by tag.
pub struct Correlator {
    pending: Registry,
    next_serial: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_serial: AtomicU64::new(0),
        }
    }

    /// Insert a waiter for `tag`. Fails if the tag already has one.
    pub fn register(&self, tag: &str, requires_phone: bool) -> Result<PendingReply, WaError> {
        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(tag) {
            return Err(WaError::DuplicateTag(tag.to_string()));
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        pending.insert(
            tag.to_string(),
            Waiter {
                serial,
                requires_phone,
                tx,
            },
        );
        Ok(PendingReply {
            tag: tag.to_string(),
            serial,
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Resolve the waiter for `tag`.
    ///
    /// Returns the message back when no waiter claims it, so the caller can
    /// publish it as a tag event instead.
    pub fn deliver(&self, tag: &str, message: ServerMessage) -> Option<ServerMessage> {
        let waiter = self.pending.lock().unwrap().remove(tag);
        match waiter {
            Some(w) => match w.tx.send(Ok(message)) {
                Ok(()) => None,
                Err(Ok(message)) => Some(message),
                Err(Err(_)) => None,
            },
            None => Some(message),
        }
    }

    /// Reject every waiter with a clone of `error` and clear the registry.
    pub fn fail_all(&self, error: WaError) {
        let drained: Vec<Waiter> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, w)| w).collect()
        };
        for waiter in drained {
            let _ = waiter.tx.send(Err(error.clone()));
        }
    }

    /// Remove the waiter for `tag` without resolving it.
    pub fn cancel(&self, tag: &str) {
        self.pending.lock().unwrap().remove(tag);
    }

    /// Whether any pending request needs the phone to be reachable.
    pub fn has_phone_waiters(&self) -> bool {
        self.pending
            .lock()
            .unwrap()
            .values()
            .any(|w| w.requires_phone)
    }

    /// Get count of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered waiter. Dropping it cancels the registration.
#[derive(Debug)]
pub struct PendingReply {
    tag: String,
    serial: u64,
    rx: oneshot::Receiver<Reply>,
    pending: Registry,
}

impl PendingReply {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Wait for the reply or the socket-close rejection.
    pub async fn wait(mut self) -> Reply {
        match (&mut self.rx).await {
            Ok(reply) => reply,
            Err(_) => Err(WaError::NotConnected),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap();
        // Tags can recur across reconnects; only remove our own registration.
        if pending.get(&self.tag).is_some_and(|w| w.serial == self.serial) {
            pending.remove(&self.tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(status: u16) -> ServerMessage {
        ServerMessage::Json(json!({"status": status}))
    }

    #[tokio::test]
    async fn test_register_and_deliver() {
        let correlator = Correlator::new();
        let reply = correlator.register("7.--0", false).unwrap();

        assert_eq!(correlator.pending_count(), 1);
        assert!(correlator.deliver("7.--0", msg(200)).is_none());
        assert_eq!(reply.wait().await.unwrap(), msg(200));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let correlator = Correlator::new();
        let _first = correlator.register("7.--0", false).unwrap();
        assert_eq!(
            correlator.register("7.--0", false).unwrap_err(),
            WaError::DuplicateTag("7.--0".to_string())
        );
    }

    #[test]
    fn test_unclaimed_delivery_returns_message() {
        let correlator = Correlator::new();
        assert_eq!(correlator.deliver("9.--9", msg(200)), Some(msg(200)));
    }

    #[tokio::test]
    async fn test_fail_all_rejects_and_clears() {
        let correlator = Correlator::new();
        let a = correlator.register("1.--0", false).unwrap();
        let b = correlator.register("1.--1", true).unwrap();

        correlator.fail_all(WaError::Timeout);

        assert_eq!(a.wait().await.unwrap_err(), WaError::Timeout);
        assert_eq!(b.wait().await.unwrap_err(), WaError::Timeout);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_cancel_removes_waiter() {
        let correlator = Correlator::new();
        let _reply = correlator.register("2.--0", false).unwrap();
        correlator.cancel("2.--0");
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.deliver("2.--0", msg(200)), Some(msg(200)));
    }

    #[test]
    fn test_drop_cancels_registration() {
        let correlator = Correlator::new();
        {
            let _reply = correlator.register("3.--0", false).unwrap();
            assert_eq!(correlator.pending_count(), 1);
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_drop_spares_reregistered_tag() {
        let correlator = Correlator::new();
        let stale = correlator.register("4.--0", false).unwrap();
        correlator.cancel("4.--0");
        let _fresh = correlator.register("4.--0", false).unwrap();
        drop(stale);
        assert_eq!(correlator.pending_count(), 1);
    }

    #[test]
    fn test_phone_waiter_tracking() {
        let correlator = Correlator::new();
        assert!(!correlator.has_phone_waiters());

        let _plain = correlator.register("5.--0", false).unwrap();
        assert!(!correlator.has_phone_waiters());

        let phone = correlator.register("5.--1", true).unwrap();
        assert!(correlator.has_phone_waiters());

        drop(phone);
        assert!(!correlator.has_phone_waiters());
    }
}
