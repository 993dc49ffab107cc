//! Timer handles for the liveness machinery.
//!
//! Three independent timers: the keep-alive installed by the handshake
//! stage, the phone-probe interval, and the idle debounce. The connection
//! spawns the tasks; this type only owns their cancellation tokens so that
//! leaving the open state releases everything in one place.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct Liveness {
    keep_alive: Mutex<Option<CancellationToken>>,
    phone_probe: Mutex<Option<CancellationToken>>,
    debounce: Mutex<Option<CancellationToken>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt the keep-alive started by the handshake stage.
    pub fn install_keep_alive(&self, token: CancellationToken) {
        if let Some(old) = self.keep_alive.lock().unwrap().replace(token) {
            old.cancel();
        }
    }

    pub fn set_phone_probe(&self, token: CancellationToken) {
        if let Some(old) = self.phone_probe.lock().unwrap().replace(token) {
            old.cancel();
        }
    }

    /// Arm the idle debounce, disarming any previous window.
    pub fn arm_debounce(&self, token: CancellationToken) {
        if let Some(old) = self.debounce.lock().unwrap().replace(token) {
            old.cancel();
        }
    }

    /// Cancel all three timers. Called on every exit from the open state.
    pub fn release(&self) {
        for slot in [&self.keep_alive, &self.phone_probe, &self.debounce] {
            if let Some(token) = slot.lock().unwrap().take() {
                token.cancel();
            }
        }
    }

    #[cfg(test)]
    pub fn debounce_armed(&self) -> bool {
        self.debounce.lock().unwrap().is_some()
    }
}
