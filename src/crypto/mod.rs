//! Cryptographic envelope for binary frames.

mod envelope;

pub use envelope::{open, seal, IV_LEN, MAC_LEN};
