//! Binary encoding and decoding of the server's node tree format.
//!
//! The connection engine depends only on the `encode`/`decode` contract and
//! the `Node` type; everything else here is an implementation detail of the
//! wire dialect.

mod decoder;
mod encoder;
mod node;
mod token;

pub use decoder::{decode, DecodeError, Decoder};
pub use encoder::{encode, Encoder};
pub use node::{Attrs, Node, NodeContent};
pub use token::{get_token, get_token_index, SINGLE_BYTE_TOKENS};
