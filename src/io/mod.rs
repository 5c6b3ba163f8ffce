//! Byte-level encoding of persisted annotation state.

pub mod codec;
pub mod header;

pub use codec::{decode_state, encode_state, validate};
pub use header::{HeaderCodec, StateHeader};
