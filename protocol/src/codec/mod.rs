//! Wire codec: the gossip envelope, the closed message-type set, and the
//! typed payloads. Pure data: no sockets, no clocks it doesn't borrow.

pub mod envelope;
pub mod payload;

pub use envelope::{CodecError, Envelope, ValidationError};
pub use payload::MessageType;
