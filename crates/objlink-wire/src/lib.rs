//! Wire format for the objlink channel protocol.
//!
//! Every message is `[1-byte type tag][fixed-order fields]`; values are
//! `[1-byte variant tag][payload]`. Integers are fixed-width big-endian,
//! strings are length-prefixed UTF-8. There is no partial-message recovery:
//! a malformed tag or truncated stream is fatal for the session.

pub mod codec;
pub mod error;
pub mod message;
pub mod value;

pub use codec::{WireConfig, WireReader, WireWriter, DEFAULT_MAX_BATCH, DEFAULT_MAX_STRING};
pub use error::{Result, WireError};
pub use message::{
    Message, MessageType, ModuleRequest, PROTOCOL_VERSION_CURRENT, PROTOCOL_VERSION_OLDEST,
};
pub use value::{Handle, ObjectRef, Origin, Value, ROOT_HANDLE};
