//! Object-bridge sessions over a single duplex byte stream.
//!
//! One process (the host) exposes objects; the peer invokes methods on them
//! through small integer handles and may expose objects of its own. Calls
//! are synchronous and half-duplex: while a call awaits its return, inbound
//! calls are serviced reentrantly on the same thread, so calls nest to any
//! depth. Reference lifetime is owner-driven: each side garbage-collects the
//! objects it exposed and notifies the peer with `Free` batches.
//!
//! Wire-level types live in `objlink-wire`; this crate provides the session
//! state machine (`Endpoint`), the reference table, establishment over TCP,
//! and the exception bridge.

pub mod connector;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod table;

pub use connector::{connect, connect_with, ConnectOptions};
pub use dispatch::{
    AcceptAllModules, Dispatch, ModuleLoader, Outcome, SpecialDispatch, Thrown, GET_PROPERTY,
    SET_PROPERTY,
};
pub use endpoint::{Endpoint, EndpointConfig, SessionState, DEFAULT_CALL_TIMEOUT};
pub use error::{BridgedException, ChannelError, Result};
pub use handshake::{HandshakeConfig, DEFAULT_HANDSHAKE_TIMEOUT};
pub use listener::{ChannelListener, READ_POLL_INTERVAL};
pub use table::{ExportTable, PeerHandles};
