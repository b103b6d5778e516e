//! TCP connection: the client side of session establishment.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use objlink_wire::{ModuleRequest, Origin};

use crate::dispatch::Dispatch;
use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::Result;
use crate::handshake::HandshakeConfig;
use crate::listener::session_endpoint;

/// Everything `connect_with` needs beyond the address and module.
#[derive(Default)]
pub struct ConnectOptions {
    pub handshake: HandshakeConfig,
    pub config: EndpointConfig,
    /// Object the host addresses with a `Null` target, for callbacks into
    /// this side. Optional; a client that only calls out can skip it.
    pub root: Option<Arc<dyn Dispatch>>,
}

/// Connect with defaults and request `module`.
pub fn connect(addr: impl ToSocketAddrs, module: ModuleRequest) -> Result<(Endpoint, i32)> {
    connect_with(addr, module, ConnectOptions::default())
}

/// Connect, handshake, and request `module`. Returns the ready endpoint and
/// the negotiated protocol version.
pub fn connect_with(
    addr: impl ToSocketAddrs,
    module: ModuleRequest,
    options: ConnectOptions,
) -> Result<(Endpoint, i32)> {
    let stream = TcpStream::connect(addr)?;
    tracing::info!(peer_addr = %stream.peer_addr()?, "connected");
    let mut endpoint = session_endpoint(Origin::Remote, stream, options.config)?;
    if let Some(root) = options.root {
        endpoint.set_root(root);
    }
    let version = endpoint.connect_session(module, &options.handshake)?;
    Ok((endpoint, version))
}
