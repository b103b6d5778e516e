//! TCP acceptance: one listener, one session per connection.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use objlink_wire::{ModuleRequest, Origin};

use crate::dispatch::{Dispatch, ModuleLoader};
use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::Result;
use crate::handshake::HandshakeConfig;

/// Socket read timeout; sets the granularity of deadline checks between
/// messages.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Endpoint setup shared by both transport directions.
pub(crate) fn session_endpoint(
    role: Origin,
    stream: TcpStream,
    config: EndpointConfig,
) -> Result<Endpoint> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
    let reader = stream.try_clone()?;
    Ok(Endpoint::from_parts(role, reader, stream, config))
}

/// Accepts connections and runs the host side of the handshake on each.
///
/// Sessions are independent; callers typically spawn a thread per accepted
/// endpoint and run `serve` there.
pub struct ChannelListener {
    listener: TcpListener,
    handshake: HandshakeConfig,
    config: EndpointConfig,
}

impl ChannelListener {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            handshake: HandshakeConfig::default(),
            config: EndpointConfig::default(),
        })
    }

    pub fn with_handshake_config(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_endpoint_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// The address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Block for the next connection and establish a session over it.
    ///
    /// `root` is the object the peer addresses with a `Null` target. Returns
    /// the ready endpoint along with the module request it asked for.
    pub fn accept(
        &self,
        root: Arc<dyn Dispatch>,
        loader: &dyn ModuleLoader,
    ) -> Result<(Endpoint, ModuleRequest)> {
        let (stream, peer_addr) = self.listener.accept()?;
        tracing::info!(%peer_addr, "inbound connection");
        let mut endpoint = session_endpoint(Origin::Host, stream, self.config.clone())?;
        endpoint.set_root(root);
        let request = endpoint.accept_session(loader, &self.handshake)?;
        Ok((endpoint, request))
    }
}
