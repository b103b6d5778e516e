//! Session establishment: version negotiation and the module exchange.
//!
//! The host reads the client's `Handshake`, picks the newest version both
//! sides speak, then serves exactly one `LoadModule` before the session goes
//! `Ready`. Failures are relayed to the peer (`FatalError`, or an exception
//! `Return` for a refused module) before the local error is raised.

use std::time::Duration;

use objlink_wire::{
    Message, ModuleRequest, Origin, Value, PROTOCOL_VERSION_CURRENT, PROTOCOL_VERSION_OLDEST,
};

use crate::dispatch::ModuleLoader;
use crate::endpoint::{Endpoint, SessionState};
use crate::error::{ChannelError, Result};

/// Default limit on each handshake step.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Version range and identity offered during session establishment.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub oldest_version: i32,
    pub current_version: i32,
    /// Free-form client identification carried in the `Handshake`; the host
    /// only logs it.
    pub client_descriptor: String,
    /// Bound on each handshake read. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            oldest_version: PROTOCOL_VERSION_OLDEST,
            current_version: PROTOCOL_VERSION_CURRENT,
            client_descriptor: concat!("objlink/", env!("CARGO_PKG_VERSION")).to_owned(),
            timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }
}

impl HandshakeConfig {
    pub fn with_versions(mut self, oldest: i32, current: i32) -> Self {
        self.oldest_version = oldest;
        self.current_version = current;
        self
    }

    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.client_descriptor = descriptor.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Newest version both ranges contain, if they intersect.
fn select_version(config: &HandshakeConfig, peer_min: i32, peer_max: i32) -> Option<i32> {
    if peer_min > config.current_version || peer_max < config.oldest_version {
        return None;
    }
    Some(config.current_version.min(peer_max))
}

impl Endpoint {
    /// Host side of session establishment. Returns the module request the
    /// client asked for once the session is `Ready`.
    pub fn accept_session(
        &mut self,
        loader: &dyn ModuleLoader,
        config: &HandshakeConfig,
    ) -> Result<ModuleRequest> {
        self.require_fresh(Origin::Host)?;
        self.set_state(SessionState::AwaitingVersion);

        match self.read_message(config.timeout)? {
            Message::Handshake {
                min_version,
                max_version,
                client_descriptor,
            } => match select_version(config, min_version, max_version) {
                Some(version) => {
                    tracing::info!(version, client = %client_descriptor, "session handshake");
                    self.send_message(&Message::VersionSelected { version })?;
                    self.set_version(version);
                }
                None => {
                    return Err(self.refuse(format!(
                        "no protocol version in common: peer speaks {min_version}..={max_version}, \
                         host speaks {}..={}",
                        config.oldest_version, config.current_version
                    )))
                }
            },
            other => {
                return Err(self.refuse(format!(
                    "expected a handshake, got {:?}",
                    other.message_type()
                )))
            }
        }

        self.set_state(SessionState::AwaitingLoadModule);
        let request = match self.read_message(config.timeout)? {
            Message::LoadModule(request) => request,
            other => {
                return Err(self.refuse(format!(
                    "expected a module request, got {:?}",
                    other.message_type()
                )))
            }
        };

        match loader.load(&request) {
            Ok(()) => {
                self.send_message(&Message::Return {
                    is_exception: false,
                    value: Value::Undefined,
                })?;
                self.set_state(SessionState::Ready);
                tracing::info!(module = %request.module_id, "session ready");
                Ok(request)
            }
            Err(reason) => {
                let _ = self.send_message(&Message::Return {
                    is_exception: true,
                    value: Value::Str(reason.clone()),
                });
                self.set_state(SessionState::Closed);
                Err(ChannelError::HandshakeFailed(reason))
            }
        }
    }

    /// Client side of session establishment. Returns the negotiated version
    /// once the host has acknowledged the module request.
    pub fn connect_session(
        &mut self,
        module: ModuleRequest,
        config: &HandshakeConfig,
    ) -> Result<i32> {
        self.require_fresh(Origin::Remote)?;
        self.send_message(&Message::Handshake {
            min_version: config.oldest_version,
            max_version: config.current_version,
            client_descriptor: config.client_descriptor.clone(),
        })?;
        self.set_state(SessionState::AwaitingVersion);

        let version = match self.read_message(config.timeout)? {
            Message::VersionSelected { version } => {
                if version < config.oldest_version || version > config.current_version {
                    return Err(self.refuse(format!(
                        "host selected version {version} outside the offered range"
                    )));
                }
                version
            }
            Message::FatalError { message } => {
                self.set_state(SessionState::Closed);
                return Err(ChannelError::HandshakeFailed(message));
            }
            other => {
                return Err(self.refuse(format!(
                    "expected a version selection, got {:?}",
                    other.message_type()
                )))
            }
        };
        self.set_version(version);

        self.send_message(&Message::LoadModule(module))?;
        self.set_state(SessionState::AwaitingLoadModule);

        match self.read_message(config.timeout)? {
            Message::Return {
                is_exception: false,
                ..
            } => {
                self.set_state(SessionState::Ready);
                tracing::info!(version, "session ready");
                Ok(version)
            }
            Message::Return { value, .. } => {
                self.set_state(SessionState::Closed);
                Err(ChannelError::HandshakeFailed(format!(
                    "module refused: {value}"
                )))
            }
            Message::FatalError { message } => {
                self.set_state(SessionState::Closed);
                Err(ChannelError::HandshakeFailed(message))
            }
            other => Err(self.refuse(format!(
                "expected a readiness ack, got {:?}",
                other.message_type()
            ))),
        }
    }

    fn require_fresh(&mut self, expected_role: Origin) -> Result<()> {
        if self.role() != expected_role {
            return Err(ChannelError::Protocol(format!(
                "{:?} endpoint cannot run the {expected_role:?} side of the handshake",
                self.role()
            )));
        }
        if self.state() != SessionState::Connecting {
            return Err(ChannelError::Protocol(format!(
                "handshake already ran (state {:?})",
                self.state()
            )));
        }
        Ok(())
    }

    /// Relay a handshake failure to the peer and close.
    fn refuse(&mut self, message: String) -> ChannelError {
        match self.fatal(message) {
            ChannelError::Protocol(message) => ChannelError::HandshakeFailed(message),
            other => other,
        }
    }
}
