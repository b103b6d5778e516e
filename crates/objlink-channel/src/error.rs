use std::time::Duration;

use objlink_wire::{Handle, Value, WireError};

/// Convenience alias used throughout the channel crate.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// An exception value relayed by the peer through a `Return` message.
///
/// Carries the wire value verbatim, so an exception object bounced back to
/// the endpoint that threw it still names the original handle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("remote exception: {value}")]
pub struct BridgedException {
    pub value: Value,
}

impl BridgedException {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The exception payload as it crossed the wire.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Errors raised by a channel session.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The peer detected a protocol error, relayed its diagnostic in a
    /// `FatalError` message, and closed its side.
    #[error("peer reported a fatal error: {0}")]
    PeerFatal(String),

    #[error("unknown or dead remote handle {0}")]
    UnknownHandle(Handle),

    #[error("no special dispatcher registered for id {0}")]
    UnknownDispatchId(u8),

    /// The peer's handler raised; the session itself is still healthy.
    #[error(transparent)]
    Bridged(#[from] BridgedException),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("session is closed")]
    Closed,
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Wire(WireError::Io(err))
    }
}

impl ChannelError {
    /// True when the session cannot carry further traffic.
    ///
    /// A bridged exception is an application-level outcome; everything else
    /// means the stream or the protocol state is gone.
    pub fn is_session_lost(&self) -> bool {
        !matches!(self, ChannelError::Bridged(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridged_exception_is_not_session_loss() {
        let err = ChannelError::Bridged(BridgedException::new(Value::Str("boom".into())));
        assert!(!err.is_session_lost());
        assert!(ChannelError::Closed.is_session_lost());
        assert!(ChannelError::Protocol("tag".into()).is_session_lost());
    }

    #[test]
    fn bridged_exception_keeps_the_wire_value() {
        let exc = BridgedException::new(Value::Int(7));
        assert_eq!(exc.value(), &Value::Int(7));
        assert_eq!(exc.into_value(), Value::Int(7));
    }
}
