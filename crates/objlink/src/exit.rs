use std::fmt;
use std::io;

use objlink_channel::ChannelError;
use objlink_wire::WireError;

// Exit code constants shared with the wider tool family.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PROTOCOL_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const REMOTE_EXCEPTION: i32 = 70;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::Io(source) => io_error(context, source),
        WireError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        WireError::StringTooLarge { .. } | WireError::BatchTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(PROTOCOL_ERROR, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Wire(err) => wire_error(context, err),
        ChannelError::Bridged(exc) => {
            CliError::new(REMOTE_EXCEPTION, format!("{context}: {exc}"))
        }
        ChannelError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ChannelError::HandshakeFailed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        ChannelError::UnknownHandle(_) | ChannelError::UnknownDispatchId(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ChannelError::Protocol(_) | ChannelError::PeerFatal(_) => {
            CliError::new(PROTOCOL_ERROR, format!("{context}: {err}"))
        }
        ChannelError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}
