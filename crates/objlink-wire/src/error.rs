/// Errors that can occur while encoding/decoding protocol traffic.
///
/// Every variant except `Io` indicates that the two endpoints have diverged;
/// there is no partial-message recovery, so callers must treat any decode
/// failure as fatal for the session.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// An I/O error occurred while reading or writing the stream.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,

    /// An unknown message type tag was read.
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),

    /// An unknown value variant tag was read.
    #[error("invalid value tag {0}")]
    InvalidValueTag(u8),

    /// An unknown origin flag was read in an object reference.
    #[error("invalid origin flag {0}")]
    InvalidOrigin(u8),

    /// A string length prefix exceeds the configured maximum (or is negative).
    #[error("string too large ({len} bytes, max {max})")]
    StringTooLarge { len: i64, max: usize },

    /// An argument or handle count exceeds the configured maximum (or is
    /// negative).
    #[error("batch too large ({len} entries, max {max})")]
    BatchTooLarge { len: i64, max: usize },

    /// String bytes were not valid UTF-8.
    #[error("invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
