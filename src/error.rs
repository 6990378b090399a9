//! Error types for the codec and the connection machinery.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// A message could not be converted to or from its wire representation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Fewer than the four header bytes were available.
    #[error("packet too short for a header: {0} bytes")]
    TruncatedHeader(usize),

    #[error("unsupported protocol version {0}")]
    InvalidVersion(u8),

    /// The TKL nibble is one of the reserved values 9-15.
    #[error("invalid token length {0}")]
    InvalidTokenLength(u8),

    /// The header announces more token bytes than the packet holds.
    #[error("token of {expected} bytes truncated to {available}")]
    TruncatedToken { expected: usize, available: usize },

    #[error("reserved option delta nibble")]
    InvalidOptionDelta,

    #[error("reserved option length nibble")]
    InvalidOptionLength,

    /// An extended delta or length field, or the option value, runs past the end.
    #[error("option truncated at offset {0}")]
    TruncatedOption(usize),

    /// The accumulated option number left the 16-bit space, i.e. the
    /// sequence stopped being non-decreasing.
    #[error("option number overflow at offset {0}")]
    OptionNumberOverflow(usize),

    #[error("payload marker without payload")]
    EmptyPayload,

    #[error("token of {0} bytes exceeds 8")]
    TokenTooLong(usize),

    #[error("option value of {0} bytes is too long")]
    OptionValueTooLong(usize),
}

/// Errors surfaced by the transport facade, the dispatcher and the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A reply was expected but none arrived in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    /// The dispatch task ended abnormally (the handler panicked).
    #[error("dispatch task failed: {0}")]
    Dispatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
