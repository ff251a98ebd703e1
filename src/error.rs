//! Error handling
//!
//! This module defines:
//! - [`Error`]: the main error type for ICAP decoding.
//! - [`IcapResult<T>`]: a convenient alias for `Result<T, Error>`.
//!
//! The enum is `Clone` on purpose: a fatal parse error is latched by the
//! decoder and re-surfaced on every `decode` call until the caller
//! acknowledges it with `reset`.
use thiserror::Error;

/// Failure kinds surfaced by the decoder and the feed adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid decoder configuration (size limits).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A size limit was exceeded (initial line, header block, section
    /// window or chunk payload).
    #[error("Frame too long: {0}")]
    FrameTooLong(String),

    /// The message factory rejected the initial line, or an embedded HTTP
    /// start line could not be parsed.
    #[error("Invalid initial line: {0}")]
    InvalidInitialLine(String),

    /// Unparseable header line or header block.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// A header every ICAP message must carry is absent.
    #[error("Mandatory ICAP message header [{0}] is missing")]
    MissingMandatoryHeader(&'static str),

    /// The `Encapsulated` header value failed validation.
    #[error("Invalid Encapsulated header: {0}")]
    InvalidEncapsulatedHeader(String),

    /// Bad chunked-transfer framing in the encapsulated body.
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    /// Network-level error in the feed adapter.
    #[error("Network error: {0}")]
    Network(String),

    /// Peer closed the connection in the middle of a message.
    #[error("Peer closed mid-message")]
    EarlyClose,

    /// Unexpected/unclassified error.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a frame-too-long error.
    pub fn frame_too_long(message: impl Into<String>) -> Self {
        Self::FrameTooLong(message.into())
    }

    /// Create an invalid-initial-line error.
    pub fn initial_line(message: impl Into<String>) -> Self {
        Self::InvalidInitialLine(message.into())
    }

    /// Create a malformed-header error.
    pub fn header(message: impl Into<String>) -> Self {
        Self::MalformedHeader(message.into())
    }

    /// Create an invalid-Encapsulated error.
    pub fn encapsulated(message: impl Into<String>) -> Self {
        Self::InvalidEncapsulatedHeader(message.into())
    }

    /// Create a malformed-chunk error.
    pub fn chunk(message: impl Into<String>) -> Self {
        Self::MalformedChunk(message.into())
    }

    /// Create an unknown/unexpected error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Convenient alias for results in this crate.
pub type IcapResult<T> = Result<T, Error>;
