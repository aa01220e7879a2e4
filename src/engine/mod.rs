//! Protocol engine interface
//!
//! The session core drives HTTP/2 through the [`Engine`] trait and reacts to
//! [`EngineEvent`]s. [`H2Engine`] is the `h2`-backed implementation used on
//! real connections; tests substitute a recording engine.

mod h2_engine;

pub use h2_engine::H2Engine;

use crate::config::Config;
use crate::request::{BodyReader, HeaderList, RequestId, StreamId};
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Errors raised by the protocol engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP/2 error: {0}")]
    Protocol(#[source] h2::Error),

    /// The transport failed underneath the protocol, including idle timeouts
    #[error("Transport error: {0}")]
    Io(#[source] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("Unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("Settings can only be submitted before the connection preface")]
    SettingsAfterHandshake,

    #[error("Connection is closed")]
    Closed,
}

impl From<h2::Error> for EngineError {
    fn from(err: h2::Error) -> Self {
        if !err.is_io() {
            return Self::Protocol(err);
        }
        match err.into_io() {
            Some(io) => Self::Io(io),
            None => Self::Closed,
        }
    }
}

/// HTTP/2 error code carried by RST_STREAM and GOAWAY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const NO_ERROR: ErrorCode = ErrorCode(0x0);
    pub const PROTOCOL_ERROR: ErrorCode = ErrorCode(0x1);
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(0x2);
    pub const CANCEL: ErrorCode = ErrorCode(0x8);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NO_ERROR => f.write_str("NO_ERROR"),
            Self::PROTOCOL_ERROR => f.write_str("PROTOCOL_ERROR"),
            Self::INTERNAL_ERROR => f.write_str("INTERNAL_ERROR"),
            Self::CANCEL => f.write_str("CANCEL"),
            ErrorCode(code) => write!(f, "0x{:x}", code),
        }
    }
}

impl From<h2::Reason> for ErrorCode {
    fn from(reason: h2::Reason) -> Self {
        ErrorCode(u32::from(reason))
    }
}

impl From<ErrorCode> for h2::Reason {
    fn from(code: ErrorCode) -> Self {
        h2::Reason::from(code.0)
    }
}

/// Initial SETTINGS submitted with the connection preface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Settings {
    /// Whether the peer may push streams; always disabled by the client
    pub enable_push: bool,

    /// SETTINGS_INITIAL_WINDOW_SIZE override
    pub initial_window_size: Option<u32>,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enable_push: false,
            initial_window_size: config.initial_window_size(),
        }
    }
}

/// Frames the engine reports as sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    /// Request HEADERS opened `stream` for `request`
    RequestHeaders { request: RequestId, stream: StreamId },

    /// A DATA frame of the request body
    Data {
        stream: StreamId,
        len: usize,
        end_stream: bool,
    },

    /// RST_STREAM for `stream`
    RstStream { stream: StreamId, code: ErrorCode },
}

/// Frames the engine reports as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedFrame {
    /// Response HEADERS; `:status` comes first in `fields`
    ResponseHeaders {
        stream: StreamId,
        fields: HeaderList,
        end_stream: bool,
    },

    /// Trailing HEADERS
    Trailers { stream: StreamId, fields: HeaderList },
}

/// Everything the engine reports back to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    FrameSent(SentFrame),
    FrameReceived(ReceivedFrame),
    /// A chunk of response body, flow-control capacity already released
    BodyChunk { stream: StreamId, data: Bytes },
    /// The stream is closed; emitted exactly once per opened stream
    StreamClosed { stream: StreamId, code: ErrorCode },
}

/// Commands the session core issues to the protocol engine
pub trait Engine {
    /// Submits the initial SETTINGS
    fn submit_settings(&mut self, settings: &Settings) -> Result<(), EngineError>;

    /// Queues a request for submission
    ///
    /// The engine reports the assigned stream with
    /// [`SentFrame::RequestHeaders`] before any other event for that stream.
    /// Requests are opened in submission order.
    fn submit_request(
        &mut self,
        request: RequestId,
        headers: HeaderList,
        body: Option<BodyReader>,
    ) -> Result<(), EngineError>;

    /// Resets a single stream
    fn submit_rst_stream(&mut self, stream: StreamId, code: ErrorCode) -> Result<(), EngineError>;

    /// Starts a graceful shutdown once queued requests have been released
    fn submit_goaway(&mut self) -> Result<(), EngineError>;
}
