//! # Error Taxonomy Module
//!
//! This module defines the structured error type shared by every layer of the
//! client: transport I/O, the decoder/encoder chains, the write path, and the
//! connection-gate future.

use crate::socket::Status;
use thiserror::Error;

/// Unified error type for the client.
///
/// Each variant corresponds to one row of the error taxonomy: transport I/O,
/// write-time type mismatches, writes against a dead WebSocket, HTTP
/// timeouts, and protocol-handshake failures.
#[derive(Debug, Error)]
pub enum AtmosphereError {
    /// A transport-level I/O failure: network close, read error, or a
    /// handshake that never completed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A WebSocket-layer failure surfaced by `tokio-tungstenite`.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An HTTP-layer failure surfaced by `reqwest`.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An HTTP response did not arrive before the configured request
    /// timeout. Recorded on the root future; the write itself does not
    /// throw.
    #[error("request timed out")]
    Timeout,

    /// A write was attempted on a WebSocket transport that is `CLOSE` or
    /// `ERROR`. The message intentionally matches the wire-protocol wording
    /// (`"Invalid Socket Status <status>"`) so embedders can pattern-match
    /// on it.
    #[error("Invalid Socket Status {0}")]
    InvalidStatus(Status),

    /// No encoder in the chain produced a `Text` or `Binary` payload for the
    /// object handed to `Socket::fire`.
    #[error("No Encoder for {0}")]
    NoEncoder(String),

    /// No decoder in the chain accepted the inbound payload's type tag.
    #[error("no decoder matched payload")]
    NoDecoderMatch,

    /// The Atmosphere handshake payload was malformed.
    #[error("protocol handshake error: {0}")]
    Protocol(String),

    /// The socket has already been closed.
    #[error("socket is closed")]
    Closed,

    /// A terminal error replayed from the connection-gate future.
    ///
    /// [`AtmosphereError`] wraps library error types (`std::io::Error`,
    /// `reqwest::Error`, ...) that aren't `Clone`, but the gate must be able
    /// to hand the same failure to every waiter, including ones that call
    /// `get()` long after the original error value was consumed. The
    /// future records the display message once and replays it via this
    /// variant.
    #[error("{0}")]
    Recorded(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AtmosphereError>;
