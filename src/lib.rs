//! # Atmosphere Client
//!
//! A client library for bidirectional, long-lived message exchange with an
//! Atmosphere-protocol server. It negotiates one of four wire transports —
//! WebSocket, HTTP streaming, server-sent events, and HTTP long-polling — and
//! presents a single uniform message-oriented [`Socket`](socket::Socket)
//! abstraction to applications.
//!
//! ## Key Components
//!
//! - **[`Socket`](socket::Socket)**: the application-facing handle — open,
//!   fire, register callbacks, close.
//! - **[`Request`](request::Request) / [`AtmosphereRequest`](request::AtmosphereRequest)**:
//!   immutable connection descriptors built once and handed to `Socket::open`.
//! - **[`transport`]**: one state machine per wire transport, all exposing the
//!   same [`Transport`](transport::Transport) trait.
//! - **[`decoder`] / [`encoder`]**: ordered, abortable transform chains between
//!   wire bytes and application payloads.
//! - **[`protocol`]**: the Atmosphere handshake, message-length tracking, and
//!   padding/heartbeat decoders.
//! - **[`dispatch`]**: resolves an inbound payload to zero or more registered
//!   callbacks.
//! - **[`future`]**: the connection-gate future bridging a fire-and-forget
//!   API onto a not-yet-connected or transiently-failing connection.
//!
//! ## Scope
//!
//! This crate assumes an embedding application installs its own `tracing`
//! subscriber and owns process exit policy; it ships no binary and no CLI.

pub mod client;
pub mod decoder;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod future;
pub mod payload;
pub mod protocol;
pub mod request;
pub mod socket;
pub mod transport;

pub use client::{Client, ClientFactory};
pub use error::AtmosphereError;
pub use payload::{Event, Payload, TypeTag};
pub use request::{AtmosphereRequest, AtmosphereRequestBuilder, CacheType, Request, RequestBuilder};
pub use socket::{Socket, Status};
pub use transport::TransportKind;

/// Crate-wide default values mirrored from the Atmosphere wire protocol.
pub mod defaults {
    /// Value advertised in the `X-Atmosphere-Framework` query parameter.
    pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Delimiter separating fields in the handshake/length-tracking frame.
    pub const TRACK_MESSAGE_LENGTH_DELIMITER: char = '|';

    /// Default padding/heartbeat run length, in bytes.
    pub const PADDING_SIZE: usize = 4098;

    /// Default heartbeat character used to pad idle connections.
    pub const HEARTBEAT_CHAR: u8 = b'X';

    /// Bootstrap value for `X-Atmosphere-tracking-id` before the server
    /// assigns a real tracking UUID.
    pub const BOOTSTRAP_TRACKING_ID: &str = "0";
}
