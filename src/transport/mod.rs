//! # Transport Abstraction Module
//!
//! One state machine per wire mechanism (WebSocket, HTTP streaming,
//! server-sent events, long-polling), all implementing the same [`Transport`]
//! trait so the rest of the crate drives them identically: one async trait,
//! several interchangeable concrete backends, status modeled as an explicit
//! enum instead of scattered booleans.

pub mod http_streaming;
pub mod long_polling;
pub mod sse;
pub mod websocket;

pub use http_streaming::HttpStreamingTransport;
pub use long_polling::LongPollingTransport;
pub use sse::SseTransport;
pub use websocket::WebSocketTransport;

use crate::dispatch::Dispatcher;
use crate::error::AtmosphereError;
use crate::future::SocketFuture;
use crate::request::Request;
use crate::socket::Status;
use async_trait::async_trait;
use std::sync::Arc;

/// Which wire mechanism a transport speaks, and the token it's announced
/// under via `X-Atmosphere-Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSocket,
    HttpStreaming,
    Sse,
    LongPolling,
}

impl TransportKind {
    /// The lowercase wire token used in the `X-Atmosphere-Transport` query
    /// parameter.
    pub fn wire_name(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::HttpStreaming => "streaming",
            TransportKind::Sse => "sse",
            TransportKind::LongPolling => "long-polling",
        }
    }
}

/// Common contract every transport backend obeys.
///
/// ## State machine
///
/// ```text
/// INIT --on-first-bytes--> OPEN
/// INIT --on-network-error--> ERROR
/// OPEN --long-poll-complete--> REOPENED --re-issue--> OPEN
/// OPEN --server-close/EOF--> CLOSE
/// OPEN --error--> ERROR
/// any  --client close()--> CLOSE  (idempotent)
/// ```
///
/// Each concrete transport is constructed with the root [`SocketFuture`]
/// (`crate::future::SocketFuture`) it signals and the shared
/// [`DecoderChain`](crate::decoder::DecoderChain)/
/// [`Dispatcher`](crate::dispatch::Dispatcher) pair it feeds on every inbound
/// message — constructor injection in place of separate
/// `set_future`/`set_connected_future` setters, since the future must exist
/// before the background read task is spawned anyway.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The wire mechanism this instance speaks.
    fn kind(&self) -> TransportKind;

    /// Current lifecycle status.
    fn status(&self) -> Status;

    /// Record a fatal error, transition to `ERROR`, and signal the root
    /// future unless a user error-handler has already consumed it.
    async fn error(&self, error: AtmosphereError);

    /// Whether a user-registered error callback consumed the most recent
    /// fatal error, suppressing its propagation to the root future.
    fn error_handled(&self) -> bool;

    /// Send an already-encoded payload over the wire. WebSocket transports
    /// dispatch by the payload's `TypeTag`; HTTP transports issue a POST and,
    /// if the response body is non-empty, feed it through the decoder
    /// pipeline as a synthetic `Message` event.
    async fn send(&self, payload: crate::payload::Payload) -> Result<(), AtmosphereError>;

    /// Idempotent teardown of the underlying network handle.
    async fn close(&self);
}

/// Everything a concrete transport needs to start reading and accept
/// writes, bundled so `Socket::connect` doesn't thread a dozen parameters
/// through the factory function below.
#[derive(Clone)]
pub struct TransportContext {
    pub request: Arc<Request>,
    pub dispatcher: Dispatcher,
    pub root_future: Arc<SocketFuture>,
    pub http_client: reqwest::Client,
}

/// Construct and connect the backend for `kind`, spawning its background
/// read task before returning.
pub async fn connect(kind: TransportKind, ctx: TransportContext) -> Result<Arc<dyn Transport>, AtmosphereError> {
    match kind {
        TransportKind::WebSocket => websocket::WebSocketTransport::connect(ctx).await,
        TransportKind::HttpStreaming => http_streaming::HttpStreamingTransport::connect(ctx).await,
        TransportKind::Sse => sse::SseTransport::connect(ctx).await,
        TransportKind::LongPolling => long_polling::LongPollingTransport::connect(ctx).await,
    }
}

/// Race a connect-phase future against the request's `connect_timeout`,
/// surfacing an elapsed timer as `AtmosphereError::Timeout` the same way a
/// slow write does.
pub(crate) async fn with_connect_timeout<F, T>(duration: std::time::Duration, fut: F) -> Result<T, AtmosphereError>
where
    F: std::future::Future<Output = Result<T, AtmosphereError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(AtmosphereError::Timeout),
    }
}
