//! # Socket Module
//!
//! `Socket` is the application-facing handle: open a connection, fire
//! messages at it, register callbacks, close it, and read its status. It
//! owns the active [`Transport`] and shares its function registry and
//! decoder chain with it by reference; the transport never outlives the
//! socket that opened it.

use crate::dispatch::{Callback, Dispatcher, ErrorHandler, MatchKey};
use crate::encoder::Encodable;
use crate::error::AtmosphereError;
use crate::future::SocketFuture;
use crate::payload::{Event, Payload, TypeTag};
use crate::request::Request;
use crate::transport::{Transport, TransportContext, TransportKind};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Socket/transport lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Init,
    Open,
    Reopened,
    Close,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Init => "INIT",
            Status::Open => "OPEN",
            Status::Reopened => "REOPENED",
            Status::Close => "CLOSE",
            Status::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

struct SocketState {
    request: Arc<Request>,
    dispatcher: Dispatcher,
    root_future: Arc<SocketFuture>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
}

/// Cheap-to-clone handle over the shared connection state. Every clone
/// refers to the same underlying transport and callback registry.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketState>,
}

impl Socket {
    /// Open a connection for `request`, trying its declared transports in
    /// order (WebSocket, if none are declared) until one connects. Blocks
    /// until the transport reaches `OPEN` or records a fatal error.
    pub async fn open(request: impl Into<Request>, http_client: reqwest::Client) -> Result<Socket, AtmosphereError> {
        let request = Arc::new(request.into());
        let root_future = Arc::new(SocketFuture::new());
        let dispatcher = Dispatcher::new(request.resolver().clone());

        let state = Arc::new_cyclic(|weak: &Weak<SocketState>| {
            bind_future_hooks(&root_future, weak.clone());
            SocketState {
                request: request.clone(),
                dispatcher,
                root_future: root_future.clone(),
                transport: Mutex::new(None),
            }
        });

        let socket = Socket { inner: state };
        socket.connect(http_client).await?;
        Ok(socket)
    }

    async fn connect(&self, http_client: reqwest::Client) -> Result<(), AtmosphereError> {
        let declared = self.inner.request.transports();
        let kinds: Vec<TransportKind> = if declared.is_empty() {
            vec![TransportKind::WebSocket]
        } else {
            declared.to_vec()
        };

        let ctx = TransportContext {
            request: self.inner.request.clone(),
            dispatcher: self.inner.dispatcher.clone(),
            root_future: self.inner.root_future.clone(),
            http_client,
        };

        let mut last_err = None;
        for kind in kinds {
            match crate::transport::connect(kind, ctx.clone()).await {
                Ok(transport) => {
                    *self.inner.transport.lock().expect("socket poisoned") = Some(transport);
                    return self.inner.root_future.get().await;
                }
                Err(err) => last_err = Some(err),
            }
        }

        let err = last_err.unwrap_or(AtmosphereError::Closed);
        self.inner.root_future.io_exception(&err);
        Err(err)
    }

    /// Send `data` over the active transport, running it through the
    /// request's encoder chain first. Blocks until connected if called
    /// before `OPEN`. HTTP write timeouts don't fail the call or the root
    /// future — they're recorded on it via `timeout_exception` (see
    /// `last_timeout`) so callers have somewhere to observe them, then
    /// swallowed into `Ok(())`.
    pub async fn fire(&self, data: impl Into<Encodable>) -> Result<(), AtmosphereError> {
        self.inner.root_future.get().await?;
        let payload = self.inner.request.encoders().run(data.into())?;
        let transport = self.transport_handle()?;
        match transport.send(payload).await {
            Ok(()) => Ok(()),
            Err(AtmosphereError::Timeout) => {
                tracing::warn!("atmosphere http write timed out");
                self.inner.root_future.timeout_exception(AtmosphereError::Timeout.to_string());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// The message from the most recently recorded write timeout, if any.
    /// Cleared only by being overwritten with a fresher timeout — not by a
    /// successful write — since it's a diagnostic trace, not a status flag.
    pub fn last_timeout(&self) -> Option<String> {
        self.inner.root_future.last_timeout()
    }

    /// Register a callback for a specific lifecycle event.
    pub fn on_event(&self, event: Event, callback: Callback) {
        self.inner.dispatcher.register(MatchKey::Event(event), callback);
    }

    /// Register a callback for every message carrying `tag`.
    pub fn on_type(&self, tag: TypeTag, callback: Callback) {
        self.inner.dispatcher.register(MatchKey::Type(tag), callback);
    }

    /// Register a callback that sees every dispatched message.
    pub fn on(&self, callback: Callback) {
        self.inner.dispatcher.register(MatchKey::Wildcard, callback);
    }

    /// Install the handler consulted whenever the active transport records a
    /// fatal error. Returning `true` consumes the error: the transport still
    /// dispatches `Event::Error` to ordinary callbacks and moves to
    /// `Status::Error`, but the root future (and any pending/future `fire`)
    /// is not failed with it. Replaces any handler registered earlier.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        self.inner.dispatcher.set_error_handler(handler);
    }

    /// Idempotent teardown of the active transport.
    pub async fn close(&self) {
        if let Ok(transport) = self.transport_handle() {
            transport.close().await;
        }
    }

    /// Current lifecycle status, or `INIT` if no transport has connected.
    pub fn status(&self) -> Status {
        self.transport_handle().map(|t| t.status()).unwrap_or(Status::Init)
    }

    fn transport_handle(&self) -> Result<Arc<dyn Transport>, AtmosphereError> {
        self.inner.transport.lock().expect("socket poisoned").clone().ok_or(AtmosphereError::Closed)
    }
}

/// Wire the future's `fire`/`close` convenience hooks to this socket without
/// giving the future a strong, cyclic reference back to it.
fn bind_future_hooks(root_future: &Arc<SocketFuture>, weak: Weak<SocketState>) {
    let fire_weak = weak.clone();
    let close_weak = weak;
    root_future.bind(
        Arc::new(move |payload: Payload| {
            if let Some(state) = fire_weak.upgrade() {
                let socket = Socket { inner: state };
                tokio::spawn(async move {
                    let _ = socket.fire(payload_to_encodable(payload)).await;
                });
            }
        }),
        Arc::new(move || {
            if let Some(state) = close_weak.upgrade() {
                let socket = Socket { inner: state };
                tokio::spawn(async move { socket.close().await });
            }
        }),
    );
}

fn payload_to_encodable(payload: Payload) -> Encodable {
    match payload {
        Payload::Text(s) => Encodable::Text(s),
        Payload::Binary(b) => Encodable::Binary(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_wire_tokens() {
        assert_eq!(Status::Init.to_string(), "INIT");
        assert_eq!(Status::Close.to_string(), "CLOSE");
    }
}
