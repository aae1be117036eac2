//! WebSocket transport backend, built on `tokio-tungstenite`.

use super::{Transport, TransportContext, TransportKind};
use crate::decoder::DecoderChain;
use crate::dispatch::Dispatcher;
use crate::error::AtmosphereError;
use crate::future::SocketFuture;
use crate::payload::{Event, Payload};
use crate::socket::Status;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use http::{HeaderName, HeaderValue};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, warn};

type WsSink = Box<dyn Sink<WsMessage, Error = WsError> + Send + Unpin>;

pub struct WebSocketTransport {
    status: Mutex<Status>,
    error_handled: AtomicBool,
    root_future: Arc<SocketFuture>,
    dispatcher: Dispatcher,
    sink: AsyncMutex<WsSink>,
}

/// Build the handshake request tungstenite connects with, carrying every
/// header from `headers` alongside the URI's own defaults.
fn build_handshake_request(
    uri: &str,
    headers: &[(String, String)],
) -> Result<http::Request<()>, AtmosphereError> {
    let mut request = uri.into_client_request().map_err(AtmosphereError::WebSocket)?;
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AtmosphereError::Protocol(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AtmosphereError::Protocol(format!("invalid header value {value:?}: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

impl WebSocketTransport {
    pub async fn connect(ctx: TransportContext) -> Result<Arc<dyn Transport>, AtmosphereError> {
        debug!(uri = ctx.request.uri(), "starting WebSocket connect");
        let handshake_request = build_handshake_request(ctx.request.uri(), ctx.request.headers())?;
        let connected = super::with_connect_timeout(ctx.request.connect_timeout(), async move {
            tokio_tungstenite::connect_async(handshake_request)
                .await
                .map_err(AtmosphereError::WebSocket)
        })
        .await;
        if let Err(err) = &connected {
            warn!(%err, "WebSocket handshake failed");
        }
        let (ws_stream, _response) = connected?;
        debug!(uri = ctx.request.uri(), "WebSocket handshake complete");
        let (sink, mut stream) = ws_stream.split();

        let transport = Arc::new(Self {
            status: Mutex::new(Status::Init),
            error_handled: AtomicBool::new(false),
            root_future: ctx.root_future.clone(),
            dispatcher: ctx.dispatcher.clone(),
            sink: AsyncMutex::new(Box::new(sink)),
        });

        *transport.status.lock().expect("transport poisoned") = Status::Open;
        ctx.root_future.done();
        transport.dispatcher.dispatch(Event::Open, Payload::Text(String::new()));

        let read_transport = transport.clone();
        let decoders = ctx.request.decoders().clone();
        let dispatcher = ctx.dispatcher.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => dispatch_payload(&decoders, &dispatcher, Payload::Text(text)),
                    Ok(WsMessage::Binary(bytes)) => dispatch_payload(&decoders, &dispatcher, Payload::Binary(bytes)),
                    Ok(WsMessage::Close(_)) => {
                        debug!("WebSocket peer sent close frame");
                        *read_transport.status.lock().expect("transport poisoned") = Status::Close;
                        read_transport.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        read_transport.error(AtmosphereError::WebSocket(err)).await;
                        break;
                    }
                }
            }
            let mut status = read_transport.status.lock().expect("transport poisoned");
            if matches!(*status, Status::Open | Status::Reopened) {
                *status = Status::Close;
                drop(status);
                read_transport.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
            }
        });

        Ok(transport as Arc<dyn Transport>)
    }
}

fn dispatch_payload(decoders: &DecoderChain, dispatcher: &Dispatcher, payload: Payload) {
    if let Some(final_payload) = decoders.run(Event::Message, payload) {
        dispatcher.dispatch(Event::Message, final_payload);
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn status(&self) -> Status {
        *self.status.lock().expect("transport poisoned")
    }

    async fn error(&self, error: AtmosphereError) {
        error!(%error, "WebSocket transport error");
        *self.status.lock().expect("transport poisoned") = Status::Error;
        self.dispatcher.dispatch(Event::Error, Payload::Text(error.to_string()));
        let handled = self.dispatcher.run_error_handler(&error);
        self.error_handled.store(handled, Ordering::SeqCst);
        if !handled {
            self.root_future.io_exception(&error);
        }
    }

    fn error_handled(&self) -> bool {
        self.error_handled.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: Payload) -> Result<(), AtmosphereError> {
        let status = self.status();
        if matches!(status, Status::Close | Status::Error) {
            self.error(AtmosphereError::InvalidStatus(status)).await;
            return Err(AtmosphereError::InvalidStatus(status));
        }
        let frame = match payload {
            Payload::Text(s) => WsMessage::Text(s),
            Payload::Binary(b) => WsMessage::Binary(b),
        };
        let mut sink = self.sink.lock().await;
        sink.send(frame).await.map_err(AtmosphereError::WebSocket)
    }

    async fn close(&self) {
        {
            let mut status = self.status.lock().expect("transport poisoned");
            if matches!(*status, Status::Close) {
                return;
            }
            *status = Status::Close;
        }
        debug!("closing WebSocket transport");
        self.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DefaultResolver;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[test]
    fn handshake_request_carries_every_header() {
        let headers = vec![
            ("Authorization".to_string(), "Bearer abc".to_string()),
            ("X-Custom".to_string(), "value".to_string()),
        ];
        let request = build_handshake_request("ws://example.com/socket", &headers).unwrap();
        assert_eq!(request.headers().get("Authorization").unwrap(), "Bearer abc");
        assert_eq!(request.headers().get("X-Custom").unwrap(), "value");
    }

    #[test]
    fn handshake_request_rejects_invalid_header_name() {
        let headers = vec![("bad header\n".to_string(), "value".to_string())];
        let err = build_handshake_request("ws://example.com/socket", &headers).unwrap_err();
        assert!(matches!(err, AtmosphereError::Protocol(_)));
    }

    /// A `Sink` that just records every frame handed to it, standing in for
    /// the real WebSocket stream so `send`'s status-gating logic can be
    /// exercised without a live socket.
    struct CollectingSink {
        sent: Arc<Mutex<Vec<WsMessage>>>,
    }

    impl Sink<WsMessage> for CollectingSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: WsMessage) -> Result<(), Self::Error> {
            self.get_mut().sent.lock().expect("sink poisoned").push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn transport_with(status: Status, sent: Arc<Mutex<Vec<WsMessage>>>) -> (WebSocketTransport, Arc<SocketFuture>) {
        let root_future = Arc::new(SocketFuture::new());
        let transport = WebSocketTransport {
            status: Mutex::new(status),
            error_handled: AtomicBool::new(false),
            root_future: root_future.clone(),
            dispatcher: Dispatcher::new(Arc::new(DefaultResolver)),
            sink: AsyncMutex::new(Box::new(CollectingSink { sent })),
        };
        (transport, root_future)
    }

    #[tokio::test]
    async fn open_send_transmits_exactly_one_frame() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (transport, root_future) = transport_with(Status::Open, sent.clone());
        root_future.done();

        transport.send(Payload::Text("hello".into())).await.unwrap();

        let frames = sent.lock().unwrap();
        assert_eq!(*frames, vec![WsMessage::Text("hello".into())]);
    }

    #[tokio::test]
    async fn send_on_closed_socket_is_rejected_without_transmitting() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (transport, _root_future) = transport_with(Status::Close, sent.clone());

        let err = transport.send(Payload::Text("hi".into())).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid Socket Status CLOSE");
        assert!(sent.lock().unwrap().is_empty());
    }

    /// If the root future hasn't settled yet (connect still in flight), a
    /// send against an already-errored transport does reach it — this is
    /// the one case `io_exception` isn't a no-op, since nothing has called
    /// `done()` yet.
    #[tokio::test]
    async fn error_before_connect_settles_reaches_root_future() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (transport, root_future) = transport_with(Status::Close, sent.clone());

        let _ = transport.send(Payload::Text("hi".into())).await;
        assert!(root_future.finish_or_throw_exception().is_err());
    }

    #[tokio::test]
    async fn error_handler_returning_true_suppresses_root_future_failure() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (transport, root_future) = transport_with(Status::Close, sent.clone());
        transport.dispatcher.set_error_handler(Arc::new(|_err| true));

        let _ = transport.send(Payload::Text("hi".into())).await;

        assert!(transport.error_handled());
        assert!(root_future.finish_or_throw_exception().is_ok());
    }
}
