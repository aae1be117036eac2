//! Server-sent events transport backend, built on `reqwest`'s chunked body
//! streaming. Frames the same long-lived GET as [`http_streaming`], but
//! parses the `text/event-stream` line format (`data: ...` lines terminated
//! by a blank line) into one message per event instead of one message per
//! raw chunk. Writes are separate POSTs, same as long-polling/streaming.

use super::{Transport, TransportContext, TransportKind};
use crate::decoder::DecoderChain;
use crate::dispatch::Dispatcher;
use crate::error::AtmosphereError;
use crate::future::SocketFuture;
use crate::payload::{Event, Payload};
use crate::request::Request;
use crate::socket::Status;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

pub struct SseTransport {
    status: Mutex<Status>,
    error_handled: AtomicBool,
    root_future: Arc<SocketFuture>,
    http_client: reqwest::Client,
    request: Arc<Request>,
    decoders: DecoderChain,
    dispatcher: Dispatcher,
}

impl SseTransport {
    pub async fn connect(ctx: TransportContext) -> Result<Arc<dyn Transport>, AtmosphereError> {
        debug!(uri = ctx.request.uri(), "starting SSE connect");
        let mut builder = ctx.http_client.get(ctx.request.uri()).header("Accept", "text/event-stream");
        for (name, value) in ctx.request.headers() {
            builder = builder.header(name, value);
        }
        builder = builder.query(&ctx.request.query_params());

        let connected = super::with_connect_timeout(ctx.request.connect_timeout(), async move {
            Ok(builder.send().await?.error_for_status()?)
        })
        .await;
        if let Err(err) = &connected {
            warn!(%err, "SSE connect failed");
        }
        let response = connected?;
        debug!(uri = ctx.request.uri(), "SSE connect complete");

        let transport = Arc::new(Self {
            status: Mutex::new(Status::Open),
            error_handled: AtomicBool::new(false),
            root_future: ctx.root_future.clone(),
            http_client: ctx.http_client.clone(),
            request: ctx.request.clone(),
            decoders: ctx.request.decoders().clone(),
            dispatcher: ctx.dispatcher.clone(),
        });
        ctx.root_future.done();
        transport.dispatcher.dispatch(Event::Open, Payload::Text(String::new()));

        let read_transport = transport.clone();
        let mut chunks = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_events(&mut buffer, &read_transport.decoders, &read_transport.dispatcher);
                    }
                    Err(err) => {
                        read_transport.error(AtmosphereError::Http(err)).await;
                        return;
                    }
                }
            }
            let mut status = read_transport.status.lock().expect("transport poisoned");
            if matches!(*status, Status::Open) {
                *status = Status::Close;
                drop(status);
                debug!("SSE stream ended, closing");
                read_transport.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
            }
        });

        Ok(transport as Arc<dyn Transport>)
    }
}

/// Split complete `\n\n`-terminated SSE events out of `buffer`, dispatching
/// the concatenation of their `data:` lines, and leave any trailing partial
/// event for the next chunk.
fn drain_events(buffer: &mut String, decoders: &DecoderChain, dispatcher: &Dispatcher) {
    while let Some(end) = buffer.find("\n\n") {
        let event_text: String = buffer.drain(..end + 2).collect();
        let data: String = event_text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|v| v.trim_start())
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() {
            continue;
        }
        if let Some(payload) = decoders.run(Event::Message, Payload::Text(data)) {
            dispatcher.dispatch(Event::Message, payload);
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn status(&self) -> Status {
        *self.status.lock().expect("transport poisoned")
    }

    async fn error(&self, error: AtmosphereError) {
        error!(%error, "SSE transport error");
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
            return Err(AtmosphereError::InvalidStatus(status));
        }

        let mut builder = self.http_client.post(self.request.uri());
        for (name, value) in self.request.headers() {
            builder = builder.header(name, value);
        }
        builder = builder.query(&self.request.query_params()).timeout(self.request.request_timeout());
        builder = match payload {
            Payload::Text(s) => builder.body(s),
            Payload::Binary(b) => builder.body(b),
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return Err(AtmosphereError::Timeout),
            Err(err) => return Err(AtmosphereError::Http(err)),
        };
        let (payload, is_empty) = if self.request.binary_payload() {
            let bytes = response.bytes().await.map_err(AtmosphereError::Http)?;
            let empty = bytes.is_empty();
            (Payload::Binary(bytes.to_vec()), empty)
        } else {
            let body = response.text().await.map_err(AtmosphereError::Http)?;
            let empty = body.is_empty();
            (Payload::Text(body), empty)
        };
        if !is_empty {
            if let Some(decoded) = self.decoders.run(Event::Message, payload) {
                self.dispatcher.dispatch(Event::Message, decoded);
            }
        }
        Ok(())
    }

    async fn close(&self) {
        let mut status = self.status.lock().expect("transport poisoned");
        if matches!(*status, Status::Close) {
            return;
        }
        *status = Status::Close;
        drop(status);
        debug!("closing SSE transport");
        self.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, MatchKey};
    use crate::payload::TypeTag;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn drain_events_splits_on_blank_line_and_joins_data_lines() {
        let decoders = DecoderChain::new(vec![]);
        let dispatcher = Dispatcher::new(Arc::new(crate::dispatch::DefaultResolver));
        let received = Arc::new(StdMutex::new(Vec::new()));
        let received_clone = received.clone();
        dispatcher.register(
            MatchKey::Type(TypeTag::Text),
            Arc::new(move |_event, payload| {
                received_clone.lock().unwrap().push(payload.into_text_lossy());
            }),
        );

        let mut buffer = "data: hello\n\ndata: wo".to_string();
        drain_events(&mut buffer, &decoders, &dispatcher);
        assert_eq!(*received.lock().unwrap(), vec!["hello".to_string()]);
        assert_eq!(buffer, "data: wo");

        buffer.push_str("rld\n\n");
        drain_events(&mut buffer, &decoders, &dispatcher);
        assert_eq!(*received.lock().unwrap(), vec!["hello".to_string(), "world".to_string()]);
        assert!(buffer.is_empty());
    }
}
