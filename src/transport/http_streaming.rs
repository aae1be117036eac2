//! HTTP streaming transport backend, built on `reqwest`'s chunked body
//! streaming. A single long-lived GET whose body is read chunk by chunk;
//! each chunk is one message. Writes are separate POSTs, same as
//! long-polling.

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

pub struct HttpStreamingTransport {
    status: Mutex<Status>,
    error_handled: AtomicBool,
    root_future: Arc<SocketFuture>,
    http_client: reqwest::Client,
    request: Arc<Request>,
    decoders: DecoderChain,
    dispatcher: Dispatcher,
}

impl HttpStreamingTransport {
    pub async fn connect(ctx: TransportContext) -> Result<Arc<dyn Transport>, AtmosphereError> {
        debug!(uri = ctx.request.uri(), "starting HTTP streaming connect");
        let mut builder = ctx.http_client.get(ctx.request.uri());
        for (name, value) in ctx.request.headers() {
            builder = builder.header(name, value);
        }
        builder = builder.query(&ctx.request.query_params());

        let connected = super::with_connect_timeout(ctx.request.connect_timeout(), async move {
            Ok(builder.send().await?.error_for_status()?)
        })
        .await;
        if let Err(err) = &connected {
            warn!(%err, "HTTP streaming connect failed");
        }
        let response = connected?;
        debug!(uri = ctx.request.uri(), "HTTP streaming connect complete");

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
        let binary = ctx.request.binary_payload();
        let mut chunks = response.bytes_stream();
        tokio::spawn(async move {
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) if bytes.is_empty() => {}
                    Ok(bytes) => {
                        let payload = if binary {
                            Payload::Binary(bytes.to_vec())
                        } else {
                            Payload::Text(String::from_utf8_lossy(&bytes).into_owned())
                        };
                        if let Some(payload) = read_transport.decoders.run(Event::Message, payload) {
                            read_transport.dispatcher.dispatch(Event::Message, payload);
                        }
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
                debug!("HTTP streaming body ended, closing");
                read_transport.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
            }
        });

        Ok(transport as Arc<dyn Transport>)
    }
}

#[async_trait]
impl Transport for HttpStreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::HttpStreaming
    }

    fn status(&self) -> Status {
        *self.status.lock().expect("transport poisoned")
    }

    async fn error(&self, error: AtmosphereError) {
        error!(%error, "HTTP streaming transport error");
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
        debug!("closing HTTP streaming transport");
        self.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
    }
}
