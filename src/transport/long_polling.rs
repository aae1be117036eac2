//! HTTP long-polling transport backend, built on `reqwest`.
//!
//! Each poll is an independent GET whose response body is one message; on
//! completion status cycles OPEN -> REOPENED -> OPEN and the poll is
//! re-issued, up to the request's configured maximum poll count. Writes are
//! separate POSTs.

use super::{Transport, TransportContext, TransportKind};
use crate::decoder::DecoderChain;
use crate::dispatch::Dispatcher;
use crate::error::AtmosphereError;
use crate::future::SocketFuture;
use crate::payload::{Event, Payload};
use crate::request::Request;
use crate::socket::Status;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

pub struct LongPollingTransport {
    status: Mutex<Status>,
    error_handled: AtomicBool,
    root_future: Arc<SocketFuture>,
    http_client: reqwest::Client,
    request: Arc<Request>,
    decoders: DecoderChain,
    dispatcher: Dispatcher,
    cancelled: Arc<AtomicBool>,
    polls_issued: Arc<AtomicUsize>,
}

impl LongPollingTransport {
    pub async fn connect(ctx: TransportContext) -> Result<Arc<dyn Transport>, AtmosphereError> {
        debug!(uri = ctx.request.uri(), "starting long-polling connect");
        let transport = Arc::new(Self {
            status: Mutex::new(Status::Init),
            error_handled: AtomicBool::new(false),
            root_future: ctx.root_future.clone(),
            http_client: ctx.http_client.clone(),
            request: ctx.request.clone(),
            decoders: ctx.request.decoders().clone(),
            dispatcher: ctx.dispatcher.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
            polls_issued: Arc::new(AtomicUsize::new(0)),
        });

        let poll_transport = transport.clone();
        tokio::spawn(async move { poll_transport.poll_loop().await });

        Ok(transport as Arc<dyn Transport>)
    }

    async fn poll_loop(self: Arc<Self>) {
        let max = self.request.max_request_count();
        loop {
            if self.cancelled.load(Ordering::SeqCst) || self.polls_issued.load(Ordering::SeqCst) >= max {
                let mut status = self.status.lock().expect("transport poisoned");
                let was_live = !matches!(*status, Status::Close | Status::Error);
                if was_live {
                    *status = Status::Close;
                }
                drop(status);
                if was_live {
                    debug!("long-polling reached max poll count, closing");
                    self.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
                }
                return;
            }
            let is_first_poll = matches!(self.status(), Status::Init);
            self.polls_issued.fetch_add(1, Ordering::SeqCst);

            let mut builder = self.http_client.get(self.request.uri());
            for (name, value) in self.request.headers() {
                builder = builder.header(name, value);
            }
            builder = builder.query(&self.request.query_params()).timeout(self.request.read_timeout());

            let sent: Result<reqwest::Response, AtmosphereError> = if is_first_poll {
                super::with_connect_timeout(self.request.connect_timeout(), async move {
                    builder.send().await?.error_for_status().map_err(AtmosphereError::Http)
                })
                .await
            } else {
                builder
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(AtmosphereError::Http)
            };

            let response = match sent {
                Ok(response) => {
                    if is_first_poll {
                        debug!(uri = self.request.uri(), "long-polling connect complete");
                    }
                    response
                }
                Err(err) => {
                    if is_first_poll {
                        warn!(%err, "long-polling connect failed");
                    }
                    self.error(err).await;
                    return;
                }
            };
            let received = if self.request.binary_payload() {
                response.bytes().await.map(|b| (Payload::Binary(b.to_vec()), b.is_empty()))
            } else {
                response.text().await.map(|s| {
                    let empty = s.is_empty();
                    (Payload::Text(s), empty)
                })
            };

            match received {
                Ok((payload, is_empty)) => {
                    self.mark_open();
                    self.root_future.done();
                    if !is_empty {
                        if let Some(payload) = self.decoders.run(Event::Message, payload) {
                            self.dispatcher.dispatch(Event::Message, payload);
                        }
                    }
                    self.rearm();
                }
                Err(err) => {
                    self.error(AtmosphereError::Http(err)).await;
                    return;
                }
            }
        }
    }

    fn mark_open(&self) {
        let mut status = self.status.lock().expect("transport poisoned");
        let was_init = matches!(*status, Status::Init);
        *status = if was_init { Status::Open } else { Status::Reopened };
        drop(status);
        if was_init {
            self.dispatcher.dispatch(Event::Open, Payload::Text(String::new()));
        }
    }

    fn rearm(&self) {
        let mut status = self.status.lock().expect("transport poisoned");
        if matches!(*status, Status::Reopened) {
            *status = Status::Open;
            drop(status);
            self.dispatcher.dispatch(Event::ReOpen, Payload::Text(String::new()));
        }
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
    }

    fn status(&self) -> Status {
        *self.status.lock().expect("transport poisoned")
    }

    async fn error(&self, error: AtmosphereError) {
        error!(%error, "long-polling transport error");
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
        let received = if self.request.binary_payload() {
            response.bytes().await.map(|b| (Payload::Binary(b.to_vec()), b.is_empty())).map_err(AtmosphereError::Http)?
        } else {
            let body = response.text().await.map_err(AtmosphereError::Http)?;
            let empty = body.is_empty();
            (Payload::Text(body), empty)
        };
        let (payload, is_empty) = received;
        if !is_empty {
            if let Some(decoded) = self.decoders.run(Event::Message, payload) {
                self.dispatcher.dispatch(Event::Message, decoded);
            }
        }
        Ok(())
    }

    async fn close(&self) {
        {
            let mut status = self.status.lock().expect("transport poisoned");
            if matches!(*status, Status::Close) {
                return;
            }
            *status = Status::Close;
        }
        debug!("closing long-polling transport");
        self.cancelled.store(true, Ordering::SeqCst);
        self.dispatcher.dispatch(Event::Close, Payload::Text(String::new()));
    }
}
