//! # Request Model and Builders
//!
//! `Request` is the immutable connection descriptor handed to `Socket::open`;
//! `AtmosphereRequest` specializes it with the handshake query parameters and
//! protocol decoders the Atmosphere wire format requires. Building either is
//! the configuration layer of this crate — the equivalent of a
//! `TransportConfig` struct translated into "build once, never mutate."

use crate::decoder::{Decoder, DecoderChain};
use crate::dispatch::{DefaultResolver, FunctionResolver};
use crate::encoder::{Encoder, EncoderChain};
use crate::error::AtmosphereError;
use crate::protocol::{protocol_decoder_pair, TrackMessageSizeDecoder, TrackingId};
use crate::transport::TransportKind;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Broadcaster cache strategy requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    HeaderBroadcastCache,
    UuidBroadcasterCache,
    SessionBroadcastCache,
    NoBroadcastCache,
}

/// Immutable connection descriptor. Constructed by [`RequestBuilder`] and
/// shared read-only by the transport for the life of the socket; the one
/// exception is the tracking-id query parameter, written exactly once by the
/// protocol handshake decoder.
pub struct Request {
    uri: String,
    method: http::Method,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    transports: Vec<TransportKind>,
    encoders: EncoderChain,
    decoders: DecoderChain,
    resolver: Arc<dyn FunctionResolver>,
    connect_timeout: Duration,
    read_timeout: Duration,
    request_timeout: Duration,
    max_request_count: usize,
    binary_payload: bool,
    tracking_id: Option<TrackingId>,
}

impl Request {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The request's query parameters, with the tracking-id entry (if any)
    /// substituted for its current live value.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = self.query.clone();
        if let Some(tracking_id) = &self.tracking_id {
            let value = tracking_id.get();
            match params.iter_mut().find(|(k, _)| k == "X-Atmosphere-tracking-id") {
                Some(entry) => entry.1 = value,
                None => params.push(("X-Atmosphere-tracking-id".to_string(), value)),
            }
        }
        params
    }

    pub fn transports(&self) -> &[TransportKind] {
        &self.transports
    }

    pub fn encoders(&self) -> &EncoderChain {
        &self.encoders
    }

    pub fn decoders(&self) -> &DecoderChain {
        &self.decoders
    }

    pub fn resolver(&self) -> &Arc<dyn FunctionResolver> {
        &self.resolver
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_request_count(&self) -> usize {
        self.max_request_count
    }

    pub fn binary_payload(&self) -> bool {
        self.binary_payload
    }
}

/// Accumulates headers, query parameters, transports, and chains, then
/// produces an immutable [`Request`].
pub struct RequestBuilder {
    uri: String,
    method: http::Method,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    transports: Vec<TransportKind>,
    decoders: Vec<Box<dyn Decoder>>,
    encoders: Vec<Box<dyn Encoder>>,
    resolver: Option<Arc<dyn FunctionResolver>>,
    connect_timeout: Duration,
    read_timeout: Duration,
    request_timeout: Duration,
    max_request_count: usize,
    binary_payload: bool,
    tracking_id: Option<TrackingId>,
}

impl RequestBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: http::Method::POST,
            headers: Vec::new(),
            query: Vec::new(),
            transports: Vec::new(),
            decoders: Vec::new(),
            encoders: Vec::new(),
            resolver: None,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            max_request_count: usize::MAX,
            binary_payload: false,
            tracking_id: None,
        }
    }

    pub fn method(mut self, method: http::Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Add `kind` to the ordered transport list and, the first time any
    /// transport is added with this token, record it in the
    /// `X-Atmosphere-Transport` query parameter.
    pub fn transport(mut self, kind: TransportKind) -> Self {
        let token = kind.wire_name();
        if !self.query.iter().any(|(k, v)| k == "X-Atmosphere-Transport" && v == token) {
            self.query.push(("X-Atmosphere-Transport".to_string(), token.to_string()));
        }
        self.transports.push(kind);
        self
    }

    pub fn decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub fn encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.encoders.push(encoder);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn FunctionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_request_count(mut self, count: usize) -> Self {
        self.max_request_count = count;
        self
    }

    pub fn binary_payload(mut self, flag: bool) -> Self {
        self.binary_payload = flag;
        self
    }

    pub fn build(self) -> Request {
        Request {
            uri: self.uri,
            method: self.method,
            headers: self.headers,
            query: self.query,
            transports: self.transports,
            encoders: EncoderChain::new(self.encoders),
            decoders: DecoderChain::new(self.decoders),
            resolver: self.resolver.unwrap_or_else(|| Arc::new(DefaultResolver)),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            request_timeout: self.request_timeout,
            max_request_count: self.max_request_count,
            binary_payload: self.binary_payload,
            tracking_id: self.tracking_id,
        }
    }
}

/// [`Request`] plus the Atmosphere-specific fields and handshake wiring.
pub struct AtmosphereRequest {
    pub request: Request,
    pub cache_type: CacheType,
    pub track_message_length: bool,
    pub delimiter: char,
    pub padding_size: usize,
    pub enable_protocol: bool,
}

impl std::ops::Deref for AtmosphereRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

impl From<AtmosphereRequest> for Request {
    fn from(value: AtmosphereRequest) -> Self {
        value.request
    }
}

/// Builds an [`AtmosphereRequest`]. `build(self)` consumes the builder, which
/// is what makes "may be built only once" a type-level fact rather than a
/// runtime flag check: a second `build()` call is a compile error.
pub struct AtmosphereRequestBuilder {
    builder: RequestBuilder,
    cache_type: CacheType,
    track_message_length: bool,
    delimiter: char,
    padding_size: usize,
    enable_protocol: bool,
    content_type: Option<String>,
}

impl AtmosphereRequestBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            builder: RequestBuilder::new(uri),
            cache_type: CacheType::UuidBroadcasterCache,
            track_message_length: false,
            delimiter: crate::defaults::TRACK_MESSAGE_LENGTH_DELIMITER,
            padding_size: crate::defaults::PADDING_SIZE,
            enable_protocol: true,
            content_type: None,
        }
    }

    pub fn method(mut self, method: http::Method) -> Self {
        self.builder = self.builder.method(method);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.clone());
        }
        self.builder = self.builder.header(name, value);
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.builder = self.builder.query_param(name, value);
        self
    }

    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.builder = self.builder.transport(kind);
        self
    }

    pub fn decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.builder = self.builder.decoder(decoder);
        self
    }

    pub fn encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.builder = self.builder.encoder(encoder);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn FunctionResolver>) -> Self {
        self.builder = self.builder.resolver(resolver);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.read_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.request_timeout(timeout);
        self
    }

    pub fn max_request_count(mut self, count: usize) -> Self {
        self.builder = self.builder.max_request_count(count);
        self
    }

    pub fn binary_payload(mut self, flag: bool) -> Self {
        self.builder = self.builder.binary_payload(flag);
        self
    }

    pub fn cache_type(mut self, cache_type: CacheType) -> Self {
        self.cache_type = cache_type;
        self
    }

    pub fn track_message_length(mut self, enabled: bool) -> Self {
        self.track_message_length = enabled;
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn padding_size(mut self, size: usize) -> Self {
        self.padding_size = size;
        self
    }

    pub fn enable_protocol(mut self, enabled: bool) -> Self {
        self.enable_protocol = enabled;
        self
    }

    /// Inject the Atmosphere handshake query parameters and prepend the
    /// protocol-handshake decoders, then build the immutable request.
    pub fn build(self) -> Result<AtmosphereRequest, AtmosphereError> {
        let AtmosphereRequestBuilder {
            mut builder,
            cache_type,
            track_message_length,
            delimiter,
            padding_size,
            enable_protocol,
            content_type,
        } = self;

        if builder.uri.is_empty() {
            return Err(AtmosphereError::Protocol("request URI must not be empty".to_string()));
        }

        let tracking_id = TrackingId::new();
        builder = builder
            .query_param("X-Atmosphere-Framework", crate::defaults::FRAMEWORK_VERSION)
            .query_param("X-Atmosphere-tracking-id", crate::defaults::BOOTSTRAP_TRACKING_ID)
            .query_param("X-atmo-protocol", enable_protocol.to_string());
        if track_message_length {
            builder = builder.query_param("X-Atmosphere-TrackMessageSize", "true");
        }
        if let Some(content_type) = content_type {
            builder = builder.query_param("Content-Type", content_type);
        }

        let mut prepend: Vec<Box<dyn Decoder>> = Vec::new();
        if enable_protocol {
            let (string_decoder, binary_decoder) =
                protocol_decoder_pair(tracking_id.clone(), delimiter, padding_size, crate::defaults::HEARTBEAT_CHAR);
            prepend.push(string_decoder);
            prepend.push(binary_decoder);
        }
        if track_message_length {
            prepend.insert(0, Box::new(TrackMessageSizeDecoder::new(delimiter)));
        }
        builder.decoders.splice(0..0, prepend);
        builder.tracking_id = Some(tracking_id);

        Ok(AtmosphereRequest {
            request: builder.build(),
            cache_type,
            track_message_length,
            delimiter,
            padding_size,
            enable_protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_token_is_recorded_once() {
        let request = RequestBuilder::new("ws://example.test/socket")
            .transport(TransportKind::WebSocket)
            .transport(TransportKind::WebSocket)
            .build();
        let count = request
            .query_params()
            .iter()
            .filter(|(k, v)| k == "X-Atmosphere-Transport" && v == "websocket")
            .count();
        assert_eq!(count, 1);
        assert_eq!(request.transports().len(), 2);
    }

    #[test]
    fn atmosphere_builder_injects_handshake_state() {
        let request = AtmosphereRequestBuilder::new("http://example.test/socket")
            .track_message_length(true)
            .build()
            .unwrap();
        assert_eq!(request.decoders.len(), 3);
        assert!(request
            .query_params()
            .iter()
            .any(|(k, v)| k == "X-Atmosphere-tracking-id" && v == "0"));
    }

    #[test]
    fn empty_uri_is_rejected() {
        let err = AtmosphereRequestBuilder::new("").build().unwrap_err();
        assert!(matches!(err, AtmosphereError::Protocol(_)));
    }
}
