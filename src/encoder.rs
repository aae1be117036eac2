//! # Encoder Pipeline Module
//!
//! The write-path counterpart to [`decoder`](crate::decoder): an ordered,
//! immutable chain (part of the [`Request`](crate::request::Request), never
//! mutated after `build()`) that turns an application-level value into a
//! wire-ready [`Payload`](crate::payload::Payload).
//!
//! Unlike the decoder chain, the encoder chain has no `ABORT` sentinel and
//! never mutates itself — self-mutation only happens on the *inbound*
//! Atmosphere handshake. A value that survives the whole chain
//! still tagged [`Encodable::Opaque`] has no encoder for it, which surfaces
//! as [`AtmosphereError::NoEncoder`].

use crate::error::AtmosphereError;
use crate::payload::Payload;
use std::fmt;
use std::sync::Arc;

/// A value on its way through the encoder chain.
///
/// Application objects that aren't already text or bytes are wrapped in
/// `Opaque` (a tagged-variant replacement for runtime type matching) so a
/// registered encoder can recognize and transform them; anything still
/// `Opaque` once the chain finishes has no encoder.
pub enum Encodable {
    /// Ready to send as a WebSocket text frame / HTTP body string.
    Text(String),
    /// Ready to send as a WebSocket binary frame / HTTP body bytes.
    Binary(Vec<u8>),
    /// An application value no encoder has claimed yet.
    Opaque(Box<dyn fmt::Debug + Send>),
}

impl Encodable {
    fn describe(&self) -> String {
        match self {
            Encodable::Text(s) => format!("Text({s:?})"),
            Encodable::Binary(b) => format!("Binary[{} bytes]", b.len()),
            Encodable::Opaque(v) => format!("{v:?}"),
        }
    }
}

impl fmt::Debug for Encodable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl From<String> for Encodable {
    fn from(s: String) -> Self {
        Encodable::Text(s)
    }
}

impl From<&str> for Encodable {
    fn from(s: &str) -> Self {
        Encodable::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Encodable {
    fn from(b: Vec<u8>) -> Self {
        Encodable::Binary(b)
    }
}

/// A single stage in the encoder pipeline.
pub trait Encoder: Send + Sync {
    /// Whether this encoder recognizes `value` and should run against it.
    fn accepts(&self, value: &Encodable) -> bool;

    /// Transform a recognized value, typically from `Opaque` into `Text`/`Binary`.
    fn encode(&self, value: Encodable) -> Encodable;
}

/// Ordered, immutable list of encoders — part of a built [`Request`](crate::request::Request).
#[derive(Clone, Default)]
pub struct EncoderChain {
    encoders: Arc<Vec<Box<dyn Encoder>>>,
}

impl EncoderChain {
    /// Build a chain from an ordered list of encoders.
    pub fn new(encoders: Vec<Box<dyn Encoder>>) -> Self {
        Self {
            encoders: Arc::new(encoders),
        }
    }

    /// Run `value` through every encoder whose `accepts` matches, in order,
    /// and resolve the result to a wire [`Payload`].
    pub fn run(&self, mut value: Encodable) -> Result<Payload, AtmosphereError> {
        for encoder in self.encoders.iter() {
            if encoder.accepts(&value) {
                value = encoder.encode(value);
            }
        }
        match value {
            Encodable::Text(s) => Ok(Payload::Text(s)),
            Encodable::Binary(b) => Ok(Payload::Binary(b)),
            opaque @ Encodable::Opaque(_) => Err(AtmosphereError::NoEncoder(opaque.describe())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;

    struct PingEncoder;
    impl Encoder for PingEncoder {
        fn accepts(&self, value: &Encodable) -> bool {
            matches!(value, Encodable::Opaque(v) if format!("{v:?}") == "Ping")
        }
        fn encode(&self, _value: Encodable) -> Encodable {
            Encodable::Text("ping".to_string())
        }
    }

    #[test]
    fn plain_text_needs_no_encoder() {
        let chain = EncoderChain::new(vec![]);
        let out = chain.run(Encodable::from("hello")).unwrap();
        assert_eq!(out, Payload::Text("hello".to_string()));
    }

    #[test]
    fn opaque_without_encoder_errors() {
        let chain = EncoderChain::new(vec![]);
        let err = chain.run(Encodable::Opaque(Box::new(Ping))).unwrap_err();
        assert!(matches!(err, AtmosphereError::NoEncoder(_)));
    }

    #[test]
    fn registered_encoder_claims_opaque_value() {
        let chain = EncoderChain::new(vec![Box::new(PingEncoder)]);
        let out = chain.run(Encodable::Opaque(Box::new(Ping))).unwrap();
        assert_eq!(out, Payload::Text("ping".to_string()));
    }

    #[test]
    fn describe_does_not_panic() {
        assert!(Encodable::Binary(vec![1, 2, 3]).describe().contains("3 bytes"));
    }
}
