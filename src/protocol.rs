//! # Atmosphere Protocol Decoders
//!
//! The in-band handshake embedded in the first message of an
//! Atmosphere-enabled connection, plus the two steady-state decoders it
//! installs once consumed. See the `AtmosphereRequestBuilder` in
//! [`request`](crate::request) for how these get wired into a chain.

use crate::decoder::{DecodeOutcome, Decoder, DecoderChain};
use crate::payload::{Event, Payload, TypeTag};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared, mutable cell for the server-assigned tracking UUID.
///
/// The request's query parameters are otherwise read-only after `build()`;
/// this is the one field the handshake decoder is allowed to write, exactly
/// once, under the same latch that gates the handshake itself.
#[derive(Clone)]
pub struct TrackingId(Arc<Mutex<String>>);

impl TrackingId {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(crate::defaults::BOOTSTRAP_TRACKING_ID.to_string())))
    }

    pub fn get(&self) -> String {
        self.0.lock().expect("tracking id poisoned").clone()
    }

    pub fn set(&self, value: String) {
        *self.0.lock().expect("tracking id poisoned") = value;
    }
}

impl Default for TrackingId {
    fn default() -> Self {
        Self::new()
    }
}

struct HandshakeState {
    received: AtomicBool,
    tracking_id: TrackingId,
    delimiter: char,
    padding_size: usize,
    default_heartbeat: u8,
}

impl HandshakeState {
    fn handle(&self, event: Event, payload: Payload, chain: &DecoderChain) -> DecodeOutcome {
        if event != Event::Message {
            return DecodeOutcome::Pass(payload);
        }
        if self
            .received
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return DecodeOutcome::Pass(payload);
        }

        let text = payload.into_text_lossy();
        match parse_handshake(&text, self.delimiter) {
            Some((tracking_id, heartbeat)) => {
                self.tracking_id.set(tracking_id);
                let heartbeat_char = heartbeat.unwrap_or(self.default_heartbeat);
                chain.insert(2, Box::new(PaddingAndHeartbeatDecoder::new(self.padding_size, heartbeat_char)));
                chain.remove_protocol_handshake_decoders();
                DecodeOutcome::Abort
            }
            None => {
                tracing::warn!(message = %text, "failed to parse atmosphere protocol handshake");
                DecodeOutcome::Pass(Payload::Text(text))
            }
        }
    }
}

/// Fires once on a text-framed first message (WebSocket text, SSE, streaming,
/// long-polling bodies).
pub struct StringProtocolDecoder {
    state: Arc<HandshakeState>,
}

impl Decoder for StringProtocolDecoder {
    fn accepts(&self) -> TypeTag {
        TypeTag::Text
    }

    fn decode(&self, event: Event, payload: Payload, chain: &DecoderChain) -> DecodeOutcome {
        self.state.handle(event, payload, chain)
    }

    fn is_protocol_handshake(&self) -> bool {
        true
    }
}

/// Fires once on a binary-framed first message (WebSocket binary frames).
pub struct BinaryProtocolDecoder {
    state: Arc<HandshakeState>,
}

impl Decoder for BinaryProtocolDecoder {
    fn accepts(&self) -> TypeTag {
        TypeTag::Binary
    }

    fn decode(&self, event: Event, payload: Payload, chain: &DecoderChain) -> DecodeOutcome {
        self.state.handle(event, payload, chain)
    }

    fn is_protocol_handshake(&self) -> bool {
        true
    }
}

/// Build the string/binary handshake decoder pair sharing one latch and one
/// [`TrackingId`] cell.
pub fn protocol_decoder_pair(
    tracking_id: TrackingId,
    delimiter: char,
    padding_size: usize,
    default_heartbeat: u8,
) -> (Box<dyn Decoder>, Box<dyn Decoder>) {
    let state = Arc::new(HandshakeState {
        received: AtomicBool::new(false),
        tracking_id,
        delimiter,
        padding_size,
        default_heartbeat,
    });
    (
        Box::new(StringProtocolDecoder { state: state.clone() }),
        Box::new(BinaryProtocolDecoder { state }),
    )
}

fn parse_handshake(text: &str, delimiter: char) -> Option<(String, Option<u8>)> {
    let mut fields = text.splitn(2, delimiter);
    let tracking_id = fields.next()?.trim();
    if tracking_id.is_empty() {
        return None;
    }
    let heartbeat = fields.next().and_then(|rest| rest.bytes().next());
    Some((tracking_id.to_string(), heartbeat))
}

/// Strips the `<digits><delimiter>` message-length prefix the server adds to
/// every frame when `trackMessageLength` is enabled. Not one-shot — stays
/// active for the life of the connection.
pub struct TrackMessageSizeDecoder {
    delimiter: char,
}

impl TrackMessageSizeDecoder {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }
}

impl Decoder for TrackMessageSizeDecoder {
    fn accepts(&self) -> TypeTag {
        TypeTag::Text
    }

    fn decode(&self, event: Event, payload: Payload, _chain: &DecoderChain) -> DecodeOutcome {
        if event != Event::Message {
            return DecodeOutcome::Pass(payload);
        }
        let text = match payload {
            Payload::Text(s) => s,
            other => return DecodeOutcome::Pass(other),
        };
        match text.split_once(self.delimiter) {
            Some((len, rest)) if !len.is_empty() && len.chars().all(|c| c.is_ascii_digit()) => {
                DecodeOutcome::Pass(Payload::Text(rest.to_string()))
            }
            _ => DecodeOutcome::Pass(Payload::Text(text)),
        }
    }
}

/// Drops a leading run of `padding_size` heartbeat bytes. A frame consisting
/// of nothing but heartbeat padding has nothing left to dispatch, so it is
/// aborted rather than passed through as an empty payload.
pub struct PaddingAndHeartbeatDecoder {
    padding_size: usize,
    heartbeat_char: u8,
}

impl PaddingAndHeartbeatDecoder {
    pub fn new(padding_size: usize, heartbeat_char: u8) -> Self {
        Self { padding_size, heartbeat_char }
    }
}

impl Decoder for PaddingAndHeartbeatDecoder {
    fn accepts(&self) -> TypeTag {
        TypeTag::Text
    }

    fn decode(&self, event: Event, payload: Payload, _chain: &DecoderChain) -> DecodeOutcome {
        if event != Event::Message {
            return DecodeOutcome::Pass(payload);
        }
        let text = match payload {
            Payload::Text(s) => s,
            other => return DecodeOutcome::Pass(other),
        };
        let bytes = text.as_bytes();
        let run = bytes.iter().take(self.padding_size).take_while(|&&b| b == self.heartbeat_char).count();
        if run < self.padding_size {
            return DecodeOutcome::Pass(Payload::Text(text));
        }
        let remainder = &bytes[self.padding_size..];
        if remainder.is_empty() {
            DecodeOutcome::Abort
        } else {
            DecodeOutcome::Pass(Payload::Text(String::from_utf8_lossy(remainder).into_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecoderChain;

    #[test]
    fn handshake_parses_tracking_id_and_heartbeat() {
        let tracking_id = TrackingId::new();
        let (string_decoder, binary_decoder) = protocol_decoder_pair(tracking_id.clone(), '|', 8, b'X');
        let chain = DecoderChain::new(vec![string_decoder, binary_decoder]);
        let out = chain.run(Event::Message, Payload::Text("5a3f-uuid|X".into()));
        assert!(out.is_none());
        assert_eq!(tracking_id.get(), "5a3f-uuid");
        // Both protocol-handshake decoders are gone; the padding decoder
        // the handshake installed takes their place.
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn second_message_after_handshake_is_delivered() {
        let tracking_id = TrackingId::new();
        let (string_decoder, binary_decoder) = protocol_decoder_pair(tracking_id, '|', 8, b'X');
        let chain = DecoderChain::new(vec![string_decoder, binary_decoder]);

        let first = chain.run(Event::Message, Payload::Text("5a3f-uuid|X".into()));
        assert!(first.is_none());

        let second = chain.run(Event::Message, Payload::Text("hello".into()));
        assert_eq!(second, Some(Payload::Text("hello".into())));
    }

    #[test]
    fn handshake_with_length_prefix_is_stripped_first() {
        let tracking_id = TrackingId::new();
        let (string_decoder, binary_decoder) = protocol_decoder_pair(tracking_id.clone(), '|', 8, b'X');
        let chain = DecoderChain::new(vec![Box::new(TrackMessageSizeDecoder::new('|')), string_decoder, binary_decoder]);
        let out = chain.run(Event::Message, Payload::Text("11|5a3f-uuid|X".into()));
        assert!(out.is_none());
        assert_eq!(tracking_id.get(), "5a3f-uuid");
    }

    #[test]
    fn malformed_handshake_passes_through_and_latches() {
        let tracking_id = TrackingId::new();
        let (string_decoder, binary_decoder) = protocol_decoder_pair(tracking_id.clone(), '|', 8, b'X');
        let chain = DecoderChain::new(vec![string_decoder, binary_decoder]);
        let out = chain.run(Event::Message, Payload::Text("".into()));
        assert_eq!(out, Some(Payload::Text("".into())));
        assert_eq!(tracking_id.get(), crate::defaults::BOOTSTRAP_TRACKING_ID);
    }

    #[test]
    fn padding_decoder_strips_exact_run() {
        let decoder = PaddingAndHeartbeatDecoder::new(8, b'Y');
        let chain = DecoderChain::new(vec![]);
        match decoder.decode(Event::Message, Payload::Text("YYYYYYYYreal".into()), &chain) {
            DecodeOutcome::Pass(Payload::Text(s)) => assert_eq!(s, "real"),
            _ => panic!("expected pass-through"),
        }
    }

    #[test]
    fn padding_only_frame_is_aborted() {
        let decoder = PaddingAndHeartbeatDecoder::new(4, b'X');
        let chain = DecoderChain::new(vec![]);
        assert!(matches!(
            decoder.decode(Event::Message, Payload::Text("XXXX".into()), &chain),
            DecodeOutcome::Abort
        ));
    }
}
