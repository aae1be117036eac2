//! # Decoder Pipeline Module
//!
//! An ordered chain of payload transformers sitting between the raw bytes a
//! [`Transport`](crate::transport::Transport) produces and the typed
//! callbacks registered on a [`Socket`](crate::socket::Socket). Each decoder
//! declares the [`TypeTag`] it accepts; a decoder whose tag doesn't match the
//! current payload is skipped silently. Any decoder may return
//! [`DecodeOutcome::Abort`], which terminates the chain and suppresses user
//! dispatch for that message — this is how the Atmosphere handshake and
//! padding/heartbeat frames stay invisible to application code.
//!
//! The chain is shared, by reference, between the `Socket` and its active
//! `Transport`, and decoders may mutate it mid-walk — the protocol-handshake
//! decoders remove themselves and install a padding decoder once the
//! handshake is consumed.

use crate::payload::{Event, Payload, TypeTag};
use std::sync::{Arc, Mutex};

/// Result of running one decoder against the current payload.
pub enum DecodeOutcome {
    /// The decoder transformed (or passed through) the payload; continue
    /// walking the chain with this as the new current payload.
    Pass(Payload),
    /// Terminate the chain for this message; nothing is dispatched to user
    /// callbacks.
    Abort,
}

/// A single stage in the decoder pipeline.
pub trait Decoder: Send + Sync {
    /// The payload tag this decoder is willing to process. Decoders whose
    /// tag doesn't match the current payload are skipped for this message.
    fn accepts(&self) -> TypeTag;

    /// Transform (or abort) the current payload.
    ///
    /// `chain` gives the decoder access to the live chain it is running
    /// inside of, so handshake-style decoders can install follow-on decoders
    /// or remove themselves once their one-shot job is done.
    fn decode(&self, event: Event, payload: Payload, chain: &DecoderChain) -> DecodeOutcome;

    /// Marks the Atmosphere protocol-handshake decoders so the handshake
    /// decoder that fires can remove both itself and its sibling from the
    /// live chain in one step, without needing a full `Any`-based identity
    /// scheme for an otherwise-trait-object chain.
    fn is_protocol_handshake(&self) -> bool {
        false
    }
}

/// Thread-safe, mutation-tolerant ordered list of decoders.
///
/// Cloning a `DecoderChain` clones the `Arc`, so a `Socket` and its active
/// `Transport` share one underlying `Vec` — mutations (self-removal,
/// insertion) are observable on both sides immediately.
#[derive(Clone, Default)]
pub struct DecoderChain {
    inner: Arc<Mutex<Vec<Box<dyn Decoder>>>>,
}

impl DecoderChain {
    /// Build a chain from an initial ordered list of decoders.
    pub fn new(decoders: Vec<Box<dyn Decoder>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(decoders)),
        }
    }

    /// Insert a decoder at `index`, clamped to the chain's current length.
    pub fn insert(&self, index: usize, decoder: Box<dyn Decoder>) {
        let mut guard = self.inner.lock().expect("decoder chain poisoned");
        let index = index.min(guard.len());
        guard.insert(index, decoder);
    }

    /// Append a decoder to the end of the chain.
    pub fn push(&self, decoder: Box<dyn Decoder>) {
        self.inner.lock().expect("decoder chain poisoned").push(decoder);
    }

    /// Remove every decoder for which `is_protocol_handshake()` is true.
    pub fn remove_protocol_handshake_decoders(&self) {
        self.inner
            .lock()
            .expect("decoder chain poisoned")
            .retain(|d| !d.is_protocol_handshake());
    }

    /// Current number of decoders in the chain.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("decoder chain poisoned").len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the full pipeline against one inbound `(event, payload)` pair.
    ///
    /// Returns `Some(payload)` with the final transformed payload if no
    /// decoder aborted the chain, or `None` if the message should be
    /// suppressed from user dispatch.
    ///
    /// Walks by index rather than over a snapshot iterator, re-reading the
    /// chain's current length every step, so a decoder that inserts or
    /// removes entries mid-walk (including removing itself) neither panics
    /// nor skips whatever decoder now occupies the next index.
    pub fn run(&self, event: Event, mut payload: Payload) -> Option<Payload> {
        let mut index = 0;
        loop {
            match self.invoke(index, event, payload) {
                Some((DecodeOutcome::Pass(next), advanced)) => {
                    payload = next;
                    if advanced {
                        index += 1;
                    }
                }
                Some((DecodeOutcome::Abort, _)) => return None,
                None => break,
            }
        }
        Some(payload)
    }

    /// Invoke the decoder currently at `index`, if its tag matches the
    /// payload and `index` is still in range (it may not be, if a prior
    /// step removed entries). Returns the outcome plus whether `index`
    /// should advance — a type-incompatible decoder is skipped without
    /// consuming a step, so the same index is retried against whatever
    /// decoder now sits there after a removal.
    fn invoke(&self, index: usize, event: Event, payload: Payload) -> Option<(DecodeOutcome, bool)> {
        // The mutex is not re-entrant, and a handshake decoder calls back
        // into `insert`/`remove_protocol_handshake_decoders` from inside
        // `decode`, so the decoder under consideration is taken out of the
        // vec before invoking it and restored afterward (unless it is a
        // one-shot protocol-handshake decoder, which is never restored).
        let mut guard = self.inner.lock().expect("decoder chain poisoned");
        if index >= guard.len() {
            return None;
        }
        if guard[index].accepts() != payload.tag() {
            return Some((DecodeOutcome::Pass(payload), true));
        }
        let decoder = guard.remove(index);
        drop(guard);

        let outcome = decoder.decode(event, payload, self);

        let restored = !decoder.is_protocol_handshake();
        if restored {
            let mut guard = self.inner.lock().expect("decoder chain poisoned");
            let index = index.min(guard.len());
            guard.insert(index, decoder);
        }
        // If the decoder was removed for good, the next decoder now sits at
        // the same `index` — don't advance past it.
        Some((outcome, restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;
    impl Decoder for Upper {
        fn accepts(&self) -> TypeTag {
            TypeTag::Text
        }
        fn decode(&self, _event: Event, payload: Payload, _chain: &DecoderChain) -> DecodeOutcome {
            match payload {
                Payload::Text(s) => DecodeOutcome::Pass(Payload::Text(s.to_uppercase())),
                other => DecodeOutcome::Pass(other),
            }
        }
    }

    struct AlwaysAbort;
    impl Decoder for AlwaysAbort {
        fn accepts(&self) -> TypeTag {
            TypeTag::Text
        }
        fn decode(&self, _event: Event, _payload: Payload, _chain: &DecoderChain) -> DecodeOutcome {
            DecodeOutcome::Abort
        }
    }

    #[test]
    fn pass_through_transforms_payload() {
        let chain = DecoderChain::new(vec![Box::new(Upper)]);
        let out = chain.run(Event::Message, Payload::Text("hi".into()));
        assert_eq!(out, Some(Payload::Text("HI".into())));
    }

    #[test]
    fn abort_suppresses_dispatch() {
        let chain = DecoderChain::new(vec![Box::new(Upper), Box::new(AlwaysAbort)]);
        let out = chain.run(Event::Message, Payload::Text("hi".into()));
        assert!(out.is_none());
    }

    #[test]
    fn binary_decoder_skips_text_payload() {
        struct BinaryOnly;
        impl Decoder for BinaryOnly {
            fn accepts(&self) -> TypeTag {
                TypeTag::Binary
            }
            fn decode(&self, _e: Event, _p: Payload, _c: &DecoderChain) -> DecodeOutcome {
                DecodeOutcome::Abort
            }
        }
        let chain = DecoderChain::new(vec![Box::new(BinaryOnly)]);
        let out = chain.run(Event::Message, Payload::Text("unchanged".into()));
        assert_eq!(out, Some(Payload::Text("unchanged".into())));
    }
}
