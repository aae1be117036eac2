//! # Function Dispatch Module
//!
//! Resolves an inbound `(event, payload)` pair to zero or more user-registered
//! callbacks, in registration order. A callback matches by event name, by the
//! payload's [`TypeTag`], or via a custom [`FunctionResolver`] supplied on the
//! [`Request`](crate::request::Request).

use crate::error::AtmosphereError;
use crate::payload::{Event, Payload, TypeTag};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// What a [`FunctionWrapper`] was registered to match against.
#[derive(Clone)]
pub enum MatchKey {
    /// Matches a specific lifecycle event (`open`, `message`, `close`, ...).
    Event(Event),
    /// Matches any payload carrying this tag, regardless of event.
    Type(TypeTag),
    /// Matches every message, regardless of event or payload type.
    Wildcard,
}

/// Extension point for application-defined matching beyond event/type, e.g.
/// routing by a field inside the payload itself.
pub trait FunctionResolver: Send + Sync {
    fn resolves(&self, key: &MatchKey, event: Event, payload: &Payload) -> bool;
}

/// The resolver installed when a request builder doesn't supply one; matches
/// nothing extra, deferring entirely to `MatchKey`'s built-in rules.
#[derive(Default)]
pub struct DefaultResolver;

impl FunctionResolver for DefaultResolver {
    fn resolves(&self, _key: &MatchKey, _event: Event, _payload: &Payload) -> bool {
        false
    }
}

/// A registered user callback, boxed so it can be cloned and invoked without
/// holding the registry lock.
pub type Callback = Arc<dyn Fn(Event, Payload) + Send + Sync>;

/// A user-supplied error handler, distinct from an ordinary [`Callback`]
/// because its return value feeds back into the transport: `true` means the
/// handler consumed the error, so `Transport::error` suppresses propagation
/// to the root future instead of failing the connection.
pub type ErrorHandler = Arc<dyn Fn(&AtmosphereError) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct FunctionWrapper {
    key: MatchKey,
    callback: Callback,
}

impl FunctionWrapper {
    pub fn new(key: MatchKey, callback: Callback) -> Self {
        Self { key, callback }
    }

    fn matches(&self, event: Event, payload: &Payload, resolver: &dyn FunctionResolver) -> bool {
        let built_in = match &self.key {
            MatchKey::Wildcard => true,
            MatchKey::Event(e) => *e == event,
            MatchKey::Type(tag) => *tag == payload.tag(),
        };
        built_in || resolver.resolves(&self.key, event, payload)
    }
}

/// Thread-safe, registration-ordered callback registry shared between a
/// `Socket` and its decoder pipeline's terminal dispatch step.
#[derive(Clone)]
pub struct Dispatcher {
    wrappers: Arc<Mutex<Vec<FunctionWrapper>>>,
    resolver: Arc<dyn FunctionResolver>,
    error_handler: Arc<Mutex<Option<ErrorHandler>>>,
}

impl Dispatcher {
    pub fn new(resolver: Arc<dyn FunctionResolver>) -> Self {
        Self {
            wrappers: Arc::new(Mutex::new(Vec::new())),
            resolver,
            error_handler: Arc::new(Mutex::new(None)),
        }
    }

    /// Install the handler consulted by every transport's `error()` before
    /// it decides whether to signal the root future. Replaces any handler
    /// registered earlier.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.lock().expect("dispatcher poisoned") = Some(handler);
    }

    /// Run the registered error handler, if any, and report whether it
    /// claimed the error. No handler registered means unhandled.
    pub fn run_error_handler(&self, error: &AtmosphereError) -> bool {
        let handler = self.error_handler.lock().expect("dispatcher poisoned").clone();
        match handler {
            Some(handler) => match panic::catch_unwind(AssertUnwindSafe(|| handler(error))) {
                Ok(handled) => handled,
                Err(panic) => {
                    tracing::error!(error = %panic_message(&panic), "user error handler panicked");
                    false
                }
            },
            None => false,
        }
    }

    /// Register a callback under `key`. Dispatch order always follows
    /// registration order.
    pub fn register(&self, key: MatchKey, callback: Callback) {
        self.wrappers
            .lock()
            .expect("dispatcher poisoned")
            .push(FunctionWrapper::new(key, callback));
    }

    /// Invoke every matching callback, in registration order.
    ///
    /// Takes a snapshot of the registry before invoking anything: a callback
    /// that registers another callback (calling back into `Socket::on`) must
    /// not deadlock against the same mutex it would otherwise still be
    /// holding.
    pub fn dispatch(&self, event: Event, payload: Payload) {
        let snapshot: Vec<FunctionWrapper> = self.wrappers.lock().expect("dispatcher poisoned").clone();
        for wrapper in &snapshot {
            if !wrapper.matches(event, &payload, self.resolver.as_ref()) {
                continue;
            }
            let callback = wrapper.callback.clone();
            let payload = payload.clone();
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(event, payload))) {
                tracing::error!(event = event.name(), error = %panic_message(&panic), "user callback panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_follows_registration_order() {
        let dispatcher = Dispatcher::new(Arc::new(DefaultResolver));
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let order = order.clone();
            dispatcher.register(
                MatchKey::Wildcard,
                Arc::new(move |_event, _payload| order.lock().unwrap().push(tag)),
            );
        }
        dispatcher.dispatch(Event::Message, Payload::Text("hi".into()));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn type_mismatch_is_not_invoked() {
        let dispatcher = Dispatcher::new(Arc::new(DefaultResolver));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        dispatcher.register(
            MatchKey::Type(TypeTag::Binary),
            Arc::new(move |_event, _payload| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.dispatch(Event::Message, Payload::Text("hi".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_callback_does_not_suppress_later_callbacks() {
        let dispatcher = Dispatcher::new(Arc::new(DefaultResolver));
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register(MatchKey::Wildcard, Arc::new(|_event, _payload| panic!("boom")));
        let calls_clone = calls.clone();
        dispatcher.register(
            MatchKey::Wildcard,
            Arc::new(move |_event, _payload| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        dispatcher.dispatch(Event::Message, Payload::Text("hi".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
