//! # Connection-Gate Future Module
//!
//! Bridges an async `Socket::open`/`Socket::fire` call onto a connection that
//! may not be established yet, or may never succeed. Modeled with a
//! `tokio::sync::Notify` plus a guarded result cell rather than a blocking
//! latch and a heavyweight `Future` object.

use crate::error::AtmosphereError;
use crate::payload::Payload;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Notify;

enum GateState {
    Pending,
    Done,
    Errored(String),
}

/// Forwarding hooks bound once by the owning `Socket`, letting `fire`/`close`
/// read as convenience methods on the future without the future holding a
/// strong (cyclic) reference back to the socket.
struct Hooks {
    fire: Arc<dyn Fn(Payload) + Send + Sync>,
    close: Arc<dyn Fn() + Send + Sync>,
}

/// The root connection-gate future returned by `Socket::open`.
///
/// At most one terminal event (`done` or `io_exception`) is ever observable;
/// once the gate is settled, later calls to either are no-ops and every
/// waiter — past, present, or future — sees the same outcome.
pub struct SocketFuture {
    notify: Notify,
    state: Mutex<GateState>,
    hooks: OnceLock<Hooks>,
    last_timeout: Mutex<Option<String>>,
}

impl Default for SocketFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketFuture {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            state: Mutex::new(GateState::Pending),
            hooks: OnceLock::new(),
            last_timeout: Mutex::new(None),
        }
    }

    /// Bind the forwarding targets for `fire`/`close`. Called once by the
    /// owning `Socket` right after construction.
    pub fn bind(&self, fire: Arc<dyn Fn(Payload) + Send + Sync>, close: Arc<dyn Fn() + Send + Sync>) {
        let _ = self.hooks.set(Hooks { fire, close });
    }

    /// Signal successful connection. A no-op once the gate already has a
    /// terminal state.
    pub fn done(&self) {
        let mut state = self.state.lock().expect("future poisoned");
        if matches!(*state, GateState::Pending) {
            *state = GateState::Done;
            self.notify.notify_waiters();
        }
    }

    /// Signal a fatal I/O error. A no-op once the gate already has a
    /// terminal state; errors aren't `Clone`, so the message is captured
    /// once and replayed to every waiter afterward.
    pub fn io_exception(&self, error: &AtmosphereError) {
        let mut state = self.state.lock().expect("future poisoned");
        if matches!(*state, GateState::Pending) {
            *state = GateState::Errored(error.to_string());
            self.notify.notify_waiters();
        }
    }

    /// Record a non-fatal write timeout. Unlike `done`/`io_exception` this
    /// never settles the gate — a timed-out write doesn't mean the
    /// connection itself failed — it just leaves the most recent timeout
    /// message visible to anyone polling `last_timeout`.
    pub fn timeout_exception(&self, message: impl Into<String>) {
        *self.last_timeout.lock().expect("future poisoned") = Some(message.into());
    }

    /// The message from the most recently recorded write timeout, if any.
    pub fn last_timeout(&self) -> Option<String> {
        self.last_timeout.lock().expect("future poisoned").clone()
    }

    /// Block until the gate reaches a terminal state, returning `Ok(())` on
    /// success or the recorded error.
    pub async fn get(&self) -> Result<(), AtmosphereError> {
        loop {
            // Register interest before re-checking state: `notify_waiters()`
            // wakes only waiters already polling it, so a `done()`/
            // `io_exception()` landing between the state check and the
            // `notified().await` below would otherwise be lost forever.
            let notified = self.notify.notified();
            {
                let state = self.state.lock().expect("future poisoned");
                match &*state {
                    GateState::Pending => {}
                    GateState::Done => return Ok(()),
                    GateState::Errored(message) => return Err(AtmosphereError::Recorded(message.clone())),
                }
            }
            notified.await;
        }
    }

    /// Non-blocking peek used at the end of a write: the recorded error if
    /// the gate has already failed, `Ok(())` otherwise.
    pub fn finish_or_throw_exception(&self) -> Result<(), AtmosphereError> {
        match &*self.state.lock().expect("future poisoned") {
            GateState::Errored(message) => Err(AtmosphereError::Recorded(message.clone())),
            _ => Ok(()),
        }
    }

    /// Whether the gate has already settled successfully.
    pub fn is_done(&self) -> bool {
        matches!(*self.state.lock().expect("future poisoned"), GateState::Done)
    }

    /// Forward a fire to the owning socket.
    pub fn fire(&self, payload: Payload) {
        if let Some(hooks) = self.hooks.get() {
            (hooks.fire)(payload);
        }
    }

    /// Forward a close to the owning socket.
    pub fn close(&self) {
        if let Some(hooks) = self.hooks.get() {
            (hooks.close)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn done_unblocks_get() {
        let future = SocketFuture::new();
        future.done();
        assert!(future.get().await.is_ok());
    }

    #[test]
    fn timeout_exception_is_observable_without_settling_the_gate() {
        let future = SocketFuture::new();
        assert_eq!(future.last_timeout(), None);
        future.timeout_exception("request timed out");
        assert_eq!(future.last_timeout(), Some("request timed out".to_string()));
        assert!(!future.is_done());
        assert!(future.finish_or_throw_exception().is_ok());
    }

    #[tokio::test]
    async fn io_exception_is_replayed_to_every_waiter() {
        let future = SocketFuture::new();
        future.io_exception(&AtmosphereError::Closed);
        assert!(future.get().await.is_err());
        assert!(future.get().await.is_err());
    }

    #[tokio::test]
    async fn done_after_error_is_a_noop() {
        let future = SocketFuture::new();
        future.io_exception(&AtmosphereError::Closed);
        future.done();
        assert!(future.get().await.is_err());
    }

    #[tokio::test]
    async fn pending_get_unblocks_after_done_from_another_task() {
        let future = Arc::new(SocketFuture::new());
        let waiter = {
            let future = future.clone();
            tokio::spawn(async move { future.get().await })
        };
        tokio::task::yield_now().await;
        future.done();
        assert!(waiter.await.unwrap().is_ok());
    }

    /// Runs on a real multi-thread runtime so `get()` and `done()` can land
    /// on different OS threads at the same time, the way `Socket::connect`
    /// races a transport's background connect task in production. A
    /// current-thread runtime can't reach the gap between the state check
    /// and the `notified()` await that this guards against.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_done_is_never_lost_under_real_parallelism() {
        for _ in 0..200 {
            let future = Arc::new(SocketFuture::new());
            let waiter = {
                let future = future.clone();
                tokio::spawn(async move { future.get().await })
            };
            let signaller = {
                let future = future.clone();
                tokio::spawn(async move { future.done() })
            };
            signaller.await.unwrap();
            assert!(waiter.await.unwrap().is_ok());
        }
    }
}
