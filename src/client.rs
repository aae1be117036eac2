//! # Client Entry Points
//!
//! Thin constructors wiring a [`Request`](crate::request::Request) into a
//! [`Socket`](crate::socket::Socket); no logic beyond owning the shared,
//! connection-pooled `reqwest::Client` and handing clones of it to sockets
//! as they're opened: a single injected client, not a hidden
//! process-wide singleton.

use crate::error::AtmosphereError;
use crate::request::Request;
use crate::socket::Socket;

/// A configured entry point for opening sockets, all sharing one
/// connection-pooled HTTP client.
#[derive(Clone)]
pub struct Client {
    http_client: reqwest::Client,
}

impl Client {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Open a socket for `request` using this client's HTTP client.
    pub async fn open(&self, request: impl Into<Request>) -> Result<Socket, AtmosphereError> {
        Socket::open(request, self.http_client.clone()).await
    }
}

/// Builds [`Client`] instances. Construct one per application, not one per
/// socket — the underlying `reqwest::Client` is connection-pooled and cheap
/// to clone.
#[derive(Clone)]
pub struct ClientFactory {
    http_client: reqwest::Client,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }

    /// Build a factory around an already-configured HTTP client (custom
    /// timeouts, TLS settings, proxies, ...).
    pub fn with_http_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    pub fn create(&self) -> Client {
        Client::new(self.http_client.clone())
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_creates_clients() {
        let factory = ClientFactory::new();
        let _a = factory.create();
        let _b = factory.create();
    }
}
