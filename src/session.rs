//! Boundary to the remote session collaborator.
//!
//! The collaborator owns the connection, encryption and wire framing. The
//! recorder only hands it typed requests tagged with an id and pulls typed
//! responses back out.
//!
//! Threading model: `send` never blocks and may be called from any thread,
//! including from inside a continuation. `receive` is only ever called by the
//! event loop, so responses (and therefore continuations) are delivered one
//! at a time in arrival order.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tgcore::api::{Request, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session collaborator is closed")]
    Closed,
    #[error("failed to encode request: {0}")]
    Encode(String),
}

#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Queue `request` for delivery. The id is echoed back on its response.
    fn send(&self, request_id: u64, request: Request) -> Result<(), SessionError>;

    /// Next response, or `None` if nothing arrived within `timeout`. A zero
    /// timeout only returns what is already buffered.
    async fn receive(&self, timeout: Duration) -> Option<Response>;
}

/// Creates one client per session. A restart throws the old one away.
#[async_trait]
pub trait SessionClientFactory: Send + Sync {
    async fn create_client(&self) -> Result<Arc<dyn SessionClient>, anyhow::Error>;
}
