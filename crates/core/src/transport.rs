//! The duplex connection to the voice service, as seen by the session.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Outbound half of the voice-service connection.
///
/// Inbound frames are decoded by the implementation and handed to
/// [`crate::session::Session::route`]; the session itself only ever sends
/// ready-made frames and closes the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier of the dialog session opened on this connection.
    fn session_id(&self) -> &str;

    /// Sends one complete binary frame.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Ends the dialog session and closes the connection.
    async fn close(&self) -> Result<()>;
}
