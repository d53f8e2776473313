//! Device transport abstraction.
//!
//! The registry stores one transport per connected device. In production this
//! is the channel feeding a WebSocket writer task; tests plug in their own.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::OutboundFrame;

/// Sender half of the channel that feeds a WebSocket writer.
pub type MessageSender = mpsc::UnboundedSender<OutboundFrame>;

/// Per-device send failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport send failed: {0}")]
    Send(String),
}

/// Something a frame can be pushed into.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;
}

#[async_trait]
impl DeviceTransport for MessageSender {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, frame).map_err(|_| TransportError::Closed)
    }
}
