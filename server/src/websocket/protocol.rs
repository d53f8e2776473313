//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded with a `type` tag. Server frames use
//! camelCase field names and may be gzip-compressed, in which case the frame
//! is `{compressed: true, data: <base64>, originalSize, compressedSize}`.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cartsync_engine::{
    CartItem, CartSnapshot, Conflict, NetworkInfo, NetworkProfile, ResolutionStrategy, SyncId,
    SyncType, Timestamp,
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Submit the device's full cart.
    CartSync {
        cart_id: String,
        cart_data: CartSnapshot,
        #[serde(default)]
        previous_data: Option<CartSnapshot>,
        #[serde(default)]
        strategy: Option<ResolutionStrategy>,
        #[serde(default)]
        auto_resolve: bool,
        #[serde(default)]
        user_choice: Option<Vec<CartItem>>,
        #[serde(default)]
        sync_type: SyncType,
        #[serde(default)]
        network_info: Option<NetworkInfo>,
    },

    /// Settle a sync that was parked on conflicts.
    ResolveConflicts {
        sync_id: SyncId,
        strategy: ResolutionStrategy,
        #[serde(default)]
        user_choice: Option<Vec<CartItem>>,
    },

    /// Confirm a pushed frame was applied.
    Ack { sync_id: SyncId },

    /// Keep-alive ping.
    Ping,

    /// Liveness beat, no reply.
    Heartbeat,
}

/// Kind of server frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    CartSync,
    ConflictResolved,
    Ping,
    Pong,
    Heartbeat,
    Error,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_data: Option<CartSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<Conflict>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<SyncId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: Timestamp,
}

impl SyncMessage {
    fn new(kind: MessageType, timestamp: Timestamp) -> Self {
        Self {
            kind,
            cart_data: None,
            conflicts: None,
            sync_id: None,
            error: None,
            timestamp,
        }
    }

    /// A freshly committed cart.
    pub fn cart_sync(cart: CartSnapshot, sync_id: impl Into<SyncId>, timestamp: Timestamp) -> Self {
        Self {
            cart_data: Some(cart),
            sync_id: Some(sync_id.into()),
            ..Self::new(MessageType::CartSync, timestamp)
        }
    }

    /// A committed cart that settled conflicts.
    pub fn conflict_resolved(
        cart: CartSnapshot,
        conflicts: Vec<Conflict>,
        sync_id: impl Into<SyncId>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            cart_data: Some(cart),
            conflicts: Some(conflicts),
            sync_id: Some(sync_id.into()),
            ..Self::new(MessageType::ConflictResolved, timestamp)
        }
    }

    pub fn pong(timestamp: Timestamp) -> Self {
        Self::new(MessageType::Pong, timestamp)
    }

    pub fn heartbeat(timestamp: Timestamp) -> Self {
        Self::new(MessageType::Heartbeat, timestamp)
    }

    /// Create an error message.
    pub fn error(
        message: impl Into<String>,
        sync_id: Option<SyncId>,
        conflicts: Option<Vec<Conflict>>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            error: Some(message.into()),
            sync_id,
            conflicts,
            ..Self::new(MessageType::Error, timestamp)
        }
    }
}

/// Errors while packing or unpacking frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compression: {0}")]
    Io(#[from] std::io::Error),

    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Gzip + base64 wrapper around a serialized [`SyncMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedPayload {
    pub compressed: bool,
    pub data: String,
    pub original_size: usize,
    pub compressed_size: usize,
}

impl CompressedPayload {
    pub fn compress(message: &SyncMessage, level: u32) -> Result<Self, ProtocolError> {
        let raw = serde_json::to_vec(message)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
        encoder.write_all(&raw)?;
        let packed = encoder.finish()?;

        Ok(Self {
            compressed: true,
            data: BASE64.encode(&packed),
            original_size: raw.len(),
            compressed_size: packed.len(),
        })
    }

    pub fn decompress(&self) -> Result<SyncMessage, ProtocolError> {
        let packed = BASE64.decode(&self.data)?;
        let mut raw = Vec::with_capacity(self.original_size);
        GzDecoder::new(packed.as_slice()).read_to_end(&mut raw)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// What actually goes over the wire to one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Plain(SyncMessage),
    Compressed(CompressedPayload),
}

impl OutboundFrame {
    /// Pack `message` for a device with the given profile.
    ///
    /// Compression is skipped when the profile disables it or when it would
    /// not shrink the frame.
    pub fn encode(message: &SyncMessage, profile: &NetworkProfile) -> Self {
        if !profile.compresses() {
            return OutboundFrame::Plain(message.clone());
        }

        match CompressedPayload::compress(message, profile.compression_level) {
            Ok(payload) if payload.compressed_size < payload.original_size => {
                OutboundFrame::Compressed(payload)
            }
            Ok(_) => OutboundFrame::Plain(message.clone()),
            Err(e) => {
                tracing::warn!("Failed to compress frame, sending plain: {}", e);
                OutboundFrame::Plain(message.clone())
            }
        }
    }

    /// Unpack to the underlying message.
    pub fn message(&self) -> Result<SyncMessage, ProtocolError> {
        match self {
            OutboundFrame::Plain(message) => Ok(message.clone()),
            OutboundFrame::Compressed(payload) => payload.decompress(),
        }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
