//! WebSocket handler for real-time cart sync.
//!
//! Handles WebSocket connections, feeds client messages to the coordinator
//! and forwards pushes from other devices.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::sync::{now_millis, SyncCartRequest, SyncCoordinator};
use crate::websocket::{ClientMessage, MessageSender, OutboundFrame, SyncMessage};

use super::sync_reply;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the device with the coordinator, which replays queued pushes
/// 2. Spawns a task to forward outgoing frames
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    coordinator: Arc<SyncCoordinator>,
    user_id: String,
    device_id: String,
) {
    // Split the socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending frames to this connection
    let (tx, mut rx): (MessageSender, _) = mpsc::unbounded_channel();

    // Spawn task to forward frames from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame.to_text() {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket frame: {}", e);
                }
            }
        }
    });

    let conn_id = match coordinator
        .on_connection_open(&user_id, &device_id, Arc::new(tx.clone()))
        .await
    {
        Ok(conn_id) => conn_id,
        Err(e) => {
            tracing::warn!(user_id = %user_id, device_id = %device_id, "Rejected WebSocket: {}", e);
            let _ = tx.send(OutboundFrame::Plain(SyncMessage::error(
                e.to_string(),
                None,
                None,
                now_millis(),
            )));
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    tracing::info!(
        conn_id = %conn_id,
        user_id = %user_id,
        device_id = %device_id,
        "WebSocket client connected"
    );

    // Process incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !coordinator.touch(&user_id, &device_id) {
                    tracing::info!(conn_id = %conn_id, "Connection was evicted, closing");
                    break;
                }

                if let Some(reply) =
                    process_message(&text, &coordinator, &user_id, &device_id).await
                {
                    let profile = coordinator
                        .registry()
                        .get(&user_id, &device_id)
                        .map(|c| c.profile)
                        .unwrap_or_default();
                    let _ = tx.send(OutboundFrame::encode(&reply, &profile));
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                // Axum answers pings itself; still counts as activity
                coordinator.touch(&user_id, &device_id);
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Clean up
    coordinator.on_connection_close(&user_id, &device_id, Some(&conn_id));
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        user_id = %user_id,
        device_id = %device_id,
        active_connections = coordinator.registry().connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the reply, if any.
async fn process_message(
    text: &str,
    coordinator: &SyncCoordinator,
    user_id: &str,
    device_id: &str,
) -> Option<SyncMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(SyncMessage::error(
                format!("Invalid message format: {}", e),
                None,
                None,
                now_millis(),
            ));
        }
    };

    match client_msg {
        ClientMessage::CartSync {
            cart_id,
            cart_data,
            previous_data,
            strategy,
            auto_resolve,
            user_choice,
            sync_type,
            network_info,
        } => {
            let request = SyncCartRequest {
                user_id: user_id.to_string(),
                cart_id,
                device_id: device_id.to_string(),
                snapshot: cart_data,
                previous_snapshot: previous_data,
                strategy,
                auto_resolve,
                user_choice,
                sync_type,
                network_info,
            };
            let result = coordinator.sync_cart(request).await;
            Some(sync_reply(result, now_millis()))
        }

        ClientMessage::ResolveConflicts {
            sync_id,
            strategy,
            user_choice,
        } => {
            let result = coordinator
                .resolve_conflicts(&sync_id, strategy, user_choice)
                .await;
            Some(sync_reply(result, now_millis()))
        }

        ClientMessage::Ack { sync_id } => {
            if !coordinator.acknowledge(device_id, &sync_id) {
                tracing::debug!(sync_id = %sync_id, device_id = %device_id, "Ack for unknown push");
            }
            None
        }

        ClientMessage::Ping => Some(SyncMessage::pong(now_millis())),

        ClientMessage::Heartbeat => None,
    }
}
