use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use ripple_types::ClientFrame;

use crate::hub::{ConnectionHandle, Frame, Hub};

/// Drive one WebSocket attachment for its whole lifetime.
///
/// Registers with the hub, writes the scrollback replay, then runs the
/// writer half (outbound queue -> socket) and the read loop (socket ->
/// publish) until either side ends. The read loop never writes to the
/// socket; everything outbound flows through the hub's queue.
pub async fn handle_socket(socket: WebSocket, hub: Hub, channel: String, username: String) {
    let (mut sink, mut stream) = socket.split();

    let (handle, mut outbound_rx) = ConnectionHandle::new();
    let conn_id = handle.id();

    let history = match hub.register(handle, &channel, &username).await {
        Ok(history) => history,
        Err(e) => {
            warn!("Register for {} on {} failed: {:#}", username, channel, e);
            return;
        }
    };

    // Scrollback goes out before the outbound queue is drained, so replay
    // always precedes any message fanned out after our register.
    for message in &history {
        let text = serde_json::to_string(message).unwrap();
        if sink.send(WsMessage::Text(text.into())).await.is_err() {
            hub.unregister(conn_id);
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match frame {
                Frame::Message(message) => {
                    let text = serde_json::to_string(&message).unwrap();
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Frame::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let hub_read = hub.clone();
    let read_channel = channel.clone();
    let read_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        // A read error or close frame ends the loop; the caller unregisters.
        while let Some(Ok(ws_msg)) = stream.next().await {
            match ws_msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => hub_read.publish(&read_channel, &read_username, &frame.content),
                    Err(e) => warn!("{} sent a malformed frame: {}", read_username, e),
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(conn_id);
    info!("{} detached from channel {}", username, channel);
}
