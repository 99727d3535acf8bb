use crate::game::constants::{PING_INTERVAL_MS, SEND_DEADLINE_MS};
use crate::lobby::Lobby;
use crate::protocol::{encode_frame, Event};
use crate::shared::time::now_millis;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Drive one WebSocket connection: a pump task coalesces queued events into
/// one frame per wakeup and keeps the ping cadence, while this task feeds
/// inbound frames to the lobby dispatcher.
pub async fn handle_socket(socket: WebSocket, lobby: Arc<Lobby>) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut outbound_rx) = lobby.open_session();
    tracing::debug!(session = %session.id, "socket connected");

    let pump_session = Arc::clone(&session);
    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(Duration::from_millis(PING_INTERVAL_MS));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let first = tokio::select! {
                event = outbound_rx.recv() => match event {
                    Some(event) => Some(event),
                    None => return,
                },
                _ = ping.tick() => {
                    if !pump_session.is_connected() {
                        return;
                    }
                    if !pump_session.is_identified() {
                        continue;
                    }
                    Some(Event::named("ping", json!(now_millis())))
                }
            };
            let Some(first) = first else { continue };
            let mut batch = vec![first];
            while let Ok(event) = outbound_rx.try_recv() {
                batch.push(event);
            }
            let frame = encode_frame(&batch);
            let send = sender.send(Message::Text(frame));
            match tokio::time::timeout(Duration::from_millis(SEND_DEADLINE_MS), send).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return,
                Err(_) => {
                    tracing::warn!(session = %pump_session.id, "send deadline exceeded");
                    return;
                }
            }
        }
    });

    while let Some(result) = receiver.next().await {
        let Ok(message) = result else { break };
        match message {
            Message::Text(text) => {
                if !lobby.handle_frame(&session, &text).await {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    lobby.close_session(&session).await;
    send_task.abort();
    tracing::debug!(session = %session.id, "socket closed");
}
