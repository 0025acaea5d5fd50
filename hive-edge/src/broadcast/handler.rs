//! WebSocket endpoint for broadcast subscriptions
//!
//! Clients speak a STOMP-flavored JSON protocol: SUBSCRIBE/UNSUBSCRIBE on
//! `/topic/...` destinations and SEND on `/app/...`. Frames fan out with
//! per-topic FIFO ordering; a denied SEND produces a PERMISSION_DENIED
//! frame on this connection only.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamMap;
use uuid::Uuid;

use super::frames::{Frame, Topic};
use super::hub::PublishOutcome;
use crate::auth::Principal;
use crate::state::AppState;

/// Client → server commands
#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "action")]
enum Command {
    Subscribe { destination: String },
    Unsubscribe { destination: String },
    Send { destination: String, frame: Frame },
}

/// Server → client envelope
#[derive(Debug, Serialize)]
struct Outbound<'a> {
    destination: String,
    frame: &'a Frame,
}

/// Server → client protocol error
#[derive(Debug, Serialize)]
struct ProtocolError<'a> {
    error: &'a str,
    detail: String,
}

/// `GET /ws` — authenticated broadcast socket
pub async fn ws_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, principal, socket))
}

async fn handle_socket(state: AppState, principal: Principal, mut socket: WebSocket) {
    let mut streams: StreamMap<String, ReceiverStream<Frame>> = StreamMap::new();
    let mut subscriptions: HashMap<String, (Topic, Uuid)> = HashMap::new();

    tracing::info!(user = %principal.id, "Broadcast socket opened");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else {
                    break;
                };
                let Message::Text(text) = message else {
                    continue;
                };

                let command: Command = match serde_json::from_str(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        let _ = send_json(
                            &mut socket,
                            &ProtocolError { error: "BAD_COMMAND", detail: e.to_string() },
                        )
                        .await;
                        continue;
                    }
                };

                if handle_command(&state, &principal, command, &mut socket, &mut streams, &mut subscriptions)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Some((topic_name, frame)) = streams.next(), if !streams.is_empty() => {
                let outbound = Outbound {
                    destination: format!("/topic/{}", topic_name),
                    frame: &frame,
                };
                if send_json(&mut socket, &outbound).await.is_err() {
                    break;
                }
            }
        }
    }

    for (topic, id) in subscriptions.values() {
        state.hub.unsubscribe(topic, *id);
    }
    tracing::info!(user = %principal.id, "Broadcast socket closed");
}

async fn handle_command(
    state: &AppState,
    principal: &Principal,
    command: Command,
    socket: &mut WebSocket,
    streams: &mut StreamMap<String, ReceiverStream<Frame>>,
    subscriptions: &mut HashMap<String, (Topic, Uuid)>,
) -> Result<(), ()> {
    match command {
        Command::Subscribe { destination } => {
            let Some(topic) = Topic::from_destination(&destination) else {
                return reject(socket, &destination).await;
            };
            let name = topic.name();
            if subscriptions.contains_key(&name) {
                return Ok(());
            }
            match state.hub.subscribe(topic.clone()).await {
                Ok(subscription) => {
                    subscriptions.insert(name.clone(), (topic, subscription.id));
                    streams.insert(name, ReceiverStream::new(subscription.receiver));
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!(user = %principal.id, "Subscribe failed: {}", e);
                    Err(())
                }
            }
        }
        Command::Unsubscribe { destination } => {
            let Some(topic) = Topic::from_destination(&destination) else {
                return reject(socket, &destination).await;
            };
            let name = topic.name();
            if let Some((topic, id)) = subscriptions.remove(&name) {
                streams.remove(&name);
                state.hub.unsubscribe(&topic, id);
            }
            Ok(())
        }
        Command::Send { destination, frame } => {
            let Some(topic) = Topic::from_destination(&destination) else {
                return reject(socket, &destination).await;
            };
            match state.hub.publish(&principal.id, &topic, frame).await {
                Ok(PublishOutcome::Delivered) => Ok(()),
                Ok(PublishOutcome::Denied(denial)) => {
                    // Denials go to the originating connection only
                    let outbound = Outbound {
                        destination: format!("/topic/{}", topic.name()),
                        frame: &denial,
                    };
                    send_json(socket, &outbound).await
                }
                Err(e) => {
                    tracing::warn!(user = %principal.id, topic = %topic, "Publish failed: {}", e);
                    Err(())
                }
            }
        }
    }
}

async fn reject(socket: &mut WebSocket, destination: &str) -> Result<(), ()> {
    send_json(
        socket,
        &ProtocolError {
            error: "BAD_DESTINATION",
            detail: format!("Unknown destination: {}", destination),
        },
    )
    .await
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| ())
}
