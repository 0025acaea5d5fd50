//! WebSocket upgrade proxying
//!
//! An `Upgrade: websocket` request is authenticated and routed like any
//! other, then the gateway dials the upstream WebSocket and relays frames
//! in both directions. Each direction moves frames through a bounded
//! channel, so a slow peer on one side pauses reads from the other.

use axum::extract::ws::{CloseFrame, Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::http::HeaderValue;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::Principal;
use crate::context::{RequestContext, CORRELATION_HEADER};
use crate::error::{Error, Result};
use crate::routing::Route;

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Translate the route target into a WebSocket URL for the rewritten path
pub fn upstream_ws_url(route: &Route, path: &str, query: Option<&str>) -> Result<String> {
    let base = if let Some(rest) = route.target.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = route.target.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if route.target.starts_with("ws://") || route.target.starts_with("wss://") {
        route.target.clone()
    } else {
        return Err(Error::Config(Box::new(figment::Error::from(format!(
            "Route '{}' target has no usable scheme for WebSocket upgrade",
            route.id
        )))));
    };

    Ok(match query {
        Some(query) => format!("{}{}?{}", base, path, query),
        None => format!("{}{}", base, path),
    })
}

/// Complete the client upgrade after dialing the upstream
///
/// Dialing happens before the 101 is returned so a dead upstream surfaces
/// as a gateway error instead of an immediately-closed socket.
pub async fn proxy_upgrade(
    ws: WebSocketUpgrade,
    route: &Route,
    path: &str,
    query: Option<&str>,
    principal: Option<&Principal>,
    ctx: &RequestContext,
    buffer_frames: usize,
) -> Result<Response> {
    let url = upstream_ws_url(route, path, query)?;

    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|e| Error::Upstream(format!("Invalid upstream WebSocket URL: {}", e)))?;

    if let Some(principal) = principal {
        principal.inject_headers(request.headers_mut());
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
        request.headers_mut().insert(CORRELATION_HEADER, value);
    }

    let (upstream, _) = connect_async(request).await.map_err(|e| {
        Error::Upstream(format!(
            "WebSocket upstream for route '{}' refused: {}",
            route.id, e
        ))
    })?;

    let route_id = route.id.clone();
    let correlation_id = ctx.correlation_id.clone();
    tracing::info!(route = %route_id, upstream = %url, "WebSocket relay established");

    Ok(ws.on_upgrade(move |client| async move {
        relay(client, upstream, buffer_frames.max(1)).await;
        tracing::debug!(
            route = %route_id,
            correlation_id = %correlation_id,
            "WebSocket relay closed"
        );
    }))
}

/// Bidirectional frame relay with bounded in-flight buffers
async fn relay(client: WebSocket, upstream: Upstream, buffer: usize) {
    let (mut client_sink, mut client_stream) = client.split();
    let (mut upstream_sink, mut upstream_stream) = upstream.split();

    let (up_tx, mut up_rx) = mpsc::channel::<UpstreamMessage>(buffer);
    let (down_tx, mut down_rx) = mpsc::channel::<ClientMessage>(buffer);

    // Readers block on the bounded channel when the opposite writer lags;
    // that is the back-pressure contract.
    let client_reader = async {
        while let Some(Ok(message)) = client_stream.next().await {
            let Some(converted) = client_to_upstream(message) else {
                continue;
            };
            if up_tx.send(converted).await.is_err() {
                break;
            }
        }
    };

    let upstream_writer = async {
        while let Some(message) = up_rx.recv().await {
            if upstream_sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = upstream_sink.close().await;
    };

    let upstream_reader = async {
        while let Some(Ok(message)) = upstream_stream.next().await {
            let Some(converted) = upstream_to_client(message) else {
                continue;
            };
            if down_tx.send(converted).await.is_err() {
                break;
            }
        }
    };

    let client_writer = async {
        while let Some(message) = down_rx.recv().await {
            if client_sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = client_sink.close().await;
    };

    // When any leg finishes the select drops the rest, which closes both
    // sockets and returns their connections.
    tokio::select! {
        _ = client_reader => {}
        _ = upstream_writer => {}
        _ = upstream_reader => {}
        _ = client_writer => {}
    }
}

fn client_to_upstream(message: ClientMessage) -> Option<UpstreamMessage> {
    match message {
        ClientMessage::Text(text) => Some(UpstreamMessage::Text(text.as_str().into())),
        ClientMessage::Binary(bytes) => Some(UpstreamMessage::Binary(bytes)),
        ClientMessage::Ping(bytes) => Some(UpstreamMessage::Ping(bytes)),
        ClientMessage::Pong(bytes) => Some(UpstreamMessage::Pong(bytes)),
        ClientMessage::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| {
            UpstreamCloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }
        }))),
    }
}

fn upstream_to_client(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().into())),
        UpstreamMessage::Binary(bytes) => Some(ClientMessage::Binary(bytes)),
        UpstreamMessage::Ping(bytes) => Some(ClientMessage::Ping(bytes)),
        UpstreamMessage::Pong(bytes) => Some(ClientMessage::Pong(bytes)),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        }))),
        // Raw frames are a tungstenite internal detail
        UpstreamMessage::Frame(_) => None,
    }
}
