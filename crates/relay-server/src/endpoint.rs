use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use relay_core::{EndpointId, InboundFrame};

use crate::hub::{HubHandle, Inbound, Registration};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// One logical client connection: a process-unique id plus the identity
/// the authentication boundary bound to it.
pub struct Endpoint {
    pub id: EndpointId,
    pub username: String,
}

impl Endpoint {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: EndpointId::new(),
            username: username.into(),
        }
    }
}

/// Run a connection to completion: register with the hub, pump both
/// directions, then unregister exactly once and drop the transport.
///
/// The first loop to finish ends the connection; the other is aborted
/// after the unregister event is queued, which also tears down its half
/// of the socket.
pub async fn run_connection(
    socket: WebSocket,
    endpoint: Endpoint,
    hub: HubHandle,
    outbound_queue: usize,
) {
    let Endpoint { id, username } = endpoint;

    let (outbound_tx, outbound_rx) = mpsc::channel::<Arc<str>>(outbound_queue);
    let registered = hub
        .register(Registration {
            id: id.clone(),
            username: username.clone(),
            outbound: outbound_tx,
        })
        .await;
    if !registered {
        tracing::warn!(endpoint_id = %id, "hub unavailable, dropping connection");
        return;
    }

    let (ws_tx, ws_rx) = socket.split();

    let mut writer = tokio::spawn(write_loop(ws_tx, outbound_rx, id.clone()));
    let mut reader = tokio::spawn(read_loop(ws_rx, id.clone(), username.clone(), hub.clone()));

    tokio::select! {
        _ = &mut writer => {}
        _ = &mut reader => {}
    }

    hub.unregister(id.clone()).await;
    writer.abort();
    reader.abort();

    tracing::info!(endpoint_id = %id, username = %username, "connection closed");
}

/// Drain the private outbound queue into the socket in FIFO order, with a
/// periodic ping to keep intermediaries from dropping idle connections.
///
/// Closure is signaled solely by the hub dropping its sender; `recv`
/// yields every buffered item before reporting it, so the queue is
/// flushed and then the loop exits.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut outbound_rx: mpsc::Receiver<Arc<str>>,
    id: EndpointId,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            item = outbound_rx.recv() => {
                match item {
                    Some(payload) => {
                        if let Err(err) = ws_tx.send(WsMessage::Text(payload.as_ref().into())).await {
                            tracing::warn!(endpoint_id = %id, error = %err, "write failed");
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Decode inbound frames and forward them to the hub until the transport
/// errors, the client closes, or a frame fails to decode.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    id: EndpointId,
    username: String,
    hub: HubHandle,
) {
    while let Some(frame) = ws_rx.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(endpoint_id = %id, error = %err, "read failed");
                break;
            }
        };

        match msg {
            WsMessage::Text(text) => {
                let frame = match InboundFrame::parse(text.as_str()) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(
                            endpoint_id = %id,
                            error = %err,
                            "malformed frame, dropping connection"
                        );
                        break;
                    }
                };
                if frame.payload.is_empty() {
                    continue;
                }
                let inbound = Inbound {
                    origin: id.clone(),
                    message: frame.into_message(&username),
                };
                if !hub.submit(inbound).await {
                    tracing::warn!(endpoint_id = %id, "hub queue saturated, message dropped");
                }
            }
            WsMessage::Close(_) => break,
            // axum answers pings automatically; binary frames are not part
            // of the protocol.
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => {}
        }
    }
}
