//! Client Connection
//!
//! Lifecycle glue for one WebSocket client: a read pump submitting inbound
//! messages to the hub as locally-originated events, and a write pump
//! draining the bounded outbound queue back to the socket. The pumps run
//! independently; whether the socket fails or a server shutdown arrives,
//! teardown goes through the hub's unregister path, which closes the queue
//! and stops the write pump.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::hub::{ClientHandle, ClientId, HubHandle};

/// Register a freshly upgraded WebSocket client with the hub and serve it
/// until its connection ends or a shutdown is signalled.
///
/// Returns only after the client has been unregistered. Every exit runs
/// through that single teardown: dropping the queue sender stops the write
/// pump, which closes the socket on its way out.
pub async fn serve(
    ws: WebSocketStream<TcpStream>,
    room_id: String,
    hub: HubHandle,
    queue_capacity: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let id = hub.next_client_id();
    let (sender, receiver) = mpsc::channel(queue_capacity);

    hub.register(ClientHandle {
        id,
        room_id: room_id.clone(),
        sender,
    })
    .await;

    let (sink, stream) = ws.split();
    tokio::spawn(write_pump(sink, receiver, hub.clone(), id));

    let read_fut = read_pump(stream, hub.clone(), id, room_id);
    tokio::pin!(read_fut);

    loop {
        tokio::select! {
            biased;

            () = &mut read_fut => break,
            result = shutdown_rx.recv() => {
                match result {
                    Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                        debug!(client = id, "connection shutting down");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    hub.unregister(id).await;
}

/// Pump inbound messages into the hub until the client goes away
async fn read_pump(
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    hub: HubHandle,
    id: ClientId,
    room_id: String,
) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                hub.route_local(room_id.clone(), Bytes::from(text.into_bytes()))
                    .await;
            }
            Ok(Message::Binary(data)) => {
                hub.route_local(room_id.clone(), Bytes::from(data)).await;
            }
            Ok(Message::Close(_)) => break,
            // tungstenite answers pings itself; nothing to route
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                debug!(client = id, error = %e, "read error");
                break;
            }
        }
    }
}

/// Drain the outbound queue to the socket until the queue closes or the
/// write side fails
async fn write_pump(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut receiver: mpsc::Receiver<Bytes>,
    hub: HubHandle,
    id: ClientId,
) {
    while let Some(payload) = receiver.recv().await {
        let text = String::from_utf8_lossy(&payload).into_owned();
        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(client = id, error = %e, "write error");
            // Unregister is idempotent; the read pump usually beats us here.
            hub.unregister(id).await;
            break;
        }
    }
    let _ = sink.close().await;
}
