//! WebSocket Acceptance
//!
//! Upgrades an incoming TCP connection to a WebSocket and extracts the room
//! identifier from the request path. Clients join a room by connecting to
//! `<ws_path>/<room_id>`; anything else is rejected during the handshake.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::WebSocketStream;

/// Accept a WebSocket connection, validating the path and extracting the
/// room identifier from it.
pub async fn accept_room(
    stream: TcpStream,
    ws_path: &str,
) -> Result<(WebSocketStream<TcpStream>, String), io::Error> {
    let base = ws_path.trim_end_matches('/').to_string();

    // The handshake callback runs before accept_hdr_async resolves, so the
    // extracted room id is smuggled out through a shared slot.
    let room_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let callback_slot = room_slot.clone();

    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, response: Response| {
            let path = req.uri().path();
            match parse_room_path(path, &base) {
                Some(room_id) => {
                    *callback_slot.lock() = Some(room_id);
                    Ok(response)
                }
                None => Err(ErrorResponse::new(Some(format!(
                    "invalid path: expected '{}/<room_id>', got '{}'",
                    base, path
                )))),
            }
        },
    )
    .await
    .map_err(io::Error::other)?;

    let room_id = room_slot
        .lock()
        .take()
        .ok_or_else(|| io::Error::other("handshake completed without a room id"))?;

    Ok((ws, room_id))
}

/// Extract the room id from a request path of the form `<base>/<room_id>`.
/// The room id must be a single non-empty path segment.
pub(super) fn parse_room_path(path: &str, base: &str) -> Option<String> {
    let rest = path.strip_prefix(base)?;
    let room_id = rest.strip_prefix('/')?;
    if room_id.is_empty() || room_id.contains('/') {
        return None;
    }
    Some(room_id.to_string())
}
