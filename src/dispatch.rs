//! Server-side dispatch engine: routes inbound frames by type, builds
//! control responses, fans audio out within a room (spec §4.5, C5).

use crate::protocol::{ControlMessage, ControlType, ServerResponse, WireMessage};
use crate::registry::RoomRegistry;
use crate::server::ClientsTable;

/// Render a registry snapshot as the LIST_ROOMS listing format from spec
/// §6: `<roomId>:<user>:<user>:.;<roomId2>:.;…`. `resolve` maps a
/// server-assigned client id to the user id that should appear in the
/// listing (falling back to the client id itself if unknown).
pub fn render_listing(snapshot: &[(String, Vec<String>)], resolve: impl Fn(&str) -> String) -> String {
    snapshot
        .iter()
        .map(|(room, members)| {
            let mut entry = format!("{room}:");
            for client_id in members {
                entry.push_str(&resolve(client_id));
                entry.push(':');
            }
            entry.push('.');
            entry
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Handle one decoded `ControlMessage` from `client_id`, returning the
/// `ServerResponse` to send back. `msg.kind` is exhaustively matched below;
/// a frame that doesn't fit the wire format at all never reaches here — see
/// `dispatch_frame`'s decode step and the decode-failure policy it
/// documents.
pub fn handle_control(client_id: &str, msg: ControlMessage, registry: &RoomRegistry, clients: &ClientsTable) -> ServerResponse {
    match msg.kind {
        ControlType::ListRooms => {
            let snapshot = registry.snapshot();
            let listing = render_listing(&snapshot, |id| resolve_user_id(id, clients));
            ServerResponse::success(listing, msg.request_id)
        }
        ControlType::Join => {
            let resolved = registry.join(client_id, &msg.room_id);
            ServerResponse::success(format!("joined room {resolved}"), msg.request_id)
        }
        ControlType::Leave => {
            let resolved = registry.leave(client_id);
            ServerResponse::success(format!("left to room {resolved}"), msg.request_id)
        }
    }
}

/// Look up the user id a client last announced on a control/audio
/// message, falling back to the client id itself if none has arrived yet.
fn resolve_user_id(client_id: &str, clients: &ClientsTable) -> String {
    clients
        .get(client_id)
        .map(|session| session.user_id.lock().clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| client_id.to_string())
}

/// Fan an inbound `AudioFrame`'s raw payload out to every other member of
/// the sender's current room. A peer whose write queue rejects the send is
/// actually disconnected — its connection torn down via `ClientSession::
/// disconnect`, then dropped from the clients table and the registry — an
/// isolated failure that does not affect delivery to the frame's other
/// recipients.
pub fn fan_out_audio(sender_id: &str, payload: &[u8], registry: &RoomRegistry, clients: &ClientsTable) {
    let Some(room) = registry.room_of(sender_id) else {
        tracing::warn!(client_id = sender_id, "audio frame from a client with no room, dropping");
        return;
    };
    for peer_id in registry.members_of(&room) {
        if peer_id == sender_id {
            continue;
        }
        let Some(peer) = clients.get(&peer_id) else { continue };
        if let Err(error) = peer.writer.send(payload.to_vec()) {
            tracing::debug!(peer_id, %error, "fan-out send failed, disconnecting peer");
            peer.disconnect();
            drop(peer);
            clients.remove(&peer_id);
            registry.disconnect(&peer_id);
        }
    }
}

/// Decode and route one inbound frame payload. Decode failures are logged
/// and the frame dropped without closing the connection (spec §4.5);
/// frames exceeding MAX_FRAME never reach here — `frame::read_frame`
/// already terminated the connection before dispatch saw them.
pub fn dispatch_frame(client_id: &str, payload: &[u8], registry: &RoomRegistry, clients: &ClientsTable) -> Option<ServerResponse> {
    let message = match WireMessage::decode(payload) {
        Ok(m) => m,
        Err(error) => {
            tracing::debug!(client_id, %error, "dropping undecodable frame");
            return None;
        }
    };
    match message {
        WireMessage::Control(msg) => {
            remember_user_id(client_id, &msg.user_id, clients);
            Some(handle_control(client_id, msg, registry, clients))
        }
        WireMessage::Audio(frame) => {
            remember_user_id(client_id, &frame.user_id, clients);
            fan_out_audio(client_id, payload, registry, clients);
            None
        }
        WireMessage::Response(_) => {
            tracing::debug!(client_id, "server received a ServerResponse, ignoring");
            None
        }
    }
}

fn remember_user_id(client_id: &str, user_id: &str, clients: &ClientsTable) {
    if user_id.is_empty() {
        return;
    }
    if let Some(session) = clients.get(client_id) {
        let mut slot = session.user_id.lock();
        if slot.as_str() != user_id {
            *slot = user_id.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_matches_the_spec_format() {
        let snapshot = vec![("main".to_string(), vec!["alice".to_string()]), ("r1".to_string(), vec![])];
        let listing = render_listing(&snapshot, |id| id.to_string());
        assert_eq!(listing, "main:alice:.;r1:.");
    }

    #[test]
    fn join_reply_echoes_request_id() {
        let registry = RoomRegistry::new();
        let clients = ClientsTable::new();
        registry.connect("c1");
        let reply = handle_control("c1", ControlMessage { kind: ControlType::Join, user_id: "alice".into(), room_id: "r1".into(), request_id: 11 }, &registry, &clients);
        assert_eq!(reply.request_id, 11);
        assert!(matches!(reply.status, crate::protocol::Status::Success));
        assert_eq!(registry.room_of("c1").as_deref(), Some("r1"));
    }

    /// A fan-out send failure must tear the peer's actual connection down
    /// (its read loop included), not just forget it in the registry —
    /// otherwise a dropped peer keeps its socket and can still issue
    /// control requests.
    #[tokio::test]
    async fn fan_out_failure_actually_tears_down_the_peers_connection() {
        use crate::server::ClientSession;
        use tokio::net::{TcpListener, TcpStream};

        let registry = RoomRegistry::new();
        let clients = ClientsTable::new();
        registry.connect("sender");
        registry.join("sender", "r1");
        registry.connect("peer");
        registry.join("peer", "r1");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_side = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = server_side.into_split();
        let (writer, writer_task) = crate::frame::spawn_writer(write_half, crate::frame::MAX_FRAME);
        let (discard_tx, _discard_rx) = tokio::sync::mpsc::unbounded_channel();
        let read_task = tokio::spawn(crate::frame::run_read_loop(read_half, discard_tx, crate::frame::MAX_FRAME));

        let session = ClientSession::for_test("peer", writer, read_task.abort_handle(), writer_task.abort_handle());
        clients.insert("peer".to_string(), session);
        writer_task.abort(); // simulate a write queue that has already died
        drop(client_side);

        let payload = WireMessage::Audio(crate::protocol::AudioFrame { user_id: "sender".into(), audio_payload: vec![1, 2, 3], timestamp: 0, sequence_number: 0 }).encode().unwrap();
        fan_out_audio("sender", &payload, &registry, &clients);

        assert!(!clients.contains_key("peer"));
        assert_eq!(registry.room_of("peer"), None);
        assert!(read_task.await.is_err(), "the peer's read loop must be cancelled, not left running");
    }
}
