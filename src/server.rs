//! Server-side connection lifecycle: accept loop, per-client session,
//! wiring the frame transport into the dispatch engine (spec §4.1 server
//! half, §4.5).

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::dispatch;
use crate::error::Result;
use crate::frame::{self, FrameWriter};
use crate::protocol::{ServerResponse, WireMessage};
use crate::registry::RoomRegistry;

/// One connected client's server-side state: its write queue and the
/// user id it last announced on a control/audio message (spec §3's
/// "client session" entity; `room_id` lives in `RoomRegistry`, not here,
/// so the two views never disagree).
///
/// `read_abort`/`writer_abort` let another connection's task actually tear
/// this connection down (spec §4.5: a fan-out send failure must disconnect
/// that peer, not just drop it from bookkeeping) — `AbortHandle` is used
/// rather than the `JoinHandle`s themselves so `handle_connection` can
/// still own and await those for its own shutdown/logging flow.
pub struct ClientSession {
    pub client_id: String,
    pub user_id: Mutex<String>,
    pub writer: FrameWriter,
    read_abort: tokio::task::AbortHandle,
    writer_abort: tokio::task::AbortHandle,
}

impl ClientSession {
    /// Cancel this client's read loop and write-queue task, closing both
    /// socket halves they own.
    pub fn disconnect(&self) {
        self.read_abort.abort();
        self.writer_abort.abort();
    }
}

#[cfg(test)]
impl ClientSession {
    pub(crate) fn for_test(client_id: impl Into<String>, writer: FrameWriter, read_abort: tokio::task::AbortHandle, writer_abort: tokio::task::AbortHandle) -> Arc<Self> {
        Arc::new(Self { client_id: client_id.into(), user_id: Mutex::new(String::new()), writer, read_abort, writer_abort })
    }
}

/// Guarded by its own lock (DashMap's per-shard locking), independent of
/// the registry's lock, per spec §5's lock order (registry < write_queue).
pub type ClientsTable = DashMap<String, Arc<ClientSession>>;

/// Generate a fresh, unguessable client id (spec §4.1: "MUST NOT be
/// guessable if later extended with trust").
fn random_client_id() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect()
}

pub struct Server {
    pub registry: Arc<RoomRegistry>,
    pub clients: Arc<ClientsTable>,
    pub max_frame: u32,
}

impl Server {
    pub fn new(max_frame: u32) -> Arc<Self> {
        Arc::new(Self { registry: Arc::new(RoomRegistry::new()), clients: Arc::new(DashMap::new()), max_frame })
    }

    /// Accept connections until the listener errors out. Each connection
    /// runs on its own task and is fully isolated from the others.
    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::info!(%addr, "accepted connection");
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_connection(stream).await });
                }
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let _ = stream.set_nodelay(true);
        let client_id = random_client_id();
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = frame::spawn_writer(write_half, self.max_frame);
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let read_task = tokio::spawn(frame::run_read_loop(read_half, frame_tx, self.max_frame));

        let session = Arc::new(ClientSession {
            client_id: client_id.clone(),
            user_id: Mutex::new(String::new()),
            writer: writer.clone(),
            read_abort: read_task.abort_handle(),
            writer_abort: writer_task.abort_handle(),
        });
        self.clients.insert(client_id.clone(), session);
        self.registry.connect(&client_id);
        tracing::info!(client_id, "client connected, placed in main");

        let welcome = WireMessage::Response(ServerResponse::success("welcome to the voice chat server", 0));
        if let Ok(bytes) = welcome.encode() {
            let _ = writer.send(bytes);
        }

        while let Some(payload) = frame_rx.recv().await {
            if let Some(reply) = dispatch::dispatch_frame(&client_id, &payload, &self.registry, &self.clients) {
                if let Ok(bytes) = WireMessage::Response(reply).encode() {
                    let _ = writer.send(bytes);
                }
            }
        }
        let read_result = read_task.await;

        if let Ok(Err(error)) = &read_result {
            tracing::info!(client_id, %error, "connection closed with error");
        }

        self.clients.remove(&client_id);
        self.registry.disconnect(&client_id);
        writer_task.abort();
        tracing::info!(client_id, "client disconnected");
    }
}

/// Bind and run a server, forever (or until `listener` errors). This is
/// the entry point `voxd` drives; tests bind their own ephemeral listener
/// and call `accept_loop` directly.
pub async fn run(bind_addr: &str, port: u16, max_frame: u32) -> Result<Arc<Server>> {
    let listener = TcpListener::bind((bind_addr, port)).await?;
    let server = Server::new(max_frame);
    let accepting = server.clone();
    tokio::spawn(accepting.accept_loop(listener));
    Ok(server)
}
