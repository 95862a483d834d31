//! Client-side core: connect, request/response control operations, and
//! the audio pipeline, wired together for the `vox` binary's REPL (spec
//! §4.1 client half, §4.3, §4.6).

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::audio::{AudioPipeline, PassthroughCodec};
use crate::correlator::RequestCorrelator;
use crate::device::{Capture, Playback};
use crate::error::{CoreError, Result};
use crate::frame::{self, FrameWriter};
use crate::protocol::{ControlMessage, ServerResponse, Status, WireMessage};

/// Default control-request timeout (spec §3's "5s default").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    pub user_id: String,
    writer: FrameWriter,
    correlator: Arc<RequestCorrelator>,
    pipeline: Arc<AudioPipeline>,
    unsolicited_rx: AsyncMutex<mpsc::UnboundedReceiver<ServerResponse>>,
}

impl Client {
    /// Connect to `host:port`, failing with `CoreError::Timeout` if the
    /// TCP handshake doesn't complete within `timeout`. Spawns the read
    /// loop and the frame demultiplexer that routes `Response`s to the
    /// correlator and `Audio` frames to the playback pipeline.
    pub async fn connect(host: &str, port: u16, user_id: impl Into<String>, timeout: Duration, max_frame: u32, playback: Box<dyn Playback>) -> Result<Arc<Self>> {
        let user_id = user_id.into();
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| CoreError::Timeout)?
            .map_err(|source| CoreError::Connect { host: host.to_string(), port, source })?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (writer, _writer_task) = frame::spawn_writer(write_half, max_frame);
        let correlator = Arc::new(RequestCorrelator::new());
        let pipeline = Arc::new(AudioPipeline::new(user_id.clone(), writer.clone(), Arc::new(PassthroughCodec), playback));

        let (unsolicited_tx, unsolicited_rx) = mpsc::unbounded_channel();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        tokio::spawn(frame::run_read_loop(read_half, frame_tx, max_frame));

        let demux_correlator = correlator.clone();
        let demux_pipeline = pipeline.clone();
        tokio::spawn(async move {
            while let Some(payload) = frame_rx.recv().await {
                match WireMessage::decode(&payload) {
                    Ok(WireMessage::Response(response)) => {
                        if let Some(unsolicited) = demux_correlator.complete(response) {
                            let _ = unsolicited_tx.send(unsolicited);
                        }
                    }
                    Ok(WireMessage::Audio(frame)) => demux_pipeline.handle_inbound(&frame),
                    Ok(WireMessage::Control(_)) => {
                        tracing::debug!("client received a ControlMessage, ignoring");
                    }
                    Err(error) => tracing::debug!(%error, "dropping undecodable frame"),
                }
            }
            demux_correlator.shutdown();
        });

        Ok(Arc::new(Self { user_id, writer, correlator, pipeline, unsolicited_rx: AsyncMutex::new(unsolicited_rx) }))
    }

    pub async fn join(&self, room_id: &str, timeout: Duration) -> Result<ServerResponse> {
        let response = self.correlator.request(&self.writer, ControlMessage::join(self.user_id.clone(), room_id), timeout).await?;
        if matches!(response.status, Status::Success) {
            self.pipeline.set_in_room(true);
        }
        Ok(response)
    }

    pub async fn leave(&self, timeout: Duration) -> Result<ServerResponse> {
        self.correlator.request(&self.writer, ControlMessage::leave(self.user_id.clone()), timeout).await
    }

    pub async fn list_rooms(&self, timeout: Duration) -> Result<ServerResponse> {
        self.correlator.request(&self.writer, ControlMessage::list_rooms(self.user_id.clone()), timeout).await
    }

    /// The next unsolicited message (welcome banner, async notification),
    /// or `None` once the connection has closed.
    pub async fn next_unsolicited(&self) -> Option<ServerResponse> {
        self.unsolicited_rx.lock().await.recv().await
    }

    pub fn start_capture(&self, capture: &mut dyn Capture) {
        let pipeline = self.pipeline.clone();
        pipeline.start_capture(capture);
    }

    pub fn mute(&self) {
        self.pipeline.mute();
    }

    pub fn unmute(&self) {
        self.pipeline.unmute();
    }

    pub fn is_muted(&self) -> bool {
        self.pipeline.is_muted()
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.pipeline.set_output_gain(gain);
    }

    pub fn shutdown(&self) {
        self.correlator.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;
    use crate::server::Server;
    use tokio::net::TcpListener;

    async fn spawn_test_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(frame::MAX_FRAME);
        tokio::spawn(server.accept_loop(listener));
        addr
    }

    #[tokio::test]
    async fn connect_receives_a_welcome_as_an_unsolicited_message() {
        let addr = spawn_test_server().await;
        let client = Client::connect(&addr.ip().to_string(), addr.port(), "alice", DEFAULT_TIMEOUT, frame::MAX_FRAME, Box::new(NullDevice::new())).await.unwrap();
        let welcome = client.next_unsolicited().await.unwrap();
        assert!(matches!(welcome.status, Status::Success));
    }

    #[tokio::test]
    async fn join_then_list_rooms_reflects_membership() {
        let addr = spawn_test_server().await;
        let client = Client::connect(&addr.ip().to_string(), addr.port(), "alice", DEFAULT_TIMEOUT, frame::MAX_FRAME, Box::new(NullDevice::new())).await.unwrap();
        client.next_unsolicited().await.unwrap();

        let joined = client.join("r1", DEFAULT_TIMEOUT).await.unwrap();
        assert!(matches!(joined.status, Status::Success));

        let listing = client.list_rooms(DEFAULT_TIMEOUT).await.unwrap();
        assert!(listing.message.contains("r1:alice:."));
    }

    #[tokio::test]
    async fn connect_to_nothing_times_out_or_errors() {
        let err = Client::connect("127.0.0.1", 1, "alice", Duration::from_millis(200), frame::MAX_FRAME, Box::new(NullDevice::new())).await;
        assert!(err.is_err());
    }
}
