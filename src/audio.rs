//! Client audio pipeline: capture → encode → outbound `AudioFrame`, and
//! inbound `AudioFrame` → decode → playback (spec §4.6, component C6).
//!
//! Fixed parameters per spec §4.6: 48 kHz, mono, float32 samples, 20 ms
//! (960-sample) frames. The concrete codec is explicitly out of scope —
//! `AudioCodec` is an interface, and `PassthroughCodec` (samples as raw
//! little-endian bytes) is the only implementation, standing in for
//! whatever real codec a deployment would plug in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::{Capture, Playback};
use crate::frame::FrameWriter;
use crate::protocol::{AudioFrame, WireMessage};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 1;
pub const FRAME_SAMPLES: usize = 960;

/// Capacity of the queue between the capture callback and the encode/send
/// thread — a soft limit past which the oldest pending block is dropped
/// rather than blocking capture (spec §4.6's back-pressure rule).
const OUTBOUND_QUEUE_CAPACITY: usize = 8;

pub trait AudioCodec: Send + Sync {
    fn encode(&self, samples: &[f32]) -> Vec<u8>;
    fn decode(&self, payload: &[u8]) -> Vec<f32>;
}

/// Samples as raw little-endian `f32` bytes — no compression, just a
/// concrete stand-in for a codec the interface leaves unspecified.
pub struct PassthroughCodec;

impl AudioCodec for PassthroughCodec {
    fn encode(&self, samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn decode(&self, payload: &[u8]) -> Vec<f32> {
        payload.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }
}

fn now_monotonic_nanos() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
}

/// Couples a capture callback, the codec, and the send queue to one side,
/// and inbound audio frames to a playback device on the other (spec's own
/// description of this module's job).
pub struct AudioPipeline {
    user_id: String,
    writer: FrameWriter,
    codec: Arc<dyn AudioCodec>,
    muted: Arc<AtomicBool>,
    in_room: Arc<AtomicBool>,
    playback: Mutex<Box<dyn Playback>>,
}

impl AudioPipeline {
    pub fn new(user_id: impl Into<String>, writer: FrameWriter, codec: Arc<dyn AudioCodec>, playback: Box<dyn Playback>) -> Self {
        Self { user_id: user_id.into(), writer, codec, muted: Arc::new(AtomicBool::new(false)), in_room: Arc::new(AtomicBool::new(true)), playback: Mutex::new(playback) }
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::Relaxed);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_in_room(&self, in_room: bool) {
        self.in_room.store(in_room, Ordering::Relaxed);
    }

    /// Wire up `capture`'s callback and spawn the thread that encodes and
    /// sends each captured block. The callback itself never blocks: it
    /// only pushes onto a bounded drop-oldest queue (spec §5).
    pub fn start_capture(self: &Arc<Self>, capture: &mut dyn Capture) {
        let queue = Arc::new(crate::buffers::DropOldestQueue::<Vec<f32>>::new(OUTBOUND_QUEUE_CAPACITY));
        let push_queue = queue.clone();
        capture.set_on_samples(Box::new(move |samples: &[f32]| {
            push_queue.push(samples.to_vec());
        }));

        let pipeline = self.clone();
        let receiver = queue.receiver();
        std::thread::spawn(move || {
            while let Ok(block) = receiver.recv() {
                pipeline.encode_and_send(&block);
            }
        });
    }

    fn encode_and_send(&self, samples: &[f32]) {
        if !self.in_room.load(Ordering::Relaxed) || self.muted.load(Ordering::Relaxed) {
            return;
        }
        let payload = self.codec.encode(samples);
        let frame = AudioFrame { user_id: self.user_id.clone(), audio_payload: payload, timestamp: now_monotonic_nanos(), sequence_number: 0 };
        let Ok(encoded) = WireMessage::Audio(frame).encode() else { return };
        if let Err(error) = self.writer.send(encoded) {
            tracing::debug!(%error, "dropped outbound audio frame");
        }
    }

    /// Decode and enqueue an inbound `AudioFrame` for playback. Frames
    /// echoing our own user id (a misrouted fan-out, or a single-member
    /// room loopback) are discarded.
    pub fn handle_inbound(&self, frame: &AudioFrame) {
        if frame.user_id == self.user_id {
            return;
        }
        let samples = self.codec.decode(&frame.audio_payload);
        self.playback.lock().unwrap().push_samples(&samples);
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.playback.lock().unwrap().set_gain(gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;
    use tokio::net::{TcpListener, TcpStream};

    async fn writer_to_nowhere() -> FrameWriter {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();
        let (_r, w) = client.into_split();
        crate::frame::spawn_writer(w, crate::frame::MAX_FRAME).0
    }

    #[test]
    fn passthrough_codec_round_trips_samples() {
        let codec = PassthroughCodec;
        let samples = vec![0.1f32, -0.5, 1.0, -1.0, 0.0];
        let decoded = codec.decode(&codec.encode(&samples));
        assert_eq!(decoded, samples);
    }

    #[tokio::test]
    async fn muted_pipeline_sends_nothing() {
        let writer = writer_to_nowhere().await;
        let pipeline = AudioPipeline::new("alice", writer, Arc::new(PassthroughCodec), Box::new(NullDevice::new()));
        pipeline.mute();
        pipeline.encode_and_send(&[0.0; FRAME_SAMPLES]);
        assert!(pipeline.is_muted());
    }

    #[tokio::test]
    async fn inbound_frame_from_self_is_discarded() {
        let writer = writer_to_nowhere().await;
        let pipeline = AudioPipeline::new("alice", writer, Arc::new(PassthroughCodec), Box::new(NullDevice::new()));
        let frame = AudioFrame { user_id: "alice".into(), audio_payload: PassthroughCodec.encode(&[0.2]), timestamp: 0, sequence_number: 0 };
        pipeline.handle_inbound(&frame); // must not panic; there is nothing to assert beyond "it returns"
    }

    #[test]
    fn drop_oldest_queue_caps_outbound_backlog() {
        let queue = crate::buffers::DropOldestQueue::<Vec<f32>>::new(2);
        queue.push(vec![1.0]);
        queue.push(vec![2.0]);
        queue.push(vec![3.0]);
        assert_eq!(queue.try_pop(), Some(vec![2.0]));
        assert_eq!(queue.try_pop(), Some(vec![3.0]));
    }
}
