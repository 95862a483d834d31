//! Length-prefixed binary framing over TCP, with an async write queue and
//! read loop (spec §4.1, component C1).
//!
//! Wire format: `size := len(payload) as little-endian u32; emit size then
//! payload`. A single `FrameWriter` task owns a connection's write half so
//! writes are strictly serialized; `send` just enqueues onto an mpsc
//! channel, which is where frame ordering for a caller is preserved.

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CoreError, Result};

/// Frames larger than this terminate the connection (spec §3).
pub const MAX_FRAME: u32 = 1024 * 1024;

/// Depth of the per-connection write queue before `send` reports
/// `Backpressure` (spec §4.1: "an implementer may add a high-water mark").
pub const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Read exactly one frame payload. `Ok(None)` is a clean EOF between
/// frames (normal close); an EOF mid-frame surfaces as `Io`.
pub async fn read_frame(reader: &mut OwnedReadHalf, max_frame: u32) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CoreError::Io(e)),
    }
    let len = u32::from_le_bytes(header);
    if len > max_frame {
        return Err(CoreError::FrameTooLarge { len, max: max_frame });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(CoreError::Io)?;
    Ok(Some(payload))
}

/// Write one length-prefixed frame. The length prefix is emitted exactly
/// once here — no other layer is allowed to wrap a payload again.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8], max_frame: u32) -> Result<()> {
    let len = payload.len();
    if len as u64 > max_frame as u64 {
        return Err(CoreError::FrameTooLarge { len: len as u32, max: max_frame });
    }
    let mut packet = Vec::with_capacity(4 + len);
    packet.extend_from_slice(&(len as u32).to_le_bytes());
    packet.extend_from_slice(payload);
    writer.write_all(&packet).await.map_err(CoreError::Io)
}

/// Handle to a connection's serialized write queue. Cloning is cheap
/// (it's just another sender onto the same channel).
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

impl FrameWriter {
    /// Enqueue a payload for sending. Non-blocking; fails with
    /// `Backpressure` if the queue is saturated, or `NotConnected` if the
    /// writer task has already exited.
    pub fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CoreError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => CoreError::NotConnected,
        })
    }
}

/// Spawn the write-queue task that owns `write_half` exclusively. One
/// outstanding write at a time; the next queued packet is popped only
/// once the previous write completes (spec §4.1).
pub fn spawn_writer(mut write_half: OwnedWriteHalf, max_frame: u32) -> (FrameWriter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_CAPACITY);
    let task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if let Err(error) = write_frame(&mut write_half, &payload, max_frame).await {
                tracing::debug!(%error, "frame write failed, closing connection");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });
    (FrameWriter { tx }, task)
}

/// Drive the read half of a connection, forwarding each decoded payload
/// onto `tx`. Returns `Ok(())` on a clean close, `Err` on a read error or
/// an oversized frame (both are fatal to the connection per spec §4.1).
pub async fn run_read_loop(mut read_half: OwnedReadHalf, tx: mpsc::UnboundedSender<Vec<u8>>, max_frame: u32) -> Result<()> {
    loop {
        match read_frame(&mut read_half, max_frame).await? {
            Some(payload) => {
                if tx.send(payload).is_err() {
                    return Ok(());
                }
            }
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, accepted) = tokio::join!(connect, accept);
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn frame_round_trips_for_various_lengths() {
        let (client, server) = loopback_pair().await;
        let (_cr, mut cw) = client.into_split();
        let (mut sr, _sw) = server.into_split();

        for len in [0usize, 1, 4096, MAX_FRAME as usize] {
            let payload = vec![0xAB; len];
            write_frame(&mut cw, &payload, MAX_FRAME).await.unwrap();
            let got = read_frame(&mut sr, MAX_FRAME).await.unwrap().unwrap();
            assert_eq!(got, payload);
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (client, server) = loopback_pair().await;
        let (_cr, mut cw) = client.into_split();
        let (mut sr, _sw) = server.into_split();

        let header = (MAX_FRAME + 1).to_le_bytes();
        cw.write_all(&header).await.unwrap();
        let err = read_frame(&mut sr, MAX_FRAME).await.unwrap_err();
        assert!(matches!(err, CoreError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn clean_close_with_no_partial_frame_is_ok_none() {
        let (client, server) = loopback_pair().await;
        drop(client);
        let (mut sr, _sw) = server.into_split();
        assert!(read_frame(&mut sr, MAX_FRAME).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writer_task_preserves_send_order() {
        let (client, server) = loopback_pair().await;
        let (_cr, cw) = client.into_split();
        let (mut sr, _sw) = server.into_split();
        let (writer, _task) = spawn_writer(cw, MAX_FRAME);

        for i in 0u8..10 {
            writer.send(vec![i]).unwrap();
        }
        for i in 0u8..10 {
            let got = read_frame(&mut sr, MAX_FRAME).await.unwrap().unwrap();
            assert_eq!(got, vec![i]);
        }
    }
}
