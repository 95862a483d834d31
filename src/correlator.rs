//! Client-side request/response correlator (spec §4.3, component C3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{CoreError, Result};
use crate::frame::FrameWriter;
use crate::protocol::{ControlMessage, ServerResponse, WireMessage};

/// Maps in-flight `request_id`s to the waiter that should be woken when
/// the matching response arrives (or a timeout fires).
pub struct RequestCorrelator {
    pending: Mutex<HashMap<u32, oneshot::Sender<ServerResponse>>>,
    next_id: AtomicU32,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()), next_id: AtomicU32::new(1) }
    }

    /// Allocate a request id, send `msg` through `writer`, and wait up to
    /// `timeout` for the matching `ServerResponse`.
    ///
    /// The waiter is inserted into the pending table *before* the frame is
    /// sent, so a response racing ahead of the insert can never be missed
    /// (spec §4.3 step 2).
    pub async fn request(&self, writer: &FrameWriter, mut msg: ControlMessage, timeout: Duration) -> Result<ServerResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        msg.request_id = id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let encoded = WireMessage::Control(msg).encode()?;
        if let Err(error) = writer.send(encoded) {
            self.pending.lock().remove(&id);
            tracing::debug!(request_id = id, %error, "send failed, request lost");
            return Err(CoreError::ConnectionLost);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_canceled)) => Err(CoreError::ConnectionLost),
            Err(_elapsed) => {
                self.pending.lock().remove(&id);
                Err(CoreError::Timeout)
            }
        }
    }

    /// Deliver an inbound `ServerResponse`. Returns `Some` only for a
    /// genuinely unsolicited message (`request_id == 0`) — the caller
    /// routes that to the unsolicited-message sink. A response that
    /// matches a pending waiter is consumed here and `None` is returned. A
    /// late or orphaned response (non-zero `request_id` with no matching
    /// waiter, e.g. one that arrives after `request()` already removed the
    /// id on timeout) is discarded and `None` is also returned — spec
    /// §4.3 requires it be dropped, not surfaced as if it were a server
    /// push.
    pub fn complete(&self, response: ServerResponse) -> Option<ServerResponse> {
        if response.is_unsolicited() {
            return Some(response);
        }
        match self.pending.lock().remove(&response.request_id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                tracing::debug!(request_id = response.request_id, "late or orphaned response discarded");
            }
        }
        None
    }

    /// Wake every outstanding waiter with `ConnectionLost` (dropping the
    /// sender triggers `RecvError` on the receiving side).
    pub fn shutdown(&self) {
        for (_, tx) in self.pending.lock().drain() {
            drop(tx);
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
