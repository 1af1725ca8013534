//! Transport boundary
//!
//! The bench does not drive CAN hardware itself; it runs against anything
//! that can yield and accept raw frames. The receive pipeline is the only
//! reader, so `recv` sees no contention; `send` may be called from the
//! transmit scheduler and one-shot senders concurrently, so implementations
//! must make it safe for concurrent callers.

use crate::types::{Frame, Result, TestbenchError};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// A CAN bus transport: yields received frames, accepts frames to send
pub trait CanTransport: Send + Sync {
    /// Read one frame, blocking for at most `timeout`
    ///
    /// Returns `Ok(None)` on timeout so the read loop can observe stop
    /// requests. `Err(TransportClosed)` means the handle is gone for good.
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>>;

    /// Write one frame to the bus
    fn send(&self, frame: &Frame) -> Result<()>;
}

/// One endpoint of an in-process loopback bus
///
/// Frames sent on one endpoint arrive at the other, like two nodes on a
/// private two-node bus. Used by tests and the CLI's loopback mode.
pub struct LoopbackTransport {
    tx: Mutex<Sender<Frame>>,
    rx: Mutex<Receiver<Frame>>,
}

/// Create a crossed pair of loopback endpoints
pub fn loopback() -> (LoopbackTransport, LoopbackTransport) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (
        LoopbackTransport {
            tx: Mutex::new(a_tx),
            rx: Mutex::new(a_rx),
        },
        LoopbackTransport {
            tx: Mutex::new(b_tx),
            rx: Mutex::new(b_rx),
        },
    )
}

impl CanTransport for LoopbackTransport {
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>> {
        let rx = self.rx.lock().expect("loopback receiver poisoned");
        match rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TestbenchError::TransportClosed),
        }
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        let tx = self.tx.lock().expect("loopback sender poisoned");
        tx.send(frame.clone())
            .map_err(|_| TestbenchError::TransportClosed)
    }
}
