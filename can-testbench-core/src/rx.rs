//! Receive pipeline
//!
//! A dedicated thread that reads frames from the transport at bus rate,
//! resolves each against the catalog, decodes signals, and publishes the
//! results on the subscription bus. Per-frame failures never escape the
//! loop: unknown IDs are counted and dropped, decode failures become
//! `DecodeError` events, and only losing the transport itself is terminal.

use crate::bus::{BusEvent, SignalUpdate, SubscriptionBus};
use crate::catalog::Catalog;
use crate::codec;
use crate::transport::CanTransport;
use crate::types::{Frame, TestbenchError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long one `recv` call may block; also the stop-latency bound
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Consecutive transport receive failures tolerated before giving up
const MAX_RECV_FAILURES: u32 = 5;

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Read loop is active
    Running,
    /// Read loop has exited (stop requested or transport lost)
    Stopped,
}

/// Counters maintained by the read loop
#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    unknown: AtomicU64,
    decode_errors: AtomicU64,
}

/// Snapshot of the pipeline's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStats {
    /// Frames read from the transport
    pub frames: u64,
    /// Frames dropped because no descriptor matched their ID
    pub unknown: u64,
    /// Frames that matched a descriptor but failed to decode
    pub decode_errors: u64,
}

/// The receive pipeline: owns the read-loop thread
pub struct ReceivePipeline {
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl ReceivePipeline {
    /// Spawn the read loop against a transport, catalog and bus
    pub fn start(
        transport: Arc<dyn CanTransport>,
        catalog: Arc<Catalog>,
        bus: Arc<SubscriptionBus>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let loop_stop = Arc::clone(&stop);
        let loop_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name("can-rx".to_string())
            .spawn(move || {
                read_loop(transport, catalog, bus, loop_stop, loop_counters);
            })
            .expect("failed to spawn receive thread");

        log::info!("Receive pipeline started");
        Self {
            stop,
            counters,
            handle: Some(handle),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        match &self.handle {
            Some(handle) if !handle.is_finished() => PipelineState::Running,
            _ => PipelineState::Stopped,
        }
    }

    /// Snapshot the frame counters
    pub fn stats(&self) -> RxStats {
        RxStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
        }
    }

    /// Request the read loop to exit and join it
    ///
    /// The loop observes the request within one `READ_TIMEOUT` interval and
    /// releases its transport handle before this returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Receive thread panicked");
            }
        }
        log::info!("Receive pipeline stopped");
    }
}

impl Drop for ReceivePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    transport: Arc<dyn CanTransport>,
    catalog: Arc<Catalog>,
    bus: Arc<SubscriptionBus>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let mut consecutive_failures = 0u32;

    while !stop.load(Ordering::Relaxed) {
        let frame = match transport.recv(READ_TIMEOUT) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue, // timeout: re-check the stop flag
            Err(TestbenchError::TransportClosed) => {
                log::error!("Transport closed, receive pipeline terminating");
                bus.publish(&BusEvent::PipelineStopped {
                    reason: "transport closed".to_string(),
                });
                return;
            }
            Err(e) => {
                consecutive_failures += 1;
                log::warn!(
                    "Transport receive failed ({}/{}): {}",
                    consecutive_failures,
                    MAX_RECV_FAILURES,
                    e
                );
                if consecutive_failures >= MAX_RECV_FAILURES {
                    bus.publish(&BusEvent::PipelineStopped {
                        reason: format!("transport failed repeatedly: {}", e),
                    });
                    return;
                }
                continue;
            }
        };

        consecutive_failures = 0;
        counters.frames.fetch_add(1, Ordering::Relaxed);
        process_frame(&frame, &catalog, &bus, &counters);
    }
}

/// Decode one frame and publish its signals; errors stay inside this frame
fn process_frame(frame: &Frame, catalog: &Catalog, bus: &SubscriptionBus, counters: &Counters) {
    let Some(descriptor) = catalog.lookup(frame.can_id) else {
        counters.unknown.fetch_add(1, Ordering::Relaxed);
        log::trace!("Unknown CAN ID 0x{:X}, frame dropped", frame.can_id);
        return;
    };

    match codec::decode(descriptor, &frame.data) {
        Ok(signals) => {
            for signal in signals {
                bus.publish(&BusEvent::Signal(SignalUpdate {
                    can_id: frame.can_id,
                    message: descriptor.name.clone(),
                    signal,
                    timestamp: frame.timestamp,
                }));
            }
        }
        Err(e) => {
            counters.decode_errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("Failed to decode 0x{:X}: {}", frame.can_id, e);
            bus.publish(&BusEvent::DecodeError {
                can_id: frame.can_id,
                reason: e.to_string(),
                timestamp: frame.timestamp,
            });
        }
    }
}
