//! Transmit scheduler
//!
//! Emulates an ECU's periodic bus traffic: holds a set of armed
//! (message, period, current signal values) entries and drives them from a
//! fixed-interval tick thread. An entry is due when `now - last_sent >=
//! period`; `last_sent` resets to the tick time, not the send-completion
//! time, so periods drift by at most one tick interval instead of
//! accumulating encode/write latency.
//!
//! Value edits arrive from a control thread and are guarded per entry, so
//! an edit on one message never stalls the others.

use crate::bus::{BusEvent, SubscriptionBus};
use crate::catalog::{Catalog, MessageDescriptor};
use crate::codec;
use crate::transport::CanTransport;
use crate::types::{Frame, Result, TestbenchError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default tick resolution of the scheduler thread
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

/// Consecutive write failures tolerated before an entry is auto-disarmed
const MAX_SEND_FAILURES: u32 = 5;

/// Live signal values of one armed entry, guarded separately so edits on
/// one message never block the others
type EntryValues = Arc<Mutex<HashMap<String, f64>>>;

/// One armed periodic message
struct ArmedEntry {
    descriptor: Arc<MessageDescriptor>,
    period: Duration,
    values: EntryValues,
    last_sent: Option<Instant>,
    consecutive_failures: u32,
}

struct Shared {
    /// Armed entries in arming order; due entries send in this order
    entries: Mutex<Vec<ArmedEntry>>,
    stop: AtomicBool,
}

/// The transmit scheduler: owns the tick thread
pub struct TransmitScheduler {
    shared: Arc<Shared>,
    catalog: Arc<Catalog>,
    transport: Arc<dyn CanTransport>,
    bus: Arc<SubscriptionBus>,
    handle: Option<JoinHandle<()>>,
}

impl TransmitScheduler {
    /// Spawn the tick thread with the default resolution
    pub fn start(
        transport: Arc<dyn CanTransport>,
        catalog: Arc<Catalog>,
        bus: Arc<SubscriptionBus>,
    ) -> Self {
        Self::with_tick(transport, catalog, bus, DEFAULT_TICK)
    }

    /// Spawn the tick thread with an explicit tick interval
    pub fn with_tick(
        transport: Arc<dyn CanTransport>,
        catalog: Arc<Catalog>,
        bus: Arc<SubscriptionBus>,
        tick: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            entries: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let loop_transport = Arc::clone(&transport);
        let loop_bus = Arc::clone(&bus);
        let handle = thread::Builder::new()
            .name("can-tx".to_string())
            .spawn(move || {
                tick_loop(loop_shared, loop_transport, loop_bus, tick);
            })
            .expect("failed to spawn transmit thread");

        log::info!("Transmit scheduler started (tick {:?})", tick);
        Self {
            shared,
            catalog,
            transport,
            bus,
            handle: Some(handle),
        }
    }

    /// Arm a message for periodic transmission, replacing any existing entry
    ///
    /// Initial values are validated up front; the first frame goes out on
    /// the next tick.
    pub fn arm(
        &self,
        can_id: u32,
        initial_values: HashMap<String, f64>,
        period: Duration,
    ) -> Result<()> {
        let descriptor = self
            .catalog
            .lookup(can_id)
            .ok_or(TestbenchError::UnknownMessageId(can_id))?;

        // Dry-run encode: rejects unknown signal names and out-of-range
        // values before the entry ever reaches the wire.
        codec::encode(descriptor, &initial_values)?;

        let entry = ArmedEntry {
            descriptor: Arc::clone(descriptor),
            period,
            values: Arc::new(Mutex::new(initial_values)),
            last_sent: None,
            consecutive_failures: 0,
        };

        let mut entries = self.shared.entries.lock().expect("entry list poisoned");
        match entries.iter_mut().find(|e| e.descriptor.id == can_id) {
            Some(existing) => *existing = entry, // re-arm keeps its slot
            None => entries.push(entry),
        }
        log::info!(
            "Armed 0x{:X} ({}) every {:?}",
            can_id,
            descriptor.name,
            period
        );
        Ok(())
    }

    /// Update one live signal value used by the next scheduled send
    ///
    /// Validated immediately; invalid updates are rejected and never reach
    /// the wire.
    pub fn update_value(&self, can_id: u32, signal: &str, value: f64) -> Result<()> {
        let (descriptor, values) = {
            let entries = self.shared.entries.lock().expect("entry list poisoned");
            let entry = entries
                .iter()
                .find(|e| e.descriptor.id == can_id)
                .ok_or(TestbenchError::NotArmed(can_id))?;
            (Arc::clone(&entry.descriptor), Arc::clone(&entry.values))
        };

        let signal_desc =
            descriptor
                .signal(signal)
                .ok_or_else(|| TestbenchError::UnknownSignal {
                    message: descriptor.name.clone(),
                    signal: signal.to_string(),
                })?;
        codec::check_value(signal_desc, value)?;

        values
            .lock()
            .expect("entry values poisoned")
            .insert(signal.to_string(), value);
        Ok(())
    }

    /// Remove an armed entry; an in-flight send for it still completes
    pub fn disarm(&self, can_id: u32) -> Result<()> {
        let mut entries = self.shared.entries.lock().expect("entry list poisoned");
        let before = entries.len();
        entries.retain(|e| e.descriptor.id != can_id);
        if entries.len() == before {
            return Err(TestbenchError::NotArmed(can_id));
        }
        log::info!("Disarmed 0x{:X}", can_id);
        Ok(())
    }

    /// Encode and send one frame immediately, outside any schedule
    ///
    /// The one-shot path: no entry is armed and nothing is retained.
    pub fn send_once(&self, can_id: u32, values: &HashMap<String, f64>) -> Result<()> {
        let descriptor = self
            .catalog
            .lookup(can_id)
            .ok_or(TestbenchError::UnknownMessageId(can_id))?;
        let payload = codec::encode(descriptor, values)?;
        let frame = Frame::new(can_id, descriptor.is_extended, payload);
        self.transport.send(&frame)?;
        self.bus.publish(&BusEvent::FrameSent {
            can_id,
            data: frame.data,
            timestamp: frame.timestamp,
        });
        Ok(())
    }

    /// Arbitration IDs of the currently armed entries, in arming order
    pub fn armed(&self) -> Vec<u32> {
        self.shared
            .entries
            .lock()
            .expect("entry list poisoned")
            .iter()
            .map(|e| e.descriptor.id)
            .collect()
    }

    /// Request the tick thread to exit and join it
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Transmit thread panicked");
            }
        }
        log::info!("Transmit scheduler stopped");
    }
}

impl Drop for TransmitScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_loop(
    shared: Arc<Shared>,
    transport: Arc<dyn CanTransport>,
    bus: Arc<SubscriptionBus>,
    tick: Duration,
) {
    let mut next_tick = Instant::now() + tick;

    while !shared.stop.load(Ordering::Relaxed) {
        let tick_time = Instant::now();
        run_tick(&shared, transport.as_ref(), &bus, tick_time);

        // Fixed-interval cadence: sleep to the schedule, not for a full
        // tick after however long the sends took.
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
        next_tick += tick;
    }
}

/// One scheduler tick: send every due entry, in arming order
fn run_tick(shared: &Shared, transport: &dyn CanTransport, bus: &SubscriptionBus, now: Instant) {
    // Snapshot the due entries, then send with the entry list unlocked so
    // value edits on other entries are never stalled by transport writes.
    let due: Vec<(Arc<MessageDescriptor>, EntryValues)> = {
        let entries = shared.entries.lock().expect("entry list poisoned");
        entries
            .iter()
            .filter(|e| e.last_sent.map_or(true, |t| now - t >= e.period))
            .map(|e| (Arc::clone(&e.descriptor), Arc::clone(&e.values)))
            .collect()
    };

    for (descriptor, values) in due {
        let snapshot = values.lock().expect("entry values poisoned").clone();
        let result = codec::encode(&descriptor, &snapshot).and_then(|payload| {
            let frame = Frame::new(descriptor.id, descriptor.is_extended, payload);
            transport.send(&frame)?;
            Ok(frame)
        });

        let mut entries = shared.entries.lock().expect("entry list poisoned");
        // The entry may have been disarmed while we were sending; the
        // completed send stands, the bookkeeping is simply skipped.
        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.descriptor.id == descriptor.id)
        else {
            continue;
        };

        match result {
            Ok(frame) => {
                entry.last_sent = Some(now);
                entry.consecutive_failures = 0;
                drop(entries);
                bus.publish(&BusEvent::FrameSent {
                    can_id: descriptor.id,
                    data: frame.data,
                    timestamp: frame.timestamp,
                });
            }
            Err(e) => {
                entry.consecutive_failures += 1;
                log::warn!(
                    "Send of 0x{:X} failed ({}/{}): {}",
                    descriptor.id,
                    entry.consecutive_failures,
                    MAX_SEND_FAILURES,
                    e
                );
                if entry.consecutive_failures >= MAX_SEND_FAILURES {
                    entries.retain(|en| en.descriptor.id != descriptor.id);
                    drop(entries);
                    log::error!("Auto-disarming 0x{:X} after repeated failures", descriptor.id);
                    bus.publish(&BusEvent::EntryDisarmed {
                        can_id: descriptor.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{loopback, LoopbackTransport};

    const TEST_DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1 ECU2

BO_ 256 Motion: 1 ECU1
 SG_ Speed : 0|8@1+ (0.5,0) [0|127.5] "km/h" ECU2

BO_ 512 Battery: 2 ECU1
 SG_ Voltage : 0|16@1+ (0.01,0) [0|16] "V" ECU2
"#;

    fn setup() -> (TransmitScheduler, LoopbackTransport, Arc<SubscriptionBus>) {
        let catalog = Arc::new(Catalog::from_dbc(TEST_DBC).unwrap());
        let bus = Arc::new(SubscriptionBus::new());
        let (bench_end, bus_end) = loopback();
        let scheduler = TransmitScheduler::with_tick(
            Arc::new(bench_end),
            catalog,
            Arc::clone(&bus),
            Duration::from_millis(5),
        );
        (scheduler, bus_end, bus)
    }

    fn drain_for(bus_end: &LoopbackTransport, window: Duration) -> Vec<Frame> {
        let deadline = Instant::now() + window;
        let mut frames = Vec::new();
        while Instant::now() < deadline {
            if let Ok(Some(frame)) = bus_end.recv(Duration::from_millis(5)) {
                frames.push(frame);
            }
        }
        frames
    }

    fn speed(v: f64) -> HashMap<String, f64> {
        let mut values = HashMap::new();
        values.insert("Speed".to_string(), v);
        values
    }

    #[test]
    fn test_periodic_send_rate() {
        let (mut scheduler, bus_end, _bus) = setup();
        scheduler
            .arm(0x100, speed(50.0), Duration::from_millis(50))
            .unwrap();

        // floor(window / period) +/- 1 over the observation window
        let frames = drain_for(&bus_end, Duration::from_millis(260));
        assert!(
            (4..=6).contains(&frames.len()),
            "expected ~5 frames, got {}",
            frames.len()
        );
        for frame in &frames {
            assert_eq!(frame.can_id, 0x100);
            assert_eq!(frame.data, vec![100]);
        }
        scheduler.stop();
    }

    #[test]
    fn test_update_value_changes_next_send() {
        let (mut scheduler, bus_end, _bus) = setup();
        scheduler
            .arm(0x100, speed(10.0), Duration::from_millis(20))
            .unwrap();

        drain_for(&bus_end, Duration::from_millis(60));
        scheduler.update_value(0x100, "Speed", 60.0).unwrap();

        let frames = drain_for(&bus_end, Duration::from_millis(100));
        assert!(!frames.is_empty());
        assert_eq!(frames.last().unwrap().data, vec![120]);
        scheduler.stop();
    }

    #[test]
    fn test_invalid_update_rejected_and_not_sent() {
        let (mut scheduler, bus_end, _bus) = setup();
        scheduler
            .arm(0x100, speed(10.0), Duration::from_millis(20))
            .unwrap();

        // 200 km/h is above the declared max of 127.5
        assert!(matches!(
            scheduler.update_value(0x100, "Speed", 200.0),
            Err(TestbenchError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            scheduler.update_value(0x100, "Bogus", 1.0),
            Err(TestbenchError::UnknownSignal { .. })
        ));

        // The wire keeps carrying the last valid value
        let frames = drain_for(&bus_end, Duration::from_millis(80));
        assert!(!frames.is_empty());
        for frame in frames {
            assert_eq!(frame.data, vec![20]);
        }
        scheduler.stop();
    }

    #[test]
    fn test_disarm_stops_sends() {
        let (mut scheduler, bus_end, _bus) = setup();
        scheduler
            .arm(0x100, speed(1.0), Duration::from_millis(10))
            .unwrap();

        drain_for(&bus_end, Duration::from_millis(50));
        scheduler.disarm(0x100).unwrap();
        assert!(scheduler.armed().is_empty());

        // Allow one in-flight tick to settle, then expect silence
        thread::sleep(Duration::from_millis(20));
        while bus_end.recv(Duration::from_millis(1)).unwrap().is_some() {}
        let frames = drain_for(&bus_end, Duration::from_millis(60));
        assert!(frames.is_empty(), "got {} frames after disarm", frames.len());
        scheduler.stop();
    }

    #[test]
    fn test_arm_validates_up_front() {
        let (mut scheduler, _bus_end, _bus) = setup();
        assert!(matches!(
            scheduler.arm(0x999, HashMap::new(), Duration::from_millis(10)),
            Err(TestbenchError::UnknownMessageId(0x999))
        ));
        assert!(matches!(
            scheduler.arm(0x100, speed(999.0), Duration::from_millis(10)),
            Err(TestbenchError::ValueOutOfRange { .. })
        ));
        assert!(scheduler.armed().is_empty());
        scheduler.stop();
    }

    #[test]
    fn test_rearm_replaces_entry() {
        let (mut scheduler, bus_end, _bus) = setup();
        scheduler
            .arm(0x100, speed(10.0), Duration::from_millis(10))
            .unwrap();
        scheduler
            .arm(0x100, speed(30.0), Duration::from_millis(10))
            .unwrap();
        assert_eq!(scheduler.armed(), vec![0x100]);

        thread::sleep(Duration::from_millis(30));
        let frames = drain_for(&bus_end, Duration::from_millis(40));
        assert_eq!(frames.last().unwrap().data, vec![60]);
        scheduler.stop();
    }

    #[test]
    fn test_send_once() {
        let (mut scheduler, bus_end, _bus) = setup();
        scheduler.send_once(0x100, &speed(25.0)).unwrap();

        let frame = bus_end
            .recv(Duration::from_millis(100))
            .unwrap()
            .expect("one-shot frame");
        assert_eq!(frame.can_id, 0x100);
        assert_eq!(frame.data, vec![50]);

        // Nothing armed, nothing periodic
        assert!(scheduler.armed().is_empty());
        scheduler.stop();
    }

    /// Transport whose writes always fail, for the auto-disarm path
    struct BrokenTransport;

    impl CanTransport for BrokenTransport {
        fn recv(&self, timeout: Duration) -> crate::types::Result<Option<Frame>> {
            thread::sleep(timeout);
            Ok(None)
        }

        fn send(&self, _frame: &Frame) -> crate::types::Result<()> {
            Err(TestbenchError::Transport("bus busy".to_string()))
        }
    }

    #[test]
    fn test_auto_disarm_after_repeated_write_failures() {
        let catalog = Arc::new(Catalog::from_dbc(TEST_DBC).unwrap());
        let bus = Arc::new(SubscriptionBus::new());
        let disarmed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&disarmed);
        bus.subscribe(
            |e| matches!(e, BusEvent::EntryDisarmed { .. }),
            move |e| {
                if let BusEvent::EntryDisarmed { can_id, .. } = e {
                    sink.lock().unwrap().push(*can_id);
                }
            },
        );

        let mut scheduler = TransmitScheduler::with_tick(
            Arc::new(BrokenTransport),
            catalog,
            Arc::clone(&bus),
            Duration::from_millis(2),
        );
        scheduler
            .arm(0x100, speed(1.0), Duration::from_millis(2))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while scheduler.armed().contains(&0x100) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(scheduler.armed().is_empty(), "entry not auto-disarmed");
        assert_eq!(*disarmed.lock().unwrap(), vec![0x100]);
        scheduler.stop();
    }
}
