//! End-to-end bench test: catalog + codec + both workers over a loopback
//! transport, the way the CLI wires them together.

use can_testbench_core::{
    transport::loopback, BusEvent, CanTransport, Catalog, Frame, PipelineState,
    ReceivePipeline, SubscriptionBus, TransmitScheduler,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const BENCH_DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: VCU DASH

BO_ 256 Motion: 3 VCU
 SG_ Speed : 0|8@1+ (0.5,0) [0|127.5] "km/h" DASH
 SG_ Odometer : 8|16@1+ (1,0) [0|65535] "km" DASH

BO_ 512 Battery: 2 VCU
 SG_ Voltage : 0|16@1+ (0.01,0) [0|16] "V" DASH

BO_ 768 Gearbox: 1 VCU
 SG_ Gear : 0|8@1+ (1,0) [0|5] "" DASH

VAL_ 768 Gear 0 "Park" 1 "Reverse" 2 "Neutral" 3 "Drive" ;
"#;

fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::from_dbc(BENCH_DBC).unwrap())
}

#[test]
fn test_full_bench_round_trip() {
    // The bench talks to one end of the loopback; the "vehicle" is the
    // other end. The scheduler transmits Motion periodically; the vehicle
    // echoes Battery frames back at the pipeline.
    let catalog = catalog();
    let bus = Arc::new(SubscriptionBus::new());

    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    bus.subscribe(
        |e| matches!(e, BusEvent::Signal(_)),
        move |e| {
            if let BusEvent::Signal(update) = e {
                sink.lock().unwrap().push(update.clone());
            }
        },
    );

    let (bench_end, vehicle_end) = loopback();
    let bench_end: Arc<dyn CanTransport> = Arc::new(bench_end);

    let mut pipeline = ReceivePipeline::start(
        Arc::clone(&bench_end),
        Arc::clone(&catalog),
        Arc::clone(&bus),
    );
    let mut scheduler = TransmitScheduler::with_tick(
        bench_end,
        Arc::clone(&catalog),
        Arc::clone(&bus),
        Duration::from_millis(5),
    );

    let mut motion = HashMap::new();
    motion.insert("Speed".to_string(), 72.5);
    motion.insert("Odometer".to_string(), 1234.0);
    scheduler
        .arm(0x100, motion, Duration::from_millis(25))
        .unwrap();

    // Vehicle side: observe the scheduled traffic and answer with Battery
    let window = Duration::from_millis(160);
    let deadline = Instant::now() + window;
    let mut motion_frames = 0usize;
    while Instant::now() < deadline {
        if let Ok(Some(frame)) = vehicle_end.recv(Duration::from_millis(5)) {
            assert_eq!(frame.can_id, 0x100);
            assert_eq!(frame.data, vec![145, 0xD2, 0x04]); // 72.5/0.5, 1234 LE
            motion_frames += 1;
            vehicle_end
                .send(&Frame::new(0x200, false, vec![0x4C, 0x04])) // 11.00 V
                .unwrap();
        }
    }

    // floor(window / period) +/- 1, no unbounded drift
    let expected = (window.as_millis() / 25) as isize;
    assert!(
        ((expected - 1)..=(expected + 1)).contains(&(motion_frames as isize)),
        "expected ~{} Motion frames, got {}",
        expected,
        motion_frames
    );

    // The pipeline decoded the Battery echoes
    thread::sleep(Duration::from_millis(50));
    let updates = updates.lock().unwrap();
    let voltages: Vec<f64> = updates
        .iter()
        .filter(|u| u.signal.name == "Voltage")
        .map(|u| u.signal.value.as_f64())
        .collect();
    assert!(!voltages.is_empty());
    assert!(voltages.iter().all(|&v| (v - 11.0).abs() < 1e-9));
    drop(updates);

    scheduler.stop();
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn test_value_table_label_reaches_subscribers() {
    let catalog = catalog();
    let bus = Arc::new(SubscriptionBus::new());

    let labels = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&labels);
    bus.subscribe_all(move |e| {
        if let BusEvent::Signal(update) = e {
            sink.lock().unwrap().push((
                update.signal.raw,
                update.signal.label.clone(),
            ));
        }
    });

    let (bench_end, vehicle_end) = loopback();
    let mut pipeline = ReceivePipeline::start(Arc::new(bench_end), catalog, bus);

    vehicle_end
        .send(&Frame::new(0x300, false, vec![3]))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while labels.lock().unwrap().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    let labels = labels.lock().unwrap();
    assert_eq!(labels[0], (3, Some("Drive".to_string())));
    drop(labels);
    pipeline.stop();
}

#[test]
fn test_catalog_rejects_duplicate_id() {
    let dbc = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 256 First: 1 ECU1
 SG_ A : 0|8@1+ (1,0) [0|255] "" ECU1

BO_ 256 Second: 1 ECU1
 SG_ B : 0|8@1+ (1,0) [0|255] "" ECU1
"#;
    assert!(matches!(
        Catalog::from_dbc(dbc),
        Err(can_testbench_core::TestbenchError::DuplicateId { id: 256, .. })
    ));
}

#[test]
fn test_catalog_rejects_overlapping_signals() {
    let dbc = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 256 Broken: 2 ECU1
 SG_ A : 0|12@1+ (1,0) [0|4095] "" ECU1
 SG_ B : 8|8@1+ (1,0) [0|255] "" ECU1
"#;
    assert!(matches!(
        Catalog::from_dbc(dbc),
        Err(can_testbench_core::TestbenchError::SignalOverlap { .. })
    ));
}

#[test]
fn test_catalog_load_from_file() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BENCH_DBC.as_bytes()).unwrap();
    file.flush().unwrap();

    let catalog = Catalog::load(file.path()).unwrap();
    assert_eq!(catalog.len(), 3);

    // Declaration order is stable for deterministic listing
    let names: Vec<&str> = catalog.messages().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Motion", "Battery", "Gearbox"]);
}
