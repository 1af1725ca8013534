//! CAN Testbench CLI Application
//!
//! Command-line front end for the can-testbench-core library:
//! - Loads a DBC catalog and lists its messages/signals
//! - Runs the live bench: decodes incoming traffic to the console while
//!   transmitting messages from a TOML profile on schedule
//! - Optionally mirrors all traffic into a canutils-format frame log
//!
//! The graphical presentation layer is out of scope here; this binary is a
//! terminal stand-in that subscribes to the same bus events a GUI would.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use can_testbench_core::{
    transport::loopback, BusEvent, CanTransport, Catalog, ReceivePipeline, SubscriptionBus,
    TransmitScheduler,
};

mod config;
mod framelog;
mod udp;

/// CAN Testbench - observe and drive CAN traffic from a DBC catalog
#[derive(Parser, Debug)]
#[command(name = "can-testbench-cli")]
#[command(about = "Decode live CAN traffic and emulate a VCU's periodic sends", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the DBC catalog
    #[arg(long, value_name = "FILE")]
    dbc: PathBuf,

    /// List the catalog's messages and signals, then exit
    #[arg(long)]
    list: bool,

    /// Transport carrying the raw frames
    #[arg(long, value_enum, default_value_t = TransportKind::Udp)]
    transport: TransportKind,

    /// UDP multicast group (udp transport)
    #[arg(long, default_value = "239.74.163.2")]
    udp_group: Ipv4Addr,

    /// UDP port (udp transport)
    #[arg(long, default_value_t = 43113)]
    udp_port: u16,

    /// Transmit profile (TOML) with messages to arm or send once
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Append all sent/received frames to a canutils-format log
    #[arg(long, value_name = "FILE")]
    frame_log: Option<PathBuf>,

    /// Channel name written to the frame log
    #[arg(long, default_value = "can0")]
    channel: String,

    /// Seconds to run the bench (0 = until Enter is pressed)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Print signal updates as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

/// Selectable transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// In-process echo bus: scheduled sends come straight back as receives
    Loopback,
    /// UDP multicast virtual bus
    Udp,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Testbench CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using core library v{}", can_testbench_core::VERSION);

    let catalog = Arc::new(
        Catalog::load(&args.dbc)
            .with_context(|| format!("Failed to load DBC catalog {:?}", args.dbc))?,
    );

    if args.list {
        list_catalog(&catalog);
        return Ok(());
    }

    run_bench(&args, catalog)
}

/// Print the catalog's messages and signals in declaration order
fn list_catalog(catalog: &Catalog) {
    println!("═══════════════════════════════════════════════");
    println!("  Catalog: {} messages", catalog.len());
    println!("═══════════════════════════════════════════════\n");

    for message in catalog.messages() {
        let id = if message.is_extended {
            format!("0x{:08X}x", message.id)
        } else {
            format!("0x{:03X}", message.id)
        };
        println!(
            "{} {} ({} bytes{})",
            id,
            message.name,
            message.size,
            message
                .sender
                .as_deref()
                .map(|s| format!(", from {}", s))
                .unwrap_or_default()
        );
        for signal in &message.signals {
            let range = if signal.has_range() {
                format!(" [{}..{}]", signal.min, signal.max)
            } else {
                String::new()
            };
            println!(
                "    {:<24} bit {:>2}+{:<2} x{} +{}{}{}",
                signal.name,
                signal.start_bit,
                signal.length,
                signal.factor,
                signal.offset,
                range,
                signal
                    .unit
                    .as_deref()
                    .map(|u| format!(" {}", u))
                    .unwrap_or_default()
            );
        }
    }
}

/// Run the live bench: receive pipeline + transmit scheduler on one transport
fn run_bench(args: &Args, catalog: Arc<Catalog>) -> Result<()> {
    println!("═══════════════════════════════════════════════");
    println!("  CAN Testbench - Live Mode");
    println!("═══════════════════════════════════════════════\n");

    // Loopback keeps the peer endpoint busy echoing frames back at us
    let mut echo_handle = None;
    let mut transport: Arc<dyn CanTransport> = match args.transport {
        TransportKind::Loopback => {
            let (bench_end, peer_end) = loopback();
            echo_handle = Some(std::thread::spawn(move || loop {
                match peer_end.recv(Duration::from_millis(100)) {
                    Ok(Some(frame)) => {
                        if peer_end.send(&frame).is_err() {
                            break;
                        }
                    }
                    Ok(None) => continue,
                    Err(_) => break,
                }
            }));
            println!("Transport: in-process loopback (echo)");
            Arc::new(bench_end)
        }
        TransportKind::Udp => {
            println!(
                "Transport: UDP multicast {}:{}",
                args.udp_group, args.udp_port
            );
            Arc::new(
                udp::UdpMulticastTransport::open(args.udp_group, args.udp_port)
                    .context("Failed to open UDP multicast transport")?,
            )
        }
    };

    if let Some(log_path) = &args.frame_log {
        transport = Arc::new(
            framelog::LoggedTransport::new(transport, log_path, &args.channel)
                .with_context(|| format!("Failed to open frame log {:?}", log_path))?,
        );
        println!("Frame log: {:?}", log_path);
    }

    let bus = Arc::new(SubscriptionBus::new());
    subscribe_printer(&bus, args.json, args.quiet);

    let mut pipeline = ReceivePipeline::start(
        Arc::clone(&transport),
        Arc::clone(&catalog),
        Arc::clone(&bus),
    );
    let mut scheduler =
        TransmitScheduler::start(Arc::clone(&transport), Arc::clone(&catalog), Arc::clone(&bus));

    if let Some(profile_path) = &args.profile {
        apply_profile(profile_path, &catalog, &scheduler)?;
    }

    if args.duration > 0 {
        println!("\nRunning for {} s ...\n", args.duration);
        std::thread::sleep(Duration::from_secs(args.duration));
    } else {
        println!("\nRunning - press Enter to stop.\n");
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    }

    scheduler.stop();
    pipeline.stop();
    let stats = pipeline.stats();

    // The echo thread only exits once every handle to the bench end is
    // gone, so release ours (the scheduler keeps one for send_once) first.
    drop(scheduler);
    drop(pipeline);
    drop(transport);
    if let Some(handle) = echo_handle {
        let _ = handle.join();
    }

    println!("\n═══════════════════════════════════════════════");
    println!("  Frames received: {}", stats.frames);
    println!("  Unknown IDs:     {}", stats.unknown);
    println!("  Decode errors:   {}", stats.decode_errors);
    println!("═══════════════════════════════════════════════");

    Ok(())
}

/// Arm or one-shot every message block of the transmit profile
fn apply_profile(
    path: &PathBuf,
    catalog: &Catalog,
    scheduler: &TransmitScheduler,
) -> Result<()> {
    let profile = config::load_profile(path)?;
    if profile.messages.is_empty() {
        bail!("profile {:?} contains no message blocks", path);
    }

    for message in &profile.messages {
        let can_id = message.resolve_id(catalog)?;
        if message.once {
            scheduler
                .send_once(can_id, &message.values)
                .with_context(|| format!("One-shot send of 0x{:X} failed", can_id))?;
            println!("✓ Sent 0x{:03X} once", can_id);
        } else {
            let period = Duration::from_millis(message.period_ms);
            scheduler
                .arm(can_id, message.values.clone(), period)
                .with_context(|| format!("Failed to arm 0x{:X}", can_id))?;
            println!("✓ Armed 0x{:03X} every {} ms", can_id, message.period_ms);
        }
    }
    Ok(())
}

/// Print bus events to the console
fn subscribe_printer(bus: &SubscriptionBus, json: bool, quiet: bool) {
    if quiet {
        return;
    }

    bus.subscribe_all(move |event| match event {
        BusEvent::Signal(update) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "timestamp": update.timestamp.to_rfc3339(),
                        "can_id": update.can_id,
                        "message": update.message,
                        "signal": update.signal.name,
                        "value": update.signal.value.as_f64(),
                        "raw": update.signal.raw,
                        "unit": update.signal.unit,
                        "label": update.signal.label,
                    })
                );
            } else {
                let label = update
                    .signal
                    .label
                    .as_deref()
                    .map(|l| format!(" ({})", l))
                    .unwrap_or_default();
                println!(
                    "[{}] {}.{} = {}{}{}",
                    update.timestamp.format("%H:%M:%S%.3f"),
                    update.message,
                    update.signal.name,
                    update.signal.value,
                    update
                        .signal
                        .unit
                        .as_deref()
                        .map(|u| format!(" {}", u))
                        .unwrap_or_default(),
                    label
                );
            }
        }
        BusEvent::DecodeError { can_id, reason, .. } => {
            eprintln!("✗ decode error on 0x{:X}: {}", can_id, reason);
        }
        BusEvent::EntryDisarmed { can_id, reason } => {
            eprintln!("✗ 0x{:X} auto-disarmed: {}", can_id, reason);
        }
        BusEvent::PipelineStopped { reason } => {
            eprintln!("✗ receive pipeline stopped: {}", reason);
        }
        BusEvent::FrameSent { .. } => {} // frame log covers these
    });
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
