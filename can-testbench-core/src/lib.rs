//! CAN Testbench Core Library
//!
//! Observe and drive traffic on a CAN bus from a symbolic DBC catalog:
//! decode incoming frames into named signals for live display, and encode
//! named signal values into frames transmitted on a schedule (emulating a
//! vehicle control unit).
//!
//! # Architecture
//!
//! - [`Catalog`]: immutable message/signal index loaded from a DBC source
//! - [`codec`]: pure bit-level encode/decode driven by the descriptors
//! - [`ReceivePipeline`]: read-loop thread, frame -> signals -> bus events
//! - [`TransmitScheduler`]: tick thread, armed entries -> frames on the wire
//! - [`SubscriptionBus`]: synchronous fan-out from the workers to consumers
//! - [`CanTransport`]: the boundary to whatever carries the raw frames
//!
//! The catalog is built once and shared read-only by both workers; they
//! share no mutable state with each other. The presentation layer is
//! deliberately absent: it subscribes to [`BusEvent`]s and calls
//! [`TransmitScheduler::update_value`] when the operator edits a field.
//!
//! # Example
//!
//! ```no_run
//! use can_testbench_core::{
//!     Catalog, ReceivePipeline, SubscriptionBus, TransmitScheduler,
//! };
//! use std::collections::HashMap;
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let catalog = Arc::new(Catalog::load(Path::new("powertrain.dbc")).unwrap());
//! let bus = Arc::new(SubscriptionBus::new());
//! bus.subscribe_all(|event| println!("{:?}", event));
//!
//! let (rx_end, tx_end) = can_testbench_core::transport::loopback();
//! let mut pipeline = ReceivePipeline::start(
//!     Arc::new(rx_end),
//!     Arc::clone(&catalog),
//!     Arc::clone(&bus),
//! );
//! let mut scheduler = TransmitScheduler::start(Arc::new(tx_end), catalog, bus);
//! scheduler
//!     .arm(0x123, HashMap::new(), Duration::from_millis(100))
//!     .unwrap();
//! # pipeline.stop();
//! # scheduler.stop();
//! ```

// Public modules
pub mod bus;
pub mod catalog;
pub mod codec;
pub mod transport;
pub mod rx;
pub mod tx;
pub mod types;

// Re-export main types for convenience
pub use bus::{BusEvent, SignalUpdate, Subscription, SubscriptionBus};
pub use catalog::{ByteOrder, Catalog, MessageDescriptor, SignalDescriptor, ValueType};
pub use codec::OutOfRangePolicy;
pub use rx::{PipelineState, ReceivePipeline, RxStats};
pub use transport::CanTransport;
pub use tx::TransmitScheduler;
pub use types::{DecodedSignal, Frame, Result, SignalValue, TestbenchError, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
