//! In-process subscription bus
//!
//! Fans decoded-signal updates and pipeline events out to consumers
//! (printers, plotters, loggers) without coupling the worker threads to any
//! of them. Delivery is synchronous, in registration order; handlers that
//! need to do heavy work should enqueue to their own buffer rather than run
//! it inline, because publish time is read-loop time.

use crate::types::{DecodedSignal, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A decoded signal value flowing from the receive pipeline
#[derive(Debug, Clone)]
pub struct SignalUpdate {
    /// Arbitration ID of the carrying frame
    pub can_id: u32,
    /// Message name from the catalog
    pub message: String,
    /// The decoded signal
    pub signal: DecodedSignal,
    /// Frame receipt timestamp
    pub timestamp: Timestamp,
}

/// Events delivered over the subscription bus
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// One decoded signal from a received frame
    Signal(SignalUpdate),
    /// A frame was written to the transport
    FrameSent {
        can_id: u32,
        data: Vec<u8>,
        timestamp: Timestamp,
    },
    /// A frame matched a descriptor but could not be decoded
    DecodeError {
        can_id: u32,
        reason: String,
        timestamp: Timestamp,
    },
    /// A transmit entry was disarmed after repeated write failures
    EntryDisarmed { can_id: u32, reason: String },
    /// The receive pipeline terminated (transport lost or stop requested)
    PipelineStopped { reason: String },
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

type Predicate = Box<dyn Fn(&BusEvent) -> bool + Send + Sync>;
type Handler = Box<dyn Fn(&BusEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Predicate,
    handler: Handler,
}

/// Synchronous publish/subscribe fan-out
///
/// Publishing snapshots the subscriber list, so a handler may unsubscribe
/// itself (or others) during delivery without corrupting the in-progress
/// delivery order.
#[derive(Default)]
pub struct SubscriptionBus {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriptionBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events matching `filter`
    pub fn subscribe<F, H>(&self, filter: F, handler: H) -> Subscription
    where
        F: Fn(&BusEvent) -> bool + Send + Sync + 'static,
        H: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            filter: Box::new(filter),
            handler: Box::new(handler),
        });
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(subscriber);
        Subscription(id)
    }

    /// Register a handler for all events
    pub fn subscribe_all<H>(&self, handler: H) -> Subscription
    where
        H: Fn(&BusEvent) + Send + Sync + 'static,
    {
        self.subscribe(|_| true, handler)
    }

    /// Remove a subscriber; a no-op if the handle is already gone
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .retain(|s| s.id != subscription.0);
    }

    /// Deliver an event to all current subscribers, in registration order
    pub fn publish(&self, event: &BusEvent) {
        let snapshot: Vec<Arc<Subscriber>> = self
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .clone();

        for subscriber in snapshot {
            if (subscriber.filter)(event) {
                (subscriber.handler)(event);
            }
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .len()
    }
}
