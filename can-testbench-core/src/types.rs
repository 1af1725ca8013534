//! Core types for the CAN testbench library
//!
//! This module defines the fundamental types that flow through the bench:
//! raw frames at the transport boundary, decoded signals on the subscription
//! bus, and the error taxonomy shared by all components.

use chrono::{DateTime, Utc};
use std::fmt;

/// Timestamp type used throughout the bench
pub type Timestamp = DateTime<Utc>;

/// Result type for testbench operations
pub type Result<T> = std::result::Result<T, TestbenchError>;

/// A raw classic CAN frame at the transport boundary
///
/// Produced by the transport on receive, constructed by the codec on
/// transmit. Not retained beyond pipeline processing.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// CAN arbitration ID (11-bit or 29-bit)
    pub can_id: u32,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// Frame data bytes (0-8 bytes for classic CAN)
    pub data: Vec<u8>,
    /// Receipt or intended-send timestamp
    pub timestamp: Timestamp,
}

impl Frame {
    /// Build a frame stamped with the current time
    pub fn new(can_id: u32, is_extended: bool, data: Vec<u8>) -> Self {
        Self {
            can_id,
            is_extended,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Errors that can occur in the testbench
#[derive(Debug, thiserror::Error)]
pub enum TestbenchError {
    #[error("Failed to parse DBC source: {0}")]
    ParseError(String),

    #[error("Duplicate arbitration ID 0x{id:X}: messages '{first}' and '{second}'")]
    DuplicateId { id: u32, first: String, second: String },

    #[error("Signals '{first}' and '{second}' overlap at bit {bit} in message '{message}'")]
    SignalOverlap {
        message: String,
        first: String,
        second: String,
        bit: usize,
    },

    #[error("Signal '{signal}' extends past the {size}-byte span of message '{message}'")]
    SignalOutOfBounds {
        message: String,
        signal: String,
        size: usize,
    },

    #[error("Signal '{signal}' in message '{message}' has a zero bit length")]
    EmptySignal { message: String, signal: String },

    #[error("Signal '{signal}' in message '{message}' has a zero scale factor")]
    ZeroFactor { message: String, signal: String },

    #[error("Message '{0}' uses multiplexed signals, which the catalog does not support")]
    MultiplexedMessage(String),

    #[error("Payload for message '{message}' is {actual} bytes, descriptor needs {expected}")]
    PayloadTooShort {
        message: String,
        expected: usize,
        actual: usize,
    },

    #[error("Value {value} for signal '{signal}' is outside [{min}, {max}]")]
    ValueOutOfRange {
        signal: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Message '{message}' has no signal named '{signal}'")]
    UnknownSignal { message: String, signal: String },

    #[error("No catalog message with arbitration ID 0x{0:X}")]
    UnknownMessageId(u32),

    #[error("No message with arbitration ID 0x{0:X} is armed")]
    NotArmed(u32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A decoded signal with its physical value
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    /// Signal name from the catalog
    pub name: String,
    /// Decoded physical value
    pub value: SignalValue,
    /// Engineering unit (e.g., "km/h", "V")
    pub unit: Option<String>,
    /// Label from the signal's value table, if one matches the raw value
    pub label: Option<String>,
    /// Raw value before scaling (always available, even when labelled)
    pub raw: i64,
}

/// Signal value types produced by the codec
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    /// Signed integer value (factor 1, offset 0)
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Boolean value (single bit, no scaling)
    Boolean(bool),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{:.3}", v),
            SignalValue::Boolean(v) => write!(f, "{}", if *v { "true" } else { "false" }),
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64 for comparisons and plotting
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Float(v) => *v,
            SignalValue::Boolean(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_value_as_f64() {
        assert_eq!(SignalValue::Integer(42).as_f64(), 42.0);
        assert_eq!(SignalValue::Float(3.14).as_f64(), 3.14);
        assert_eq!(SignalValue::Boolean(true).as_f64(), 1.0);
        assert_eq!(SignalValue::Boolean(false).as_f64(), 0.0);
    }

    #[test]
    fn test_signal_value_display() {
        assert_eq!(format!("{}", SignalValue::Integer(42)), "42");
        assert_eq!(format!("{}", SignalValue::Float(3.14159)), "3.142");
        assert_eq!(format!("{}", SignalValue::Boolean(true)), "true");
    }

    #[test]
    fn test_frame_dlc() {
        let frame = Frame::new(0x123, false, vec![1, 2, 3]);
        assert_eq!(frame.dlc(), 3);
        assert!(!frame.is_extended);
    }
}
