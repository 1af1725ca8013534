//! Symbolic message/signal catalog
//!
//! Loads a DBC-style definition source into an immutable, indexed catalog:
//! arbitration ID -> message descriptor -> ordered signal descriptors.
//! Built once per loaded file; all later lookups are read-only and safe for
//! concurrent callers.

pub mod dbc;

use crate::types::{Result, TestbenchError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A complete CAN message descriptor
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    /// CAN arbitration ID (without the extended flag bit)
    pub id: u32,
    /// True if this is an extended (29-bit) ID
    pub is_extended: bool,
    /// Message name
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// All signals in this message, in declaration order
    pub signals: Vec<SignalDescriptor>,
}

impl MessageDescriptor {
    /// Find a signal by name
    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.iter().find(|s| s.name == name)
    }
}

/// A CAN signal descriptor
#[derive(Debug, Clone)]
pub struct SignalDescriptor {
    /// Signal name
    pub name: String,
    /// Start bit in the frame payload
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order for bit packing
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value (min == max == 0 means unconstrained)
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "V")
    pub unit: Option<String>,
    /// Value table for enum-like values (raw value -> label)
    pub value_table: Option<HashMap<i64, String>>,
}

impl SignalDescriptor {
    /// True if the declared min/max constrain the physical value
    ///
    /// DBC convention: a declared range of [0|0] means no limit.
    pub fn has_range(&self) -> bool {
        !(self.min == 0.0 && self.max == 0.0)
    }
}

/// Byte order for signal packing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// The message catalog: arbitration ID -> message descriptor
///
/// Immutable after load. Descriptors are held behind `Arc` so the transmit
/// scheduler can keep references without cloning signal lists.
pub struct Catalog {
    /// Messages in declaration order (for deterministic listing)
    messages: Vec<Arc<MessageDescriptor>>,
    /// Index: arbitration ID -> position in `messages`
    by_id: HashMap<u32, usize>,
}

impl Catalog {
    /// Load a catalog from a DBC file on disk
    ///
    /// Reads the file as bytes first and falls back to Latin-1 when the
    /// content is not valid UTF-8 (common with real-world DBC exports).
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading DBC file: {:?}", path);

        let bytes = std::fs::read(path)?;
        let content = String::from_utf8(bytes).unwrap_or_else(|e| {
            log::warn!("DBC file is not UTF-8, falling back to Latin-1");
            e.into_bytes().iter().map(|&b| b as char).collect()
        });

        let catalog = Self::from_dbc(&content)?;
        log::info!(
            "Loaded {} messages from {:?}",
            catalog.messages.len(),
            path
        );
        Ok(catalog)
    }

    /// Build a catalog from DBC source text
    ///
    /// Fails with `ParseError` on malformed syntax, `DuplicateId` when two
    /// messages share an arbitration ID, `SignalOverlap`/`SignalOutOfBounds`
    /// when a message's bit layout is inconsistent.
    pub fn from_dbc(source: &str) -> Result<Self> {
        let descriptors = dbc::parse_dbc(source)?;

        let mut messages: Vec<Arc<MessageDescriptor>> = Vec::with_capacity(descriptors.len());
        let mut by_id = HashMap::with_capacity(descriptors.len());

        for message in descriptors {
            validate_layout(&message)?;

            if let Some(&idx) = by_id.get(&message.id) {
                let first: &Arc<MessageDescriptor> = &messages[idx];
                return Err(TestbenchError::DuplicateId {
                    id: message.id,
                    first: first.name.clone(),
                    second: message.name,
                });
            }

            by_id.insert(message.id, messages.len());
            messages.push(Arc::new(message));
        }

        Ok(Self { messages, by_id })
    }

    /// Look up a message descriptor by arbitration ID
    ///
    /// O(1) average; never mutates; safe for concurrent callers.
    pub fn lookup(&self, can_id: u32) -> Option<&Arc<MessageDescriptor>> {
        self.by_id.get(&can_id).map(|&idx| &self.messages[idx])
    }

    /// Look up a message descriptor by name
    pub fn lookup_by_name(&self, name: &str) -> Option<&Arc<MessageDescriptor>> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// All message descriptors in declaration order
    pub fn messages(&self) -> impl Iterator<Item = &Arc<MessageDescriptor>> {
        self.messages.iter()
    }

    /// Number of messages in the catalog
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the catalog holds no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Validate that a message's signals fit its byte span and do not overlap
fn validate_layout(message: &MessageDescriptor) -> Result<()> {
    let payload_bits = message.size * 8;
    // owner of each claimed payload bit, by signal index
    let mut claimed: Vec<Option<usize>> = vec![None; payload_bits];

    for (idx, signal) in message.signals.iter().enumerate() {
        // Degenerate descriptors the DBC grammar allows but the codec's
        // bit arithmetic cannot carry; refuse them here rather than later
        // inside a worker thread.
        if signal.length == 0 {
            return Err(TestbenchError::EmptySignal {
                message: message.name.clone(),
                signal: signal.name.clone(),
            });
        }
        if signal.factor == 0.0 {
            return Err(TestbenchError::ZeroFactor {
                message: message.name.clone(),
                signal: signal.name.clone(),
            });
        }
        for bit in crate::codec::signal_bits(signal) {
            if bit >= payload_bits {
                return Err(TestbenchError::SignalOutOfBounds {
                    message: message.name.clone(),
                    signal: signal.name.clone(),
                    size: message.size,
                });
            }
            if let Some(owner) = claimed[bit] {
                return Err(TestbenchError::SignalOverlap {
                    message: message.name.clone(),
                    first: message.signals[owner].name.clone(),
                    second: signal.name.clone(),
                    bit,
                });
            }
            claimed[bit] = Some(idx);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed_signal() -> SignalDescriptor {
        SignalDescriptor {
            name: "Speed".to_string(),
            start_bit: 0,
            length: 8,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 0.5,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: Some("km/h".to_string()),
            value_table: None,
        }
    }

    fn message(id: u32, size: usize, signals: Vec<SignalDescriptor>) -> MessageDescriptor {
        MessageDescriptor {
            id,
            is_extended: false,
            name: format!("Msg{:X}", id),
            size,
            sender: None,
            signals,
        }
    }

    #[test]
    fn test_validate_ok() {
        let mut high = speed_signal();
        high.name = "Limit".to_string();
        high.start_bit = 8;
        let msg = message(0x100, 2, vec![speed_signal(), high]);
        assert!(validate_layout(&msg).is_ok());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut second = speed_signal();
        second.name = "Limit".to_string();
        second.start_bit = 4; // collides with Speed bits 4..8
        let msg = message(0x100, 2, vec![speed_signal(), second]);
        match validate_layout(&msg) {
            Err(TestbenchError::SignalOverlap { first, second, .. }) => {
                assert_eq!(first, "Speed");
                assert_eq!(second, "Limit");
            }
            other => panic!("expected SignalOverlap, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let mut long = speed_signal();
        long.length = 16; // 16 bits in a 1-byte message
        let msg = message(0x100, 1, vec![long]);
        assert!(matches!(
            validate_layout(&msg),
            Err(TestbenchError::SignalOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_length() {
        let mut empty = speed_signal();
        empty.length = 0;
        let msg = message(0x100, 1, vec![empty]);
        assert!(matches!(
            validate_layout(&msg),
            Err(TestbenchError::EmptySignal { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_factor() {
        let mut flat = speed_signal();
        flat.factor = 0.0;
        let msg = message(0x100, 1, vec![flat]);
        assert!(matches!(
            validate_layout(&msg),
            Err(TestbenchError::ZeroFactor { .. })
        ));
    }

    #[test]
    fn test_from_dbc_rejects_zero_length_signal() {
        // The DBC grammar accepts a 0-bit signal; the catalog must not,
        // or the read loop would panic decoding its frames later.
        let dbc = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 256 Degenerate: 1 ECU1
 SG_ Z : 0|0@1- (1,0) [0|0] "" ECU1
"#;
        assert!(matches!(
            Catalog::from_dbc(dbc),
            Err(TestbenchError::EmptySignal { signal, .. }) if signal == "Z"
        ));
    }

    #[test]
    fn test_has_range() {
        let mut sig = speed_signal();
        assert!(!sig.has_range());
        sig.max = 100.0;
        assert!(sig.has_range());
    }
}
