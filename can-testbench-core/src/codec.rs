//! Bit-level signal codec
//!
//! Pure encode/decode between raw frame payloads and physical signal values,
//! driven entirely by catalog descriptors: one generic bit-extraction routine
//! parameterized by the stored layout fields, not per-message code.
//!
//! Bit numbering follows the DBC convention: payload bit index
//! `byte * 8 + bit`, where bit 0 is the least significant bit of a byte.
//! Little-endian (Intel) signals start at their LSB and grow towards higher
//! bit indices. Big-endian (Motorola) signals start at their MSB and grow
//! with the bit index decreasing within each byte, wrapping to bit 7 of the
//! next byte.

use crate::catalog::{ByteOrder, MessageDescriptor, SignalDescriptor, ValueType};
use crate::types::{DecodedSignal, Result, SignalValue, TestbenchError};
use std::collections::HashMap;

/// What to do when an encoded value falls outside a signal's declared range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfRangePolicy {
    /// Fail with `ValueOutOfRange` (nothing reaches the wire)
    #[default]
    Reject,
    /// Clamp to the declared min/max
    Clamp,
}

/// Decode all signals of a message from a raw payload
///
/// Fails with `PayloadTooShort` when the payload is smaller than the
/// descriptor's byte length; never returns partial results. Decoded values
/// are reported as-is, without min/max clamping - flagging anomalies is the
/// consumer's job, not the codec's.
pub fn decode(descriptor: &MessageDescriptor, payload: &[u8]) -> Result<Vec<DecodedSignal>> {
    if payload.len() < descriptor.size {
        return Err(TestbenchError::PayloadTooShort {
            message: descriptor.name.clone(),
            expected: descriptor.size,
            actual: payload.len(),
        });
    }

    let mut decoded = Vec::with_capacity(descriptor.signals.len());
    for signal in &descriptor.signals {
        decoded.push(decode_signal(payload, signal));
    }
    Ok(decoded)
}

/// Encode signal values into a payload, rejecting out-of-range values
///
/// Signals not present in `values` encode as raw zero. The output length
/// equals the descriptor byte length, zero padded.
pub fn encode(descriptor: &MessageDescriptor, values: &HashMap<String, f64>) -> Result<Vec<u8>> {
    encode_with_policy(descriptor, values, OutOfRangePolicy::Reject)
}

/// Encode signal values into a payload with an explicit out-of-range policy
pub fn encode_with_policy(
    descriptor: &MessageDescriptor,
    values: &HashMap<String, f64>,
    policy: OutOfRangePolicy,
) -> Result<Vec<u8>> {
    // A value for a signal the message does not carry is a caller bug,
    // not something to silently drop.
    for name in values.keys() {
        if descriptor.signal(name).is_none() {
            return Err(TestbenchError::UnknownSignal {
                message: descriptor.name.clone(),
                signal: name.clone(),
            });
        }
    }

    let mut payload = vec![0u8; descriptor.size];
    for signal in &descriptor.signals {
        let Some(&value) = values.get(&signal.name) else {
            continue; // raw zero from the padding
        };
        let raw = physical_to_raw(signal, value, policy)?;
        match signal.byte_order {
            ByteOrder::LittleEndian => insert_little_endian(&mut payload, signal, raw),
            ByteOrder::BigEndian => insert_big_endian(&mut payload, signal, raw),
        }
    }
    Ok(payload)
}

/// Validate a physical value against a signal's range and bit width
///
/// Used by the transmit scheduler to reject edits before they reach the
/// wire. Checks the declared min/max (DBC `[0|0]` means unconstrained) and
/// that the resulting raw value is representable in the signal's bit width.
pub fn check_value(signal: &SignalDescriptor, value: f64) -> Result<()> {
    physical_to_raw(signal, value, OutOfRangePolicy::Reject).map(|_| ())
}

/// Decode a single signal from payload bytes
fn decode_signal(payload: &[u8], signal: &SignalDescriptor) -> DecodedSignal {
    let raw_bits = match signal.byte_order {
        ByteOrder::LittleEndian => extract_little_endian(payload, signal),
        ByteOrder::BigEndian => extract_big_endian(payload, signal),
    };

    let raw = match signal.value_type {
        ValueType::Unsigned => raw_bits as i64,
        ValueType::Signed => sign_extend(raw_bits, signal.length as usize),
    };

    let physical = raw as f64 * signal.factor + signal.offset;

    let value = if signal.factor == 1.0 && signal.offset == 0.0 && signal.length == 1 {
        SignalValue::Boolean(raw != 0)
    } else if signal.factor != 1.0 || signal.offset != 0.0 {
        SignalValue::Float(physical)
    } else {
        SignalValue::Integer(raw)
    };

    let label = signal
        .value_table
        .as_ref()
        .and_then(|table| table.get(&raw))
        .cloned();

    DecodedSignal {
        name: signal.name.clone(),
        value,
        unit: signal.unit.clone(),
        label,
        raw,
    }
}

/// Convert a physical value to a raw integer masked to the signal width
fn physical_to_raw(signal: &SignalDescriptor, value: f64, policy: OutOfRangePolicy) -> Result<u64> {
    let value = if signal.has_range() && (value < signal.min || value > signal.max) {
        match policy {
            OutOfRangePolicy::Clamp => value.clamp(signal.min, signal.max),
            OutOfRangePolicy::Reject => {
                return Err(TestbenchError::ValueOutOfRange {
                    signal: signal.name.clone(),
                    value,
                    min: signal.min,
                    max: signal.max,
                });
            }
        }
    } else {
        value
    };

    // Inverse of physical = raw * factor + offset, rounded to the nearest
    // representable raw integer.
    let raw = ((value - signal.offset) / signal.factor).round();

    let length = signal.length as usize;
    let (raw_min, raw_max) = match signal.value_type {
        ValueType::Unsigned => (0.0, (u64::MAX >> (64 - length)) as f64),
        ValueType::Signed => {
            let max = ((1u64 << (length - 1)) - 1) as f64;
            (-max - 1.0, max)
        }
    };
    if raw < raw_min || raw > raw_max {
        // Representable-width bound, reported in physical units
        return Err(TestbenchError::ValueOutOfRange {
            signal: signal.name.clone(),
            value,
            min: raw_min * signal.factor + signal.offset,
            max: raw_max * signal.factor + signal.offset,
        });
    }

    let mask = u64::MAX >> (64 - length);
    Ok((raw as i64) as u64 & mask)
}

/// Extract raw bits with little-endian (Intel) byte order
fn extract_little_endian(payload: &[u8], signal: &SignalDescriptor) -> u64 {
    let start = signal.start_bit as usize;
    let mut result: u64 = 0;

    for i in 0..signal.length as usize {
        let pos = start + i;
        let bit = (payload[pos / 8] >> (pos % 8)) & 0x01;
        result |= (bit as u64) << i;
    }

    result
}

/// Extract raw bits with big-endian (Motorola) byte order
fn extract_big_endian(payload: &[u8], signal: &SignalDescriptor) -> u64 {
    let mut byte = signal.start_bit as usize / 8;
    let mut bit = signal.start_bit as usize % 8;
    let mut result: u64 = 0;

    for _ in 0..signal.length {
        result = (result << 1) | ((payload[byte] >> bit) & 0x01) as u64;
        if bit == 0 {
            byte += 1;
            bit = 7;
        } else {
            bit -= 1;
        }
    }

    result
}

/// Pack raw bits with little-endian (Intel) byte order
fn insert_little_endian(payload: &mut [u8], signal: &SignalDescriptor, raw: u64) {
    let start = signal.start_bit as usize;

    for i in 0..signal.length as usize {
        let pos = start + i;
        if (raw >> i) & 0x01 != 0 {
            payload[pos / 8] |= 1 << (pos % 8);
        }
    }
}

/// Pack raw bits with big-endian (Motorola) byte order
fn insert_big_endian(payload: &mut [u8], signal: &SignalDescriptor, raw: u64) {
    let length = signal.length as usize;
    let mut byte = signal.start_bit as usize / 8;
    let mut bit = signal.start_bit as usize % 8;

    for i in 0..length {
        if (raw >> (length - 1 - i)) & 0x01 != 0 {
            payload[byte] |= 1 << bit;
        }
        if bit == 0 {
            byte += 1;
            bit = 7;
        } else {
            bit -= 1;
        }
    }
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        (value | (!0u64 << bit_length)) as i64
    } else {
        value as i64
    }
}

/// Payload bit positions a signal occupies, in packing order
///
/// Used by the catalog's load-time layout validation; out-of-bounds
/// positions are reported, not truncated.
pub(crate) fn signal_bits(signal: &SignalDescriptor) -> Vec<usize> {
    let start = signal.start_bit as usize;
    let length = signal.length as usize;

    match signal.byte_order {
        ByteOrder::LittleEndian => (start..start + length).collect(),
        ByteOrder::BigEndian => {
            let mut byte = start / 8;
            let mut bit = start % 8;
            let mut positions = Vec::with_capacity(length);
            for _ in 0..length {
                positions.push(byte * 8 + bit);
                if bit == 0 {
                    byte += 1;
                    bit = 7;
                } else {
                    bit -= 1;
                }
            }
            positions
        }
    }
}
