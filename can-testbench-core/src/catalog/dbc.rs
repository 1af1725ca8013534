//! DBC source parser
//!
//! Parses Vector DBC text with the `can-dbc` crate and converts it into the
//! catalog's descriptor types. The raw parser is a syntax front end only;
//! layout validation happens in the catalog.

use crate::catalog::{ByteOrder, MessageDescriptor, SignalDescriptor, ValueType};
use crate::types::{Result, TestbenchError};
use std::collections::HashMap;

/// Parse DBC source text into message descriptors, in declaration order
pub fn parse_dbc(source: &str) -> Result<Vec<MessageDescriptor>> {
    let dbc = can_dbc::DBC::from_slice(source.as_bytes())
        .map_err(|e| TestbenchError::ParseError(format!("{:?}", e)))?;

    let mut messages = Vec::new();
    for dbc_msg in dbc.messages() {
        messages.push(convert_message(&dbc, dbc_msg)?);
    }

    log::debug!("Parsed {} messages from DBC source", messages.len());
    Ok(messages)
}

/// Convert a can-dbc message to our MessageDescriptor
fn convert_message(dbc: &can_dbc::DBC, dbc_msg: &can_dbc::Message) -> Result<MessageDescriptor> {
    let (id, is_extended) = match *dbc_msg.message_id() {
        can_dbc::MessageId::Standard(id) => (id as u32, false),
        can_dbc::MessageId::Extended(id) => (id, true),
    };

    let mut signals = Vec::new();
    for dbc_sig in dbc_msg.signals() {
        // Multiplexed layouts overlap by construction, which the catalog's
        // layout invariant forbids. Reject them up front with a clear error
        // instead of a confusing overlap report.
        if !matches!(
            dbc_sig.multiplexer_indicator(),
            can_dbc::MultiplexIndicator::Plain
        ) {
            return Err(TestbenchError::MultiplexedMessage(
                dbc_msg.message_name().to_string(),
            ));
        }

        signals.push(convert_signal(dbc, dbc_msg, dbc_sig));
    }

    Ok(MessageDescriptor {
        id,
        is_extended,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
    })
}

/// Convert a can-dbc signal to our SignalDescriptor
fn convert_signal(
    dbc: &can_dbc::DBC,
    dbc_msg: &can_dbc::Message,
    dbc_sig: &can_dbc::Signal,
) -> SignalDescriptor {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    // VAL_ blocks live at the DBC level, keyed by message ID + signal name
    let value_table = dbc
        .value_descriptions_for_signal(*dbc_msg.message_id(), dbc_sig.name())
        .map(|descriptions| {
            descriptions
                .iter()
                .map(|d| (*d.a() as i64, d.b().clone()))
                .collect::<HashMap<i64, String>>()
        })
        .filter(|table| !table.is_empty());

    SignalDescriptor {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length: *dbc_sig.signal_size() as u16,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        value_table,
    }
}
