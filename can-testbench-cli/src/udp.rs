//! UDP multicast transport
//!
//! A virtual CAN bus over UDP multicast, one datagram per frame, so several
//! bench instances on a LAN can see each other's traffic without hardware.
//! Default group/port follow the common virtual-bus convention
//! (239.74.163.2:43113).
//!
//! Datagram layout: flags (bit 0 = extended ID), DLC, arbitration ID as
//! big-endian u32, then the payload bytes.

use can_testbench_core::{CanTransport, Frame, TestbenchError};
use chrono::Utc;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

const HEADER_LEN: usize = 6;
const FLAG_EXTENDED: u8 = 0x01;

/// UDP multicast CAN transport
pub struct UdpMulticastTransport {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl UdpMulticastTransport {
    /// Bind to the group and start listening
    pub fn open(group: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        log::info!("UDP multicast transport on {}:{}", group, port);
        Ok(Self {
            socket,
            group: SocketAddrV4::new(group, port),
        })
    }

    fn encode_datagram(frame: &Frame) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + frame.data.len());
        buf.push(if frame.is_extended { FLAG_EXTENDED } else { 0 });
        buf.push(frame.data.len() as u8);
        buf.extend_from_slice(&frame.can_id.to_be_bytes());
        buf.extend_from_slice(&frame.data);
        buf
    }

    fn decode_datagram(buf: &[u8]) -> Option<Frame> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let dlc = buf[1] as usize;
        if dlc > 8 || buf.len() < HEADER_LEN + dlc {
            return None;
        }
        let can_id = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        Some(Frame {
            can_id,
            is_extended: buf[0] & FLAG_EXTENDED != 0,
            data: buf[HEADER_LEN..HEADER_LEN + dlc].to_vec(),
            timestamp: Utc::now(),
        })
    }
}

impl CanTransport for UdpMulticastTransport {
    fn recv(&self, timeout: Duration) -> can_testbench_core::Result<Option<Frame>> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| TestbenchError::Transport(e.to_string()))?;

        let mut buf = [0u8; HEADER_LEN + 8];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _peer)) => match Self::decode_datagram(&buf[..len]) {
                Some(frame) => Ok(Some(frame)),
                None => {
                    log::warn!("Dropping malformed datagram ({} bytes)", len);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) => Err(TestbenchError::Transport(e.to_string())),
        }
    }

    fn send(&self, frame: &Frame) -> can_testbench_core::Result<()> {
        let datagram = Self::encode_datagram(frame);
        self.socket
            .send_to(&datagram, self.group)
            .map_err(|e| TestbenchError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_round_trip() {
        let frame = Frame::new(0x1ABCDEF0 & 0x1FFF_FFFF, true, vec![1, 2, 3, 4]);
        let buf = UdpMulticastTransport::encode_datagram(&frame);
        let back = UdpMulticastTransport::decode_datagram(&buf).unwrap();
        assert_eq!(back.can_id, frame.can_id);
        assert!(back.is_extended);
        assert_eq!(back.data, frame.data);
    }

    #[test]
    fn test_malformed_datagram_rejected() {
        assert!(UdpMulticastTransport::decode_datagram(&[0, 1]).is_none());
        // DLC claims more bytes than the datagram carries
        assert!(UdpMulticastTransport::decode_datagram(&[0, 8, 0, 0, 1, 0, 0xAA]).is_none());
    }
}
