//! Synthetic Modbus/TCP traffic
//!
//! Builds complete IP/TCP packets with valid checksums, the shape NFQUEUE
//! hands to userspace. Used by the unit and integration tests.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use etherparse::PacketBuilder;

use crate::modbus::{DEFAULT_PORT, READ_HOLDING_REGISTERS};

/// Parameters of one synthetic segment
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub transaction_id: u16,
    pub unit_id: u8,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            src: IpAddr::V4(Ipv4Addr::new(192, 168, 10, 20)),
            dst: IpAddr::V4(Ipv4Addr::new(192, 168, 10, 5)),
            src_port: DEFAULT_PORT,
            dst_port: 49152,
            seq: 1_000,
            ack: 2_000,
            transaction_id: 1,
            unit_id: 1,
        }
    }
}

impl SegmentConfig {
    pub fn ipv6() -> Self {
        Self {
            src: IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0x20)),
            dst: IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0x05)),
            ..Self::default()
        }
    }

    /// Client-to-server direction
    pub fn request() -> Self {
        let d = Self::default();
        Self { src: d.dst, dst: d.src, src_port: d.dst_port, dst_port: d.src_port, ..d }
    }

    /// Wrap a raw TCP payload in IP and TCP headers.
    pub fn packet(&self, payload: &[u8]) -> Vec<u8> {
        let builder = match (self.src, self.dst) {
            (IpAddr::V4(s), IpAddr::V4(d)) => PacketBuilder::ipv4(s.octets(), d.octets(), 64),
            (IpAddr::V6(s), IpAddr::V6(d)) => PacketBuilder::ipv6(s.octets(), d.octets(), 64),
            _ => panic!("mixed address families"),
        };
        let builder = builder
            .tcp(self.src_port, self.dst_port, self.seq, 64240)
            .ack(self.ack)
            .psh();

        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).expect("writing to a Vec cannot fail");
        out
    }

    /// MBAP header + PDU
    pub fn adu(&self, pdu: &[u8]) -> Vec<u8> {
        let mut adu = Vec::with_capacity(7 + pdu.len());
        adu.extend_from_slice(&self.transaction_id.to_be_bytes());
        adu.extend_from_slice(&0u16.to_be_bytes());
        adu.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
        adu.push(self.unit_id);
        adu.extend_from_slice(pdu);
        adu
    }

    /// Response carrying `registers` for `function` (0x03, 0x04 or 0x17)
    pub fn register_response(&self, function: u8, registers: &[u16]) -> Vec<u8> {
        let mut pdu = vec![function, (registers.len() * 2) as u8];
        for value in registers {
            pdu.extend_from_slice(&value.to_be_bytes());
        }
        self.packet(&self.adu(&pdu))
    }
}

/// Read holding registers response from the default server
pub fn read_holding_response(registers: &[u16]) -> Vec<u8> {
    SegmentConfig::default().register_response(READ_HOLDING_REGISTERS, registers)
}

/// Response with an arbitrary PDU from the default server
pub fn response_with_pdu(pdu: &[u8]) -> Vec<u8> {
    let config = SegmentConfig::default();
    config.packet(&config.adu(pdu))
}

/// Pure ACK from the default server
pub fn empty_ack() -> Vec<u8> {
    SegmentConfig::default().packet(&[])
}

/// Registers `1..=count`
pub fn sequential_registers(count: u16) -> Vec<u16> {
    (1..=count).collect()
}
