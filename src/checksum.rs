//! TCP/IP checksum repair after payload rewriting

use etherparse::{IpNumber, Ipv4Header, Ipv6Header, TcpHeader};

use crate::error::{ChecksumError, Result};
use crate::packet::{NetworkHeader, ParsedPacket};

/// Recompute the TCP checksum (and the IPv4 header checksum) over the
/// packet's current content. Only called on the mutation path.
pub fn repair(packet: &mut ParsedPacket) -> Result<()> {
    let payload = packet.payload()?;

    let tcp_checksum = match &packet.network {
        NetworkHeader::V4(ip) => packet.tcp.calc_checksum_ipv4(ip, &payload),
        NetworkHeader::V6(ip) => packet.tcp.calc_checksum_ipv6(ip, &payload),
    }
    .map_err(|_| ChecksumError::PayloadTooLarge(payload.len()))?;
    packet.tcp.checksum = tcp_checksum;

    if let NetworkHeader::V4(ip) = &mut packet.network {
        ip.header_checksum = ip.calc_header_checksum();
    }

    Ok(())
}

/// Outcome of checking a raw packet's checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumStatus {
    /// Always true for IPv6, which has no header checksum
    pub ip_valid: bool,
    pub tcp_valid: bool,
}

impl ChecksumStatus {
    pub fn is_valid(&self) -> bool {
        self.ip_valid && self.tcp_valid
    }
}

/// Check both checksums of a raw IP/TCP packet. `None` if the packet is not
/// IP/TCP or does not decode.
pub fn verify(bytes: &[u8]) -> Option<ChecksumStatus> {
    match bytes.first()? >> 4 {
        4 => {
            let (ip, rest) = Ipv4Header::from_slice(bytes).ok()?;
            if ip.protocol != IpNumber::TCP {
                return None;
            }
            let header_len = bytes.len() - rest.len();
            let segment = bytes.get(header_len..usize::from(ip.total_len))?;
            let (tcp, payload) = TcpHeader::from_slice(segment).ok()?;
            Some(ChecksumStatus {
                ip_valid: ip.calc_header_checksum() == ip.header_checksum,
                tcp_valid: tcp.calc_checksum_ipv4(&ip, payload).ok()? == tcp.checksum,
            })
        }
        6 => {
            let (ip, rest) = Ipv6Header::from_slice(bytes).ok()?;
            if ip.next_header != IpNumber::TCP {
                return None;
            }
            let segment = rest.get(..usize::from(ip.payload_length))?;
            let (tcp, payload) = TcpHeader::from_slice(segment).ok()?;
            Some(ChecksumStatus {
                ip_valid: true,
                tcp_valid: tcp.calc_checksum_ipv6(&ip, payload).ok()? == tcp.checksum,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::PduBody;
    use crate::packet::parse;
    use crate::testing::{self, SegmentConfig};

    fn overwrite_register(packet: &mut ParsedPacket, index: usize, value: u16) {
        let adu = packet.adu.as_mut().unwrap();
        if let PduBody::Registers(registers) = &mut adu.pdu.body {
            registers[index] = value;
        }
    }

    #[test]
    fn test_builder_packets_verify() {
        let bytes = testing::read_holding_response(&[1, 2, 3]);
        assert!(verify(&bytes).unwrap().is_valid());
        let bytes = SegmentConfig::ipv6().register_response(0x03, &[1, 2, 3]);
        assert!(verify(&bytes).unwrap().is_valid());
    }

    #[test]
    fn test_mutation_without_repair_is_invalid() {
        let bytes = testing::read_holding_response(&testing::sequential_registers(12));
        let mut packet = parse(&bytes).unwrap();
        overwrite_register(&mut packet, 10, 0xFFF6);

        let status = verify(&packet.serialize().unwrap()).unwrap();
        assert!(status.ip_valid);
        assert!(!status.tcp_valid);
    }

    #[test]
    fn test_repair_ipv4() {
        let bytes = testing::read_holding_response(&testing::sequential_registers(12));
        let mut packet = parse(&bytes).unwrap();
        overwrite_register(&mut packet, 10, 0xFFF6);
        repair(&mut packet).unwrap();

        let out = packet.serialize().unwrap();
        assert_eq!(out.len(), bytes.len());
        assert!(verify(&out).unwrap().is_valid());
    }

    #[test]
    fn test_repair_ipv6() {
        let bytes = SegmentConfig::ipv6().register_response(0x03, &testing::sequential_registers(16));
        let mut packet = parse(&bytes).unwrap();
        overwrite_register(&mut packet, 3, 0);
        repair(&mut packet).unwrap();

        assert!(verify(&packet.serialize().unwrap()).unwrap().is_valid());
    }

    #[test]
    fn test_repair_unchanged_packet_keeps_checksums() {
        let bytes = testing::read_holding_response(&[4, 5, 6]);
        let mut packet = parse(&bytes).unwrap();
        repair(&mut packet).unwrap();
        assert_eq!(packet.serialize().unwrap(), bytes);
    }

    #[test]
    fn test_verify_rejects_non_tcp() {
        assert!(verify(&[]).is_none());
        assert!(verify(&[0x45, 0x00]).is_none());
    }
}
