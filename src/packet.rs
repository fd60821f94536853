//! Layered view of a queued IP packet
//!
//! NFQUEUE hands us raw IP packets (no link layer). `parse` decodes the IP
//! and TCP headers with etherparse and the TCP payload as a Modbus ADU.
//! `serialize` writes the view back over a copy of the original bytes, so a
//! packet that was not mutated comes out byte-for-byte identical.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use etherparse::{IpNumber, Ipv4Header, Ipv6Header, TcpHeader};

use crate::error::{InterceptError, ModbusError, ParseFailure, ParseResult, Result};
use crate::modbus::{Adu, Direction, DEFAULT_PORT};

/// Minimum IPv4 header + minimum TCP header
pub const MIN_PACKET_LEN: usize = 40;

const IPV4_CHECKSUM_OFFSET: usize = 10;
const TCP_CHECKSUM_OFFSET: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkHeader {
    V4(Ipv4Header),
    V6(Ipv6Header),
}

impl NetworkHeader {
    pub fn source(&self) -> IpAddr {
        match self {
            NetworkHeader::V4(ip) => IpAddr::from(ip.source),
            NetworkHeader::V6(ip) => IpAddr::from(ip.source),
        }
    }

    pub fn destination(&self) -> IpAddr {
        match self {
            NetworkHeader::V4(ip) => IpAddr::from(ip.destination),
            NetworkHeader::V6(ip) => IpAddr::from(ip.destination),
        }
    }

    fn protocol(&self) -> IpNumber {
        match self {
            NetworkHeader::V4(ip) => ip.protocol,
            NetworkHeader::V6(ip) => ip.next_header,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedPacket {
    raw: Vec<u8>,
    pub network: NetworkHeader,
    pub tcp: TcpHeader,
    tcp_offset: usize,
    payload_offset: usize,
    payload_len: usize,
    pub direction: Direction,
    /// `None` for segments without payload (handshakes, pure ACKs)
    pub adu: Option<Adu>,
}

/// Equality of the decoded layers; the backing buffer is not compared.
impl PartialEq for ParsedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.network == other.network
            && self.tcp == other.tcp
            && self.tcp_offset == other.tcp_offset
            && self.payload_offset == other.payload_offset
            && self.payload_len == other.payload_len
            && self.direction == other.direction
            && self.adu == other.adu
    }
}

/// Parse a raw IP packet, treating TCP source port 502 as the server side.
pub fn parse(bytes: &[u8]) -> ParseResult<ParsedPacket> {
    parse_with_port(bytes, DEFAULT_PORT)
}

/// Parse a raw IP packet; segments from `modbus_port` are responses.
pub fn parse_with_port(bytes: &[u8], modbus_port: u16) -> ParseResult<ParsedPacket> {
    if bytes.len() < MIN_PACKET_LEN {
        return Err(ParseFailure::Truncated { needed: MIN_PACKET_LEN, got: bytes.len() });
    }

    let (network, header_len, ip_end) = match bytes[0] >> 4 {
        4 => {
            let (ip, rest) = Ipv4Header::from_slice(bytes).map_err(|e| ParseFailure::IpHeader(e.to_string()))?;
            if ip.is_fragmenting_payload() {
                return Err(ParseFailure::Fragmented);
            }
            let header_len = bytes.len() - rest.len();
            let total = usize::from(ip.total_len);
            (NetworkHeader::V4(ip), header_len, total)
        }
        6 => {
            let (ip, _) = Ipv6Header::from_slice(bytes).map_err(|e| ParseFailure::IpHeader(e.to_string()))?;
            let total = Ipv6Header::LEN + usize::from(ip.payload_length);
            (NetworkHeader::V6(ip), Ipv6Header::LEN, total)
        }
        version => return Err(ParseFailure::UnsupportedIpVersion(version)),
    };

    // Anything past the IP total length is link padding and stays untouched.
    if ip_end > bytes.len() || ip_end < header_len {
        return Err(ParseFailure::Truncated { needed: ip_end, got: bytes.len() });
    }

    let protocol = network.protocol();
    if protocol != IpNumber::TCP {
        return Err(ParseFailure::NotTcp(protocol.0));
    }

    let (tcp, payload) = TcpHeader::from_slice(&bytes[header_len..ip_end])
        .map_err(|e| ParseFailure::TcpHeader(e.to_string()))?;

    let direction = if tcp.source_port == modbus_port { Direction::Response } else { Direction::Request };
    let adu = if payload.is_empty() { None } else { Some(Adu::parse(payload, direction)?) };

    Ok(ParsedPacket {
        raw: bytes.to_vec(),
        network,
        tcp,
        tcp_offset: header_len,
        payload_offset: ip_end - payload.len(),
        payload_len: payload.len(),
        direction,
        adu,
    })
}

impl ParsedPacket {
    /// The bytes this packet was parsed from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn source(&self) -> SocketAddr {
        SocketAddr::new(self.network.source(), self.tcp.source_port)
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.network.destination(), self.tcp.destination_port)
    }

    /// Current TCP payload, re-encoded from the ADU if there is one.
    pub fn payload(&self) -> std::result::Result<Vec<u8>, ModbusError> {
        match &self.adu {
            Some(adu) => adu.encode(),
            None => Ok(self.raw[self.payload_offset..self.payload_offset + self.payload_len].to_vec()),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = self.raw.clone();

        if let Some(adu) = &self.adu {
            let encoded = adu.encode()?;
            if encoded.len() != self.payload_len {
                return Err(InterceptError::LengthChanged { expected: self.payload_len, got: encoded.len() });
            }
            out[self.payload_offset..self.payload_offset + self.payload_len].copy_from_slice(&encoded);
        }

        if let NetworkHeader::V4(ip) = &self.network {
            out[IPV4_CHECKSUM_OFFSET..IPV4_CHECKSUM_OFFSET + 2].copy_from_slice(&ip.header_checksum.to_be_bytes());
        }
        let at = self.tcp_offset + TCP_CHECKSUM_OFFSET;
        out[at..at + 2].copy_from_slice(&self.tcp.checksum.to_be_bytes());

        Ok(out)
    }

    /// One-line description for diagnostics.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ParsedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.network {
            NetworkHeader::V4(_) => "IP",
            NetworkHeader::V6(_) => "IPv6",
        };
        write!(f, "{} / TCP {} > {}", family, self.source(), self.destination())?;
        match &self.adu {
            Some(adu) => write!(f, " / Modbus tid={} unit={} {}", adu.header.transaction_id, adu.header.unit_id, adu.pdu),
            None => write!(f, " / no payload"),
        }
    }
}
