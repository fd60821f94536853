//! Modbus/TCP application data unit codec
//!
//! Understands the MBAP header and enough of the PDU to expose register
//! values of register-read responses. Everything else is carried as opaque
//! bytes so that re-encoding is exact.
pub mod types;
pub use types::*;

use std::fmt;

use crate::error::ModbusError;

/// Which side of the conversation a segment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Bytes following the length field (unit id + PDU)
    pub length: u16,
    pub unit_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduBody {
    /// Byte count + big-endian register values (responses to 0x03, 0x04, 0x17)
    Registers(Vec<u16>),
    /// Start address + quantity (requests for 0x01..=0x04)
    ReadRequest { address: u16, quantity: u16 },
    Exception(ExceptionCode),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub function_code: u8,
    pub body: PduBody,
}

impl Pdu {
    /// Decode a PDU starting at the function code byte.
    pub fn decode(data: &[u8], direction: Direction) -> Result<Self, ModbusError> {
        let (&function_code, body) = data.split_first().ok_or(ModbusError::TooShort(0))?;

        if function_code & EXCEPTION_FLAG != 0 {
            if !is_known_function(function_code & !EXCEPTION_FLAG) {
                return Err(ModbusError::UnknownFunction(function_code));
            }
            return match body {
                [code] => Ok(Self { function_code, body: PduBody::Exception(ExceptionCode::from(*code)) }),
                _ => Err(ModbusError::MalformedBody { function: function_code, len: body.len() }),
            };
        }

        if !is_known_function(function_code) {
            return Err(ModbusError::UnknownFunction(function_code));
        }

        let body = match direction {
            Direction::Response if REGISTER_RESPONSE_FUNCTIONS.contains(&function_code) => {
                let (&byte_count, values) = body
                    .split_first()
                    .ok_or(ModbusError::MalformedBody { function: function_code, len: 0 })?;
                if usize::from(byte_count) != values.len() || byte_count % 2 != 0 {
                    return Err(ModbusError::ByteCountMismatch { declared: byte_count, actual: values.len() });
                }
                PduBody::Registers(
                    values
                        .chunks_exact(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect(),
                )
            }
            Direction::Request if READ_REQUEST_FUNCTIONS.contains(&function_code) => match body {
                [a0, a1, q0, q1] => PduBody::ReadRequest {
                    address: u16::from_be_bytes([*a0, *a1]),
                    quantity: u16::from_be_bytes([*q0, *q1]),
                },
                _ => return Err(ModbusError::MalformedBody { function: function_code, len: body.len() }),
            },
            _ => PduBody::Raw(body.to_vec()),
        };

        Ok(Self { function_code, body })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ModbusError> {
        out.push(self.function_code);
        match &self.body {
            PduBody::Registers(registers) => {
                let byte_count = u8::try_from(registers.len() * 2)
                    .map_err(|_| ModbusError::TooManyRegisters(registers.len()))?;
                out.push(byte_count);
                for value in registers {
                    out.extend_from_slice(&value.to_be_bytes());
                }
            }
            PduBody::ReadRequest { address, quantity } => {
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&quantity.to_be_bytes());
            }
            PduBody::Exception(code) => out.push(u8::from(*code)),
            PduBody::Raw(bytes) => out.extend_from_slice(bytes),
        }
        Ok(())
    }

    pub fn registers(&self) -> Option<&[u16]> {
        match &self.body {
            PduBody::Registers(registers) => Some(registers),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }
}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.function_code & !EXCEPTION_FLAG;
        write!(f, "fc=0x{:02x} ({})", self.function_code, function_name(base).unwrap_or("unknown"))?;
        match &self.body {
            PduBody::Registers(registers) => write!(f, " regs={}", registers.len()),
            PduBody::ReadRequest { address, quantity } => write!(f, " addr={} qty={}", address, quantity),
            PduBody::Exception(code) => write!(f, " exception: {}", code),
            PduBody::Raw(bytes) => write!(f, " {} bytes", bytes.len()),
        }
    }
}

/// A complete Modbus/TCP frame: MBAP header plus PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    pub header: MbapHeader,
    pub pdu: Pdu,
}

impl Adu {
    /// Parse a TCP payload holding exactly one ADU.
    pub fn parse(payload: &[u8], direction: Direction) -> Result<Self, ModbusError> {
        if payload.len() < MIN_ADU_LEN {
            return Err(ModbusError::TooShort(payload.len()));
        }

        let transaction_id = u16::from_be_bytes([payload[0], payload[1]]);
        let protocol_id = u16::from_be_bytes([payload[2], payload[3]]);
        let length = u16::from_be_bytes([payload[4], payload[5]]);
        let unit_id = payload[6];

        if protocol_id != 0 {
            return Err(ModbusError::ProtocolId(protocol_id));
        }
        // Length counts the unit id plus the PDU; no stream reassembly, so it
        // must cover the rest of this segment exactly.
        if usize::from(length) != payload.len() - 6 {
            return Err(ModbusError::LengthMismatch { declared: length, actual: payload.len() - 6 });
        }

        let pdu = Pdu::decode(&payload[MBAP_LEN..], direction)?;
        Ok(Self { header: MbapHeader { transaction_id, protocol_id, length, unit_id }, pdu })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ModbusError> {
        let mut pdu = Vec::with_capacity(usize::from(self.header.length));
        self.pdu.encode_into(&mut pdu)?;
        let length = u16::try_from(pdu.len() + 1).map_err(|_| ModbusError::TooManyRegisters(pdu.len()))?;

        let mut out = Vec::with_capacity(MBAP_LEN + pdu.len());
        out.extend_from_slice(&self.header.transaction_id.to_be_bytes());
        out.extend_from_slice(&self.header.protocol_id.to_be_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.header.unit_id);
        out.extend_from_slice(&pdu);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_response(registers: &[u16]) -> Vec<u8> {
        let mut adu = vec![0x00, 0x01, 0x00, 0x00];
        adu.extend_from_slice(&(3 + registers.len() as u16 * 2).to_be_bytes());
        adu.extend_from_slice(&[0x01, 0x03, registers.len() as u8 * 2]);
        for r in registers {
            adu.extend_from_slice(&r.to_be_bytes());
        }
        adu
    }

    #[test]
    fn test_parse_read_holding_response() {
        let bytes = read_response(&[1, 2, 0xBEEF]);
        let adu = Adu::parse(&bytes, Direction::Response).unwrap();

        assert_eq!(adu.header.transaction_id, 1);
        assert_eq!(adu.header.unit_id, 1);
        assert_eq!(adu.pdu.function_code, READ_HOLDING_REGISTERS);
        assert_eq!(adu.pdu.registers(), Some(&[1u16, 2, 0xBEEF][..]));
        assert_eq!(adu.encode().unwrap(), bytes);
    }

    #[test]
    fn test_read_request_is_not_registers() {
        // Same function code, request layout: address 0x006B, quantity 3
        let bytes = [0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        let adu = Adu::parse(&bytes, Direction::Request).unwrap();
        assert_eq!(adu.pdu.body, PduBody::ReadRequest { address: 0x6B, quantity: 3 });
        assert!(adu.pdu.registers().is_none());
        assert_eq!(adu.encode().unwrap(), bytes);
    }

    #[test]
    fn test_exception_response() {
        let bytes = [0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        let adu = Adu::parse(&bytes, Direction::Response).unwrap();
        assert!(adu.pdu.is_exception());
        assert_eq!(adu.pdu.body, PduBody::Exception(ExceptionCode::IllegalDataAddress));
        assert_eq!(adu.encode().unwrap(), bytes);
    }

    #[test]
    fn test_write_single_register_kept_raw() {
        let bytes = [0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x03];
        let adu = Adu::parse(&bytes, Direction::Response).unwrap();
        assert_eq!(adu.pdu.body, PduBody::Raw(vec![0x00, 0x01, 0x00, 0x03]));
        assert_eq!(adu.encode().unwrap(), bytes);
    }

    #[test]
    fn test_rejects_bad_frames() {
        assert_eq!(Adu::parse(&[0, 1, 0], Direction::Response), Err(ModbusError::TooShort(3)));

        let mut bad_proto = read_response(&[1]);
        bad_proto[3] = 1;
        assert_eq!(Adu::parse(&bad_proto, Direction::Response), Err(ModbusError::ProtocolId(1)));

        let mut bad_len = read_response(&[1, 2]);
        bad_len[5] += 1;
        assert!(matches!(
            Adu::parse(&bad_len, Direction::Response),
            Err(ModbusError::LengthMismatch { .. })
        ));

        let mut bad_count = read_response(&[1, 2]);
        bad_count[8] = 2;
        assert!(matches!(
            Adu::parse(&bad_count, Direction::Response),
            Err(ModbusError::ByteCountMismatch { declared: 2, actual: 4 })
        ));

        let unknown = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x63];
        assert_eq!(Adu::parse(&unknown, Direction::Response), Err(ModbusError::UnknownFunction(0x63)));
    }

    #[test]
    fn test_display() {
        let adu = Adu::parse(&read_response(&[7; 12]), Direction::Response).unwrap();
        assert_eq!(adu.pdu.to_string(), "fc=0x03 (Read Holding Registers) regs=12");
    }
}
