//! Modbus protocol constants
use std::fmt;

pub const DEFAULT_PORT: u16 = 502;

/// MBAP header (7) + function code (1)
pub const MIN_ADU_LEN: usize = 8;
pub const MBAP_LEN: usize = 7;
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

pub const MODBUS_FUNCTIONS: &[(u8, &str)] = &[
    (1, "Read Coils"), (2, "Read Discrete Inputs"), (3, "Read Holding Registers"),
    (4, "Read Input Registers"), (5, "Write Single Coil"), (6, "Write Single Register"),
    (7, "Read Exception Status"), (8, "Diagnostics"), (11, "Get Comm Event Counter"),
    (12, "Get Comm Event Log"), (15, "Write Multiple Coils"), (16, "Write Multiple Registers"),
    (17, "Report Server ID"), (20, "Read File Record"), (21, "Write File Record"),
    (22, "Mask Write Register"), (23, "Read/Write Multiple Registers"), (24, "Read FIFO Queue"),
    (43, "Encapsulated Interface Transport"),
];

/// Responses laid out as byte count + big-endian registers
pub const REGISTER_RESPONSE_FUNCTIONS: &[u8] = &[READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS, READ_WRITE_MULTIPLE_REGISTERS];

/// Requests laid out as start address + quantity
pub const READ_REQUEST_FUNCTIONS: &[u8] = &[1, 2, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS];

pub fn function_name(code: u8) -> Option<&'static str> {
    MODBUS_FUNCTIONS.iter().find(|(c, _)| *c == code).map(|(_, n)| *n)
}

pub fn is_known_function(code: u8) -> bool { function_name(code).is_some() }

/// Exception codes carried by a response whose function code has the high bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Other(u8),
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Other(other),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> Self {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailedToRespond => 0x0B,
            ExceptionCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "illegal function"),
            ExceptionCode::IllegalDataAddress => write!(f, "illegal data address"),
            ExceptionCode::IllegalDataValue => write!(f, "illegal data value"),
            ExceptionCode::ServerDeviceFailure => write!(f, "server device failure"),
            ExceptionCode::Acknowledge => write!(f, "acknowledge"),
            ExceptionCode::ServerDeviceBusy => write!(f, "server device busy"),
            ExceptionCode::MemoryParityError => write!(f, "memory parity error"),
            ExceptionCode::GatewayPathUnavailable => write!(f, "gateway path unavailable"),
            ExceptionCode::GatewayTargetFailedToRespond => write!(f, "gateway target device failed to respond"),
            ExceptionCode::Other(code) => write!(f, "code 0x{:02x} undefined", code),
        }
    }
}
