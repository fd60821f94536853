use thiserror::Error;

/// Why a queued packet could not be understood.
///
/// Never fatal: the interceptor accepts the packet unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("packet truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("unsupported IP version {0}")]
    UnsupportedIpVersion(u8),

    #[error("IP header error: {0}")]
    IpHeader(String),

    #[error("fragmented IP packet")]
    Fragmented,

    #[error("transport protocol {0} is not TCP")]
    NotTcp(u8),

    #[error("TCP header error: {0}")]
    TcpHeader(String),

    #[error("modbus error: {0}")]
    Modbus(#[from] ModbusError),
}

/// Modbus ADU decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    #[error("ADU too short: {0} bytes")]
    TooShort(usize),

    #[error("protocol id must be 0, got {0}")]
    ProtocolId(u16),

    #[error("MBAP length {declared} does not match {actual} remaining bytes")]
    LengthMismatch { declared: u16, actual: usize },

    #[error("unrecognized function code 0x{0:02x}")]
    UnknownFunction(u8),

    #[error("byte count {declared} does not match {actual} register bytes")]
    ByteCountMismatch { declared: u8, actual: usize },

    #[error("malformed body for function 0x{function:02x}: {len} bytes")]
    MalformedBody { function: u8, len: usize },

    #[error("too many registers to encode: {0}")]
    TooManyRegisters(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("register index {index} out of bounds for {len} registers")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("function 0x{0:02x} carries no registers")]
    NoRegisters(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    #[error("TCP segment too large for checksum: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Internal failures on the mutation path. Caught at the interceptor
/// boundary and turned into an unmodified accept.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("mutation failed: {0}")]
    Mutation(#[from] MutationError),

    #[error("checksum repair failed: {0}")]
    Checksum(#[from] ChecksumError),

    #[error("modbus encode failed: {0}")]
    Encode(#[from] ModbusError),

    #[error("serialized payload is {got} bytes, original was {expected}")]
    LengthChanged { expected: usize, got: usize },
}

pub type ParseResult<T> = std::result::Result<T, ParseFailure>;
pub type MutationResult<T> = std::result::Result<T, MutationError>;
pub type Result<T> = std::result::Result<T, InterceptError>;
