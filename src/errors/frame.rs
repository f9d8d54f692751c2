use thiserror::Error;

/// Framing-level failures: the bytes on the wire did not assemble into a
/// well-formed ADU. Distinct from [`ProtocolErrorKind`](super::ProtocolErrorKind),
/// which covers PDUs that framed correctly but fail Modbus semantics.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame too short: {details}")]
    TooShort { details: String },

    #[error("frame too long: {details}")]
    TooLong { details: String },

    #[error("CRC mismatch: calculated={calculated:04X}, received={received:04X}")]
    BadCrc { calculated: u16, received: u16 },

    #[error("malformed MBAP header: {details}")]
    InvalidMbapHeader { details: String },

    #[error("unrecognized function code 0x{function_code:02X}, cannot infer frame length")]
    UnknownFunction { function_code: u8 },
}
