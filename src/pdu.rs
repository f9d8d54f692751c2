//! Transport-agnostic protocol data unit.

/// Function codes this server understands. Anything else is reported via
/// [`ProtocolErrorKind::IllegalFunction`](crate::errors::ProtocolErrorKind::IllegalFunction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }
}

/// A decoded request or response, independent of RTU/TCP framing.
#[derive(Debug, Clone)]
pub struct Pdu {
    pub unit_id: u8,
    pub function_code: u8,
    pub payload: Vec<u8>,
}

impl Pdu {
    pub fn new(unit_id: u8, function_code: u8, payload: Vec<u8>) -> Self {
        Self {
            unit_id,
            function_code,
            payload,
        }
    }

    pub fn is_exception(&self) -> bool {
        self.function_code & 0x80 != 0
    }

    /// Builds an exception response mirroring this request's function code.
    pub fn exception(&self, exception_code: u8) -> Self {
        Self {
            unit_id: self.unit_id,
            function_code: self.function_code | 0x80,
            payload: vec![exception_code],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_round_trips_through_byte() {
        for fc in [
            FunctionCode::ReadCoils,
            FunctionCode::ReadDiscreteInputs,
            FunctionCode::ReadHoldingRegisters,
            FunctionCode::ReadInputRegisters,
            FunctionCode::WriteSingleCoil,
            FunctionCode::WriteSingleRegister,
            FunctionCode::WriteMultipleCoils,
            FunctionCode::WriteMultipleRegisters,
        ] {
            assert_eq!(FunctionCode::from_byte(fc.to_byte()), Some(fc));
        }
    }

    #[test]
    fn unknown_function_code_is_none() {
        assert_eq!(FunctionCode::from_byte(0x07), None);
        assert_eq!(FunctionCode::from_byte(0x80), None);
    }

    #[test]
    fn exception_sets_high_bit_and_single_byte_payload() {
        let req = Pdu::new(1, 0x03, vec![0, 0, 0, 1]);
        let exc = req.exception(0x02);
        assert_eq!(exc.function_code, 0x83);
        assert_eq!(exc.payload, vec![0x02]);
        assert!(exc.is_exception());
        assert!(!req.is_exception());
    }
}
