//! Per-function-code shape rules: request/response payload sizes, quantity
//! bounds, and the RTU length-inference helpers.

use crate::pdu::FunctionCode;

/// Maximum quantity accepted by a given function code's read/write request.
pub fn max_quantity(fc: FunctionCode) -> u16 {
    match fc {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => 2000,
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => 125,
        FunctionCode::WriteMultipleCoils => 1968,
        FunctionCode::WriteMultipleRegisters => 123,
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => 1,
    }
}

/// Expected byte count for a read reply, given the requested quantity.
pub fn read_reply_byte_count(fc: FunctionCode, quantity: u16) -> usize {
    match fc {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            (quantity as usize).div_ceil(8)
        }
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            quantity as usize * 2
        }
        _ => 0,
    }
}

/// Whether `addr + qty - 1` overflows the 16-bit address space.
pub fn address_range_overflows(addr: u16, quantity: u16) -> bool {
    (addr as u32) + (quantity as u32).saturating_sub(1) > 0xFFFF
}

/// Does this function code's request carry a trailing `byte_count` + data
/// section whose length can't be known until four payload bytes are in?
pub fn is_write_multiple(fc: FunctionCode) -> bool {
    matches!(
        fc,
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters
    )
}

/// Total **request** payload length (bytes after `unit_id`+`function_code`,
/// before the CRC) for function codes whose request shape is fixed size —
/// every supported code except the write-multiple pair, whose length
/// depends on a `byte_count` field read mid-frame.
pub fn fixed_request_payload_len(fc: FunctionCode) -> Option<usize> {
    if is_write_multiple(fc) {
        None
    } else {
        // addr(2) + qty(2) for reads, addr(2) + value(2) for single writes.
        Some(4)
    }
}

/// Length, in bytes, of an RTU **response** frame's payload beyond the
/// 3-byte header already read (`unit_id`, `function_code`, first data byte),
/// not counting the trailing CRC. `header_byte` is that third byte.
///
/// Kept for structural symmetry with the request-side length table; no
/// client (master) role is implemented here, so this is exercised only by
/// its own unit test. The server's own responses are written directly by
/// `write_response` without needing this inference.
pub fn expected_response_length(function_code: u8, header_byte: u8) -> Option<usize> {
    if function_code & 0x80 != 0 {
        return Some(0);
    }
    match FunctionCode::from_byte(function_code) {
        Some(fc) if fc.is_read() => Some(header_byte as usize),
        Some(
            FunctionCode::WriteSingleCoil
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleCoils
            | FunctionCode::WriteMultipleRegisters,
        ) => Some(3),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_holding_registers_byte_count_is_two_per_register() {
        assert_eq!(
            read_reply_byte_count(FunctionCode::ReadHoldingRegisters, 10),
            20
        );
    }

    #[test]
    fn read_coils_byte_count_rounds_up() {
        assert_eq!(read_reply_byte_count(FunctionCode::ReadCoils, 9), 2);
        assert_eq!(read_reply_byte_count(FunctionCode::ReadCoils, 8), 1);
    }

    #[test]
    fn address_overflow_detected_at_boundary() {
        assert!(!address_range_overflows(0xFFF0, 16));
        assert!(address_range_overflows(0xFFF0, 17));
    }

    #[test]
    fn fixed_request_payload_len_excludes_write_multiple() {
        assert_eq!(
            fixed_request_payload_len(FunctionCode::ReadHoldingRegisters),
            Some(4)
        );
        assert_eq!(
            fixed_request_payload_len(FunctionCode::WriteMultipleRegisters),
            None
        );
    }

    #[test]
    fn unknown_function_code_has_no_expected_response_length() {
        assert_eq!(expected_response_length(0x07, 0), None);
    }
}
