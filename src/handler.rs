//! The business-logic seam: a user-supplied implementation backs the actual
//! register/coil storage. Everything in this module is transport-agnostic.

use std::sync::Mutex;

use crate::errors::ProtocolErrorKind;

/// Result type returned by every [`RequestHandler`] operation. A mapped
/// error becomes the exception code of the outgoing response.
pub type HandlerResult<T> = Result<T, ProtocolErrorKind>;

/// Implemented by the embedder to supply the actual data store behind
/// coils, discrete inputs, holding registers, and input registers.
///
/// Invoked synchronously from the worker task that owns the request; if the
/// server is configured for TCP with more than one client, implementations
/// must be `Send + Sync` and safe to call concurrently from multiple
/// workers.
pub trait RequestHandler: Send + Sync {
    /// Reads or writes `quantity` coils starting at `addr`. On a read,
    /// `values` is ignored and the return value must have exactly
    /// `quantity` entries. On a write, `values` holds the data to store and
    /// the return value is ignored by the caller (an empty vec is fine).
    fn coils(
        &self,
        unit_id: u8,
        addr: u16,
        quantity: u16,
        is_write: bool,
        values: &[bool],
    ) -> HandlerResult<Vec<bool>>;

    /// Reads `quantity` discrete inputs starting at `addr`. Read-only.
    fn discrete_inputs(&self, unit_id: u8, addr: u16, quantity: u16) -> HandlerResult<Vec<bool>>;

    /// Reads or writes `quantity` holding registers starting at `addr`.
    fn holding_registers(
        &self,
        unit_id: u8,
        addr: u16,
        quantity: u16,
        is_write: bool,
        values: &[u16],
    ) -> HandlerResult<Vec<u16>>;

    /// Reads `quantity` input registers starting at `addr`. Read-only.
    fn input_registers(&self, unit_id: u8, addr: u16, quantity: u16) -> HandlerResult<Vec<u16>>;
}

/// A flat in-memory register/coil bank, sized uniformly across all four
/// tables. Used by the `modbus-server` binary as its out-of-the-box
/// handler; embedders with a real data source implement [`RequestHandler`]
/// directly instead.
pub struct InMemoryDataStore {
    coils: Mutex<Vec<bool>>,
    discrete_inputs: Mutex<Vec<bool>>,
    holding_registers: Mutex<Vec<u16>>,
    input_registers: Mutex<Vec<u16>>,
}

impl InMemoryDataStore {
    pub fn new(size: usize) -> Self {
        Self {
            coils: Mutex::new(vec![false; size]),
            discrete_inputs: Mutex::new(vec![false; size]),
            holding_registers: Mutex::new(vec![0; size]),
            input_registers: Mutex::new(vec![0; size]),
        }
    }
}

impl RequestHandler for InMemoryDataStore {
    fn coils(
        &self,
        _unit_id: u8,
        addr: u16,
        quantity: u16,
        is_write: bool,
        values: &[bool],
    ) -> HandlerResult<Vec<bool>> {
        let mut coils = self.coils.lock().unwrap();
        let start = addr as usize;
        let end = start + quantity as usize;
        if end > coils.len() {
            return Err(ProtocolErrorKind::IllegalDataAddress);
        }
        if is_write {
            coils[start..end].copy_from_slice(values);
            Ok(Vec::new())
        } else {
            Ok(coils[start..end].to_vec())
        }
    }

    fn discrete_inputs(&self, _unit_id: u8, addr: u16, quantity: u16) -> HandlerResult<Vec<bool>> {
        let inputs = self.discrete_inputs.lock().unwrap();
        let start = addr as usize;
        let end = start + quantity as usize;
        if end > inputs.len() {
            return Err(ProtocolErrorKind::IllegalDataAddress);
        }
        Ok(inputs[start..end].to_vec())
    }

    fn holding_registers(
        &self,
        _unit_id: u8,
        addr: u16,
        quantity: u16,
        is_write: bool,
        values: &[u16],
    ) -> HandlerResult<Vec<u16>> {
        let mut registers = self.holding_registers.lock().unwrap();
        let start = addr as usize;
        let end = start + quantity as usize;
        if end > registers.len() {
            return Err(ProtocolErrorKind::IllegalDataAddress);
        }
        if is_write {
            registers[start..end].copy_from_slice(values);
            Ok(Vec::new())
        } else {
            Ok(registers[start..end].to_vec())
        }
    }

    fn input_registers(&self, _unit_id: u8, addr: u16, quantity: u16) -> HandlerResult<Vec<u16>> {
        let registers = self.input_registers.lock().unwrap();
        let start = addr as usize;
        let end = start + quantity as usize;
        if end > registers.len() {
            return Err(ProtocolErrorKind::IllegalDataAddress);
        }
        Ok(registers[start..end].to_vec())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    pub use super::InMemoryDataStore as MemoryHandler;
    use super::*;

    #[test]
    fn memory_handler_round_trips_holding_registers() {
        let handler = InMemoryDataStore::new(16);
        handler
            .holding_registers(1, 0, 3, true, &[10, 20, 30])
            .unwrap();
        let read = handler.holding_registers(1, 0, 3, false, &[]).unwrap();
        assert_eq!(read, vec![10, 20, 30]);
    }

    #[test]
    fn memory_handler_rejects_out_of_range_address() {
        let handler = InMemoryDataStore::new(4);
        assert_eq!(
            handler.input_registers(1, 2, 10).unwrap_err(),
            ProtocolErrorKind::IllegalDataAddress
        );
    }
}
