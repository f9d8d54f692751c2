use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::types::{DataBits, Parity, StopBits};

/// Serial-link parameters for the RTU transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RtuConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,

    pub stop_bits: StopBits,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Unit IDs this server answers to. Must not be empty.
    pub accepted_unit_ids: Vec<u8>,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            // Two stop bits is the conventional choice when parity is
            // disabled, to keep the character frame length constant.
            stop_bits: StopBits::Two,
            timeout: Duration::from_secs(30),
            accepted_unit_ids: vec![1],
        }
    }
}

impl RtuConfig {
    pub fn serial_port_info(&self, device: &str) -> String {
        format!(
            "{} ({} baud, {} data bits, {} parity, {} stop bits)",
            device, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}
