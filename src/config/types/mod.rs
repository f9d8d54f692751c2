mod data_bits;
mod parity;
mod stop_bits;

pub use data_bits::*;
pub use parity::*;
pub use stop_bits::*;
