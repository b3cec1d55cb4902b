//! Bootloader wire protocol.

pub mod checksum;
pub mod executor;
pub mod packet;

// Re-export common types
pub use checksum::checksum;
pub use executor::execute;
pub use packet::{CommandPacket, HexDump, Opcode, Response};
