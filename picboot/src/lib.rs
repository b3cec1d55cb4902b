//! # picboot
//!
//! Host-side uploader for the PIC16 serial bootloader.
//!
//! This crate provides the pieces needed to program a PIC16 device running
//! the 8-bit unified bootloader over a serial link:
//!
//! - Intel HEX to flat binary image conversion
//! - Command packet encoding and response decoding
//! - Request/response exchange with retry on silence
//! - The upload session: version, erase, write, verify, reset
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use picboot::{NativePort, Session, image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let flash_size = 0x4000;
//!
//!     // Convert App.hex, persist App.bin and load it back
//!     let image = image::prepare("App.hex", flash_size)?;
//!
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 9600)?;
//!     let mut session = Session::new(port, flash_size);
//!
//!     let report = session.run(&image, &mut |done, total| {
//!         println!("Writing row {}/{}", done, total);
//!     })?;
//!     println!("Checksum 0x{:04X} verified", report.checksum);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Result},
    image::{FirmwareImage, bin_path_for, prepare},
    port::{Port, SerialConfig},
    protocol::{CommandPacket, Opcode, Response, checksum},
    session::{DeviceParameters, FirmwareInfo, Session, SessionState, UploadReport, WriteSummary},
};
