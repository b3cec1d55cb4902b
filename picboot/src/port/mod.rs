//! Serial link to the bootloader.
//!
//! The session and executor only need a blocking byte stream, expressed by
//! the [`Port`] trait. [`NativePort`] backs it with the `serialport` crate;
//! tests use an in-memory port.
//!
//! ## Read contract
//!
//! Responses from the bootloader carry no length prefix. A response is
//! delimited by the link going idle, so every implementation must honour:
//!
//! - `read` blocks for at most the idle window and returns whatever bytes
//!   are available;
//! - an idle link is reported either as `Ok(0)` or as an error of kind
//!   [`std::io::ErrorKind::TimedOut`]; both mean "nothing arrived".
//!
//! ## Example
//!
//! ```rust,no_run
//! use picboot::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> picboot::Result<()> {
//!     port.write_all_bytes(&[0x55, 0x00])?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default idle window that ends a response.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where and how fast to talk to the bootloader.
///
/// Framing is fixed at 8 data bits, no parity, one stop bit and no flow
/// control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout, which doubles as the response idle window.
    pub idle_timeout: Duration,
}

impl SerialConfig {
    /// Create a configuration with the default idle window.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Set the idle window.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Byte-stream link to the bootloader.
///
/// See the module documentation for the read contract every implementation
/// must follow.
pub trait Port: Read + Write + Send {
    /// Discard bytes received but not yet read.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        self.flush()?;
        Ok(())
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativePort;
