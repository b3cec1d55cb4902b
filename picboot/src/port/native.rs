//! [`Port`] over a host serial device.

use {
    crate::{
        error::Result,
        port::{Port, SerialConfig},
    },
    log::debug,
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits},
    std::io::{Read, Write},
};

/// Serial device opened with `serialport`.
pub struct NativePort {
    port: Box<dyn SerialPort>,
}

impl NativePort {
    /// Open the device described by `config` as 8N1.
    ///
    /// Pending input is discarded so that stale bytes are not mistaken for
    /// the first response.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.idle_timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        let mut native = Self { port };
        native.clear_buffers()?;

        debug!(
            "Opened {} at {} baud (idle window {:?})",
            config.port_name, config.baud_rate, config.idle_timeout
        );
        Ok(native)
    }

    /// Open `port_name` at `baud_rate` with the default idle window.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name, baud_rate))
    }
}

impl Port for NativePort {
    fn clear_buffers(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}
