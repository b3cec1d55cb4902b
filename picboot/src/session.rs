//! Bootloader session.
//!
//! A [`Session`] drives one device through the fixed upload sequence:
//!
//! ```text
//! NotStarted -> VersionRead -> Erased -> Written -> Verified -> Reset
//! ```
//!
//! Every step requires the previous one to have succeeded. Any failure is
//! final for the session: nothing is rolled back and no step is retried
//! beyond the per-exchange retry budget of the executor.
//!
//! ## Example
//!
//! ```rust,no_run
//! use picboot::{NativePort, Session, image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let flash_size = 0x4000;
//!     let image = image::prepare("App.hex", flash_size)?;
//!
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 9600)?;
//!     let mut session = Session::new(port, flash_size);
//!     session.run(&image, |done, total| println!("row {done}/{total}"))?;
//!
//!     Ok(())
//! }
//! ```

use std::borrow::Cow;
use std::fmt;

use log::{debug, info, trace};

use crate::error::{Error, Result};
use crate::image::{ERASED_BYTE, FirmwareImage};
use crate::port::Port;
use crate::protocol::executor::{LONG_TIMEOUT, SHORT_TIMEOUT, execute};
use crate::protocol::packet::{CommandPacket, Response, STATUS_OFFSET, STATUS_OK};
use crate::protocol::checksum;

/// Progress of a session through the upload sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet.
    NotStarted,
    /// Version queried, row sizes known.
    VersionRead,
    /// Application range erased.
    Erased,
    /// All non-blank rows programmed.
    Written,
    /// Device checksum matched.
    Verified,
    /// Device reset into the application.
    Reset,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::VersionRead => "version read",
            Self::Erased => "erased",
            Self::Written => "written",
            Self::Verified => "verified",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Row geometry reported by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceParameters {
    /// Erase granularity in 16-bit words.
    pub erase_row_size_words: u8,
    /// Write latch count in 16-bit words.
    pub write_row_size_words: u8,
}

impl DeviceParameters {
    /// Erase row size in bytes.
    pub fn erase_row_bytes(&self) -> u32 {
        u32::from(self.erase_row_size_words) * 2
    }

    /// Write row size in bytes.
    pub fn write_row_bytes(&self) -> u32 {
        u32::from(self.write_row_size_words) * 2
    }
}

/// Decoded version response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    /// Bootloader version, major in the high byte.
    pub bootloader_version: u16,
    /// Largest packet the bootloader accepts.
    pub max_packet_size: u16,
    /// Device ID read from configuration space.
    pub device_id: u16,
    /// Row sizes.
    pub parameters: DeviceParameters,
}

// Offsets into the raw version response (payload starts at STATUS_OFFSET).
const VERSION_OFFSET: usize = STATUS_OFFSET;
const MAX_PACKET_OFFSET: usize = STATUS_OFFSET + 2;
const DEVICE_ID_OFFSET: usize = STATUS_OFFSET + 6;
const ERASE_ROW_OFFSET: usize = STATUS_OFFSET + 10;
const WRITE_ROW_OFFSET: usize = STATUS_OFFSET + 11;

impl FirmwareInfo {
    /// Decode a version response.
    pub fn parse(response: &Response) -> Result<Self> {
        let parameters = DeviceParameters {
            erase_row_size_words: response.byte_at(ERASE_ROW_OFFSET)?,
            write_row_size_words: response.byte_at(WRITE_ROW_OFFSET)?,
        };
        if parameters.erase_row_size_words == 0 || parameters.write_row_size_words == 0 {
            return Err(Error::InvalidDeviceParameters(format!(
                "erase row {} words, write row {} words",
                parameters.erase_row_size_words, parameters.write_row_size_words
            )));
        }

        Ok(Self {
            bootloader_version: response.u16_at(VERSION_OFFSET)?,
            max_packet_size: response.u16_at(MAX_PACKET_OFFSET)?,
            device_id: response.u16_at(DEVICE_ID_OFFSET)?,
            parameters,
        })
    }

    /// Major version number.
    pub fn version_major(&self) -> u8 {
        self.bootloader_version.to_be_bytes()[0]
    }

    /// Minor version number.
    pub fn version_minor(&self) -> u8 {
        self.bootloader_version.to_be_bytes()[1]
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bootloader v{}.{}, device ID 0x{:04X}, max packet {} bytes, erase row {} words, write row {} words",
            self.version_major(),
            self.version_minor(),
            self.device_id,
            self.max_packet_size,
            self.parameters.erase_row_size_words,
            self.parameters.write_row_size_words
        )
    }
}

/// Outcome of the write step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Rows sent to the device.
    pub rows_written: usize,
    /// Blank rows skipped.
    pub rows_skipped: usize,
}

/// Outcome of a full [`Session::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// Version response.
    pub info: FirmwareInfo,
    /// Rows covered by the erase command.
    pub erased_rows: u16,
    /// Write step result.
    pub write: WriteSummary,
    /// Checksum confirmed by the device.
    pub checksum: u16,
}

/// One upload session against a single device.
///
/// Generic over the port type `P`; the session owns the port for its whole
/// lifetime.
pub struct Session<P: Port> {
    port: P,
    flash_size: u32,
    state: SessionState,
    info: Option<FirmwareInfo>,
}

impl<P: Port> Session<P> {
    /// Create a session for a device whose flash ends at `flash_size`.
    pub fn new(port: P, flash_size: u32) -> Self {
        Self {
            port,
            flash_size,
            state: SessionState::NotStarted,
            info: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Declared flash size in bytes.
    pub fn flash_size(&self) -> u32 {
        self.flash_size
    }

    /// Version information, once read.
    pub fn info(&self) -> Option<&FirmwareInfo> {
        self.info.as_ref()
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::SequenceViolation {
                expected,
                actual: self.state,
            })
        }
    }

    fn parameters(&self) -> Result<DeviceParameters> {
        self.info
            .map(|info| info.parameters)
            .ok_or_else(|| Error::InvalidDeviceParameters("version not read".into()))
    }

    fn check_bounds(&self, image: &FirmwareImage) -> Result<()> {
        if image.start_address() >= self.flash_size
            || image.end_address() > self.flash_size
        {
            return Err(Error::ImageTruncation {
                start: image.start_address(),
                flash_size: self.flash_size,
            });
        }
        Ok(())
    }

    /// Query the bootloader version and row sizes.
    pub fn read_version(&mut self) -> Result<FirmwareInfo> {
        self.expect_state(SessionState::NotStarted)?;
        info!("Reading bootloader version...");

        let response = execute(&mut self.port, &CommandPacket::read_version(), SHORT_TIMEOUT)?;
        let info = FirmwareInfo::parse(&response)?;

        info!("Device: {info}");
        self.info = Some(info);
        self.state = SessionState::VersionRead;
        Ok(info)
    }

    /// Erase from the image start to the end of flash.
    ///
    /// Returns the number of erase rows; a trailing partial row is not
    /// counted.
    pub fn erase(&mut self, image: &FirmwareImage) -> Result<u16> {
        self.expect_state(SessionState::VersionRead)?;
        self.check_bounds(image)?;
        let params = self.parameters()?;

        let span = self.flash_size - image.start_address();
        let count = span / params.erase_row_bytes();
        let rows = u16::try_from(count).map_err(|_| Error::ImageTooLarge {
            what: "erase row count",
            value: count as usize,
        })?;

        info!(
            "Erasing {rows} rows of {} bytes from 0x{:08X}...",
            params.erase_row_bytes(),
            image.start_address()
        );
        execute(
            &mut self.port,
            &CommandPacket::erase(image.start_address(), rows),
            LONG_TIMEOUT,
        )?;

        info!("Erase flash memory successful");
        self.state = SessionState::Erased;
        Ok(rows)
    }

    /// Program the image row by row, highest address first.
    ///
    /// Rows that are entirely erased bytes are skipped. A trailing partial
    /// row is padded with erased bytes. `progress` receives
    /// `(rows_done, rows_total)` after every row, skipped or not.
    pub fn write<F>(&mut self, image: &FirmwareImage, mut progress: F) -> Result<WriteSummary>
    where
        F: FnMut(usize, usize),
    {
        self.expect_state(SessionState::Erased)?;
        self.check_bounds(image)?;
        let row_len = self.parameters()?.write_row_bytes() as usize;

        let data = image.data();
        let total = data.len().div_ceil(row_len);
        let mut summary = WriteSummary::default();

        info!(
            "Writing {} bytes in {total} rows of {row_len} bytes...",
            data.len()
        );

        for (done, index) in (0..total).rev().enumerate() {
            let offset = index * row_len;
            let address = image.start_address() + offset as u32;
            let slice = &data[offset..(offset + row_len).min(data.len())];

            if slice.iter().all(|b| *b == ERASED_BYTE) {
                trace!("Skipping blank row at 0x{address:08X}");
                summary.rows_skipped += 1;
            } else {
                let row: Cow<'_, [u8]> = if slice.len() == row_len {
                    Cow::Borrowed(slice)
                } else {
                    let mut padded = slice.to_vec();
                    padded.resize(row_len, ERASED_BYTE);
                    Cow::Owned(padded)
                };

                debug!(
                    "Programming range 0x{address:08X} - 0x{:08X}",
                    address + row_len as u32 - 1
                );
                execute(
                    &mut self.port,
                    &CommandPacket::write(address, &row)?,
                    LONG_TIMEOUT,
                )?;
                summary.rows_written += 1;
            }

            progress(done + 1, total);
        }

        info!(
            "Writing flash memory successful: {} rows written, {} blank rows skipped (0x{:08X} - 0x{:08X})",
            summary.rows_written,
            summary.rows_skipped,
            image.start_address(),
            image.end_address().saturating_sub(1)
        );
        self.state = SessionState::Written;
        Ok(summary)
    }

    /// Compare the device checksum of the image range with the local one.
    pub fn verify(&mut self, image: &FirmwareImage) -> Result<u16> {
        self.expect_state(SessionState::Written)?;
        let length = image.checksum_length()?;
        let expected = checksum(image.data());

        info!("Calculating checksum over {length} bytes...");
        let response = execute(
            &mut self.port,
            &CommandPacket::checksum(image.start_address(), length),
            LONG_TIMEOUT,
        )?;
        let actual = response.u16_at(STATUS_OFFSET)?;

        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        info!("Checksum 0x{expected:04X} verified");
        self.state = SessionState::Verified;
        Ok(expected)
    }

    /// Leave the bootloader and start the application.
    pub fn reset(&mut self) -> Result<()> {
        self.expect_state(SessionState::Verified)?;
        info!("Resetting device...");

        let response = execute(&mut self.port, &CommandPacket::reset(), SHORT_TIMEOUT)?;
        if response.status() != STATUS_OK {
            return Err(Error::ResetRejected {
                status: response.status(),
            });
        }

        info!("Reset device successful");
        self.state = SessionState::Reset;
        Ok(())
    }

    /// Run the whole sequence, stopping at the first failure.
    ///
    /// The image is checked against the flash size and the 16-bit length
    /// field before anything is sent.
    pub fn run<F>(&mut self, image: &FirmwareImage, progress: F) -> Result<UploadReport>
    where
        F: FnMut(usize, usize),
    {
        self.check_bounds(image)?;
        image.checksum_length()?;

        let info = self.read_version()?;
        let erased_rows = self.erase(image)?;
        let write = self.write(image, progress)?;
        let checksum = self.verify(image)?;
        self.reset()?;

        Ok(UploadReport {
            info,
            erased_rows,
            write,
            checksum,
        })
    }
}
