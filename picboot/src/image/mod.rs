//! Firmware image preparation.
//!
//! The uploader works on a flat binary image: the bytes of program memory
//! from the lowest populated address up to the flash size. HEX inputs are
//! converted, persisted next to the source as `<stem>.bin`, and read back
//! from that file before anything is sent to the device.

pub mod hex;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, Result};

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Extension of the persisted binary artifact.
pub const BIN_EXTENSION: &str = "bin";

/// Flat firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    start_address: u32,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Create an image from its start address and contents.
    pub fn new(start_address: u32, data: Vec<u8>) -> Self {
        Self {
            start_address,
            data,
        }
    }

    /// Load a raw binary placed at `start_address`.
    ///
    /// Contents past `flash_size` are cut off with a warning.
    pub fn from_bin_file<P: AsRef<Path>>(
        path: P,
        start_address: u32,
        flash_size: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading BIN from: {}", path.display());

        if start_address >= flash_size {
            return Err(Error::ImageTruncation {
                start: start_address,
                flash_size,
            });
        }

        let mut data = fs::read(path)?;
        let room = (flash_size - start_address) as usize;
        if data.len() > room {
            warn!(
                "{} is {} bytes, only {room} fit below flash size 0x{flash_size:X}",
                path.display(),
                data.len()
            );
            data.truncate(room);
        }

        Ok(Self::new(start_address, data))
    }

    /// Lowest address the image occupies.
    pub fn start_address(&self) -> u32 {
        self.start_address
    }

    /// One past the highest address the image occupies.
    pub fn end_address(&self) -> u32 {
        self.start_address + self.data.len() as u32
    }

    /// Image contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Image size as carried in the checksum command's length field.
    pub fn checksum_length(&self) -> Result<u16> {
        u16::try_from(self.data.len()).map_err(|_| Error::ImageTooLarge {
            what: "image size",
            value: self.data.len(),
        })
    }

    /// Write the image contents to `path`.
    pub fn write_bin<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, &self.data)?;
        debug!("Wrote {} bytes to {}", self.data.len(), path.display());
        Ok(())
    }
}

/// Path of the binary artifact for a firmware file.
pub fn bin_path_for<P: AsRef<Path>>(firmware: P) -> PathBuf {
    firmware.as_ref().with_extension(BIN_EXTENSION)
}

fn is_bin(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(BIN_EXTENSION))
}

/// Turn a firmware file into the image the session uploads.
///
/// HEX files are converted, persisted via [`bin_path_for`], and read back.
/// A `.bin` input is its own artifact and is loaded at address 0.
pub fn prepare<P: AsRef<Path>>(firmware: P, flash_size: u32) -> Result<FirmwareImage> {
    let firmware = firmware.as_ref();

    if is_bin(firmware) {
        return FirmwareImage::from_bin_file(firmware, 0, flash_size);
    }

    let converted = FirmwareImage::from_hex_file(firmware, flash_size)?;
    let bin_path = bin_path_for(firmware);
    converted.write_bin(&bin_path)?;
    info!(
        "Converted {} -> {} (start 0x{:06X}, {} bytes)",
        firmware.display(),
        bin_path.display(),
        converted.start_address(),
        converted.len()
    );

    FirmwareImage::from_bin_file(&bin_path, converted.start_address(), flash_size)
}
