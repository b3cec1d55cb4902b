//! Intel HEX to flat image conversion.
//!
//! Records are placed at their absolute address (extended linear and
//! extended segment records included) and flattened from the lowest
//! populated address up to the flash size, gaps filled with the erased value.

use std::path::Path;

use ihex::{Reader, Record};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::image::{ERASED_BYTE, FirmwareImage};

/// A contiguous run of bytes from one data record.
struct Chunk {
    address: u32,
    bytes: Vec<u8>,
}

fn read_chunks(text: &str) -> Result<Vec<Chunk>> {
    let mut base: u32 = 0;
    let mut chunks = Vec::new();

    for record in Reader::new(text) {
        match record.map_err(|e| Error::HexParse(e.to_string()))? {
            Record::Data { offset, value } => chunks.push(Chunk {
                address: base.wrapping_add(u32::from(offset)),
                bytes: value,
            }),
            Record::ExtendedLinearAddress(upper) => base = u32::from(upper) << 16,
            Record::ExtendedSegmentAddress(segment) => base = u32::from(segment) << 4,
            Record::EndOfFile => break,
            Record::StartLinearAddress(_) | Record::StartSegmentAddress { .. } => {},
        }
    }

    Ok(chunks)
}

impl FirmwareImage {
    /// Convert Intel HEX text into an image bounded by `flash_size`.
    ///
    /// Bytes at or above `flash_size` (configuration words live there on
    /// PIC16 parts) are dropped with a warning.
    pub fn from_hex_str(text: &str, flash_size: u32) -> Result<Self> {
        let chunks = read_chunks(text)?;

        let start_address = chunks
            .iter()
            .filter(|c| !c.bytes.is_empty())
            .map(|c| c.address)
            .min()
            .ok_or_else(|| Error::HexParse("no data records".into()))?;

        if start_address >= flash_size {
            return Err(Error::ImageTruncation {
                start: start_address,
                flash_size,
            });
        }

        let mut data = vec![ERASED_BYTE; (flash_size - start_address) as usize];
        let mut dropped = 0usize;
        for chunk in &chunks {
            for (offset, byte) in chunk.bytes.iter().enumerate() {
                match chunk.address.checked_add(offset as u32) {
                    Some(address) if address < flash_size => {
                        data[(address - start_address) as usize] = *byte;
                    },
                    _ => dropped += 1,
                }
            }
        }

        if dropped > 0 {
            warn!("Dropped {dropped} bytes at or above flash size 0x{flash_size:X}");
        }
        debug!(
            "HEX image: start 0x{start_address:08X}, {} bytes, {} records",
            data.len(),
            chunks.len()
        );

        Ok(Self::new(start_address, data))
    }

    /// Load and convert an Intel HEX file.
    pub fn from_hex_file<P: AsRef<Path>>(path: P, flash_size: u32) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading HEX from: {}", path.display());

        let text = std::fs::read_to_string(path)?;
        Self::from_hex_str(&text, flash_size)
    }
}
