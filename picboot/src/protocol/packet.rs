//! Bootloader packet codec.
//!
//! ## Command Format
//!
//! ```text
//! +-----+--------+--------+-----------+--------------+-----------+
//! | STX | Opcode | Length | Sentinel  | Half-address |  Payload  |
//! +-----+--------+--------+-----------+--------------+-----------+
//! |  1  |   1    |   2    |     2     |      4       | variable  |
//! +-----+--------+--------+-----------+--------------+-----------+
//! | 0x55|  cmd   |   LE   | 0x55 0xAA |  addr/2, LE  |   data    |
//! +-----+--------+--------+-----------+--------------+-----------+
//! ```
//!
//! The device echoes the 10-byte header and appends its result, so the
//! status byte of every response sits at offset 10.

use std::fmt;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// Start-of-frame marker.
pub const STX: u8 = 0x55;

/// Fixed sentinel following the length field.
pub const SENTINEL: [u8; 2] = [0x55, 0xAA];

/// Size of the header preceding the payload, marker included.
pub const HEADER_LEN: usize = 10;

/// Offset of the status byte in a response.
pub const STATUS_OFFSET: usize = 10;

/// Status: command succeeded.
pub const STATUS_OK: u8 = 0x01;

/// Status: address outside the writable range.
pub const STATUS_ADDRESS_OUT_OF_RANGE: u8 = 0xFE;

/// Status: command not recognised.
pub const STATUS_INVALID_COMMAND: u8 = 0xFF;

/// Bootloader opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Read bootloader version and row sizes.
    ReadVersion = 0x00,
    /// Program one row.
    WriteFlash = 0x02,
    /// Erase a run of rows.
    EraseFlash = 0x03,
    /// Compute a checksum over a flash range.
    CalcChecksum = 0x08,
    /// Leave the bootloader and start the application.
    ResetDevice = 0x09,
}

impl Opcode {
    /// Whether the generic status check applies to this opcode.
    ///
    /// Version, checksum and reset responses carry data at the status offset
    /// and are interpreted by their own handlers.
    pub fn checks_status(self) -> bool {
        !matches!(
            self,
            Self::ReadVersion | Self::CalcChecksum | Self::ResetDevice
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadVersion => "read version",
            Self::WriteFlash => "write flash",
            Self::EraseFlash => "erase flash",
            Self::CalcChecksum => "calculate checksum",
            Self::ResetDevice => "reset device",
        };
        write!(f, "{name} (0x{:02X})", *self as u8)
    }
}

/// Outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    opcode: Opcode,
    body: Vec<u8>,
}

impl CommandPacket {
    /// Build a packet with the standard header.
    ///
    /// # Arguments
    ///
    /// * `length` - Length/count field; its meaning depends on the opcode.
    /// * `address` - Device byte address; encoded as `address >> 1`.
    /// * `payload` - Bytes appended after the header.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn new(opcode: Opcode, length: u16, address: u32, payload: &[u8]) -> Self {
        let mut body = Vec::with_capacity(HEADER_LEN - 1 + payload.len());
        body.push(opcode as u8);
        body.write_u16::<LittleEndian>(length).unwrap();
        body.extend_from_slice(&SENTINEL);
        body.write_u32::<LittleEndian>(address >> 1).unwrap();
        body.extend_from_slice(payload);
        Self { opcode, body }
    }

    /// Version query: nine zero bytes, no sentinel.
    pub fn read_version() -> Self {
        Self {
            opcode: Opcode::ReadVersion,
            body: vec![0x00; HEADER_LEN - 1],
        }
    }

    /// Erase `rows` rows starting at `address`.
    pub fn erase(address: u32, rows: u16) -> Self {
        Self::new(Opcode::EraseFlash, rows, address, &[])
    }

    /// Program one row at `address`.
    pub fn write(address: u32, row: &[u8]) -> Result<Self> {
        let length = u16::try_from(row.len()).map_err(|_| Error::ImageTooLarge {
            what: "row length",
            value: row.len(),
        })?;
        Ok(Self::new(Opcode::WriteFlash, length, address, row))
    }

    /// Checksum `length` bytes starting at `address`.
    pub fn checksum(address: u32, length: u16) -> Self {
        Self::new(Opcode::CalcChecksum, length, address, &[])
    }

    /// Reset the device.
    pub fn reset() -> Self {
        Self::new(Opcode::ResetDevice, 0, 0, &[])
    }

    /// Command opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Packet body without the start marker.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Bytes to put on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.body.len());
        buf.push(STX);
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Raw response to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    raw: Vec<u8>,
}

impl Response {
    /// Wrap raw response bytes, requiring at least the status byte.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        if raw.len() <= STATUS_OFFSET {
            return Err(Error::ShortResponse {
                needed: STATUS_OFFSET + 1,
                received: raw.len(),
            });
        }
        Ok(Self { raw })
    }

    /// Status/result byte.
    pub fn status(&self) -> u8 {
        self.raw[STATUS_OFFSET]
    }

    /// Everything from the status offset onward.
    pub fn payload(&self) -> &[u8] {
        &self.raw[STATUS_OFFSET..]
    }

    /// All received bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Byte at `offset` of the raw response.
    pub fn byte_at(&self, offset: usize) -> Result<u8> {
        self.raw.get(offset).copied().ok_or(Error::ShortResponse {
            needed: offset + 1,
            received: self.raw.len(),
        })
    }

    /// Little-endian u16 at `offset` of the raw response.
    pub fn u16_at(&self, offset: usize) -> Result<u16> {
        match self.raw.get(offset..offset + 2) {
            Some(&[lo, hi]) => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(Error::ShortResponse {
                needed: offset + 2,
                received: self.raw.len(),
            }),
        }
    }
}

/// Space-separated hex rendering for packet dumps.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
