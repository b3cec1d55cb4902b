//! Request/response exchange with retry on silence.
//!
//! Responses carry no length prefix, so the executor reads until the link
//! goes idle for one read timeout of the port. Silence before the first byte
//! triggers a re-send of the identical packet.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use log::{info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::packet::{
    CommandPacket, HexDump, Response, STATUS_ADDRESS_OUT_OF_RANGE, STATUS_INVALID_COMMAND,
    STATUS_OK,
};

/// Re-sends after the first attempt goes unanswered.
pub const MAX_RETRIES: usize = 3;

/// Timeout for version and reset commands.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for erase, write and checksum commands.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one read from the port.
enum Chunk {
    Data(usize),
    Idle,
}

fn read_chunk<P: Port>(port: &mut P, buf: &mut [u8]) -> Result<Chunk> {
    match port.read(buf) {
        Ok(0) => Ok(Chunk::Idle),
        Ok(n) => Ok(Chunk::Data(n)),
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            Ok(Chunk::Idle)
        },
        Err(e) => Err(Error::Io(e)),
    }
}

/// Wait up to `timeout` for a first byte, then read until the link is idle.
///
/// Returns an empty buffer if nothing arrived.
fn receive<P: Port>(port: &mut P, timeout: Duration) -> Result<Vec<u8>> {
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    let start = Instant::now();

    loop {
        match read_chunk(port, &mut buf)? {
            Chunk::Data(n) => {
                trace!("Received {n} bytes");
                received.extend_from_slice(&buf[..n]);
            },
            Chunk::Idle if !received.is_empty() => return Ok(received),
            Chunk::Idle if start.elapsed() >= timeout => return Ok(received),
            Chunk::Idle => {},
        }
    }
}

/// Map a status byte to the outcome of a status-checked command.
pub fn check_status(packet: &CommandPacket, status: u8) -> Result<()> {
    let opcode = packet.opcode();
    match status {
        STATUS_OK => Ok(()),
        STATUS_ADDRESS_OUT_OF_RANGE => Err(Error::AddressOutOfRange(opcode)),
        STATUS_INVALID_COMMAND => Err(Error::InvalidCommand(opcode)),
        status => Err(Error::UnknownDeviceError { opcode, status }),
    }
}

/// Perform one exchange.
///
/// Sends `packet`, waits up to `timeout` for the reply and re-sends the
/// identical bytes up to [`MAX_RETRIES`] times while the link stays silent.
/// For opcodes where [`Opcode::checks_status`](crate::protocol::Opcode::checks_status)
/// holds, a non-success status byte is turned into the matching error.
pub fn execute<P: Port>(
    port: &mut P,
    packet: &CommandPacket,
    timeout: Duration,
) -> Result<Response> {
    let opcode = packet.opcode();
    let data = packet.encode();
    info!("Tx -> {}", HexDump(&data));

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            warn!(
                "No response in {:.1} s, re-trying {} more time(s)",
                timeout.as_secs_f32(),
                MAX_RETRIES - attempt + 1
            );
        }
        port.write_all_bytes(&data)?;

        let raw = receive(port, timeout)?;
        if raw.is_empty() {
            continue;
        }

        info!("Rx -> {}", HexDump(&raw));
        let response = Response::parse(raw)?;
        if opcode.checks_status() {
            check_status(packet, response.status())?;
        }
        return Ok(response);
    }

    Err(Error::NoResponse {
        opcode,
        attempts: MAX_RETRIES + 1,
    })
}
