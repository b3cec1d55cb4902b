//! In-memory port for protocol tests.
//!
//! Every written packet is recorded and handed to a responder, which decides
//! the bytes the "device" sends back (or `None` for silence).

use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::error::Result;
use crate::port::Port;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

pub(crate) struct MockPort {
    responder: Responder,
    pending: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    chunk: usize,
    idle_as_zero: bool,
}

impl MockPort {
    /// Port whose replies are computed from each written packet.
    pub(crate) fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            writes: Vec::new(),
            chunk: 4,
            idle_as_zero: false,
        }
    }

    /// Port that answers the n-th write with the n-th scripted reply.
    pub(crate) fn scripted(replies: Vec<Option<Vec<u8>>>) -> Self {
        let mut replies: VecDeque<_> = replies.into();
        Self::new(move |_| replies.pop_front().flatten())
    }

    /// Port that never answers.
    pub(crate) fn silent() -> Self {
        Self::new(|_| None)
    }

    /// Report an idle link as `Ok(0)` instead of `TimedOut`.
    pub(crate) fn with_idle_as_zero(mut self) -> Self {
        self.idle_as_zero = true;
        self
    }

    pub(crate) fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }
}

/// Build a device reply: an echoed 10-byte header followed by `body`.
///
/// `body[0]` lands at the status offset.
pub(crate) fn reply(opcode: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x55, opcode, 0x00, 0x00, 0x55, 0xAA, 0x00, 0x00, 0x00, 0x00];
    out.extend_from_slice(body);
    out
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            if self.idle_as_zero {
                return Ok(0);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no data",
            ));
        }
        let n = buf.len().min(self.chunk).min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writes.push(buf.to_vec());
        if let Some(bytes) = (self.responder)(buf) {
            self.pending.extend(bytes);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn clear_buffers(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}
