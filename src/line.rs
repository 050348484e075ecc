// pmnode - Particulate matter field node core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Passthrough line assembly
//!
//! Bytes arriving on the auxiliary serial port are collected into lines and
//! forwarded verbatim on the `serial` topic.

use log::warn;

/// Longest line kept; anything longer is discarded
pub const LINE_CAPACITY: usize = 256;

/// Collects bytes until a line terminator
#[derive(Debug, Clone)]
pub struct LineAssembler {
    buf: [u8; LINE_CAPACITY],
    len: usize,
    discarding: bool,
}

impl LineAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
            discarding: false,
        }
    }

    /// Push one byte, returning a finished line if this byte completed one
    ///
    /// `\r` is ignored and blank lines are skipped. A line longer than
    /// [`LINE_CAPACITY`] is dropped whole, up to and including its `\n`.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\r' => None,
            b'\n' if self.discarding => {
                self.discarding = false;
                None
            }
            b'\n' => self.take(),
            _ if self.discarding => None,
            _ => {
                if self.len == LINE_CAPACITY {
                    warn!("serial: line exceeds {} bytes, discarding", LINE_CAPACITY);
                    self.len = 0;
                    self.discarding = true;
                    return None;
                }
                self.buf[self.len] = byte;
                self.len += 1;
                None
            }
        }
    }

    /// Push a run of bytes, collecting every completed line
    pub fn push_slice(&mut self, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Bytes of the pending, unterminated line
    pub fn pending(&self) -> usize {
        self.len
    }

    fn take(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buf[..self.len])
            .trim()
            .to_string();
        self.len = 0;
        (!line.is_empty()).then_some(line)
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}
