// pmnode Agent - Host-side control loop for pmnode
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Serial byte sources

use crate::error::{AgentError, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read};
use std::time::Duration;

/// Something the control loop can poll for bytes without blocking
pub trait ByteSource {
    /// Read whatever is available into `buf`; `Ok(0)` when nothing arrived
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Name for log records
    fn name(&self) -> &str;
}

/// UART attached through the host's serial driver
pub struct SerialSource {
    path: String,
    port: Box<dyn SerialPort>,
}

impl SerialSource {
    /// Open `path` at `baud_rate`, 8N1, no flow control
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|source| AgentError::Serial {
                path: path.to_string(),
                source,
            })?;

        tracing::info!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self {
            path: path.to_string(),
            port,
        })
    }
}

impl ByteSource for SerialSource {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        &self.path
    }
}
