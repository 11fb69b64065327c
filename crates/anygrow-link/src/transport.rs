//! Byte transports.
//!
//! The supervisor never talks to `serialport` directly. It asks a
//! [`Connector`] for a fresh [`Transport`] on every connection attempt, which
//! lets tests and `--dry-run` swap the serial port for
//! [`MockConnector`](crate::mock::MockConnector).

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::config::LinkConfig;
use crate::error::LinkResult;

/// An open, bidirectional byte link to the board.
pub trait Transport: Send {
    /// Write one complete frame.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Read whatever bytes are available into `buf`.
    ///
    /// Returns `Ok(0)` when nothing arrived; that is not an error.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens transports.
pub trait Connector: Send + Sync {
    /// Open a new transport.
    fn open(&self) -> LinkResult<Box<dyn Transport>>;

    /// Short description for status messages, e.g. `/dev/ttyUSB0 @ 38400`.
    fn describe(&self) -> String;

    /// Extra context appended to an open failure.
    fn diagnostics(&self) -> Option<String> {
        None
    }
}

/// Opens the configured serial port, 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Create a connector for a port.
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        SerialConnector {
            path: path.into(),
            baud_rate,
            timeout,
        }
    }

    /// Create a connector from the link settings.
    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate, config.io_timeout())
    }
}

impl Connector for SerialConnector {
    fn open(&self) -> LinkResult<Box<dyn Transport>> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open()?;

        info!(port = %self.path, baud = self.baud_rate, "opened serial port");
        Ok(Box::new(SerialTransport { port }))
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.path, self.baud_rate)
    }

    fn diagnostics(&self) -> Option<String> {
        Some(describe_available_ports())
    }
}

/// A serial port opened by [`SerialConnector`].
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl Transport for SerialTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let waiting = self.port.bytes_to_read()? as usize;
        if waiting == 0 {
            return Ok(0);
        }
        let len = waiting.min(buf.len());
        match self.port.read(&mut buf[..len]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> LinkResult<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// One line listing the available ports, for status messages.
pub fn describe_available_ports() -> String {
    match available_ports() {
        Ok(ports) if ports.is_empty() => "no serial ports found".to_string(),
        Ok(ports) => format!("available ports: {}", ports.join(", ")),
        Err(e) => {
            debug!(error = %e, "could not enumerate serial ports");
            format!("could not list serial ports: {}", e)
        }
    }
}
