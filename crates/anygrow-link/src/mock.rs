//! In-memory transport.
//!
//! [`MockConnector`] stands in for the serial port in tests and in the CLI's
//! `--dry-run` mode. Clones share state, so a test keeps one clone to inject
//! faults and inspect writes while the manager owns another.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anygrow_protocol::{PacketCodec, SensorValues, OP_SENSOR_REQUEST, TAG_SENSOR};
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::error::{LinkError, LinkResult};
use crate::transport::{Connector, Transport};

/// A frame written to the mock, with the time the write happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// When the write call completed.
    pub at: Instant,
    /// Bytes written.
    pub bytes: Vec<u8>,
    /// Connection the write went through (1 for the first successful open).
    pub connection: u64,
}

#[derive(Debug, Default)]
struct MockState {
    writes: Vec<RecordedWrite>,
    inbound: BytesMut,
    opens: u64,
    failed_opens: u64,
    fail_opens: bool,
    open_delay: Duration,
    fail_writes: u32,
    fail_reads: u32,
    connection: u64,
    telemetry: Option<SensorValues>,
}

/// Connector for an in-memory board.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Create a mock that opens successfully and answers nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that answers every sensor request with `values`.
    pub fn with_telemetry(values: SensorValues) -> Self {
        let mock = Self::new();
        mock.set_telemetry(Some(values));
        mock
    }

    /// Change the telemetry the mock answers with. `None` stops answering.
    pub fn set_telemetry(&self, values: Option<SensorValues>) {
        self.state.lock().telemetry = values;
    }

    /// Make every subsequent open fail (or succeed again).
    pub fn set_fail_opens(&self, fail: bool) {
        self.state.lock().fail_opens = fail;
    }

    /// Make every open take `delay` before it succeeds or fails. Whether it
    /// fails is decided when the open starts.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = delay;
    }

    /// Fail the next `count` writes.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().fail_writes = count;
    }

    /// Fail the next `count` reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().fail_reads = count;
    }

    /// Queue bytes for the host to read.
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend_from_slice(bytes);
    }

    /// Every successful write so far.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().writes.clone()
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> u64 {
        self.state.lock().opens
    }

    /// Failed opens so far.
    pub fn failed_open_count(&self) -> u64 {
        self.state.lock().failed_opens
    }
}

impl Connector for MockConnector {
    fn open(&self) -> LinkResult<Box<dyn Transport>> {
        let (fail, delay) = {
            let state = self.state.lock();
            (state.fail_opens, state.open_delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if fail {
            state.failed_opens += 1;
            return Err(LinkError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "mock port unavailable",
            )));
        }
        state.opens += 1;
        state.connection += 1;
        state.inbound.clear();
        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
            connection: state.connection,
        }))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn diagnostics(&self) -> Option<String> {
        Some("mock port is set to fail".to_string())
    }
}

struct MockTransport {
    state: Arc<Mutex<MockState>>,
    connection: u64,
}

impl MockTransport {
    fn check_current(&self, state: &MockState) -> io::Result<()> {
        if state.connection != self.connection {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stale mock handle"));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        self.check_current(&state)?;
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }

        state.writes.push(RecordedWrite {
            at: Instant::now(),
            bytes: frame.to_vec(),
            connection: self.connection,
        });

        let is_request =
            frame.get(1) == Some(&TAG_SENSOR) && frame.get(3) == Some(&OP_SENSOR_REQUEST);
        if let (true, Some(values)) = (is_request, state.telemetry) {
            let reply = PacketCodec::encode_telemetry(&values);
            state.inbound.extend_from_slice(&reply);
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        self.check_current(&state)?;
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock read failure"));
        }

        let n = state.inbound.len().min(buf.len());
        buf[..n].copy_from_slice(&state.inbound[..n]);
        state.inbound.advance(n);
        Ok(n)
    }
}
