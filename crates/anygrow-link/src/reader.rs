//! Telemetry reader.

use std::sync::Arc;

use anygrow_metrics::metric_defs;
use anygrow_protocol::{format_raw, SensorReading, SensorValues, TelemetryAccumulator};
use chrono::Local;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::LinkError;
use crate::events::{EventBus, LinkEvent};
use crate::supervisor::ConnectionSupervisor;
use crate::worker::Periodic;

const READ_CHUNK: usize = 256;

/// Suppresses implausible CO2 readings.
///
/// A reading is replaced by the last accepted value when it jumps by more
/// than `spike_limit` from it, or when it reaches `ceiling`. The replacement
/// sticks: the last accepted value does not move until a plausible reading
/// arrives.
#[derive(Debug, Clone, Default)]
pub struct Co2SpikeFilter {
    spike_limit: Option<u32>,
    ceiling: Option<u32>,
    last: Option<u32>,
}

impl Co2SpikeFilter {
    /// Create a filter. `None` disables the respective check.
    pub fn new(spike_limit: Option<u32>, ceiling: Option<u32>) -> Self {
        Co2SpikeFilter {
            spike_limit,
            ceiling,
            last: None,
        }
    }

    /// Filter one decoded sample.
    pub fn apply(&mut self, mut values: SensorValues) -> SensorValues {
        let co2 = values.co2_ppm;
        let over_ceiling = self.ceiling.is_some_and(|ceiling| co2 >= ceiling);
        let spike = match (self.spike_limit, self.last) {
            (Some(limit), Some(last)) => co2.abs_diff(last) > limit,
            _ => false,
        };

        if over_ceiling || spike {
            let replacement = self.last.unwrap_or(0);
            debug!(co2, replacement, "suppressed CO2 reading");
            metrics::counter!(metric_defs::CO2_SPIKES_SUPPRESSED.name).increment(1);
            values.co2_ppm = replacement;
        } else {
            self.last = Some(co2);
        }
        values
    }
}

pub(crate) struct Reader {
    supervisor: Arc<ConnectionSupervisor>,
    events: Arc<EventBus>,
    latest: Arc<Mutex<Option<SensorReading>>>,
    accumulator: TelemetryAccumulator,
    filter: Co2SpikeFilter,
    generation: u64,
    buf: Vec<u8>,
}

impl Reader {
    pub(crate) fn new(
        supervisor: Arc<ConnectionSupervisor>,
        events: Arc<EventBus>,
        latest: Arc<Mutex<Option<SensorReading>>>,
        filter: Co2SpikeFilter,
    ) -> Self {
        Reader {
            supervisor,
            events,
            latest,
            accumulator: TelemetryAccumulator::new(),
            filter,
            generation: 0,
            buf: vec![0; READ_CHUNK],
        }
    }
}

impl Reader {
    /// Drop bytes buffered from an earlier connection.
    fn track_generation(&mut self, generation: u64) {
        if generation == self.generation {
            return;
        }
        if self.accumulator.buffered_len() > 0 {
            debug!(
                bytes = self.accumulator.buffered_len(),
                "discarding partial frame from previous connection"
            );
        }
        self.accumulator.clear();
        self.generation = generation;
    }
}

impl Periodic for Reader {
    fn tick(&mut self) {
        let n = match self.supervisor.read_tagged(&mut self.buf) {
            Ok((generation, n)) if n > 0 => {
                self.track_generation(generation);
                n
            }
            Ok(_) | Err(LinkError::NotConnected) => return,
            Err(err) => {
                debug!(error = %err, "read failed");
                return;
            }
        };
        let chunk = &self.buf[..n];

        metrics::counter!(metric_defs::BYTES_READ.name).increment(n as u64);
        let raw = format_raw(chunk);
        trace!(%raw, "received");
        self.events.publish(LinkEvent::RawBytesObserved(raw));

        self.accumulator.push(chunk);
        if let Some(values) = self.accumulator.decode() {
            let reading = self.filter.apply(values).observed(Local::now());
            metrics::counter!(metric_defs::FRAMES_DECODED.name).increment(1);
            debug!(
                temperature = reading.temperature,
                humidity = reading.humidity,
                co2 = reading.co2_ppm,
                lux = reading.illuminance_lux,
                "telemetry"
            );
            *self.latest.lock() = Some(reading.clone());
            self.events.publish(LinkEvent::DataUpdated(reading));
        }
    }
}
