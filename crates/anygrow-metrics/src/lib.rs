//! Metrics for the AnyGrow device link.
//!
//! This crate declares every metric the link records as a [`Metric`] constant
//! and re-exports the `metrics` facade. Recording is a no-op until the host
//! application installs a recorder; the `prometheus` feature provides one.
//!
//! # Example
//!
//! ```rust
//! use anygrow_metrics::{metric_defs, describe_metrics};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::COMMANDS_WRITTEN.name, "command" => "pump").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "anygrow.link.commands_written").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description)
            }
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions for the device link.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Commands written to the serial port.
    ///
    /// Labels: command
    pub const COMMANDS_WRITTEN: Metric = Metric::counter("anygrow.link.commands_written")
        .with_description("Commands written to the serial port")
        .with_unit(Unit::Count)
        .with_labels(&["command"]);

    /// Commands removed from the queue but never delivered.
    ///
    /// Labels: command, reason (`io_error`, `invalid`)
    pub const COMMANDS_DROPPED: Metric = Metric::counter("anygrow.link.commands_dropped")
        .with_description("Commands dequeued but not delivered")
        .with_unit(Unit::Count)
        .with_labels(&["command", "reason"]);

    /// Telemetry requests written.
    pub const SENSOR_REQUESTS: Metric = Metric::counter("anygrow.link.sensor_requests")
        .with_description("Telemetry requests written to the board")
        .with_unit(Unit::Count);

    /// Commands waiting in the queue.
    pub const QUEUE_DEPTH: Metric = Metric::gauge("anygrow.link.queue_depth")
        .with_description("Commands waiting in the queue")
        .with_unit(Unit::Count);

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Bytes read from the serial port.
    pub const BYTES_READ: Metric = Metric::counter("anygrow.link.bytes_read")
        .with_description("Bytes read from the serial port")
        .with_unit(Unit::Bytes);

    /// Telemetry frames decoded.
    pub const FRAMES_DECODED: Metric = Metric::counter("anygrow.link.frames_decoded")
        .with_description("Telemetry frames decoded")
        .with_unit(Unit::Count);

    /// CO2 readings replaced by the previous value.
    pub const CO2_SPIKES_SUPPRESSED: Metric = Metric::counter("anygrow.link.co2_spikes_suppressed")
        .with_description("CO2 readings replaced by the previous value")
        .with_unit(Unit::Count);

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connection attempts.
    ///
    /// Labels: outcome (`connected`, `failed`)
    pub const CONNECT_ATTEMPTS: Metric = Metric::counter("anygrow.link.connect_attempts")
        .with_description("Serial port open attempts")
        .with_unit(Unit::Count)
        .with_labels(&["outcome"]);

    /// I/O errors on an open port.
    ///
    /// Labels: op (`read`, `write`)
    pub const IO_ERRORS: Metric = Metric::counter("anygrow.link.io_errors")
        .with_description("I/O errors on an open serial port")
        .with_unit(Unit::Count)
        .with_labels(&["op"]);

    /// Current connection state (0 = disconnected, 1 = connecting, 2 = connected).
    pub const CONNECTION_STATE: Metric = Metric::gauge("anygrow.link.connection_state")
        .with_description("0 = disconnected, 1 = connecting, 2 = connected");

    /// Time from command dequeue to completed write.
    pub const WRITE_LATENCY: Metric = Metric::histogram("anygrow.link.write_latency_us")
        .with_description("Serial write duration in microseconds")
        .with_unit(Unit::Microseconds);

    /// Every metric above, for bulk registration.
    pub const ALL: &[Metric] = &[
        COMMANDS_WRITTEN,
        COMMANDS_DROPPED,
        SENSOR_REQUESTS,
        QUEUE_DEPTH,
        BYTES_READ,
        FRAMES_DECODED,
        CO2_SPIKES_SUPPRESSED,
        CONNECT_ATTEMPTS,
        IO_ERRORS,
        CONNECTION_STATE,
        WRITE_LATENCY,
    ];
}

/// Describes all link metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Errors from installing an exporter.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    /// The Prometheus exporter could not be built or bound.
    #[cfg(feature = "prometheus")]
    #[error("prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

/// Install a Prometheus scrape endpoint on `addr` and describe all metrics.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> Result<(), ExporterError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}
