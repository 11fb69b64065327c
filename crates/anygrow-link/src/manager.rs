//! Device manager: the one object consumers hold.
//!
//! ```text
//!   producers ──submit──► CommandQueue ──► Writer ──┐
//!   SensorPoller ─────────────┘                     ├──► ConnectionSupervisor ──► port
//!   subscribers ◄── EventBus ◄── Reader ────────────┘
//! ```
//!
//! The manager is explicitly constructed and owns every task. Nothing is
//! global, so several boards can be driven from one process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anygrow_protocol::{ChannelSetting, Command, LedMode, PacketCodec, SensorReading};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::events::{EventBus, LinkEvent};
use crate::poller::SensorPoller;
use crate::queue::{CommandQueue, CommandSender};
use crate::reader::{Co2SpikeFilter, Reader};
use crate::state::ConnectionState;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::{Connector, SerialConnector};
use crate::worker::spawn_periodic;
use crate::writer::Writer;

/// Worker threads of a running manager.
struct Workers {
    /// Dropping this wakes and stops every worker.
    shutdown: Sender<()>,
    threads: Vec<JoinHandle<()>>,
}

impl Workers {
    fn stop(self) {
        drop(self.shutdown);
        for handle in self.threads {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

/// Drives one controller board.
pub struct DeviceManager {
    config: LinkConfig,
    codec: Arc<PacketCodec>,
    events: Arc<EventBus>,
    queue: Arc<CommandQueue>,
    supervisor: Arc<ConnectionSupervisor>,
    requests_sent: Arc<AtomicU64>,
    latest: Arc<Mutex<Option<SensorReading>>>,
    workers: Option<Workers>,
}

impl DeviceManager {
    /// Create a stopped manager that opens transports through `connector`.
    pub fn new(config: LinkConfig, connector: Arc<dyn Connector>) -> LinkResult<Self> {
        config.validate()?;
        let codec = Arc::new(PacketCodec::with_templates(config.templates.clone())?);
        let events = Arc::new(EventBus::new());
        let supervisor = Arc::new(ConnectionSupervisor::new(
            connector,
            Arc::clone(&events),
            &config,
        ));

        Ok(DeviceManager {
            queue: Arc::new(CommandQueue::new(Arc::clone(&codec))),
            codec,
            events,
            supervisor,
            requests_sent: Arc::new(AtomicU64::new(0)),
            latest: Arc::new(Mutex::new(None)),
            workers: None,
            config,
        })
    }

    /// Create a stopped manager for the serial port named in `config`.
    pub fn serial(config: LinkConfig) -> LinkResult<Self> {
        let connector = Arc::new(SerialConnector::from_config(&config));
        Self::new(config, connector)
    }

    /// Connect and start the writer, reader and (if enabled) sensor poller.
    pub fn start(&mut self) -> LinkResult<()> {
        if self.workers.is_some() {
            return Err(LinkError::AlreadyRunning);
        }
        self.supervisor.start()?;

        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(0);
        let mut workers = Workers {
            shutdown,
            threads: Vec::with_capacity(3),
        };
        if let Err(err) = self.spawn_workers(&mut workers, shutdown_rx) {
            workers.stop();
            self.supervisor.stop();
            return Err(err);
        }
        self.workers = Some(workers);

        info!(
            port = %self.config.port,
            interval_ms = self.config.command_interval_ms,
            polling = self.config.sensor_polling,
            "device manager started"
        );
        Ok(())
    }

    fn spawn_workers(&self, workers: &mut Workers, shutdown: Receiver<()>) -> LinkResult<()> {
        let writer = Writer::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.codec),
            Arc::clone(&self.supervisor),
            Arc::clone(&self.events),
            Arc::clone(&self.requests_sent),
            self.config.command_interval(),
        );
        workers.threads.push(spawn_periodic(
            "writer",
            self.config.writer_tick(),
            shutdown.clone(),
            writer,
        )?);

        let reader = Reader::new(
            Arc::clone(&self.supervisor),
            Arc::clone(&self.events),
            Arc::clone(&self.latest),
            Co2SpikeFilter::new(self.config.co2_spike_limit, self.config.co2_ceiling),
        );
        workers.threads.push(spawn_periodic(
            "reader",
            self.config.read_interval(),
            shutdown.clone(),
            reader,
        )?);

        if self.config.sensor_polling {
            let poller = SensorPoller::new(self.queue.sender(), Arc::clone(&self.supervisor));
            workers.threads.push(spawn_periodic(
                "poller",
                self.config.poll_interval(),
                shutdown,
                poller,
            )?);
        }
        Ok(())
    }

    /// Stop every task, cancel any pending reconnect and close the port.
    ///
    /// Commands still queued are discarded. Calling `stop` on a stopped
    /// manager does nothing.
    pub fn stop(&mut self) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        workers.stop();
        self.supervisor.stop();

        let dropped = self.queue.clear();
        if dropped > 0 {
            info!(dropped, "discarded undelivered commands");
        }
        info!("device manager stopped");
    }

    /// Queue a command. Invalid commands are rejected here and never queued.
    pub fn submit(&self, command: Command) -> LinkResult<()> {
        self.queue.submit(command)
    }

    /// A producer handle that can be moved to other threads.
    pub fn command_sender(&self) -> CommandSender {
        self.queue.sender()
    }

    /// Cancel any pending reconnect and reconnect now.
    pub fn reconnect(&self) -> LinkResult<()> {
        if self.workers.is_none() {
            return Err(LinkError::NotRunning);
        }
        debug!("manual reconnect requested");
        self.supervisor.reconnect()
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn set_led_mode(&self, mode: LedMode) -> LinkResult<()> {
        self.submit(Command::LedMode(mode))
    }

    pub fn set_pump(&self, on: bool) -> LinkResult<()> {
        self.submit(Command::Pump { on })
    }

    pub fn set_uv_filter(&self, on: bool) -> LinkResult<()> {
        self.submit(Command::UvFilter { on })
    }

    /// Queue per-channel LED settings. Anything but four channels is rejected.
    pub fn set_channels(&self, channels: Vec<ChannelSetting>) -> LinkResult<()> {
        self.submit(Command::ChannelLed { channels })
    }

    /// Queue a clock sync to the host's local time.
    pub fn sync_time(&self) -> LinkResult<()> {
        self.submit(Command::time_sync_now())
    }

    /// Queue one telemetry request outside the poller's cadence.
    pub fn request_sensor_data(&self) -> LinkResult<()> {
        self.submit(Command::SensorRequest)
    }

    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Telemetry requests written since the manager was created.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::SeqCst)
    }

    /// Commands waiting to be written.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// The most recent decoded reading.
    pub fn last_reading(&self) -> Option<SensorReading> {
        self.latest.lock().clone()
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("port", &self.config.port)
            .field("running", &self.is_running())
            .field("state", &self.state())
            .field("pending_commands", &self.pending_commands())
            .field("requests_sent", &self.requests_sent())
            .finish()
    }
}
