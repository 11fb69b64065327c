//! Subcommand implementations.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anygrow_link::mock::MockConnector;
use anygrow_link::{
    available_ports, ConnectionState, Connector, DeviceManager, LinkConfig, LinkError, LinkEvent,
    SerialConnector,
};
use anygrow_protocol::{Command, SensorValues};
use crossbeam_channel::{select, Receiver};
use thiserror::Error;
use tracing::{debug, info};

use crate::{Action, LinkArgs};

/// How long `send` waits for the port to open.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `send` waits for the writer to take the command.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("could not install Ctrl-C handler: {0}")]
    Ctrlc(#[from] ctrlc::Error),

    #[error("timed out: {0}")]
    Timeout(String),

    #[cfg(feature = "prometheus")]
    #[error(transparent)]
    Metrics(#[from] anygrow_metrics::ExporterError),
}

pub type CliResult<T> = Result<T, CliError>;

pub fn ports() -> CliResult<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

pub fn config(link: &LinkArgs) -> CliResult<()> {
    let config = link.load()?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

#[cfg(feature = "prometheus")]
pub fn monitor(
    link: &LinkArgs,
    raw: bool,
    no_poll: bool,
    metrics_addr: Option<std::net::SocketAddr>,
) -> CliResult<()> {
    if let Some(addr) = metrics_addr {
        anygrow_metrics::install_prometheus(addr)?;
        info!(%addr, "serving metrics");
    }
    run_monitor(link, raw, no_poll)
}

#[cfg(not(feature = "prometheus"))]
pub fn monitor(link: &LinkArgs, raw: bool, no_poll: bool) -> CliResult<()> {
    run_monitor(link, raw, no_poll)
}

fn run_monitor(link: &LinkArgs, raw: bool, no_poll: bool) -> CliResult<()> {
    anygrow_metrics::describe_metrics();

    let mut config = link.load()?;
    if no_poll {
        config = config.with_sensor_polling(false);
    }
    let mut manager = build_manager(config, link.dry_run)?;
    let events = manager.subscribe();
    let interrupted = ctrl_c()?;

    manager.start()?;
    println!("monitoring {} (Ctrl-C to stop)", describe_target(&manager, link.dry_run));

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => print_event(&event, raw),
                Err(_) => break,
            },
            recv(interrupted) -> _ => break,
        }
    }

    manager.stop();
    println!("{} telemetry requests sent", manager.requests_sent());
    Ok(())
}

pub fn send(link: &LinkArgs, action: Action) -> CliResult<()> {
    let command = match action {
        Action::Led { mode } => Command::LedMode(mode),
        Action::Pump { state } => Command::Pump { on: state.is_on() },
        Action::Uv { state } => Command::UvFilter { on: state.is_on() },
        Action::TimeSync => Command::time_sync_now(),
        Action::Channels { channels } => Command::ChannelLed { channels },
    };

    let config = link.load()?.with_sensor_polling(false);
    let settle = config.command_interval();
    let mut manager = build_manager(config, link.dry_run)?;

    let frame = manager.codec().encode(&command).map_err(LinkError::from)?;
    println!("{}: {}", command, frame.to_hex());

    let events = manager.subscribe();
    manager.start()?;
    wait_connected(&events, CONNECT_TIMEOUT)?;

    manager.submit(command)?;
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while manager.pending_commands() > 0 {
        if Instant::now() >= deadline {
            manager.stop();
            return Err(CliError::Timeout("command was not written".into()));
        }
        thread::sleep(Duration::from_millis(10));
    }
    // The writer has popped the command; give it one interval to finish the write.
    thread::sleep(settle);

    manager.stop();
    Ok(())
}

fn build_manager(config: LinkConfig, dry_run: bool) -> CliResult<DeviceManager> {
    let connector: Arc<dyn Connector> = if dry_run {
        debug!("using simulated board");
        Arc::new(MockConnector::with_telemetry(SensorValues {
            temperature: 24.5,
            humidity: 55.0,
            co2_ppm: 650,
            illuminance_lux: 1200,
        }))
    } else {
        Arc::new(SerialConnector::from_config(&config))
    };
    Ok(DeviceManager::new(config, connector)?)
}

fn describe_target(manager: &DeviceManager, dry_run: bool) -> String {
    if dry_run {
        "simulated board".to_string()
    } else {
        format!("{} at {} baud", manager.config().port, manager.config().baud_rate)
    }
}

fn ctrl_c() -> CliResult<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;
    Ok(rx)
}

fn wait_connected(events: &Receiver<LinkEvent>, timeout: Duration) -> CliResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(LinkEvent::StateChanged(ConnectionState::Connected)) => return Ok(()),
            Ok(LinkEvent::StatusChanged(status)) => info!("{}", status),
            Ok(_) => {}
            Err(_) => {
                return Err(CliError::Timeout(format!(
                    "no connection after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

fn print_event(event: &LinkEvent, raw: bool) {
    match event {
        LinkEvent::StatusChanged(status) => println!("[status] {}", status),
        LinkEvent::StateChanged(state) => debug!(%state, "connection state"),
        LinkEvent::DataUpdated(reading) => println!(
            "{}  temp {:>5.1} C  humidity {:>5.1} %  co2 {:>5} ppm  light {:>6} lux",
            reading.observed_at.format("%H:%M:%S"),
            reading.temperature,
            reading.humidity,
            reading.co2_ppm,
            reading.illuminance_lux,
        ),
        LinkEvent::RawBytesObserved(hex) if raw => println!("[raw] {}", hex),
        LinkEvent::RawBytesObserved(_) => {}
        LinkEvent::RequestSent { total } => debug!(total, "telemetry request sent"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anygrow_link::EventBus;

    #[test]
    fn test_wait_connected() {
        let bus = EventBus::new();
        let events = bus.subscribe();
        bus.status("Connecting to mock...");
        bus.publish(LinkEvent::StateChanged(ConnectionState::Connecting));
        bus.publish(LinkEvent::StateChanged(ConnectionState::Connected));
        assert!(wait_connected(&events, Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_wait_connected_times_out() {
        let bus = EventBus::new();
        let events = bus.subscribe();
        bus.publish(LinkEvent::StateChanged(ConnectionState::Connecting));
        assert!(matches!(
            wait_connected(&events, Duration::from_millis(50)),
            Err(CliError::Timeout(_))
        ));
    }

    #[test]
    fn test_dry_run_send() {
        let link = LinkArgs {
            config: None,
            port: None,
            baud: None,
            dry_run: true,
        };
        assert!(send(&link, Action::Pump { state: crate::Switch::On }).is_ok());
    }
}
