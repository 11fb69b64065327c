//! Integration tests for the device link against the in-memory board.
//!
//! Every test drives a real [`DeviceManager`] (threads, timers and all) with
//! a [`MockConnector`] standing in for the serial port. Tests that measure
//! timing run under `#[serial]` so they do not compete for CPU.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anygrow_link::mock::MockConnector;
use anygrow_link::{ConnectionState, DeviceManager, LinkConfig, LinkError, LinkEvent};
use anygrow_protocol::{
    ChannelSetting, Command, LedMode, PacketCodec, ProtocolError, SensorValues,
};
use crossbeam_channel::Receiver;
use serial_test::serial;

const WAIT: Duration = Duration::from_secs(5);

/// Fast timings, no background polling.
fn quiet_config() -> LinkConfig {
    LinkConfig::default()
        .with_ticks(Duration::from_millis(20), Duration::from_millis(20))
        .with_sensor_polling(false)
        .with_retry_delays(Duration::from_millis(200), Duration::from_millis(200))
}

fn manager(config: LinkConfig, mock: &MockConnector) -> (DeviceManager, Receiver<LinkEvent>) {
    let manager = DeviceManager::new(config, Arc::new(mock.clone())).unwrap();
    let events = manager.subscribe();
    (manager, events)
}

/// Poll `cond` every 10ms until it holds or `WAIT` expires.
fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

/// Consume events until `wanted` arrives, returning everything seen before it.
fn events_until(rx: &Receiver<LinkEvent>, wanted: &LinkEvent) -> Vec<LinkEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if &event == wanted => return seen,
            Ok(event) => seen.push(event),
            Err(_) => panic!("timed out waiting for {:?}; saw {:?}", wanted, seen),
        }
    }
}

fn connected() -> LinkEvent {
    LinkEvent::StateChanged(ConnectionState::Connected)
}

fn disconnected() -> LinkEvent {
    LinkEvent::StateChanged(ConnectionState::Disconnected)
}

fn count(events: &[LinkEvent], wanted: &LinkEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

// ============================================================================
// Command pacing
// ============================================================================

#[test]
#[serial]
fn test_rate_limit_spacing_and_order() {
    let mock = MockConnector::new();
    let (mut manager, events) = manager(quiet_config(), &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    let commands: Vec<Command> = (0..10)
        .map(|i| match i % 4 {
            0 => Command::LedMode(LedMode::On),
            1 => Command::Pump { on: i % 2 == 0 },
            2 => Command::UvFilter { on: true },
            _ => Command::LedMode(LedMode::Mood),
        })
        .collect();
    for command in &commands {
        manager.submit(command.clone()).unwrap();
    }

    wait_until("10 writes", || mock.writes().len() == 10);
    let writes = mock.writes();
    let codec = PacketCodec::new();
    let interval = manager.config().command_interval();

    for (write, command) in writes.iter().zip(&commands) {
        assert_eq!(write.bytes.as_slice(), codec.encode(command).unwrap().as_ref());
    }
    for pair in writes.windows(2) {
        let gap = pair[1].at - pair[0].at;
        assert!(gap >= interval, "writes only {:?} apart", gap);
    }
    manager.stop();
}

#[test]
fn test_channel_count_rejected_before_wire() {
    let mock = MockConnector::new();
    let (mut manager, events) = manager(quiet_config(), &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    for count in [3, 5] {
        let result = manager.set_channels(vec![ChannelSetting::new(true, 500, 200); count]);
        assert!(matches!(
            result,
            Err(LinkError::Protocol(ProtocolError::ChannelCount {
                expected: 4,
                actual
            })) if actual == count
        ));
    }
    assert_eq!(manager.pending_commands(), 0);

    manager
        .set_channels(vec![ChannelSetting::new(true, 500, 200); 4])
        .unwrap();
    wait_until("channel frame", || mock.writes().len() == 1);
    assert_eq!(mock.writes()[0].bytes[3], 0x4D);
    manager.stop();
}

#[test]
fn test_commands_wait_while_disconnected() {
    let mock = MockConnector::new();
    mock.set_fail_opens(true);
    let config = quiet_config().with_retry_delays(Duration::from_secs(30), Duration::from_secs(30));
    let (mut manager, events) = manager(config, &mock);
    manager.start().unwrap();
    events_until(&events, &disconnected());

    manager.set_led_mode(LedMode::Off).unwrap();
    manager.set_pump(true).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(manager.pending_commands(), 2);

    mock.set_fail_opens(false);
    manager.reconnect().unwrap();
    wait_until("queued commands", || mock.writes().len() == 2);
    assert_eq!(manager.pending_commands(), 0);
    manager.stop();
}

// ============================================================================
// Reconnect supervision
// ============================================================================

#[test]
#[serial]
fn test_write_failure_reconnects_once() {
    let mock = MockConnector::new();
    let (mut manager, events) = manager(quiet_config(), &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    mock.fail_next_writes(1);
    manager.set_pump(true).unwrap();

    let between = events_until(&events, &connected());
    assert_eq!(count(&between, &disconnected()), 1, "events: {:?}", between);
    assert_eq!(manager.supervisor().scheduled_reconnects(), 1);
    assert_eq!(manager.supervisor().pending_reconnect(), None);
    assert_eq!(mock.open_count(), 2);
    assert_eq!(manager.state(), ConnectionState::Connected);

    // The command in flight during the failure is lost, later ones go out.
    assert!(mock.writes().is_empty());
    manager.set_pump(false).unwrap();
    wait_until("write after reconnect", || mock.writes().len() == 1);
    assert_eq!(mock.writes()[0].connection, 2);
    manager.stop();
}

#[test]
#[serial]
fn test_read_failure_reconnects_once() {
    let mock = MockConnector::new();
    let (mut manager, events) = manager(quiet_config(), &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    mock.fail_next_reads(1);
    let between = events_until(&events, &connected());
    assert_eq!(count(&between, &disconnected()), 1);
    assert!(between
        .iter()
        .any(|e| matches!(e, LinkEvent::StatusChanged(s) if s.contains("read error"))));
    assert_eq!(manager.supervisor().scheduled_reconnects(), 1);
    manager.stop();
}

#[test]
fn test_manual_reconnect_cancels_pending_timer() {
    let mock = MockConnector::new();
    let config = quiet_config().with_retry_delays(Duration::from_secs(30), Duration::from_secs(30));
    let (mut manager, events) = manager(config, &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    mock.fail_next_writes(1);
    manager.set_uv_filter(true).unwrap();
    events_until(&events, &disconnected());
    wait_until("pending timer", || manager.supervisor().pending_reconnect().is_some());

    manager.reconnect().unwrap();
    events_until(&events, &connected());
    assert_eq!(manager.supervisor().pending_reconnect(), None);
    assert_eq!(manager.supervisor().scheduled_reconnects(), 1);
    assert_eq!(mock.open_count(), 2);
    manager.stop();
}

#[test]
fn test_reconnect_while_failing_keeps_one_timer() {
    let mock = MockConnector::new();
    mock.set_fail_opens(true);
    let config = quiet_config().with_retry_delays(Duration::from_secs(30), Duration::from_secs(30));
    let (mut manager, events) = manager(config, &mock);
    manager.start().unwrap();
    events_until(&events, &disconnected());
    wait_until("first timer", || manager.supervisor().scheduled_reconnects() == 1);
    let first = manager.supervisor().pending_reconnect().unwrap();

    manager.reconnect().unwrap();
    wait_until("second attempt", || mock.failed_open_count() == 2);
    wait_until("re-armed timer", || manager.supervisor().scheduled_reconnects() == 2);
    let second = manager.supervisor().pending_reconnect().unwrap();
    assert!(second > first);

    // Further schedule requests are no-ops while a timer is armed.
    assert!(!manager.supervisor().schedule_reconnect(Duration::from_millis(1)));
    assert_eq!(manager.supervisor().pending_reconnect(), Some(second));
    manager.stop();
}

#[test]
fn test_open_failure_lists_ports() {
    let mock = MockConnector::new();
    mock.set_fail_opens(true);
    let (mut manager, events) = manager(quiet_config(), &mock);
    manager.start().unwrap();

    events_until(&events, &disconnected());
    let status = loop {
        match events.recv_timeout(WAIT).unwrap() {
            LinkEvent::StatusChanged(text) if text.starts_with("Failed to open") => break text,
            _ => continue,
        }
    };
    assert!(status.contains("mock port is set to fail"), "{}", status);
    manager.stop();
}

// ============================================================================
// Telemetry
// ============================================================================

#[test]
fn test_polling_produces_readings() {
    let values = SensorValues {
        temperature: 25.3,
        humidity: 60.1,
        co2_ppm: 800,
        illuminance_lux: 1500,
    };
    let mock = MockConnector::with_telemetry(values);
    let config = quiet_config()
        .with_sensor_polling(true)
        .with_poll_interval(Duration::from_millis(100));
    let (mut manager, events) = manager(config, &mock);
    manager.start().unwrap();

    let before = events_until(&events, &LinkEvent::RequestSent { total: 1 });
    assert!(before.contains(&connected()));

    let mut raw = None;
    let reading = loop {
        match events.recv_timeout(WAIT).unwrap() {
            LinkEvent::RawBytesObserved(text) => raw = Some(text),
            LinkEvent::DataUpdated(reading) => break reading,
            _ => continue,
        }
    };
    assert_eq!(reading.values(), values);
    assert!(raw.unwrap().starts_with("02,02,ff,"));
    assert!(manager.requests_sent() >= 1);
    assert_eq!(manager.last_reading().map(|r| r.co2_ppm), Some(800));
    manager.stop();
}

#[test]
fn test_frame_split_across_reads() {
    let mock = MockConnector::new();
    let (mut manager, events) = manager(quiet_config(), &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    let frame = PacketCodec::encode_telemetry(&SensorValues {
        temperature: 19.9,
        humidity: 45.5,
        co2_ppm: 1234,
        illuminance_lux: 42,
    });
    mock.inject(&frame[..11]);
    events_until(&events, &LinkEvent::RawBytesObserved(anygrow_protocol::format_raw(&frame[..11])));
    mock.inject(&frame[11..]);

    let reading = loop {
        if let LinkEvent::DataUpdated(reading) = events.recv_timeout(WAIT).unwrap() {
            break reading;
        }
    };
    assert_eq!(reading.temperature, 19.9);
    assert_eq!(reading.illuminance_lux, 42);
    manager.stop();
}

#[test]
fn test_co2_spike_suppressed() {
    let mock = MockConnector::new();
    let (mut manager, events) = manager(quiet_config(), &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    let mut co2 = Vec::new();
    for ppm in [800, 2500, 900] {
        mock.inject(&PacketCodec::encode_telemetry(&SensorValues {
            temperature: 22.0,
            humidity: 50.0,
            co2_ppm: ppm,
            illuminance_lux: 100,
        }));
        loop {
            if let LinkEvent::DataUpdated(reading) = events.recv_timeout(WAIT).unwrap() {
                co2.push(reading.co2_ppm);
                break;
            }
        }
    }
    assert_eq!(co2, vec![800, 800, 900]);
    manager.stop();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_stop_discards_queue_and_cancels_timer() {
    let mock = MockConnector::new();
    mock.set_fail_opens(true);
    let config =
        quiet_config().with_retry_delays(Duration::from_millis(100), Duration::from_millis(100));
    let (mut manager, events) = manager(config, &mock);

    assert!(matches!(manager.reconnect(), Err(LinkError::NotRunning)));
    manager.start().unwrap();
    assert!(matches!(manager.start(), Err(LinkError::AlreadyRunning)));
    events_until(&events, &disconnected());

    manager.set_led_mode(LedMode::On).unwrap();
    manager.request_sensor_data().unwrap();
    assert_eq!(manager.pending_commands(), 2);

    manager.stop();
    assert!(!manager.is_running());
    assert_eq!(manager.pending_commands(), 0);
    assert_eq!(manager.supervisor().pending_reconnect(), None);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let attempts = mock.failed_open_count();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(mock.failed_open_count(), attempts, "no attempts after stop");
    assert!(mock.writes().is_empty());
    manager.stop();
}

#[test]
fn test_restart_after_stop() {
    let mock = MockConnector::new();
    let (mut manager, events) = manager(quiet_config(), &mock);

    manager.start().unwrap();
    events_until(&events, &connected());
    manager.stop();
    events_until(&events, &disconnected());

    manager.start().unwrap();
    events_until(&events, &connected());
    manager.sync_time().unwrap();
    wait_until("time sync", || mock.writes().len() == 1);
    assert_eq!(mock.writes()[0].bytes[3], 0x54);
    assert_eq!(mock.open_count(), 2);
}

#[test]
fn test_command_sender_from_other_threads() {
    let mock = MockConnector::new();
    let config = quiet_config().with_command_interval(Duration::from_millis(10));
    let (mut manager, events) = manager(config, &mock);
    manager.start().unwrap();
    events_until(&events, &connected());

    let producers: Vec<_> = (0..3)
        .map(|_| {
            let sender = manager.command_sender();
            thread::spawn(move || {
                for _ in 0..4 {
                    sender.submit(Command::SensorRequest).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    wait_until("12 requests", || manager.requests_sent() == 12);
    assert_eq!(mock.writes().len(), 12);
    manager.stop();
}
