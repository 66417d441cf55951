//! Integration tests for device sessions over simulated transports.
//!
//! These tests drive full sessions (runner thread, transport adapter, simulated
//! device) through the public API only.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;
use vns_session::sim::{SimDevice, SimGatt, SimShellClient};
use vns_session::{
    BatteryCapable, CommandNames, ConfigBlob, ConfigCapable, ConfigKind, DeviceError,
    DeviceSession, Endpoint, GattProfile, GattTransport, Management, ManagedDevice,
    NotifiableCapable, RunnerConfig, SessionConfig, SessionState, ShellTransport, Tracker,
};

/// Helper to open and connect a serial session.
fn serial_session(device: &SimDevice) -> ManagedDevice<SimShellClient> {
    let session = DeviceSession::open(
        device.address(),
        ShellTransport::new(device.shell(), CommandNames::default()),
        SessionConfig::default(),
        &RunnerConfig::default(),
    )
    .expect("runner should start");
    session.connect_default().expect("connect should succeed");
    session
}

/// Helper to open and connect a BLE tracker.
fn ble_tracker(device: &SimDevice) -> Tracker<GattTransport<SimGatt>> {
    let session = DeviceSession::open(
        device.address(),
        GattTransport::new(device.gatt(), GattProfile::default()),
        SessionConfig::default(),
        &RunnerConfig::default(),
    )
    .expect("runner should start");
    session.connect_default().expect("connect should succeed");
    Tracker::new(session)
}

// ============================================================================
// Two-layer results
// ============================================================================

#[test]
fn test_shell_rejection_is_not_a_transport_error() {
    let device = SimDevice::new("/dev/ttyACM0");
    let session = serial_session(&device);

    // Delivered, but refused: no stim config has been stored yet.
    let err = session.stim_config().unwrap_err();
    assert!(err.is_protocol(), "expected protocol error, got {err:?}");

    device.set_offline(true);
    let err = session.battery_level().unwrap_err();
    assert!(
        matches!(err, DeviceError::Transport(_)),
        "expected transport error, got {err:?}"
    );
}

#[test]
fn test_config_blob_survives_serial_round_trip() {
    let device = SimDevice::new("/dev/ttyACM0");
    let session = serial_session(&device);

    let blob = ConfigBlob::new((0..=255u8).rev().collect());
    session
        .set_config(ConfigKind::Stim, &blob)
        .expect("cfg set should succeed");
    assert_eq!(session.stim_config().expect("cfg get should succeed"), blob);
}

#[test]
fn test_version_over_serial() {
    let device = SimDevice::new("/dev/ttyACM0");
    device.update(|s| s.version = "2.1.0+3".to_string());
    let session = serial_session(&device);
    assert_eq!(session.version().unwrap(), "2.1.0+3");
}

// ============================================================================
// Deadlines
// ============================================================================

#[test]
#[serial]
fn test_hung_operation_returns_at_deadline() {
    let device = SimDevice::new("/dev/ttyACM1");
    let session = serial_session(&device);
    device.configure(|b| b.hang_commands = true);

    let started = Instant::now();
    let err = session
        .read_value(Endpoint::Battery, Duration::from_millis(10))
        .unwrap_err();
    assert_eq!(err, DeviceError::Timeout(Duration::from_millis(10)));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
#[serial]
fn test_sessions_do_not_block_each_other() {
    let slow = SimDevice::new("/dev/ttyACM1");
    let fast = SimDevice::new("/dev/ttyACM2");
    slow.configure(|b| b.command_delay = Duration::from_millis(300));

    let slow_session = Arc::new(serial_session(&slow));
    let fast_session = serial_session(&fast);

    let worker = slow_session.clone();
    let handle = thread::spawn(move || worker.battery_level());

    thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    assert_eq!(fast_session.battery_level().unwrap(), 100);
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(handle.join().unwrap().unwrap(), 100);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
#[serial]
fn test_closed_session_fails_fast() {
    let device = SimDevice::new("AA:BB:CC:00:11:22");
    let tracker = ble_tracker(&device);
    let session = tracker.into_session();
    session.close();

    let started = Instant::now();
    assert_eq!(
        session.battery_level(),
        Err(DeviceError::InvalidState(SessionState::Closed))
    );
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_reboot_drops_link() {
    let device = SimDevice::new("/dev/ttyACM3");
    let session = serial_session(&device);
    session.reboot().expect("reboot should succeed");
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(device.state().resets, 1);

    // A fresh connect on the same session works once the device is back.
    session.connect_default().expect("reconnect should succeed");
    assert!(session.is_connected());
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn test_telemetry_in_order_and_stoppable() {
    let device = SimDevice::new("AA:BB:CC:00:11:22");
    let tracker = ble_tracker(&device);

    let (tx, rx) = crossbeam_channel::unbounded();
    tracker
        .start_telemetry(move |payload| {
            let _ = tx.send(payload);
        })
        .expect("subscribe should succeed");

    let telemetry = GattProfile::default().telemetry;
    for i in 0..50u16 {
        assert!(device.notify(telemetry, i.to_le_bytes().to_vec()));
    }
    for i in 0..50u16 {
        let payload = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("notification should arrive");
        assert_eq!(payload, i.to_le_bytes().to_vec());
    }

    tracker.stop_telemetry().expect("unsubscribe should succeed");
    assert!(!device.notify(telemetry, vec![0]));
}

#[test]
fn test_telemetry_unsupported_over_serial() {
    let device = SimDevice::new("/dev/ttyACM0");
    let session = serial_session(&device);
    let err = session
        .subscribe(Endpoint::Telemetry, |_| {}, Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, DeviceError::Unsupported(_)));
}
