//! Fleet operations against simulated devices.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use common::{quick_session, FakeFleet};
use serial_test::serial;
use vns_fleet::{DfuConfig, DfuPhase, DfuSequencer, FleetConfig, FleetError, Orchestrator};
use vns_session::sim::SimMode;
use vns_session::{ConfigBlob, ConfigKind, DeviceAddress, DeviceError};

fn dfu_config() -> DfuConfig {
    DfuConfig {
        settle_delay: Duration::from_millis(10),
        reconnect_retries: 2,
        reconnect_timeout: Duration::from_millis(100),
        upload_timeout: Duration::from_secs(5),
        ..DfuConfig::default()
    }
}

fn image(len: usize) -> Arc<[u8]> {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

// ============================================================================
// Fan-out
// ============================================================================

#[test]
#[serial]
fn test_results_follow_input_order_with_hung_device() {
    let fleet = FakeFleet::new(3);
    fleet.device(1).update(|s| s.battery = 81);
    fleet.device(3).update(|s| s.battery = 43);
    fleet.device(2).configure(|b| b.hang_commands = true);
    let orchestrator = fleet.orchestrator(quick_session());

    let started = Instant::now();
    let batch = orchestrator.battery_levels(&fleet.addresses());
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "hung device held the batch for {:?}",
        started.elapsed()
    );

    let results = batch.into_results();
    assert_eq!(results.len(), 3);
    for (slot, (address, _)) in results.iter().enumerate() {
        assert_eq!(address, &fleet.addresses()[slot]);
    }
    assert_eq!(results[0].1, Ok(81));
    assert!(matches!(results[1].1, Err(DeviceError::Timeout(_))));
    assert_eq!(results[2].1, Ok(43));
}

#[test]
#[serial]
fn test_unreachable_device_fails_its_slot_only() {
    let fleet = FakeFleet::new(3);
    fleet.device(2).set_offline(true);
    let orchestrator = fleet.orchestrator(quick_session());

    let batch = orchestrator.versions(&fleet.addresses());
    assert_eq!(batch.failures().len(), 1);
    assert_eq!(batch.failures()[0].0, &fleet.device(2).address());
    match batch.get(1) {
        Some(Err(DeviceError::Connection { attempts, .. })) => assert_eq!(*attempts, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }

    match batch.ensure_all_ok() {
        Err(FleetError::PartialFailure { failed, total }) => {
            assert_eq!(failed, vec![fleet.device(2).address()]);
            assert_eq!(total, 3);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_unknown_address_is_reported_in_its_slot() {
    let fleet = FakeFleet::new(1);
    let orchestrator = fleet.orchestrator(quick_session());
    let mut addresses = fleet.addresses();
    addresses.push(DeviceAddress::new("/dev/ttyNOPE"));

    let batch = orchestrator.battery_levels(&addresses);
    assert_eq!(batch.get(0), Some(&Ok(100)));
    assert!(matches!(batch.get(1), Some(Err(DeviceError::Transport(_)))));
}

#[test]
fn test_sessions_are_closed_after_fan_out() {
    let fleet = FakeFleet::new(2);
    let orchestrator = fleet.orchestrator(quick_session());

    let batch = orchestrator.versions(&fleet.addresses());
    assert!(batch.is_all_ok());
    for device in &fleet.devices {
        assert!(!device.is_connected());
    }
}

#[test]
fn test_config_round_trip_through_orchestrator() {
    let fleet = FakeFleet::new(1);
    let orchestrator = fleet.orchestrator(quick_session());
    let address = fleet.device(1).address();
    let blob = ConfigBlob::new(vec![0x10, 0x20, 0x30]);

    orchestrator
        .set_config(&address, ConfigKind::Stim, &blob)
        .expect("set config");
    let read = orchestrator
        .get_config(&address, ConfigKind::Stim)
        .expect("get config");
    assert_eq!(read, blob);
}

#[test]
fn test_endpoint_table_from_config_reaches_transport() {
    let fleet = FakeFleet::new(2);
    let config = FleetConfig::from_yaml_str(
        "session:\n  connect_timeout: 100\nendpoints:\n  shell:\n    bond: pair\n    bond_name: left\n",
    )
    .expect("valid config");
    let orchestrator = Orchestrator::from_config(fleet.connector(), &config);
    assert_eq!(orchestrator.endpoints().shell.bond, "pair");

    let (a, b) = (fleet.device(1), fleet.device(2));
    orchestrator
        .pair(&a.address(), &b.address())
        .expect("pairing succeeds");

    let commands = a.commands();
    assert!(
        commands
            .iter()
            .any(|argv| argv.first().map(String::as_str) == Some("pair")
                && argv.iter().any(|token| token == "left")),
        "{commands:?}"
    );
    assert!(commands.iter().all(|argv| argv.first().map(String::as_str) != Some("bond")));
    assert_eq!(a.state().peer_key, b.state().oob_key);
}

// ============================================================================
// Routines
// ============================================================================

#[test]
fn test_set_time_reports_previous_and_current() {
    let fleet = FakeFleet::new(2);
    fleet
        .device(1)
        .update(|s| s.clock = Some("2020-01-01T00:00:00.000".to_string()));
    let orchestrator = fleet.orchestrator(quick_session());
    let time = NaiveDate::from_ymd_opt(2026, 3, 14)
        .and_then(|d| d.and_hms_milli_opt(15, 9, 26, 535))
        .expect("valid time");

    let updates = orchestrator
        .set_time(&fleet.addresses(), time)
        .ensure_all_ok()
        .expect("all clocks set");

    assert_eq!(updates[0].previous.as_deref(), Some("2020-01-01T00:00:00.000"));
    assert_eq!(updates[1].previous, None);
    for update in &updates {
        assert_eq!(update.current.as_deref(), Some("2026-03-14T15:09:26.535"));
    }
}

#[test]
fn test_factory_reset_erases_and_resets() {
    let fleet = FakeFleet::new(2);
    fleet.device(1).update(|s| s.peer_key = Some("peer".to_string()));
    let orchestrator = fleet.orchestrator(quick_session());

    let batch = orchestrator.factory_reset(&fleet.addresses());
    assert!(batch.is_all_ok());
    for device in &fleet.devices {
        let state = device.state();
        assert_eq!(state.erases, 1);
        assert_eq!(state.resets, 1);
        assert_eq!(state.peer_key, None);
    }
}

// ============================================================================
// Pairing
// ============================================================================

#[test]
fn test_pairing_swaps_keys() {
    let fleet = FakeFleet::new(2);
    let orchestrator = fleet.orchestrator(quick_session());
    let (a, b) = (fleet.device(1), fleet.device(2));

    orchestrator
        .pair(&a.address(), &b.address())
        .expect("pairing succeeds");

    assert_eq!(a.state().peer_key, b.state().oob_key);
    assert_eq!(b.state().peer_key, a.state().oob_key);
}

#[test]
fn test_pairing_aborts_without_writes_when_a_key_is_missing() {
    let fleet = FakeFleet::new(2);
    let (a, b) = (fleet.device(1), fleet.device(2));
    a.update(|s| s.oob_key = None);
    let orchestrator = fleet.orchestrator(quick_session());

    let result = orchestrator.pair(&a.address(), &b.address());
    assert!(matches!(result, Err(FleetError::Pairing(_))), "{result:?}");

    assert_eq!(a.write_count(), 0);
    assert_eq!(b.write_count(), 0);
    assert_eq!(a.state().peer_key, None);
    assert_eq!(b.state().peer_key, None);
}

#[test]
#[serial]
fn test_pairing_aborts_when_a_device_is_unreachable() {
    let fleet = FakeFleet::new(2);
    let (a, b) = (fleet.device(1), fleet.device(2));
    b.set_offline(true);
    let orchestrator = fleet.orchestrator(quick_session());

    let result = orchestrator.pair(&a.address(), &b.address());
    assert!(matches!(result, Err(FleetError::Pairing(_))), "{result:?}");
    assert_eq!(a.write_count(), 0);
}

#[test]
#[serial]
fn test_unpair_reports_each_side() {
    let fleet = FakeFleet::new(2);
    let (a, b) = (fleet.device(1), fleet.device(2));
    a.update(|s| s.peer_key = Some("key-b".to_string()));
    b.set_offline(true);
    let orchestrator = fleet.orchestrator(quick_session());

    let batch = orchestrator.unpair(&a.address(), &b.address());
    assert_eq!(batch.get(0), Some(&Ok(())));
    assert!(batch.get(1).is_some_and(|outcome| outcome.is_err()));
    assert_eq!(a.state().peer_key, None);
}

// ============================================================================
// DFU
// ============================================================================

#[test]
#[serial]
fn test_dfu_lost_device_fails_alone() {
    let fleet = FakeFleet::new(3);
    fleet.device(2).configure(|b| b.offline_after_reset = true);
    let orchestrator = fleet.orchestrator(quick_session());
    let image = image(1000);

    let report = DfuSequencer::new(&orchestrator, dfu_config()).run(&fleet.addresses(), image.clone());

    assert_eq!(report.jobs.len(), 3);
    for n in [1, 3] {
        let job = &report.jobs[n - 1];
        assert_eq!(job.phase, DfuPhase::Done, "device {n}: {job:?}");
        let state = fleet.device(n).state();
        assert_eq!(state.image, image.to_vec());
        assert_eq!(state.mode, SimMode::Application);
        assert_eq!(state.resets, 2);
    }

    let lost = &report.jobs[1];
    assert_eq!(lost.phase, DfuPhase::Failed);
    assert_eq!(lost.failed_during(), Some(DfuPhase::AwaitingReconnect));
    let state = fleet.device(2).state();
    assert_eq!(state.resets, 1);
    assert!(state.image.is_empty());
    // One application connect plus the bootloader reconnect attempts; no retry of the job.
    assert_eq!(fleet.device(2).connect_attempts(), 1 + dfu_config().reconnect_retries);
}

#[test]
#[serial]
fn test_dfu_hung_devices_do_not_delay_siblings() {
    let fleet = FakeFleet::new(4);
    for n in 2..=4 {
        fleet.device(n).configure(|b| b.hang_commands = true);
    }
    let session = vns_session::SessionConfig {
        operation_timeout: Duration::from_millis(200),
        disconnect_timeout: Duration::from_millis(500),
        ..quick_session()
    };
    let orchestrator = fleet.orchestrator(session);

    let started = Instant::now();
    let report = DfuSequencer::new(&orchestrator, dfu_config()).run(&fleet.addresses(), image(256));
    let elapsed = started.elapsed();

    let phases: Vec<DfuPhase> = report.jobs.iter().map(|job| job.phase).collect();
    assert_eq!(
        phases,
        vec![DfuPhase::Done, DfuPhase::Failed, DfuPhase::Failed, DfuPhase::Failed]
    );
    for job in &report.jobs[1..] {
        assert_eq!(job.failed_during(), Some(DfuPhase::BootRequested));
    }
    // One operation deadline plus one disconnect deadline, not one per hung device.
    assert!(elapsed < Duration::from_millis(1200), "dfu took {elapsed:?}");
}

#[test]
#[serial]
fn test_dfu_progress_is_monotonic_per_device() {
    let fleet = FakeFleet::new(2);
    for device in &fleet.devices {
        device.configure(|b| b.chunk_size = 64);
    }
    let orchestrator = fleet.orchestrator(quick_session());
    let mut sequencer = DfuSequencer::new(
        &orchestrator,
        DfuConfig {
            progress_capacity: 1024,
            ..dfu_config()
        },
    );
    let progress = sequencer.progress();

    let report = sequencer.run(&fleet.addresses(), image(1000));
    assert!(report.is_all_ok(), "{:?}", report.failures());

    let events: Vec<_> = progress.try_iter().collect();
    for index in 0..2 {
        let offsets: Vec<usize> = events
            .iter()
            .filter(|event| event.index == index)
            .map(|event| event.offset)
            .collect();
        assert_eq!(offsets.len(), 16, "device {index}: {offsets:?}");
        assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{offsets:?}");
        assert_eq!(offsets.last(), Some(&1000));
    }
    assert!(events.iter().all(|event| event.total == 1000));
}

#[test]
#[serial]
fn test_dfu_upload_failure_skips_final_reboot() {
    let fleet = FakeFleet::new(2);
    fleet.device(1).configure(|b| b.fail_upload_at = Some(512));
    let orchestrator = fleet.orchestrator(quick_session());

    let report = DfuSequencer::new(&orchestrator, dfu_config()).run(&fleet.addresses(), image(1000));

    assert_eq!(report.jobs[0].failed_during(), Some(DfuPhase::Uploading));
    assert_eq!(fleet.device(1).state().resets, 1);
    assert_eq!(fleet.device(1).state().mode, SimMode::Bootloader);
    assert_eq!(report.jobs[1].phase, DfuPhase::Done);

    let batch = report.into_batch();
    assert!(batch.get(0).is_some_and(|outcome| outcome.is_err()));
    assert_eq!(batch.get(1), Some(&Ok(())));
}

#[test]
fn test_dfu_rejects_empty_image() {
    let fleet = FakeFleet::new(2);
    let orchestrator = fleet.orchestrator(quick_session());

    let report = DfuSequencer::new(&orchestrator, dfu_config()).run(&fleet.addresses(), image(0));
    assert_eq!(report.failures().len(), 2);
    for device in &fleet.devices {
        assert_eq!(device.connect_attempts(), 0);
    }
}
