use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use haptic_bridge::config::io::SettingsIO;
use haptic_bridge::config::store::SettingsStore;
use haptic_bridge::config::types::Settings;
use haptic_bridge::{Capability, CommandFailure, EventKind, HapticBridge, InMemoryTransport, SessionState};

const WAIT: Duration = Duration::from_secs(3);

fn bridge_with(transport: &InMemoryTransport, settings: Settings) -> HapticBridge {
    HapticBridge::new(Arc::new(transport.clone()), SettingsStore::in_memory(settings)).unwrap()
}

/// Polls until `done` holds for the collected events, returning everything collected.
fn collect_until<F>(bridge: &mut HapticBridge, done: F) -> Vec<EventKind>
where
    F: Fn(&[EventKind]) -> bool,
{
    let start = Instant::now();
    let mut events = vec![];
    loop {
        events.extend(bridge.poll_event_records().into_iter().map(|e| e.kind));
        if done(&events) || start.elapsed() > WAIT {
            return events;
        }
        sleep(Duration::from_millis(10));
    }
}

fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < WAIT, "Timed out: {}", what);
        sleep(Duration::from_millis(10));
    }
}

/// Connects and scans until `count` devices are connected. Events produced so far are drained.
fn connected_bridge(transport: &InMemoryTransport, settings: Settings, count: usize) -> HapticBridge {
    let mut bridge = bridge_with(transport, settings);
    assert!(bridge.connect());
    assert!(bridge.scan_for_devices());
    let events = collect_until(&mut bridge, |e| {
        e.contains(&EventKind::ScanStarted)
            && e.iter().filter(|e| matches!(e, EventKind::DeviceConnected { .. })).count() == count
    });
    assert!(events.contains(&EventKind::ScanStarted));
    assert_eq!(bridge.registry().connected().len(), count);
    bridge
}

fn connected(device: &str) -> EventKind {
    EventKind::DeviceConnected { device: device.to_string() }
}

#[test]
fn scanned_device_is_listed_connected_and_announced() {
    let transport = InMemoryTransport::new().with_device("Lovense Edge", vec![Capability::Vibrate, Capability::Vibrate]);
    let mut bridge = bridge_with(&transport, Settings::default());

    assert!(bridge.connect());
    assert!(bridge.scan_for_devices());
    let events = collect_until(&mut bridge, |e| e.contains(&connected("Lovense Edge")));

    let started = events.iter().position(|e| *e == EventKind::ScanStarted);
    let found = events.iter().position(|e| *e == connected("Lovense Edge"));
    assert!(started.is_some() && found.is_some());
    assert!(started < found, "ScanStarted must precede discovery: {:?}", events);
    assert!(bridge.get_devices().contains(&String::from("Lovense Edge")));
    assert!(bridge.get_device_connected("Lovense Edge"));
    assert_eq!(bridge.get_device_capabilities("Lovense Edge"), vec![String::from("Vibrate"), String::from("Vibrate")]);
    assert!(bridge.get_device_capabilities("not exist").is_empty());
    assert!(!bridge.get_device_connected("not exist"));
}

#[test]
fn stop_scan_completes_with_scan_ended() {
    let transport = InMemoryTransport::new();
    let mut bridge = bridge_with(&transport, Settings::default());
    assert!(bridge.connect());
    assert!(bridge.scan_for_devices());
    wait_for(|| transport.is_scanning(), "scanning");

    assert!(bridge.stop_scan());
    let events = collect_until(&mut bridge, |e| e.contains(&EventKind::ScanEnded));
    assert!(events.contains(&EventKind::ScanEnded));
}

#[test]
fn connect_is_idempotent() {
    let transport = InMemoryTransport::new();
    let mut bridge = bridge_with(&transport, Settings::default());

    assert_eq!(bridge.state(), SessionState::Uninit);
    assert!(bridge.connect());
    assert!(bridge.connect());
    assert_eq!(bridge.state(), SessionState::Active);
}

#[test]
fn unreachable_backend_fails_connect_without_crashing() {
    let transport = InMemoryTransport::new().unreachable();
    let mut bridge = bridge_with(&transport, Settings::default());

    assert!(!bridge.connect());
    assert_eq!(bridge.state(), SessionState::Uninit);
    assert!(!bridge.scan_for_devices());
    assert!(!bridge.vibrate(1.0, 1.0));
    assert!(matches!(bridge.poll_event_records()[0].kind, EventKind::Error { .. }));
}

#[test]
fn out_of_range_speed_is_clamped_without_rejection() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 1);

    assert!(bridge.vibrate(1.5, 2.0));
    let events = collect_until(&mut bridge, |e| !e.is_empty());

    assert_eq!(events, vec![EventKind::DeviceVibrated { device: String::from("vib1"), speed: 1.0, clamped: true }]);
    assert!(transport.calls_for("vib1")[0].vibration_started_strength(1.0));
}

#[test]
fn event_without_subscribers_issues_no_commands() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 1);
    bridge.settings_set_events("vib1", vec![String::from("hit")]);

    assert!(bridge.vibrate_events(0.5, 1.0, vec![String::from("orgasm")]));
    sleep(Duration::from_millis(200));

    assert!(transport.calls().is_empty());
    assert!(bridge.poll_events().is_empty());
}

#[test]
fn blank_event_tags_issue_no_commands() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 1);

    assert!(bridge.vibrate_events(0.5, 1.0, vec![String::from(" "), String::new()]));
    sleep(Duration::from_millis(200));

    assert!(transport.calls().is_empty());
    assert!(bridge.poll_events().is_empty());
}

#[test]
fn event_scoped_vibrate_only_reaches_subscribers() {
    let transport = InMemoryTransport::new()
        .with_device("vib1", vec![Capability::Vibrate])
        .with_device("vib2", vec![Capability::Vibrate]);
    let bridge = connected_bridge(&transport, Settings::default(), 2);
    bridge.settings_set_events("vib1", vec![String::from("Some Event")]);

    assert!(bridge.vibrate_events(1.0, 0.05, vec![String::from(" SOME event ")]));
    wait_for(|| transport.calls_for("vib1").len() == 2, "vibrate and revert");

    assert!(transport.calls_for("vib2").is_empty());
    assert_eq!(bridge.settings_get_events("vib1"), vec![String::from("some event")]);
}

#[test]
fn disabled_device_is_never_vibrated() {
    let transport = InMemoryTransport::new()
        .with_device("vib1", vec![Capability::Vibrate])
        .with_device("vib2", vec![Capability::Vibrate])
        .with_device("vib3", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 3);
    bridge.settings_set_enabled("vib2", false);

    assert!(bridge.vibrate(1.0, 0.05));
    wait_for(|| transport.calls_for("vib1").len() == 2 && transport.calls_for("vib3").len() == 2, "others vibrated");

    assert!(transport.calls_for("vib2").is_empty());
    let events = bridge.poll_event_records();
    assert!(events.iter().all(|e| e.kind.device() != Some("vib2")));
}

#[test]
fn single_target_on_disabled_device_reports_failure() {
    let mut settings = Settings::default();
    settings.set_enabled("vib1", false);
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, settings, 1);

    assert!(bridge.vibrate_device("vib1", 1.0, 1.0));
    let events = collect_until(&mut bridge, |e| !e.is_empty());

    assert_eq!(events, vec![EventKind::CommandFailed {
        device: Some(String::from("vib1")),
        reason: CommandFailure::DeviceDisabled,
    }]);
    assert!(transport.calls().is_empty());
}

#[test]
fn most_recent_command_governs_revert() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let bridge = connected_bridge(&transport, Settings::default(), 1);

    assert!(bridge.vibrate(0.2, 0.1));
    sleep(Duration::from_millis(30));
    assert!(bridge.vibrate(0.8, 0.5));
    sleep(Duration::from_millis(250));

    let calls = transport.calls_for("vib1");
    assert_eq!(calls.len(), 2, "first revert must not land");
    assert!(calls[1].vibration_started_strength(0.8));

    wait_for(|| transport.calls_for("vib1").len() == 3, "second revert");
    assert!(transport.calls_for("vib1")[2].is_stop());
}

#[test]
fn stop_all_stops_infinite_vibration() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let bridge = connected_bridge(&transport, Settings::default(), 1);

    assert!(bridge.vibrate(1.0, f32::INFINITY));
    wait_for(|| transport.calls_for("vib1").len() == 1, "started");
    assert!(bridge.stop_all());
    wait_for(|| transport.calls_for("vib1").len() == 2, "stopped");

    assert!(transport.calls_for("vib1")[1].is_stop());
}

#[test]
fn overlong_duration_vibrates_until_stopped() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let bridge = connected_bridge(&transport, Settings::default(), 1);

    assert!(bridge.vibrate(1.0, 1e30));
    assert!(bridge.vibrate_device("vib1", 0.5, f32::MAX));
    wait_for(|| transport.calls_for("vib1").len() == 2, "both started");
    sleep(Duration::from_millis(100));

    assert_eq!(transport.calls_for("vib1").len(), 2);
    assert!(transport.calls_for("vib1")[1].vibration_started_strength(0.5));
    assert!(bridge.stop_all());
    wait_for(|| transport.calls_for("vib1").len() == 3, "stopped");
}

#[test]
fn failing_device_is_downgraded_and_others_keep_working() {
    let transport = InMemoryTransport::new()
        .with_device("vib1", vec![Capability::Vibrate])
        .with_device("vib2", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 2);
    transport.fail_device("vib1");

    assert!(bridge.vibrate(0.5, f32::INFINITY));
    let events = collect_until(&mut bridge, |e| e.len() >= 2);

    assert!(events.iter().any(|e| matches!(e, EventKind::CommandFailed { device: Some(d), .. } if d == "vib1")));
    assert!(events.iter().any(|e| matches!(e, EventKind::DeviceVibrated { device, .. } if device == "vib2")));
    assert!(!bridge.get_device_connected("vib1"));
}

#[test]
fn lost_device_is_announced_and_removed() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 1);

    transport.remove_device("vib1");
    let events = collect_until(&mut bridge, |e| !e.is_empty());

    assert_eq!(events, vec![EventKind::DeviceDisconnected { device: String::from("vib1") }]);
    assert!(!bridge.get_device_connected("vib1"));
}

#[test]
fn device_lost_after_failed_write_is_announced() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 1);
    transport.fail_device("vib1");

    assert!(bridge.vibrate(0.5, 1.0));
    let events = collect_until(&mut bridge, |e| !e.is_empty());
    assert!(matches!(&events[0], EventKind::CommandFailed { device: Some(d), .. } if d == "vib1"));

    transport.remove_device("vib1");
    let events = collect_until(&mut bridge, |e| !e.is_empty());

    assert_eq!(events, vec![EventKind::DeviceDisconnected { device: String::from("vib1") }]);
    assert!(bridge.registry().get("vib1").is_none());
}

#[test]
fn poll_drains_exactly_once() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = bridge_with(&transport, Settings::default());
    assert!(bridge.connect());
    assert!(bridge.scan_for_devices());
    wait_for(|| bridge.get_device_connected("vib1"), "vib1 connected");
    sleep(Duration::from_millis(50));

    let first = bridge.poll_event_records();
    assert_eq!(first.len(), 2);
    assert!(first.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(bridge.poll_events().is_empty());
}

#[test]
fn devices_known_from_settings_are_listed() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let bridge = connected_bridge(&transport, Settings::default(), 1);
    bridge.settings_set_enabled("foreign", true);

    assert_eq!(bridge.get_devices(), vec![String::from("vib1"), String::from("foreign")]);
    assert!(!bridge.get_device_connected("foreign"));
}

#[test]
fn close_stops_devices_and_everything_fails_afterwards() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let mut bridge = connected_bridge(&transport, Settings::default(), 1);
    assert!(bridge.vibrate(1.0, f32::INFINITY));
    wait_for(|| transport.calls_for("vib1").len() == 1, "started");

    assert!(bridge.close());
    assert!(transport.calls_for("vib1").last().unwrap().is_stop());

    assert_eq!(bridge.state(), SessionState::Closed);
    assert!(!bridge.close());
    assert!(!bridge.connect());
    assert!(!bridge.scan_for_devices());
    assert!(!bridge.stop_scan());
    assert!(!bridge.vibrate(1.0, 1.0));
    assert!(!bridge.vibrate_events(1.0, 1.0, vec![String::from("hit")]));
    assert!(!bridge.stop_all());
    assert!(!bridge.settings_store());
    assert!(!bridge.settings_get_enabled("vib1"));
    assert!(bridge.get_devices().is_empty());
    assert!(bridge.get_device_capabilities("vib1").is_empty());
    assert!(!bridge.get_device_connected("vib1"));
    assert!(bridge.poll_events().is_empty());
}

#[test]
fn close_while_scanning_returns() {
    let transport = InMemoryTransport::new();
    let mut bridge = bridge_with(&transport, Settings::default());
    assert!(bridge.connect());
    assert!(bridge.scan_for_devices());
    wait_for(|| transport.is_scanning(), "scanning");

    assert!(bridge.close());
    assert!(!transport.is_scanning());
    assert!(!transport.is_connected());
}

#[test]
fn slow_final_stop_still_disconnects_backend() {
    let transport = InMemoryTransport::new()
        .with_device("vib1", vec![Capability::Vibrate])
        .with_slow_stop(Duration::from_secs(4));
    let mut bridge = connected_bridge(&transport, Settings::default(), 1);
    assert!(bridge.vibrate(1.0, f32::INFINITY));
    wait_for(|| transport.calls_for("vib1").len() == 1, "started");

    let start = Instant::now();
    assert!(bridge.close());

    assert!(start.elapsed() < Duration::from_secs(6));
    assert!(!transport.is_connected());
    assert_eq!(bridge.state(), SessionState::Closed);
}

#[test]
fn close_without_connect_is_terminal() {
    let transport = InMemoryTransport::new();
    let mut bridge = bridge_with(&transport, Settings::default());

    assert!(bridge.close());
    assert!(!bridge.connect());
}

#[test]
fn settings_round_trip_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("haptic-bridge.json");
    let transport = InMemoryTransport::new();

    let bridge = HapticBridge::with_settings_file(Arc::new(transport.clone()), SettingsIO::at_path(&path)).unwrap();
    assert!(bridge.settings_get_enabled("Lovense Edge"));
    bridge.settings_set_enabled("Lovense Edge", false);
    assert!(!bridge.settings_get_enabled("Lovense Edge"));
    assert!(bridge.settings_store());
    drop(bridge);

    let reloaded = HapticBridge::with_settings_file(Arc::new(transport), SettingsIO::at_path(&path)).unwrap();
    assert!(!reloaded.settings_get_enabled("Lovense Edge"));
}

#[test]
fn settings_toggle_before_discovery_applies_on_connect() {
    let transport = InMemoryTransport::new().with_device("vib1", vec![Capability::Vibrate]);
    let bridge = bridge_with(&transport, Settings::default());
    bridge.settings_set_enabled("vib1", false);

    let mut bridge = bridge;
    assert!(bridge.connect());
    assert!(bridge.scan_for_devices());
    wait_for(|| bridge.get_device_connected("vib1"), "vib1 connected");

    assert_eq!(bridge.registry().get("vib1").map(|d| d.enabled), Some(false));
}
