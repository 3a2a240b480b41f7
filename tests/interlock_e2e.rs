use std::sync::{Arc, Mutex};
use std::thread;

use railtwin::{
    CommandMode, CommandStatus, EventKind, EventLog, EventOutcome, GateState, Interlock,
    SafetyRules, SignalState, TrackId, TrackState, TrainSnapshot,
};

fn station() -> Interlock {
    let mut interlock = Interlock::new(SafetyRules::default()).unwrap();
    for (track, signal) in [("P1", "S1"), ("P2", "S2"), ("P3", "S3")] {
        interlock.add_track(track).unwrap();
        interlock.add_signal(signal, track).unwrap();
    }
    interlock.add_gate("G1").unwrap();
    interlock
}

#[test]
fn arrival_walkthrough_blocks_green_into_occupied_platform() {
    let mut il = station();
    assert_eq!(il.tracks().get_track("P1").unwrap().state(), TrackState::Free);

    let track = il.allocate_track("T001", 180.0);
    assert_eq!(track, Some(TrackId::from("P1")));
    assert_eq!(il.tracks().get_track("P1").unwrap().state(), TrackState::Reserved);

    let green = il.change_signal("S1", "GREEN", CommandMode::Verified);
    assert_eq!(green.status, CommandStatus::Verified);

    assert!(il.occupy_track("T001"));
    assert_eq!(il.tracks().get_track("P1").unwrap().state(), TrackState::Occupied);

    let again = il.change_signal("S1", "GREEN", CommandMode::Verified);
    assert_eq!(again.status, CommandStatus::Blocked);
    assert!(!again.applied());

    // The aspect shown before arrival is still GREEN and the live sweep sees it.
    let conflicts = il.monitor();
    assert!(conflicts.iter().any(railtwin::Conflict::is_critical));

    assert!(il.change_signal("S1", "RED", CommandMode::Verified).applied());
    assert!(il.monitor().is_empty());
    assert_eq!(il.signals().get_signal("S1").unwrap().state(), SignalState::Red);
}

#[test]
fn override_always_applies_and_is_logged() {
    let mut il = station();
    il.update_train_proximity("G1", "T001", 50.0);

    let verified = il.change_gate("G1", "OPEN", CommandMode::Verified);
    assert_eq!(verified.status, CommandStatus::Blocked);

    let forced = il.change_gate("G1", "OPEN", CommandMode::Override);
    assert_eq!(forced.status, CommandStatus::Override);
    assert_eq!(il.gates().get_gate("G1").unwrap().state(), GateState::Open);
    assert_eq!(il.gates().command_log().last().unwrap().reason, "OVERRIDE");
    assert_eq!(il.verifier().twin().get_gate("G1").unwrap().state, GateState::Open);

    let gate_events: Vec<_> = il.events().by_entity("G1").collect();
    assert_eq!(gate_events.last().unwrap().result, EventOutcome::Success);
}

#[test]
fn verification_does_not_leak_into_live_state() {
    let mut il = station();
    let twin_before = il.verifier().twin().clone();

    // Blocked: GREEN over a FREE platform.
    il.change_signal("S2", "GREEN", CommandMode::Verified);
    il.update_train_proximity("G1", "T001", 100.0);
    il.change_gate("G1", "OPEN", CommandMode::Verified);

    assert_eq!(
        il.verifier().twin().get_all_signals().collect::<Vec<_>>(),
        twin_before.get_all_signals().collect::<Vec<_>>()
    );
    assert_eq!(il.verifier().twin().get_gate("G1").unwrap().state, GateState::Closed);
    assert_eq!(il.get_free_track_count(), 3);
}

#[test]
fn stats_reflect_every_verdict() {
    let mut il = station();
    il.upsert_train(TrainSnapshot::new("T001", 2.0, 50.0).with_eta(300.0));

    il.allocate_track("T001", 300.0); // SAFE on P1
    il.change_signal("S1", "GREEN", CommandMode::Verified); // SAFE
    il.change_signal("S2", "GREEN", CommandMode::Verified); // UNSAFE
    il.change_signal("S3", "YELLOW", CommandMode::Verified); // SAFE

    let stats = il.get_verification_stats();
    assert_eq!(stats.total_verifications, 4);
    assert_eq!(stats.safe, 3);
    assert_eq!(stats.unsafe_count, 1);
    assert!((stats.safety_rate - 75.0).abs() < 1e-9);
}

#[test]
fn departures_free_the_platform_for_the_next_train() {
    let mut il = station();
    il.upsert_train(TrainSnapshot::new("T001", 1.0, 40.0).with_eta(60.0));
    il.upsert_train(TrainSnapshot::new("T002", 8.0, 90.0).with_eta(900.0));

    let p = il.allocate_track("T001", 60.0).unwrap();
    assert!(il.occupy_track("T001"));
    assert!(il.start_clearing_track(p.as_str()));
    assert!(il.clear_track(p.as_str()));

    assert_eq!(il.allocate_track("T002", 900.0), Some(p));
    let track_events = il.events().by_kind(EventKind::Track).count();
    assert_eq!(track_events, 5);
}

#[test]
fn event_sink_mirrors_commands_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let mut il = Interlock::with_event_log(SafetyRules::default(), EventLog::with_file(&path).unwrap())
        .unwrap();
    il.add_track("P1").unwrap();
    il.add_signal("S1", "P1").unwrap();
    il.change_signal("S1", "GREEN", CommandMode::Verified);
    il.allocate_track("T001", 120.0);

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), il.events().len());
    assert!(text.contains("\"BLOCKED\""));
}

#[test]
fn shared_interlock_behind_one_lock() {
    let il = Arc::new(Mutex::new(station()));

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let il = Arc::clone(&il);
            thread::spawn(move || {
                let mut guard = il.lock().unwrap();
                guard.allocate_track(format!("T{i}"), 1000.0 * f64::from(i))
            })
        })
        .collect();

    let mut allocated: Vec<TrackId> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    allocated.sort();
    assert_eq!(allocated, vec![TrackId::from("P1"), TrackId::from("P2"), TrackId::from("P3")]);
    assert_eq!(il.lock().unwrap().get_free_track_count(), 0);
}

#[test]
fn rules_file_changes_the_danger_zone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    std::fs::write(&path, r#"{ "danger_zone_m": 1000.0 }"#).unwrap();

    let rules = SafetyRules::from_json_file(&path).unwrap();
    let mut il = Interlock::new(rules).unwrap();
    il.add_gate("G1").unwrap();
    il.update_train_proximity("G1", "T001", 800.0);

    assert_eq!(il.change_gate("G1", "OPEN", CommandMode::Verified).status, CommandStatus::Blocked);
    let idle = il.auto_close_gate("G1");
    assert_eq!(idle.status, CommandStatus::NoAction);
    assert_eq!(idle.message, "No action needed");
}

#[test]
fn blocked_train_is_verified_once_across_free_platforms() {
    let mut il = station();
    il.upsert_train(TrainSnapshot::new("T001", 3.0, 60.0).with_eta(200.0));
    assert_eq!(il.get_free_track_count(), 3);

    assert_eq!(il.allocate_track("T002", 250.0), None);
    let stats = il.get_verification_stats();
    assert_eq!(stats.total_verifications, 1);
    assert_eq!(stats.unsafe_count, 1);
}

#[test]
fn unregistered_trains_keep_their_separation() {
    let mut il = station();
    assert_eq!(il.allocate_track("T001", 180.0), Some(TrackId::from("P1")));
    assert_eq!(il.allocate_track("T002", 185.0), None);
    assert_eq!(il.allocate_track("T002", 300.0), Some(TrackId::from("P2")));
    assert_eq!(il.get_free_track_count(), 1);
}
