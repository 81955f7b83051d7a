use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use paddock::config::PaddockConfig;
use paddock::info::ModuleInfo;
use paddock::pipeline::{Pipeline, build_modules};
use paddock::storage::{FileHistoryStorage, HistoryStorage, MemoryHistoryStorage, TraceKind};
use paddock::telemetry::producer::ReplayTelemetryProducer;
use paddock::telemetry::{
    SessionInfo, SessionState, TelemetryData, TelemetryOutput, VehicleTelemetry,
};

const TRACK_LENGTH: f64 = 1000.;
const TICK_S: f64 = 0.1;
/// 20s laps at 50 m/s
const TICKS_PER_LAP: usize = 200;
const FUEL_PER_TICK: f64 = 0.01;

fn session_info() -> SessionInfo {
    SessionInfo {
        track_name: "Sebring".to_string(),
        track_length_m: TRACK_LENGTH,
        vehicle_name: "Porsche 963".to_string(),
        vehicle_class: "Hypercar".to_string(),
        ..Default::default()
    }
}

/// Player lapping at a constant 50 m/s with a second car 200m up the road
fn tick(k: usize) -> TelemetryData {
    let elapsed = k as f64 * TICK_S;
    let laps_done = (k / TICKS_PER_LAP) as u32;
    let lap_start = laps_done as f64 * TICKS_PER_LAP as f64 * TICK_S;
    let distance = ((elapsed - lap_start) * 50.).max(0.);
    let last_laptime = if laps_done > 0 { 20. } else { 0. };

    let player = VehicleTelemetry {
        slot_id: 0,
        driver_name: "Player".to_string(),
        class_name: "Hypercar".to_string(),
        is_player: true,
        place: 2,
        laps_done,
        lap_distance_m: distance,
        lap_start_time_s: lap_start,
        last_laptime_s: last_laptime,
        best_laptime_s: last_laptime,
        is_last_lap_valid: laps_done > 0,
        speed_mps: 50.,
        position: [0., 0., distance],
        ..Default::default()
    };
    let leader = VehicleTelemetry {
        slot_id: 1,
        driver_name: "Leader".to_string(),
        class_name: "Hypercar".to_string(),
        place: 1,
        laps_done,
        lap_distance_m: (distance + 200.) % TRACK_LENGTH,
        lap_start_time_s: lap_start,
        last_laptime_s: last_laptime,
        best_laptime_s: last_laptime,
        speed_mps: 50.,
        position: [0., 0., distance + 200.],
        ..Default::default()
    };

    TelemetryData {
        point_no: k,
        timestamp_ms: (elapsed * 1000.) as u64,
        session: SessionState {
            session_stamp: 42,
            elapsed_s: elapsed,
            time_left_s: 3600. - elapsed,
            ..Default::default()
        },
        player_index: 0,
        vehicles: vec![player, leader],
        fuel_capacity_l: 100.,
        fuel_l: 60. - k as f64 * FUEL_PER_TICK,
        energy_pct: 100. - k as f64 * 0.05,
        tyre_wear_pct: [100. - k as f64 * 0.005; 4],
        ..Default::default()
    }
}

fn config() -> PaddockConfig {
    let mut config = PaddockConfig::default();
    config.restapi.timing.enable = false;
    config
}

/// Drive every calculator on the test thread, in pipeline order
fn drive(storage: Arc<dyn HistoryStorage>, ticks: usize) -> ModuleInfo {
    let info = ModuleInfo::new();
    let mut modules = build_modules(&config(), &info, storage).unwrap();
    let session_info = session_info();
    for k in 0..ticks {
        let telemetry = tick(k);
        for module in modules.iter_mut() {
            module.update(&session_info, &telemetry).unwrap();
        }
    }
    for module in modules.iter_mut() {
        module.on_stop().unwrap();
    }
    info
}

#[test]
fn test_replayed_laps_build_references() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn HistoryStorage> =
        Arc::new(FileHistoryStorage::new(dir.path().to_path_buf()).unwrap());
    // three full laps and a bit, every lap validated by the sim's 20s lap time
    let info = drive(Arc::clone(&storage), 3 * TICKS_PER_LAP + 50);

    let delta = info.delta.snapshot();
    assert_eq!(delta.lap_time_best, 20.);
    assert_eq!(delta.lap_time_pace, 20.);
    assert!(delta.lap_time_last_is_valid);
    assert!(delta.delta_best.abs() < 0.5);

    let fuel = info.fuel.snapshot();
    assert!((fuel.used_last_valid_lap - 2.).abs() < 0.05);
    assert!((fuel.estimated_consumption - 2.).abs() < 0.05);
    assert!(fuel.estimated_laps_left > 25. && fuel.estimated_laps_left < 30.);

    let relative = info.relative.snapshot();
    assert_eq!(relative.standings.iter().flatten().count(), 2);
    assert!(!relative.is_multi_class);
    let vehicles = info.vehicles.snapshot();
    assert_eq!(vehicles.leader_index, Some(1));
    assert_eq!(vehicles.draw_order, vec![1, 0]);

    let combo = session_info().combo_id();
    let best = storage
        .load_trace(TraceKind::DeltaBest, &combo, TRACK_LENGTH)
        .unwrap()
        .unwrap();
    assert_eq!(best.lap_time(), 20.);
    assert!(best.is_persistable());
    assert!(
        storage
            .load_trace(TraceKind::Fuel, &combo, TRACK_LENGTH)
            .unwrap()
            .is_some()
    );

    let history = storage.load_consumption(&combo).unwrap();
    let latest = &history[0];
    assert_eq!(latest.lap_number, 3);
    assert!(latest.is_valid);
    assert!((latest.fuel_used_l - 2.).abs() < 0.05);
    assert_eq!(latest.tank_capacity_l, 100.);
}

#[test]
fn test_best_lap_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let first: Arc<dyn HistoryStorage> =
        Arc::new(FileHistoryStorage::new(dir.path().to_path_buf()).unwrap());
    drive(first, TICKS_PER_LAP + 50);

    // fresh storage on the same directory, one tick is enough to load the reference
    let second: Arc<dyn HistoryStorage> =
        Arc::new(FileHistoryStorage::new(dir.path().to_path_buf()).unwrap());
    let info = drive(second, 1);
    let delta = info.delta.snapshot();
    assert_eq!(delta.lap_time_best, 20.);
    assert_eq!(delta.lap_time_session, 0.);
    assert!((info.fuel.snapshot().estimated_consumption - 2.).abs() < 0.05);
}

#[test]
fn test_pipeline_runs_replay_file_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let replay = dir.path().join("replay.jsonl");
    let records = std::iter::once(TelemetryOutput::SessionChange(session_info())).chain(
        (0..2000).map(|k| TelemetryOutput::DataPoint(Box::new(tick(k)))),
    );
    serde_jsonlines::write_json_lines(&replay, records).unwrap();

    let mut config = config();
    config.refresh_rate_ms = 1;
    config.relative.timing.update_interval_ms = 10;
    config.relative.timing.idle_update_interval_ms = 10;
    let producer = ReplayTelemetryProducer::from_file(&replay).unwrap();
    let mut pipeline =
        Pipeline::start(&config, producer, Arc::new(MemoryHistoryStorage::new())).unwrap();

    let start = Instant::now();
    while pipeline.is_collecting() && start.elapsed() < Duration::from_secs(30) {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!pipeline.is_collecting());
    // the feed is cleared once the replay is exhausted
    assert!(pipeline.feed().latest().is_none());

    pipeline.stop(Duration::from_secs(5)).unwrap();
    let relative = pipeline.info().relative.snapshot();
    assert_eq!(relative.standings.iter().flatten().count(), 2);
}
