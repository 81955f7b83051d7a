// Tyre and brake wear per lap and laps until failure

use std::collections::HashMap;

use log::debug;
use simple_moving_average::{SMA, SumTreeSMA};

use crate::PaddockError;
use crate::calc;
use crate::config::{ModuleTiming, WearThreshold, WheelsConfig};
use crate::info::{ModuleInfo, WheelsInfo};
use crate::session::{SessionChange, SessionIdentity, SessionTracker};
use crate::telemetry::{SessionInfo, TelemetryData};
use crate::trace::{PositionSynchronizer, TraceRecorder, Validation, guard_lap_start_distance};

use super::DataModule;

/// Laps the per-lap wear is averaged over
const WEAR_AVERAGE_LAPS: usize = 5;
/// A jump of tread above this (percent) between two ticks means new tyres were fitted
const TYRE_CHANGE_THRESHOLD: f64 = 1.;

/// Failure thresholds per vehicle class
#[derive(Clone, Debug, Default)]
pub struct WearCalibration {
    by_class: HashMap<String, WearThreshold>,
    default: WearThreshold,
}

impl WearCalibration {
    pub fn from_config(config: &WheelsConfig) -> Self {
        Self {
            by_class: config.failure_thresholds.clone(),
            default: config.default_failure_threshold,
        }
    }

    pub fn threshold(&self, class_name: &str) -> WearThreshold {
        self.by_class
            .get(class_name)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Laps until `remaining` drops to `threshold` at `per_lap`
pub fn laps_until_failure(remaining: f64, threshold: f64, per_lap: f64) -> f64 {
    calc::div_or_zero((remaining - threshold).max(0.), per_lap)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WheelsInput {
    /// Remaining tread, 100 is new
    pub tyre_wear: [f64; 4],
    /// Remaining brake thickness, 0 when unknown
    pub brake_wear: [f64; 4],
    pub lap_start_time: f64,
    pub laptime: f64,
    pub last_official_laptime: f64,
    pub lap_distance: f64,
    pub in_pits: bool,
}

pub struct WheelsTracker {
    sync: PositionSynchronizer,
    recorders: [TraceRecorder; 4],
    averages: [SumTreeSMA<f64, f64, WEAR_AVERAGE_LAPS>; 4],
    last_lap_start: Option<f64>,
    tyre_at_lap_start: Option<[f64; 4]>,
    tyre_last_tick: [f64; 4],
    tyre_used: [f64; 4],
    tyre_last_lap: [f64; 4],
    brake_at_lap_start: [f64; 4],
    brake_last_lap: [f64; 4],
}

impl WheelsTracker {
    pub fn new(min_delta_distance: f64) -> Self {
        Self {
            sync: PositionSynchronizer::new(),
            recorders: std::array::from_fn(|_| TraceRecorder::new(min_delta_distance)),
            averages: std::array::from_fn(|_| SumTreeSMA::new()),
            last_lap_start: None,
            tyre_at_lap_start: None,
            tyre_last_tick: [0.; 4],
            tyre_used: [0.; 4],
            tyre_last_lap: [0.; 4],
            brake_at_lap_start: [0.; 4],
            brake_last_lap: [0.; 4],
        }
    }

    pub fn tyre_used(&self) -> [f64; 4] {
        self.tyre_used
    }

    pub fn tyre_last_lap(&self) -> [f64; 4] {
        self.tyre_last_lap
    }

    pub fn brake_last_lap(&self) -> [f64; 4] {
        self.brake_last_lap
    }

    /// Average tread used per lap over the recent validated laps
    pub fn tyre_average(&self) -> [f64; 4] {
        std::array::from_fn(|i| {
            let average = &self.averages[i];
            if average.get_num_samples() == 0 {
                0.
            } else {
                average.get_average()
            }
        })
    }

    pub fn step(&mut self, input: &WheelsInput) {
        let tyres_changed = self.tyre_at_lap_start.is_some()
            && (0..4).any(|i| input.tyre_wear[i] - self.tyre_last_tick[i] > TYRE_CHANGE_THRESHOLD);
        if tyres_changed {
            debug!("New tyres fitted");
            self.tyre_at_lap_start = Some(input.tyre_wear);
        }
        self.tyre_last_tick = input.tyre_wear;
        let start = *self.tyre_at_lap_start.get_or_insert(input.tyre_wear);
        self.tyre_used = std::array::from_fn(|i| (start[i] - input.tyre_wear[i]).max(0.));

        match self.last_lap_start {
            Some(previous) if input.lap_start_time > previous => {
                let measured = input.lap_start_time - previous;
                for (recorder, used) in self.recorders.iter_mut().zip(self.tyre_used) {
                    recorder.finalize_lap(used, measured);
                }
                for i in 0..4 {
                    if self.brake_at_lap_start[i] > 0. && input.brake_wear[i] > 0. {
                        self.brake_last_lap[i] =
                            (self.brake_at_lap_start[i] - input.brake_wear[i]).max(0.);
                    }
                }
                self.brake_at_lap_start = input.brake_wear;
                self.tyre_at_lap_start = Some(input.tyre_wear);
                self.tyre_used = [0.; 4];
                self.last_lap_start = Some(input.lap_start_time);
                self.sync.reset();
            }
            Some(_) => {}
            None => {
                self.last_lap_start = Some(input.lap_start_time);
                self.brake_at_lap_start = input.brake_wear;
            }
        }
        if self.brake_at_lap_start.iter().all(|wear| *wear <= 0.) {
            // brake data arrives late from the REST api
            self.brake_at_lap_start = input.brake_wear;
        }

        let distance = guard_lap_start_distance(input.laptime, input.lap_distance);
        let synced = self.sync.step(distance);
        for (i, recorder) in self.recorders.iter_mut().enumerate() {
            recorder.begin_lap(input.laptime, input.in_pits);
            recorder.append(synced, self.tyre_used[i]);
            if let Validation::Committed(trace) =
                recorder.validate(input.laptime, input.last_official_laptime)
            {
                self.tyre_last_lap[i] = trace.total();
                self.averages[i].add_sample(trace.total());
            }
        }
    }

    pub fn info(
        &self,
        input: &WheelsInput,
        threshold: WearThreshold,
        pace: f64,
    ) -> WheelsInfo {
        let average = self.tyre_average();
        let tyre_laps_left: [f64; 4] = std::array::from_fn(|i| {
            laps_until_failure(input.tyre_wear[i], threshold.tyre_failure_pct, average[i])
        });
        let brake_laps_left: [f64; 4] = std::array::from_fn(|i| {
            laps_until_failure(
                input.brake_wear[i],
                threshold.brake_failure_pct,
                self.brake_last_lap[i],
            )
        });
        WheelsInfo {
            tyre_wear_remaining: input.tyre_wear,
            tyre_wear_current_lap: self.tyre_used,
            tyre_wear_last_lap: self.tyre_last_lap,
            tyre_wear_avg_per_lap: average,
            tyre_laps_left,
            tyre_minutes_left: tyre_laps_left.map(|laps| laps * pace / 60.),
            brake_wear_remaining: input.brake_wear,
            brake_wear_last_lap: self.brake_last_lap,
            brake_laps_left,
            brake_minutes_left: brake_laps_left.map(|laps| laps * pace / 60.),
            tyre_failure_threshold: threshold.tyre_failure_pct,
            brake_failure_threshold: threshold.brake_failure_pct,
        }
    }
}

pub struct WheelsModule {
    config: WheelsConfig,
    calibration: WearCalibration,
    info: ModuleInfo,
    sessions: SessionTracker,
    tracker: WheelsTracker,
}

impl WheelsModule {
    pub fn new(config: WheelsConfig, info: ModuleInfo) -> Self {
        let calibration = WearCalibration::from_config(&config);
        let tracker = WheelsTracker::new(config.min_delta_distance);
        Self {
            config,
            calibration,
            info,
            sessions: SessionTracker::new(),
            tracker,
        }
    }
}

impl DataModule for WheelsModule {
    fn name(&self) -> &'static str {
        "wheels"
    }

    fn timing(&self) -> &ModuleTiming {
        &self.config.timing
    }

    fn update(
        &mut self,
        session_info: &SessionInfo,
        telemetry: &TelemetryData,
    ) -> Result<(), PaddockError> {
        let identity = SessionIdentity::from_telemetry(session_info, telemetry);
        if self.sessions.check(identity) != SessionChange::Same {
            self.tracker = WheelsTracker::new(self.config.min_delta_distance);
        }

        let input = WheelsInput {
            tyre_wear: telemetry.tyre_wear_pct,
            brake_wear: self.info.restapi.read(|rest| rest.brake_wear_pct),
            lap_start_time: telemetry.lap_start_time(None),
            laptime: telemetry.current_laptime(None),
            last_official_laptime: telemetry.last_laptime(None),
            lap_distance: telemetry.lap_distance(None),
            in_pits: telemetry.in_pits(None),
        };
        self.tracker.step(&input);

        let class_name = if session_info.vehicle_class.is_empty() {
            &telemetry.player().class_name
        } else {
            &session_info.vehicle_class
        };
        let threshold = self.calibration.threshold(class_name);
        let pace = match self.info.delta.read(|delta| delta.lap_time_pace) {
            pace if pace > 0. => pace,
            _ => telemetry.last_laptime(None),
        };
        self.info
            .wheels
            .set(self.tracker.info(&input, threshold, pace));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(lap_start: f64, elapsed: f64, distance: f64, tread: f64, official: f64) -> WheelsInput {
        WheelsInput {
            tyre_wear: [tread; 4],
            brake_wear: [0.; 4],
            lap_start_time: lap_start,
            laptime: elapsed - lap_start,
            last_official_laptime: official,
            lap_distance: distance,
            in_pits: false,
        }
    }

    fn drive_lap(tracker: &mut WheelsTracker, lap: usize, wear_per_lap: f64) {
        let lap_start = lap as f64 * 100.;
        let tread = 100. - lap as f64 * wear_per_lap;
        for step in 0..10 {
            let progress = step as f64 / 10.;
            tracker.step(&input(
                lap_start,
                lap_start + progress * 100.,
                progress * 1000.,
                tread - progress * wear_per_lap,
                100.,
            ));
        }
    }

    #[test]
    fn test_wear_per_lap_is_averaged() {
        let mut tracker = WheelsTracker::new(5.);
        for lap in 0..3 {
            drive_lap(&mut tracker, lap, 2.);
        }
        // confirm the third lap
        tracker.step(&input(300., 302., 20., 94., 100.));
        let last = tracker.tyre_last_lap();
        assert!((last[0] - 2.).abs() < 1e-9);
        let average = tracker.tyre_average();
        assert!((average[3] - 2.).abs() < 1e-9);

        let info = tracker.info(
            &input(300., 302., 20., 94., 100.),
            WearThreshold {
                tyre_failure_pct: 30.,
                brake_failure_pct: 0.,
            },
            100.,
        );
        assert!((info.tyre_laps_left[0] - 32.).abs() < 1e-9);
        assert!((info.tyre_minutes_left[0] - 32. * 100. / 60.).abs() < 1e-9);
    }

    #[test]
    fn test_tyre_change_resets_lap_start_wear() {
        let mut tracker = WheelsTracker::new(5.);
        tracker.step(&input(0., 0., 0., 60., 0.));
        tracker.step(&input(0., 10., 100., 59., 0.));
        assert_eq!(tracker.tyre_used(), [1.; 4]);
        tracker.step(&input(0., 20., 110., 100., 0.));
        assert_eq!(tracker.tyre_used(), [0.; 4]);
    }

    #[test]
    fn test_brake_wear_per_lap() {
        let mut tracker = WheelsTracker::new(5.);
        let mut tick = input(0., 0., 0., 100., 0.);
        tick.brake_wear = [90.; 4];
        tracker.step(&tick);
        let mut tick = input(100., 100., 0., 100., 0.);
        tick.brake_wear = [89.5; 4];
        tracker.step(&tick);
        assert_eq!(tracker.brake_last_lap(), [0.5; 4]);

        let info = tracker.info(
            &tick,
            WearThreshold {
                tyre_failure_pct: 0.,
                brake_failure_pct: 60.,
            },
            100.,
        );
        assert_eq!(info.brake_laps_left, [59.; 4]);
    }

    #[test]
    fn test_calibration_falls_back_to_default() {
        let mut config = WheelsConfig::default();
        config.failure_thresholds.insert(
            "Hypercar".to_string(),
            WearThreshold {
                tyre_failure_pct: 20.,
                brake_failure_pct: 55.,
            },
        );
        config.default_failure_threshold.tyre_failure_pct = 10.;
        let calibration = WearCalibration::from_config(&config);
        assert_eq!(calibration.threshold("Hypercar").brake_failure_pct, 55.);
        assert_eq!(calibration.threshold("GT3").tyre_failure_pct, 10.);
    }
}
