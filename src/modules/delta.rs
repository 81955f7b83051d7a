// Live delta time against the best, session best, stint best and last laps

use std::sync::Arc;

use log::{debug, info, warn};

use crate::PaddockError;
use crate::calc;
use crate::config::{DeltaConfig, ModuleTiming};
use crate::info::{DeltaInfo, Published};
use crate::session::{SessionChange, SessionIdentity, SessionTracker};
use crate::storage::{HistoryStorage, TraceKind};
use crate::telemetry::{SessionInfo, TelemetryData};
use crate::trace::{
    DeltaSmoother, LapTrace, PositionSynchronizer, TraceRecorder, Validation,
    guard_lap_start_distance,
};

use super::DataModule;

/// Per-tick readings the delta calculation needs
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeltaInput {
    pub lap_start_time: f64,
    pub laptime: f64,
    pub last_official_laptime: f64,
    pub lap_distance: f64,
    pub in_pits: bool,
}

impl DeltaInput {
    pub fn from_telemetry(telemetry: &TelemetryData) -> Self {
        Self {
            lap_start_time: telemetry.lap_start_time(None),
            laptime: telemetry.current_laptime(None),
            last_official_laptime: telemetry.last_laptime(None),
            lap_distance: telemetry.lap_distance(None),
            in_pits: telemetry.in_pits(None),
        }
    }
}

/// Next pace lap time after a validated lap.
///
/// Snaps to the lap when there is no pace yet or the lap is faster, otherwise moves towards it
/// by at most `margin` seconds.
pub fn next_pace(pace: f64, laptime: f64, factor: f64, margin: f64) -> f64 {
    if pace <= 0. || laptime < pace {
        laptime
    } else {
        pace + (factor * (laptime - pace)).min(margin)
    }
}

struct Reference {
    trace: LapTrace,
    smoother: DeltaSmoother,
    delta: f64,
}

impl Reference {
    fn new(config: &DeltaConfig) -> Self {
        Self {
            trace: LapTrace::default(),
            smoother: DeltaSmoother::new(
                config.delta_smoothing_samples,
                config.delta_start_delay_s,
            ),
            delta: 0.,
        }
    }

    fn lap_time(&self) -> f64 {
        if self.trace.is_empty() {
            0.
        } else {
            self.trace.lap_time()
        }
    }

    /// Replace the trace if `candidate` is strictly faster
    fn improve(&mut self, candidate: &LapTrace) -> bool {
        if self.trace.is_empty() || candidate.lap_time() < self.trace.lap_time() {
            self.trace = candidate.clone();
            return true;
        }
        false
    }

    fn raw_delta(&self, distance: f64, laptime: f64) -> Option<f64> {
        if self.trace.is_empty() {
            None
        } else {
            Some(laptime - self.trace.lookup(distance))
        }
    }

    fn step(&mut self, distance: f64, laptime: f64) -> f64 {
        self.delta = match self.raw_delta(distance, laptime) {
            Some(raw) => self.smoother.update(laptime, raw).unwrap_or(0.),
            None => 0.,
        };
        self.delta
    }

    fn clear(&mut self) {
        self.trace = LapTrace::default();
        self.smoother.reset();
        self.delta = 0.;
    }
}

/// Delta state of one session, independent of threads and storage.
pub struct DeltaTracker {
    sync: PositionSynchronizer,
    recorder: TraceRecorder,
    best: Reference,
    session: Reference,
    stint: Reference,
    last: Reference,
    last_lap_start: Option<f64>,
    last_is_valid: bool,
    was_in_pits: bool,
    pace: f64,
    pace_factor: f64,
    pace_margin: f64,
    start_delay_s: f64,
}

impl DeltaTracker {
    pub fn new(config: &DeltaConfig) -> Self {
        Self {
            sync: PositionSynchronizer::new(),
            recorder: TraceRecorder::new(config.min_delta_distance),
            best: Reference::new(config),
            session: Reference::new(config),
            stint: Reference::new(config),
            last: Reference::new(config),
            last_lap_start: None,
            last_is_valid: false,
            was_in_pits: false,
            pace: 0.,
            pace_factor: calc::ema_factor(config.laptime_pace_samples),
            pace_margin: config.laptime_pace_margin,
            start_delay_s: config.delta_start_delay_s,
        }
    }

    /// Seed the all-time best lap, usually from history
    pub fn set_best(&mut self, trace: LapTrace) {
        self.best.trace = trace;
    }

    pub fn best(&self) -> &LapTrace {
        &self.best.trace
    }

    pub fn last(&self) -> &LapTrace {
        &self.last.trace
    }

    pub fn pace(&self) -> f64 {
        self.pace
    }

    pub fn resync_count(&self) -> u32 {
        self.sync.resync_count()
    }

    /// Forget everything tied to the running session, the all-time best is kept
    pub fn reset_session(&mut self) {
        self.sync.reset();
        self.recorder.reset();
        self.session.clear();
        self.stint.clear();
        self.last.clear();
        self.last_lap_start = None;
        self.last_is_valid = false;
        self.was_in_pits = false;
        self.pace = 0.;
    }

    /// Apply a validated lap to every reference.
    ///
    /// Returns `true` when the all-time best was replaced.
    pub fn apply_validated_lap(&mut self, trace: LapTrace) -> bool {
        self.pace = next_pace(self.pace, trace.lap_time(), self.pace_factor, self.pace_margin);
        self.session.improve(&trace);
        self.stint.improve(&trace);
        let improved = self.best.improve(&trace);
        self.last.trace = trace;
        self.last_is_valid = true;
        improved
    }

    /// Advance one tick, returns the new all-time best lap if it improved
    pub fn step(&mut self, input: &DeltaInput) -> Option<LapTrace> {
        if input.in_pits {
            self.was_in_pits = true;
        } else if self.was_in_pits {
            debug!("Pit exit, new stint");
            self.was_in_pits = false;
            self.stint.clear();
        }

        match self.last_lap_start {
            Some(previous) if input.lap_start_time > previous => {
                let measured = input.lap_start_time - previous;
                if self.recorder.finalize_lap(measured, measured) {
                    debug!("Lap finished in {:.3}s, waiting for validation", measured);
                }
                self.last_lap_start = Some(input.lap_start_time);
                self.sync.reset();
                for reference in [
                    &mut self.best,
                    &mut self.session,
                    &mut self.stint,
                    &mut self.last,
                ] {
                    reference.smoother.reset();
                }
            }
            Some(_) => {}
            None => self.last_lap_start = Some(input.lap_start_time),
        }

        let distance = guard_lap_start_distance(input.laptime, input.lap_distance);
        let synced = self.sync.step(distance);
        self.recorder.begin_lap(input.laptime, input.in_pits);
        self.recorder.append(synced, input.laptime);

        let mut improved = None;
        match self
            .recorder
            .validate(input.laptime, input.last_official_laptime)
        {
            Validation::Committed(trace) => {
                debug!("Lap of {:.3}s validated", trace.lap_time());
                if self.apply_validated_lap(trace) {
                    improved = Some(self.best.trace.clone());
                }
            }
            Validation::Discarded => {
                debug!("Lap not confirmed by the sim, discarded");
                self.last_is_valid = false;
            }
            Validation::Pending | Validation::NothingPending => {}
        }

        for reference in [
            &mut self.best,
            &mut self.session,
            &mut self.stint,
            &mut self.last,
        ] {
            reference.step(synced, input.laptime);
        }
        improved
    }

    pub fn info(&self, input: &DeltaInput) -> DeltaInfo {
        let synced = self.sync.synced();
        let has_best = !self.best.trace.is_empty();
        DeltaInfo {
            delta_best: self.best.delta,
            delta_best_raw: self
                .best
                .raw_delta(synced, input.laptime)
                .unwrap_or(0.),
            delta_last: self.last.delta,
            delta_session: self.session.delta,
            delta_stint: self.stint.delta,
            is_valid_delta: has_best
                && self.recorder.current().len() > 1
                && !self.recorder.is_pit_lap()
                && input.laptime >= self.start_delay_s,
            lap_time_current: input.laptime,
            lap_time_last: self.last.lap_time(),
            lap_time_last_is_valid: self.last_is_valid,
            lap_time_best: self.best.lap_time(),
            lap_time_session: self.session.lap_time(),
            lap_time_stint: self.stint.lap_time(),
            lap_time_pace: self.pace,
            lap_time_estimated: if has_best {
                self.best.lap_time() + self.best.delta
            } else {
                0.
            },
            lap_distance_synced: synced,
        }
    }
}

/// Delta calculator module, owns the delta section of the read-model
pub struct DeltaModule {
    config: DeltaConfig,
    output: Published<DeltaInfo>,
    storage: Arc<dyn HistoryStorage>,
    sessions: SessionTracker,
    tracker: DeltaTracker,
    combo_id: String,
}

impl DeltaModule {
    pub fn new(
        config: DeltaConfig,
        output: Published<DeltaInfo>,
        storage: Arc<dyn HistoryStorage>,
    ) -> Self {
        let tracker = DeltaTracker::new(&config);
        Self {
            config,
            output,
            storage,
            sessions: SessionTracker::new(),
            tracker,
            combo_id: String::new(),
        }
    }

    fn load_best(&mut self, track_length_m: f64) {
        match self
            .storage
            .load_trace(TraceKind::DeltaBest, &self.combo_id, track_length_m)
        {
            Ok(Some(trace)) => {
                info!(
                    "Loaded best lap of {:.3}s for {}",
                    trace.lap_time(),
                    self.combo_id
                );
                self.tracker.set_best(trace);
            }
            Ok(None) => debug!("No best lap stored for {}", self.combo_id),
            Err(e) => warn!("Best lap history unusable, starting without: {}", e),
        }
    }

    fn save_best(&self, trace: &LapTrace) {
        if !trace.is_persistable() {
            debug!("Best lap has {} samples, not saved", trace.len());
            return;
        }
        if let Err(e) = self
            .storage
            .save_trace(TraceKind::DeltaBest, &self.combo_id, trace)
        {
            warn!("Could not save best lap for {}: {}", self.combo_id, e);
        }
    }
}

impl DataModule for DeltaModule {
    fn name(&self) -> &'static str {
        "delta"
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
        match self.sessions.check(identity) {
            SessionChange::NewCombo => {
                self.combo_id = session_info.combo_id();
                self.tracker = DeltaTracker::new(&self.config);
                self.load_best(session_info.track_length_m);
            }
            SessionChange::NewSession => self.tracker.reset_session(),
            SessionChange::Same => {}
        }

        let input = DeltaInput::from_telemetry(telemetry);
        if let Some(best) = self.tracker.step(&input) {
            info!("New best lap {:.3}s for {}", best.lap_time(), self.combo_id);
            self.save_best(&best);
        }
        self.output.set(self.tracker.info(&input));
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), PaddockError> {
        if self.tracker.resync_count() > 0 {
            info!(
                "Delta position resynced {} times",
                self.tracker.resync_count()
            );
        }
        Ok(())
    }
}
