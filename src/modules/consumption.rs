// Fuel and virtual energy consumption tracking and forecast

use std::sync::Arc;

use log::{debug, info, warn};

use crate::PaddockError;
use crate::config::{ConsumptionConfig, ModuleTiming};
use crate::info::{ConsumptionInfo, ModuleInfo, Published};
use crate::session::{SessionChange, SessionIdentity, SessionTracker};
use crate::storage::{ConsumptionHistory, ConsumptionRecord, HistoryStorage, TraceKind};
use crate::telemetry::{SessionInfo, TelemetryData};
use crate::trace::{
    LapTrace, PositionSynchronizer, TraceRecorder, VALIDATION_MIN_DELAY_S, Validation,
    guard_lap_start_distance,
};

use super::DataModule;
use super::forecast::{self, Forecast, ForecastInput};

/// Resource tracked by a consumption calculator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Fuel,
    Energy,
}

impl ResourceKind {
    /// Current `(capacity, amount)` pair
    pub fn read(&self, telemetry: &TelemetryData) -> (f64, f64) {
        match self {
            ResourceKind::Fuel => (telemetry.fuel_capacity_l, telemetry.fuel_l),
            ResourceKind::Energy => (100., telemetry.energy_pct),
        }
    }

    fn trace_kind(&self) -> TraceKind {
        match self {
            ResourceKind::Fuel => TraceKind::Fuel,
            ResourceKind::Energy => TraceKind::Energy,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ResourceKind::Fuel => "fuel",
            ResourceKind::Energy => "energy",
        }
    }
}

/// Per-tick readings of one resource
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConsumptionInput {
    pub capacity: f64,
    pub amount: f64,
    pub lap_start_time: f64,
    pub laptime: f64,
    pub last_official_laptime: f64,
    pub lap_distance: f64,
    pub laps_done: u32,
    pub speed: f64,
    pub in_pits: bool,
}

impl ConsumptionInput {
    pub fn from_telemetry(kind: ResourceKind, telemetry: &TelemetryData) -> Self {
        let (capacity, amount) = kind.read(telemetry);
        Self {
            capacity,
            amount,
            lap_start_time: telemetry.lap_start_time(None),
            laptime: telemetry.current_laptime(None),
            last_official_laptime: telemetry.last_laptime(None),
            lap_distance: telemetry.lap_distance(None),
            laps_done: telemetry.player().laps_done,
            speed: telemetry.speed(None),
            in_pits: telemetry.in_pits(None),
        }
    }
}

/// A finished lap, reported once its validation is settled
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LapUsage {
    pub lap_number: u32,
    pub lap_time: f64,
    pub used: f64,
    pub is_valid: bool,
}

#[derive(Debug, Default)]
pub struct StepOutcome {
    /// New reference lap, validated this tick
    pub committed: Option<LapTrace>,
    pub completed_lap: Option<LapUsage>,
}

/// Consumption state of one session.
pub struct ConsumptionTracker {
    refill_speed_threshold: f64,
    start_delay_s: f64,
    sync: PositionSynchronizer,
    recorder: TraceRecorder,
    reference: LapTrace,
    amount_last: Option<f64>,
    used_this_lap: f64,
    used_last_lap_raw: f64,
    last_valid_usage: f64,
    last_lap_start: Option<f64>,
    /// Lap finished but not settled yet
    finished: Option<LapUsage>,
}

impl ConsumptionTracker {
    pub fn new(config: &ConsumptionConfig) -> Self {
        Self {
            refill_speed_threshold: config.refill_speed_threshold_mps,
            start_delay_s: config.delta_start_delay_s,
            sync: PositionSynchronizer::new(),
            recorder: TraceRecorder::new(config.min_delta_distance),
            reference: LapTrace::default(),
            amount_last: None,
            used_this_lap: 0.,
            used_last_lap_raw: 0.,
            last_valid_usage: 0.,
            last_lap_start: None,
            finished: None,
        }
    }

    /// Seed the reference lap, usually from history
    pub fn set_reference(&mut self, trace: LapTrace) {
        self.last_valid_usage = trace.total();
        self.reference = trace;
    }

    pub fn reference(&self) -> &LapTrace {
        &self.reference
    }

    pub fn used_this_lap(&self) -> f64 {
        self.used_this_lap
    }

    pub fn used_last_lap_raw(&self) -> f64 {
        self.used_last_lap_raw
    }

    pub fn last_valid_usage(&self) -> f64 {
        self.last_valid_usage
    }

    pub fn synced_distance(&self) -> f64 {
        self.sync.synced()
    }

    fn track_amount(&mut self, input: &ConsumptionInput) {
        let Some(previous) = self.amount_last else {
            self.amount_last = Some(input.amount);
            return;
        };
        let change = previous - input.amount;
        if change > 0. {
            self.used_this_lap += change;
            self.amount_last = Some(input.amount);
        } else if change < 0. && input.speed < self.refill_speed_threshold {
            debug!("Refilled {:.2}", -change);
            self.amount_last = Some(input.amount);
        }
        // a rise while moving is sensor noise, the baseline stays put
    }

    pub fn step(&mut self, input: &ConsumptionInput) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        self.track_amount(input);

        match self.last_lap_start {
            Some(previous) if input.lap_start_time > previous => {
                let measured = input.lap_start_time - previous;
                let armed = self.recorder.finalize_lap(self.used_this_lap, measured);
                self.used_last_lap_raw = self.used_this_lap;
                self.finished = Some(LapUsage {
                    lap_number: input.laps_done,
                    lap_time: measured,
                    used: self.used_this_lap,
                    is_valid: armed,
                });
                self.used_this_lap = 0.;
                self.last_lap_start = Some(input.lap_start_time);
                self.sync.reset();
            }
            Some(_) => {}
            None => self.last_lap_start = Some(input.lap_start_time),
        }

        let distance = guard_lap_start_distance(input.laptime, input.lap_distance);
        let synced = self.sync.step(distance);
        self.recorder.begin_lap(input.laptime, input.in_pits);
        self.recorder.append(synced, self.used_this_lap);

        match self.recorder.validate(input.laptime, input.last_official_laptime) {
            Validation::Committed(trace) => {
                self.last_valid_usage = trace.total();
                self.reference = trace.clone();
                outcome.committed = Some(trace);
                outcome.completed_lap = self.finished.take();
            }
            Validation::Discarded => {
                outcome.completed_lap = self.finished.take().map(|lap| LapUsage {
                    is_valid: false,
                    ..lap
                });
            }
            Validation::Pending => {}
            Validation::NothingPending => {
                // laps that never armed validation settle after the same delay
                if input.laptime > VALIDATION_MIN_DELAY_S {
                    outcome.completed_lap = self.finished.take().map(|lap| LapUsage {
                        is_valid: false,
                        ..lap
                    });
                }
            }
        }
        outcome
    }

    /// Expected usage of the running lap
    pub fn estimated_consumption(&self, laptime: f64) -> f64 {
        if laptime < self.start_delay_s || self.reference.is_empty() {
            return self.last_valid_usage;
        }
        forecast::estimate_consumption(
            self.last_valid_usage,
            self.used_this_lap,
            self.reference.lookup(self.sync.synced()),
        )
    }
}

/// Fuel or energy calculator module.
///
/// The fuel instance also keeps the per-lap consumption history, reading the energy and hybrid
/// sections for the columns it does not own.
pub struct ConsumptionModule {
    kind: ResourceKind,
    config: ConsumptionConfig,
    info: ModuleInfo,
    storage: Arc<dyn HistoryStorage>,
    sessions: SessionTracker,
    tracker: ConsumptionTracker,
    history: Option<ConsumptionHistory>,
    combo_id: String,
    was_in_pits: bool,
}

impl ConsumptionModule {
    pub fn new(
        kind: ResourceKind,
        config: ConsumptionConfig,
        info: ModuleInfo,
        storage: Arc<dyn HistoryStorage>,
    ) -> Self {
        let tracker = ConsumptionTracker::new(&config);
        Self {
            kind,
            config,
            info,
            storage,
            sessions: SessionTracker::new(),
            tracker,
            history: None,
            combo_id: String::new(),
            was_in_pits: false,
        }
    }

    pub fn fuel(config: ConsumptionConfig, info: ModuleInfo, storage: Arc<dyn HistoryStorage>) -> Self {
        Self::new(ResourceKind::Fuel, config, info, storage)
    }

    pub fn energy(
        config: ConsumptionConfig,
        info: ModuleInfo,
        storage: Arc<dyn HistoryStorage>,
    ) -> Self {
        Self::new(ResourceKind::Energy, config, info, storage)
    }

    fn output(&self) -> &Published<ConsumptionInfo> {
        match self.kind {
            ResourceKind::Fuel => &self.info.fuel,
            ResourceKind::Energy => &self.info.energy,
        }
    }

    fn load_history(&mut self, track_length_m: f64) {
        self.tracker = ConsumptionTracker::new(&self.config);
        match self
            .storage
            .load_trace(self.kind.trace_kind(), &self.combo_id, track_length_m)
        {
            Ok(Some(trace)) => {
                info!(
                    "Loaded {} reference lap using {:.3} for {}",
                    self.kind.name(),
                    trace.total(),
                    self.combo_id
                );
                self.tracker.set_reference(trace);
            }
            Ok(None) => debug!("No {} reference lap for {}", self.kind.name(), self.combo_id),
            Err(e) => warn!("{} history unusable, using defaults: {}", self.kind.name(), e),
        }

        if self.kind == ResourceKind::Fuel {
            let records = self.storage.load_consumption(&self.combo_id).unwrap_or_else(|e| {
                warn!("Consumption history unusable, using defaults: {}", e);
                vec![ConsumptionRecord::default()]
            });
            self.history = Some(ConsumptionHistory::from_records(records));
        }
    }

    fn save_history(&mut self) {
        let Some(history) = self.history.as_mut() else {
            return;
        };
        if !history.is_dirty() {
            return;
        }
        match self.storage.save_consumption(&self.combo_id, &history.to_vec()) {
            Ok(()) => history.mark_saved(),
            Err(e) => warn!("Could not save consumption history: {}", e),
        }
    }

    fn record_lap(&mut self, lap: &LapUsage, capacity: f64) {
        let Some(history) = self.history.as_mut() else {
            return;
        };
        let energy_used_pct = self.info.energy.read(|energy| energy.used_last_lap_raw);
        let (battery_drain_pct, battery_regen_pct) = self
            .info
            .hybrid
            .read(|hybrid| (hybrid.battery_drain_last_lap, hybrid.battery_regen_last_lap));
        history.push(ConsumptionRecord {
            lap_number: lap.lap_number,
            is_valid: lap.is_valid,
            lap_time_s: lap.lap_time,
            fuel_used_l: lap.used,
            energy_used_pct,
            battery_drain_pct,
            battery_regen_pct,
            tank_capacity_l: capacity,
        });
    }

    pub fn history(&self) -> Option<&ConsumptionHistory> {
        self.history.as_ref()
    }
}

impl DataModule for ConsumptionModule {
    fn name(&self) -> &'static str {
        self.kind.name()
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
                self.save_history();
                self.combo_id = session_info.combo_id();
                self.load_history(session_info.track_length_m);
            }
            SessionChange::NewSession => {
                self.save_history();
                let reference = self.tracker.reference().clone();
                self.tracker = ConsumptionTracker::new(&self.config);
                self.tracker.set_reference(reference);
            }
            SessionChange::Same => {}
        }

        let input = ConsumptionInput::from_telemetry(self.kind, telemetry);
        let outcome = self.tracker.step(&input);

        if let Some(trace) = outcome.committed {
            if trace.is_persistable() {
                if let Err(e) = self
                    .storage
                    .save_trace(self.kind.trace_kind(), &self.combo_id, &trace)
                {
                    warn!("Could not save {} reference lap: {}", self.kind.name(), e);
                }
            }
        }
        if let Some(lap) = outcome.completed_lap {
            self.record_lap(&lap, input.capacity);
        }

        if input.in_pits && !self.was_in_pits {
            self.save_history();
        }
        self.was_in_pits = input.in_pits;

        let player = telemetry.player();
        let lap_into = calc_lap_into(input.lap_distance, session_info.track_length_m);
        let pace = match self.info.delta.read(|delta| delta.lap_time_pace) {
            pace if pace > 0. => pace,
            _ => player.last_laptime_s,
        };
        let estimated = self.tracker.estimated_consumption(input.laptime);
        let laps_remaining =
            forecast::laps_remaining(&telemetry.session, player.laps_done, lap_into, pace);
        let forecast = Forecast::compute(&ForecastInput {
            capacity: input.capacity,
            amount_current: input.amount,
            used_this_lap: self.tracker.used_this_lap(),
            estimated_consumption: estimated,
            laps_remaining,
            pace,
        });

        self.output().set(ConsumptionInfo {
            capacity: input.capacity,
            amount_current: input.amount,
            amount_used_current_lap: self.tracker.used_this_lap(),
            used_last_lap_raw: self.tracker.used_last_lap_raw(),
            used_last_valid_lap: self.tracker.last_valid_usage(),
            estimated_consumption: estimated,
            delta_consumption: estimated - self.tracker.last_valid_usage(),
            laps_remaining,
            estimated_laps_left: forecast.estimated_laps_left,
            estimated_minutes_left: forecast.estimated_minutes_left,
            amount_need_absolute: forecast.amount_need_absolute,
            amount_need_relative: forecast.amount_need_relative,
            amount_end_stint: forecast.amount_end_stint,
            amount_to_add: forecast.amount_to_add,
            pit_stops_late: forecast.pit_stops_late,
            pit_stops_early: forecast.pit_stops_early,
            one_less_pit_consumption: forecast.one_less_pit_consumption,
        });
        Ok(())
    }

    fn idle(&mut self) -> Result<(), PaddockError> {
        self.save_history();
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), PaddockError> {
        self.save_history();
        Ok(())
    }
}

/// Fraction of the lap completed
fn calc_lap_into(lap_distance: f64, track_length_m: f64) -> f64 {
    if track_length_m > 0. {
        (lap_distance / track_length_m).clamp(0., 1.)
    } else {
        0.
    }
}
