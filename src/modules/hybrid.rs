// Hybrid battery usage per lap

use log::debug;

use crate::PaddockError;
use crate::calc;
use crate::config::{HybridConfig, ModuleTiming};
use crate::info::{HybridInfo, ModuleInfo};
use crate::session::{SessionChange, SessionIdentity, SessionTracker};
use crate::telemetry::{MotorState, SessionInfo, TelemetryData};
use crate::trace::{PositionSynchronizer, TraceRecorder, Validation, guard_lap_start_distance};

use super::DataModule;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HybridInput {
    pub battery_charge_pct: f64,
    pub motor_state: MotorState,
    pub lap_start_time: f64,
    pub laptime: f64,
    pub last_official_laptime: f64,
    pub lap_distance: f64,
    pub in_pits: bool,
    pub elapsed: f64,
}

impl HybridInput {
    pub fn from_telemetry(telemetry: &TelemetryData) -> Self {
        Self {
            battery_charge_pct: telemetry.battery_charge_pct,
            motor_state: telemetry.motor_state,
            lap_start_time: telemetry.lap_start_time(None),
            laptime: telemetry.current_laptime(None),
            last_official_laptime: telemetry.last_laptime(None),
            lap_distance: telemetry.lap_distance(None),
            in_pits: telemetry.in_pits(None),
            elapsed: telemetry.session.elapsed_s,
        }
    }
}

/// Battery totals of one lap
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct LapTotals {
    drain: f64,
    regen: f64,
    motor_time: f64,
}

/// Per-lap battery accounting.
///
/// The running lap is always published. Last-lap totals only move once the lap is confirmed by
/// the sim's official lap time, so pit laps and laps that never validate keep the previous
/// values. Battery drain can stay flat to the line, so the recorder traces lap time over
/// distance and the totals ride along with it.
#[derive(Debug)]
pub struct HybridTracker {
    sync: PositionSynchronizer,
    recorder: TraceRecorder,
    last_charge: Option<f64>,
    last_elapsed: Option<f64>,
    last_lap_start: Option<f64>,
    current: LapTotals,
    last: LapTotals,
    /// Finished lap waiting for validation
    finished: Option<LapTotals>,
}

impl HybridTracker {
    pub fn new(min_delta_distance: f64) -> Self {
        Self {
            sync: PositionSynchronizer::new(),
            recorder: TraceRecorder::new(min_delta_distance),
            last_charge: None,
            last_elapsed: None,
            last_lap_start: None,
            current: LapTotals::default(),
            last: LapTotals::default(),
            finished: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.recorder.is_pending()
    }

    /// Returns true when a finished lap was confirmed this tick
    pub fn step(&mut self, input: &HybridInput) -> bool {
        match self.last_lap_start {
            Some(previous) if input.lap_start_time > previous => {
                let measured = input.lap_start_time - previous;
                let armed = self.recorder.finalize_lap(measured, measured);
                self.finished = armed.then_some(self.current);
                self.current = LapTotals::default();
                self.last_lap_start = Some(input.lap_start_time);
                self.sync.reset();
            }
            Some(_) => {}
            None => self.last_lap_start = Some(input.lap_start_time),
        }

        if let Some(previous) = self.last_charge {
            let change = input.battery_charge_pct - previous;
            if change < 0. {
                self.current.drain -= change;
            } else {
                self.current.regen += change;
            }
        }
        self.last_charge = Some(input.battery_charge_pct);

        if let Some(previous) = self.last_elapsed {
            let step = input.elapsed - previous;
            if input.motor_state == MotorState::Propulsion && step > 0. {
                self.current.motor_time += step;
            }
        }
        self.last_elapsed = Some(input.elapsed);

        let distance = guard_lap_start_distance(input.laptime, input.lap_distance);
        let synced = self.sync.step(distance);
        self.recorder.begin_lap(input.laptime, input.in_pits);
        self.recorder.append(synced, input.laptime);

        match self.recorder.validate(input.laptime, input.last_official_laptime) {
            Validation::Committed(_) => match self.finished.take() {
                Some(totals) => {
                    self.last = totals;
                    true
                }
                None => false,
            },
            Validation::Discarded => {
                debug!("Hybrid lap not confirmed by the sim, keeping previous lap");
                self.finished = None;
                false
            }
            Validation::Pending | Validation::NothingPending => false,
        }
    }

    pub fn info(&self, input: &HybridInput, fuel_energy_ratio: f64) -> HybridInfo {
        HybridInfo {
            battery_charge_pct: input.battery_charge_pct,
            motor_state: input.motor_state,
            battery_drain_current_lap: self.current.drain,
            battery_regen_current_lap: self.current.regen,
            battery_drain_last_lap: self.last.drain,
            battery_regen_last_lap: self.last.regen,
            motor_active_time_current_lap: self.current.motor_time,
            motor_active_time_last_lap: self.last.motor_time,
            fuel_energy_ratio,
        }
    }
}

/// Hybrid calculator, reads the fuel and energy sections and writes only its own
pub struct HybridModule {
    config: HybridConfig,
    info: ModuleInfo,
    sessions: SessionTracker,
    tracker: HybridTracker,
}

impl HybridModule {
    pub fn new(config: HybridConfig, info: ModuleInfo) -> Self {
        let tracker = HybridTracker::new(config.min_delta_distance);
        Self {
            config,
            info,
            sessions: SessionTracker::new(),
            tracker,
        }
    }
}

impl DataModule for HybridModule {
    fn name(&self) -> &'static str {
        "hybrid"
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
            debug!("Hybrid state reset for new session");
            self.tracker = HybridTracker::new(self.config.min_delta_distance);
        }

        let input = HybridInput::from_telemetry(telemetry);
        let confirmed = self.tracker.step(&input);

        let fuel = self.info.fuel.read(|fuel| fuel.estimated_consumption);
        let energy = self.info.energy.read(|energy| energy.estimated_consumption);
        let hybrid = self.tracker.info(&input, calc::div_or_zero(fuel, energy));
        if confirmed {
            debug!(
                "Hybrid lap confirmed, {:.2}% drained",
                hybrid.battery_drain_last_lap
            );
        }
        self.info.hybrid.set(hybrid);
        Ok(())
    }
}
