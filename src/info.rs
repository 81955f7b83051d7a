//! Shared read-model written by the calculators.
//!
//! Each section has exactly one writer, the calculator that owns it. Any number of readers
//! (other calculators, the rendering layer) take a cloned snapshot and may see a value that is
//! one tick old. No consistency is provided across sections.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::storage::NO_SECTOR_TIME;
use crate::telemetry::MotorState;

/// One published section of the read-model
#[derive(Debug, Default)]
pub struct Published<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for Published<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Default> Published<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(T::default())),
        }
    }

    pub fn snapshot(&self) -> T {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read a single value without cloning the whole section
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set(&self, value: T) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn reset(&self) {
        self.set(T::default());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeltaInfo {
    pub delta_best: f64,
    /// Unsmoothed delta to the all-time best lap
    pub delta_best_raw: f64,
    pub delta_last: f64,
    pub delta_session: f64,
    pub delta_stint: f64,
    pub is_valid_delta: bool,
    pub lap_time_current: f64,
    pub lap_time_last: f64,
    pub lap_time_last_is_valid: bool,
    pub lap_time_best: f64,
    pub lap_time_session: f64,
    pub lap_time_stint: f64,
    pub lap_time_pace: f64,
    pub lap_time_estimated: f64,
    pub lap_distance_synced: f64,
}

/// Fuel (liters) or virtual energy (percent) consumption and forecast
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConsumptionInfo {
    pub capacity: f64,
    pub amount_current: f64,
    pub amount_used_current_lap: f64,
    pub used_last_lap_raw: f64,
    pub used_last_valid_lap: f64,
    pub estimated_consumption: f64,
    /// Usage this lap minus the reference lap at the same distance
    pub delta_consumption: f64,
    pub laps_remaining: f64,
    pub estimated_laps_left: f64,
    pub estimated_minutes_left: f64,
    pub amount_need_absolute: f64,
    pub amount_need_relative: f64,
    pub amount_end_stint: f64,
    pub amount_to_add: f64,
    pub pit_stops_late: f64,
    pub pit_stops_early: f64,
    pub one_less_pit_consumption: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HybridInfo {
    pub battery_charge_pct: f64,
    pub motor_state: MotorState,
    pub battery_drain_current_lap: f64,
    pub battery_regen_current_lap: f64,
    pub battery_drain_last_lap: f64,
    pub battery_regen_last_lap: f64,
    pub motor_active_time_current_lap: f64,
    pub motor_active_time_last_lap: f64,
    /// Estimated fuel per lap divided by estimated energy per lap
    pub fuel_energy_ratio: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WheelsInfo {
    pub tyre_wear_remaining: [f64; 4],
    pub tyre_wear_current_lap: [f64; 4],
    pub tyre_wear_last_lap: [f64; 4],
    pub tyre_wear_avg_per_lap: [f64; 4],
    pub tyre_laps_left: [f64; 4],
    pub tyre_minutes_left: [f64; 4],
    pub brake_wear_remaining: [f64; 4],
    pub brake_wear_last_lap: [f64; 4],
    pub brake_laps_left: [f64; 4],
    pub brake_minutes_left: [f64; 4],
    pub tyre_failure_threshold: f64,
    pub brake_failure_threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SectorsInfo {
    /// Index of the sector the player is in, 0-2
    pub sector_index: u8,
    /// Sector times of the last completed lap
    pub sectors_last: [f64; 3],
    /// Index of the last completed sector, if any
    pub last_completed_sector: Option<usize>,
    pub gap_theoretical_session: Option<f64>,
    pub gap_personal_session: Option<f64>,
    pub gap_theoretical_alltime: Option<f64>,
    pub gap_personal_alltime: Option<f64>,
    pub session_theoretical: [f64; 3],
    pub session_personal: [f64; 3],
    pub alltime_theoretical: [f64; 3],
    pub alltime_personal: [f64; 3],
}

impl Default for SectorsInfo {
    fn default() -> Self {
        Self {
            sector_index: 0,
            sectors_last: [NO_SECTOR_TIME; 3],
            last_completed_sector: None,
            gap_theoretical_session: None,
            gap_personal_session: None,
            gap_theoretical_alltime: None,
            gap_personal_alltime: None,
            session_theoretical: [NO_SECTOR_TIME; 3],
            session_personal: [NO_SECTOR_TIME; 3],
            alltime_theoretical: [NO_SECTOR_TIME; 3],
            alltime_personal: [NO_SECTOR_TIME; 3],
        }
    }
}

/// Position of a vehicle within its class
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClassPosition {
    pub vehicle_index: usize,
    pub position_in_class: u32,
    pub class_name: String,
    pub class_best_laptime: f64,
    /// Vehicle directly ahead in the same class
    pub ahead_in_class: Option<usize>,
    /// Gap in seconds to the vehicle directly ahead in the same class
    pub gap_to_next_in_class: f64,
    pub is_class_fastest_last_lap: bool,
}

/// Vehicle orderings, every entry is an index into the telemetry vehicle list.
///
/// `None` entries are padding in the relative list and group separators in the standings list.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RelativeInfo {
    pub relative: Vec<Option<usize>>,
    pub standings: Vec<Option<usize>>,
    /// Class positions ordered by vehicle index
    pub class_positions: Vec<ClassPosition>,
    /// Qualifying order grouped by class
    pub qualify_grid: Vec<usize>,
    pub is_multi_class: bool,
}

/// Renderer-ready state of one vehicle
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    pub index: usize,
    pub slot_id: i32,
    pub driver_name: String,
    pub class_name: String,
    pub place: u32,
    pub position_in_class: u32,
    pub is_player: bool,
    pub in_pits: bool,
    pub is_yellow: bool,
    /// 1 a lap or more ahead of the player, -1 behind, 0 same lap
    pub lap_difference: i8,
    /// Distance to the player along the track, positive ahead
    pub relative_distance: f64,
    /// Position relative to the player, rotated to the player's heading (x lateral, z forward)
    pub relative_position: (f64, f64),
    pub gap_to_leader: f64,
    pub gap_to_next: f64,
    pub gap_to_next_in_class: f64,
    pub best_laptime: f64,
    pub last_laptime: f64,
    pub is_last_lap_valid: bool,
    pub pit_stops: u32,
    pub speed: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VehiclesInfo {
    pub vehicles: Vec<VehicleSnapshot>,
    /// Indices in drawing order, the leader and the player are last
    pub draw_order: Vec<usize>,
    pub leader_index: Option<usize>,
    /// Seconds until the closest vehicle behind reaches the player
    pub nearest_traffic_s: Option<f64>,
    /// Meters to the closest yellow flag hazard ahead
    pub nearest_yellow_m: Option<f64>,
    /// Straight-line meters to the closest vehicle
    pub nearest_line_m: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WeatherNode {
    pub start_time_s: f64,
    pub sky_type: i64,
    pub temperature_c: f64,
    pub rain_chance_pct: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WeatherInfo {
    pub forecast_practice: Vec<WeatherNode>,
    pub forecast_qualify: Vec<WeatherNode>,
    pub forecast_race: Vec<WeatherNode>,
}

/// Raw values fetched from the sim's REST api
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RestApiInfo {
    pub private_qualifying: bool,
    pub pit_stop_time_estimate_s: f64,
    pub pit_stop_fuel_ratio: f64,
    pub brake_wear_pct: [f64; 4],
    pub suspension_damage_pct: [f64; 4],
    pub virtual_energy_max: f64,
    pub penalty_count: i64,
}

/// All read-model sections, cheap to clone and hand to every thread
#[derive(Clone, Debug, Default)]
pub struct ModuleInfo {
    pub delta: Published<DeltaInfo>,
    pub fuel: Published<ConsumptionInfo>,
    pub energy: Published<ConsumptionInfo>,
    pub hybrid: Published<HybridInfo>,
    pub wheels: Published<WheelsInfo>,
    pub sectors: Published<SectorsInfo>,
    pub relative: Published<RelativeInfo>,
    pub vehicles: Published<VehiclesInfo>,
    pub weather: Published<WeatherInfo>,
    pub restapi: Published<RestApiInfo>,
}

impl ModuleInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every section, sections are read one after the other
    pub fn snapshot(&self, timestamp_ms: u128) -> InfoSnapshot {
        InfoSnapshot {
            timestamp_ms,
            delta: self.delta.snapshot(),
            fuel: self.fuel.snapshot(),
            energy: self.energy.snapshot(),
            hybrid: self.hybrid.snapshot(),
            wheels: self.wheels.snapshot(),
            sectors: self.sectors.snapshot(),
            relative: self.relative.snapshot(),
            vehicles: self.vehicles.snapshot(),
            weather: self.weather.snapshot(),
            restapi: self.restapi.snapshot(),
        }
    }
}

/// Point in time copy of the read-model, written to snapshot files
#[derive(Clone, Debug, Serialize)]
pub struct InfoSnapshot {
    pub timestamp_ms: u128,
    pub delta: DeltaInfo,
    pub fuel: ConsumptionInfo,
    pub energy: ConsumptionInfo,
    pub hybrid: HybridInfo,
    pub wheels: WheelsInfo,
    pub sectors: SectorsInfo,
    pub relative: RelativeInfo,
    pub vehicles: VehiclesInfo,
    pub weather: WeatherInfo,
    pub restapi: RestApiInfo,
}
