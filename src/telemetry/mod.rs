pub(crate) mod collector;
pub mod producer;

pub use collector::{FeedSnapshot, TelemetryFeed, collect_telemetry};
use serde::{Deserialize, Serialize};

/// Upper bound of vehicles processed per tick
pub const MAX_VEHICLES: usize = 128;

/// Racing simulation the telemetry is read from
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GameSource {
    #[default]
    IRacing,
    ACC,
    RFactor2,
    LeMansUltimate,
}

impl std::fmt::Display for GameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameSource::IRacing => write!(f, "iRacing"),
            GameSource::ACC => write!(f, "Assetto Corsa Competizione"),
            GameSource::RFactor2 => write!(f, "rFactor 2"),
            GameSource::LeMansUltimate => write!(f, "Le Mans Ultimate"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionType {
    TestDay,
    #[default]
    Practice,
    Qualify,
    Warmup,
    Race,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum MotorState {
    #[default]
    Inactive,
    Propulsion,
    Regeneration,
}

/// Static information about the current session, changes only when the player joins a new
/// session or swaps car/track.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionInfo {
    pub track_name: String,
    /// Track length in meters
    pub track_length_m: f64,
    pub vehicle_name: String,
    pub vehicle_class: String,
    pub game_source: GameSource,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            track_name: "Unknown".to_string(),
            track_length_m: 0.,
            vehicle_name: "Unknown".to_string(),
            vehicle_class: "Unknown".to_string(),
            game_source: GameSource::default(),
        }
    }
}

impl SessionInfo {
    /// Identifier of the car + track pairing, safe to use as a file name
    pub fn combo_id(&self) -> String {
        let class_or_car = if self.vehicle_class.is_empty() {
            &self.vehicle_name
        } else {
            &self.vehicle_class
        };
        format!("{} - {}", self.track_name, class_or_car)
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

/// Dynamic session state sampled every tick
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionState {
    pub session_type: SessionType,
    /// Stamp assigned by the sim when the session starts
    pub session_stamp: i64,
    /// Seconds since session start
    pub elapsed_s: f64,
    /// Seconds until the session clock ends
    pub time_left_s: f64,
    /// Race length in laps, 0 for timed sessions
    pub total_laps: u32,
}

impl SessionState {
    /// Whether the session length is defined by laps rather than time
    pub fn is_lap_type(&self) -> bool {
        self.total_laps > 0 && self.total_laps < 100_000
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VehicleTelemetry {
    pub slot_id: i32,
    pub driver_name: String,
    pub class_name: String,
    pub is_player: bool,
    /// Overall place, 1 based
    pub place: u32,
    /// Starting place from qualifying, 1 based, 0 if unknown
    pub qualify_place: u32,
    pub laps_done: u32,
    /// Meters traveled from S/F this lap
    pub lap_distance_m: f64,
    /// Session elapsed time when the current lap started
    pub lap_start_time_s: f64,
    pub last_laptime_s: f64,
    pub best_laptime_s: f64,
    pub is_last_lap_valid: bool,
    /// Current sector, 0 based
    pub sector_index: u8,
    /// Split at the end of sector 1 on the current lap
    pub cur_sector1_s: f64,
    /// Split at the end of sector 2 on the current lap (cumulative)
    pub cur_sector2_s: f64,
    pub last_sector1_s: f64,
    pub last_sector2_s: f64,
    pub in_pits: bool,
    pub in_garage: bool,
    pub pit_stops: u32,
    pub time_behind_leader_s: f64,
    pub laps_behind_leader: u32,
    pub time_behind_next_s: f64,
    pub laps_behind_next: u32,
    pub speed_mps: f64,
    /// World position x, y, z in meters, y is up
    pub position: [f64; 3],
    /// Heading around the vertical axis (rad)
    pub yaw_rad: f64,
    pub is_yellow_flag: bool,
}

impl VehicleTelemetry {
    const EMPTY: VehicleTelemetry = VehicleTelemetry {
        slot_id: -1,
        driver_name: String::new(),
        class_name: String::new(),
        is_player: false,
        place: 0,
        qualify_place: 0,
        laps_done: 0,
        lap_distance_m: 0.,
        lap_start_time_s: 0.,
        last_laptime_s: 0.,
        best_laptime_s: 0.,
        is_last_lap_valid: false,
        sector_index: 0,
        cur_sector1_s: 0.,
        cur_sector2_s: 0.,
        last_sector1_s: 0.,
        last_sector2_s: 0.,
        in_pits: false,
        in_garage: false,
        pit_stops: 0,
        time_behind_leader_s: 0.,
        laps_behind_leader: 0,
        time_behind_next_s: 0.,
        laps_behind_next: 0,
        speed_mps: 0.,
        position: [0.; 3],
        yaw_rad: 0.,
        is_yellow_flag: false,
    };
}

impl Default for VehicleTelemetry {
    fn default() -> Self {
        Self::EMPTY
    }
}

static EMPTY_VEHICLE: VehicleTelemetry = VehicleTelemetry::EMPTY;

/// Unified per-tick snapshot of everything the calculators read.
///
/// The accessors take an optional vehicle index that defaults to the player and fall back to
/// zero/empty values when the index is not available, so calculators never have to deal with
/// a missing vehicle.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryData {
    pub point_no: usize,
    pub timestamp_ms: u64,
    pub game_source: GameSource,
    pub session: SessionState,
    pub player_index: usize,
    pub vehicles: Vec<VehicleTelemetry>,
    /// Fuel tank capacity in liters
    pub fuel_capacity_l: f64,
    pub fuel_l: f64,
    /// Remaining virtual energy, 0-100
    pub energy_pct: f64,
    /// Hybrid battery charge, 0-100
    pub battery_charge_pct: f64,
    pub motor_state: MotorState,
    /// Remaining tread per wheel (LF, RF, LR, RR), 100 is a new tyre
    pub tyre_wear_pct: [f64; 4],
}

impl TelemetryData {
    /// Number of vehicles in the session, capped at [`MAX_VEHICLES`]
    pub fn total_vehicles(&self) -> usize {
        self.vehicles.len().min(MAX_VEHICLES)
    }

    pub fn vehicle(&self, index: Option<usize>) -> &VehicleTelemetry {
        let index = index.unwrap_or(self.player_index);
        if index >= MAX_VEHICLES {
            return &EMPTY_VEHICLE;
        }
        self.vehicles.get(index).unwrap_or(&EMPTY_VEHICLE)
    }

    pub fn player(&self) -> &VehicleTelemetry {
        self.vehicle(None)
    }

    /// Lap distance in meters
    pub fn lap_distance(&self, index: Option<usize>) -> f64 {
        self.vehicle(index).lap_distance_m
    }

    /// Time since the vehicle crossed the start/finish line
    pub fn current_laptime(&self, index: Option<usize>) -> f64 {
        (self.session.elapsed_s - self.vehicle(index).lap_start_time_s).max(0.)
    }

    pub fn lap_start_time(&self, index: Option<usize>) -> f64 {
        self.vehicle(index).lap_start_time_s
    }

    pub fn last_laptime(&self, index: Option<usize>) -> f64 {
        self.vehicle(index).last_laptime_s
    }

    pub fn in_pits(&self, index: Option<usize>) -> bool {
        self.vehicle(index).in_pits
    }

    pub fn speed(&self, index: Option<usize>) -> f64 {
        self.vehicle(index).speed_mps
    }

    /// Completed laps plus the fraction of the current lap
    pub fn lap_progress(&self, index: Option<usize>, track_length_m: f64) -> f64 {
        let vehicle = self.vehicle(index);
        let fraction = if track_length_m > 0. {
            (vehicle.lap_distance_m / track_length_m).clamp(0., 1.)
        } else {
            0.
        };
        vehicle.laps_done as f64 + fraction
    }

    /// Whether the player is out of the garage and driving
    pub fn is_on_track(&self) -> bool {
        !self.vehicles.is_empty() && !self.player().in_garage
    }
}

/// Records written to and read from telemetry replay files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TelemetryOutput {
    DataPoint(Box<TelemetryData>),
    SessionChange(SessionInfo),
}
