use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::PaddockError;

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "paddock";

/// Shortest polling interval accepted from the config file
const MIN_UPDATE_INTERVAL_MS: u64 = 10;

/// Polling cadence of a calculator thread
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModuleTiming {
    pub enable: bool,
    /// Interval while the player is on track
    pub update_interval_ms: u64,
    /// Interval while the player is in the garage or no telemetry is available
    pub idle_update_interval_ms: u64,
}

impl Default for ModuleTiming {
    fn default() -> Self {
        Self::with_interval(20)
    }
}

impl ModuleTiming {
    pub fn with_interval(update_interval_ms: u64) -> Self {
        Self {
            enable: true,
            update_interval_ms,
            idle_update_interval_ms: 400,
        }
    }

    fn validate(&mut self, section: &str) {
        let default = ModuleTiming::default();
        if self.update_interval_ms < MIN_UPDATE_INTERVAL_MS {
            warn!(
                "{}.update_interval_ms={} is below {}ms, using {}",
                section, self.update_interval_ms, MIN_UPDATE_INTERVAL_MS, default.update_interval_ms
            );
            self.update_interval_ms = default.update_interval_ms;
        }
        if self.idle_update_interval_ms < self.update_interval_ms {
            warn!(
                "{}.idle_update_interval_ms is below the active interval, using {}",
                section, self.update_interval_ms
            );
            self.idle_update_interval_ms = self.update_interval_ms;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DeltaConfig {
    pub timing: ModuleTiming,
    /// Number of samples the published delta is averaged over
    pub delta_smoothing_samples: usize,
    /// Minimum distance (meters) between two recorded trace samples
    pub min_delta_distance: f64,
    /// Seconds into a lap before any delta is published
    pub delta_start_delay_s: f64,
    /// Number of laps the pace lap time is averaged over
    pub laptime_pace_samples: usize,
    /// Maximum seconds the pace lap time may rise in one lap
    pub laptime_pace_margin: f64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming::with_interval(20),
            delta_smoothing_samples: 30,
            min_delta_distance: 5.,
            delta_start_delay_s: 0.3,
            laptime_pace_samples: 6,
            laptime_pace_margin: 5.,
        }
    }
}

/// Settings shared by the fuel and energy calculators
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConsumptionConfig {
    pub timing: ModuleTiming,
    pub min_delta_distance: f64,
    /// Below this speed (m/s) an increase of the resource counts as a refill
    pub refill_speed_threshold_mps: f64,
    pub delta_start_delay_s: f64,
}

impl Default for ConsumptionConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming::with_interval(20),
            min_delta_distance: 5.,
            refill_speed_threshold_mps: 1.,
            delta_start_delay_s: 0.3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HybridConfig {
    pub timing: ModuleTiming,
    /// Minimum distance between two samples of the battery drain trace
    pub min_delta_distance: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming::with_interval(50),
            min_delta_distance: 5.,
        }
    }
}

/// Minimum remaining thickness (percent) before a part is considered failed
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct WearThreshold {
    pub tyre_failure_pct: f64,
    pub brake_failure_pct: f64,
}

impl Default for WearThreshold {
    fn default() -> Self {
        Self {
            tyre_failure_pct: 0.,
            brake_failure_pct: 0.,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WheelsConfig {
    pub timing: ModuleTiming,
    pub min_delta_distance: f64,
    /// Failure thresholds keyed by vehicle class name
    pub failure_thresholds: HashMap<String, WearThreshold>,
    pub default_failure_threshold: WearThreshold,
}

impl Default for WheelsConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming::with_interval(50),
            min_delta_distance: 5.,
            failure_thresholds: HashMap::new(),
            default_failure_threshold: WearThreshold::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SectorsConfig {
    pub timing: ModuleTiming,
}

impl Default for SectorsConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming::with_interval(50),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RelativeConfig {
    pub timing: ModuleTiming,
    /// Extra rows shown ahead of the player in the relative list
    pub additional_front: usize,
    /// Extra rows shown behind the player in the relative list
    pub additional_behind: usize,
    /// Maximum rows in the standings list
    pub max_vehicles_standings: usize,
    /// Leading places always shown in the standings list
    pub min_top_vehicles: usize,
    /// Group standings by vehicle class in multi-class sessions
    pub split_mode_enable: bool,
    pub max_vehicles_player_class: usize,
    pub max_vehicles_other_class: usize,
}

impl Default for RelativeConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming::with_interval(100),
            additional_front: 0,
            additional_behind: 0,
            max_vehicles_standings: 10,
            min_top_vehicles: 3,
            split_mode_enable: true,
            max_vehicles_player_class: 7,
            max_vehicles_other_class: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct VehiclesConfig {
    pub timing: ModuleTiming,
    /// Lap progress difference above which a vehicle counts as a lap ahead
    pub lap_difference_ahead_threshold: f64,
    /// Lap progress difference above which a vehicle counts as a lap behind
    pub lap_difference_behind_threshold: f64,
    /// Vehicles slower than this (m/s) on track are treated as a yellow flag hazard
    pub yellow_flag_speed_mps: f64,
}

impl Default for VehiclesConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming::with_interval(50),
            lap_difference_ahead_threshold: 0.9,
            lap_difference_behind_threshold: 0.9,
            yellow_flag_speed_mps: 8.,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RestApiConfig {
    pub timing: ModuleTiming,
    pub url_host: String,
    pub url_port_lmu: u16,
    pub url_port_rf2: u16,
    pub connection_timeout_ms: u64,
    /// Attempts made for a run-once resource before it is marked unavailable
    pub connection_retry: u32,
    pub connection_retry_delay_ms: u64,
    pub enable_weather_info: bool,
    pub enable_session_info: bool,
    pub enable_pit_info: bool,
    pub enable_wear_info: bool,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            timing: ModuleTiming {
                enable: true,
                update_interval_ms: 1000,
                idle_update_interval_ms: 2000,
            },
            url_host: "localhost".to_string(),
            url_port_lmu: 6397,
            url_port_rf2: 5397,
            connection_timeout_ms: 1000,
            connection_retry: 3,
            connection_retry_delay_ms: 500,
            enable_weather_info: true,
            enable_session_info: true,
            enable_pit_info: true,
            enable_wear_info: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PaddockConfig {
    /// Telemetry collector polling rate
    pub refresh_rate_ms: u64,
    /// Override for the history files directory
    pub data_dir: Option<PathBuf>,
    pub delta: DeltaConfig,
    pub fuel: ConsumptionConfig,
    pub energy: ConsumptionConfig,
    pub hybrid: HybridConfig,
    pub wheels: WheelsConfig,
    pub sectors: SectorsConfig,
    pub relative: RelativeConfig,
    pub vehicles: VehiclesConfig,
    pub restapi: RestApiConfig,
}

impl Default for PaddockConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 10,
            data_dir: None,
            delta: DeltaConfig::default(),
            fuel: ConsumptionConfig::default(),
            energy: ConsumptionConfig::default(),
            hybrid: HybridConfig::default(),
            wheels: WheelsConfig::default(),
            sectors: SectorsConfig::default(),
            relative: RelativeConfig::default(),
            vehicles: VehiclesConfig::default(),
            restapi: RestApiConfig::default(),
        }
    }
}

impl PaddockConfig {
    pub fn default_path() -> Option<PathBuf> {
        Some(
            dirs::config_dir()?
                .join(APP_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        )
    }

    /// Default location of history files, `<data dir>/paddock`
    pub fn history_dir(&self) -> Result<PathBuf, PaddockError> {
        match self.data_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(dirs::data_dir()
                .ok_or(PaddockError::NoConfigDir)?
                .join(APP_DIR_NAME)),
        }
    }

    /// Load the config from the user's config directory, falling back to defaults when the
    /// file does not exist.
    pub fn from_local_file() -> Result<Self, PaddockError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, PaddockError> {
        let file =
            std::fs::File::open(path).map_err(|e| PaddockError::ConfigIOError { source: e })?;
        let mut config: PaddockConfig = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| PaddockError::ConfigSerializeError { source: e })?;
        config.validate();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), PaddockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PaddockError::ConfigIOError { source: e })?;
        }
        let file =
            std::fs::File::create(path).map_err(|e| PaddockError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| PaddockError::ConfigSerializeError { source: e })
    }

    /// Replace out of range values with their defaults
    pub fn validate(&mut self) {
        let default = PaddockConfig::default();
        if self.refresh_rate_ms == 0 {
            warn!("refresh_rate_ms must be positive, using {}", default.refresh_rate_ms);
            self.refresh_rate_ms = default.refresh_rate_ms;
        }

        self.delta.timing.validate("delta");
        if self.delta.delta_smoothing_samples == 0 {
            self.delta.delta_smoothing_samples = default.delta.delta_smoothing_samples;
        }
        if self.delta.laptime_pace_samples == 0 {
            self.delta.laptime_pace_samples = default.delta.laptime_pace_samples;
        }
        if !(self.delta.min_delta_distance > 0.) {
            warn!("delta.min_delta_distance must be positive");
            self.delta.min_delta_distance = default.delta.min_delta_distance;
        }
        if !(self.delta.laptime_pace_margin >= 0.) {
            self.delta.laptime_pace_margin = default.delta.laptime_pace_margin;
        }
        if !(self.delta.delta_start_delay_s >= 0.) {
            self.delta.delta_start_delay_s = default.delta.delta_start_delay_s;
        }

        for (name, section) in [("fuel", &mut self.fuel), ("energy", &mut self.energy)] {
            section.timing.validate(name);
            if !(section.min_delta_distance > 0.) {
                warn!("{}.min_delta_distance must be positive", name);
                section.min_delta_distance = default.fuel.min_delta_distance;
            }
            if !(section.refill_speed_threshold_mps >= 0.) {
                section.refill_speed_threshold_mps = default.fuel.refill_speed_threshold_mps;
            }
            if !(section.delta_start_delay_s >= 0.) {
                section.delta_start_delay_s = default.fuel.delta_start_delay_s;
            }
        }

        self.hybrid.timing.validate("hybrid");
        if !(self.hybrid.min_delta_distance > 0.) {
            self.hybrid.min_delta_distance = default.hybrid.min_delta_distance;
        }
        self.wheels.timing.validate("wheels");
        if !(self.wheels.min_delta_distance > 0.) {
            self.wheels.min_delta_distance = default.wheels.min_delta_distance;
        }
        self.sectors.timing.validate("sectors");

        self.relative.timing.validate("relative");
        if self.relative.max_vehicles_standings == 0 {
            self.relative.max_vehicles_standings = default.relative.max_vehicles_standings;
        }
        if self.relative.min_top_vehicles >= self.relative.max_vehicles_standings {
            warn!("relative.min_top_vehicles must be below max_vehicles_standings");
            self.relative.min_top_vehicles = self.relative.max_vehicles_standings - 1;
        }

        self.vehicles.timing.validate("vehicles");
        if !(self.vehicles.lap_difference_ahead_threshold > 0.) {
            self.vehicles.lap_difference_ahead_threshold =
                default.vehicles.lap_difference_ahead_threshold;
        }
        if !(self.vehicles.lap_difference_behind_threshold > 0.) {
            self.vehicles.lap_difference_behind_threshold =
                default.vehicles.lap_difference_behind_threshold;
        }

        self.restapi.timing.validate("restapi");
        if self.restapi.connection_timeout_ms == 0 {
            self.restapi.connection_timeout_ms = default.restapi.connection_timeout_ms;
        }
        if self.restapi.connection_retry == 0 {
            warn!("restapi.connection_retry must be at least 1");
            self.restapi.connection_retry = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: PaddockConfig =
            serde_json::from_str(r#"{"delta": {"delta_smoothing_samples": 10}}"#).unwrap();
        assert_eq!(config.delta.delta_smoothing_samples, 10);
        assert_eq!(config.delta.min_delta_distance, 5.);
        assert_eq!(config.relative, RelativeConfig::default());
    }

    #[test]
    fn test_validate_resets_invalid_values() {
        let mut config = PaddockConfig::default();
        config.delta.timing.update_interval_ms = 1;
        config.delta.delta_smoothing_samples = 0;
        config.relative.min_top_vehicles = 50;
        config.restapi.connection_retry = 0;
        config.fuel.min_delta_distance = -1.;
        config.validate();

        assert_eq!(config.delta.timing.update_interval_ms, 20);
        assert_eq!(config.delta.delta_smoothing_samples, 30);
        assert_eq!(config.relative.min_top_vehicles, 9);
        assert_eq!(config.restapi.connection_retry, 1);
        assert_eq!(config.fuel.min_delta_distance, 5.);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = PaddockConfig::default();
        config.relative.additional_front = 2;
        config.save(&path).unwrap();

        let loaded = PaddockConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
