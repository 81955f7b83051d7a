// REST resources polled per sim and how their values land in the read-model

use serde_json::Value;

use crate::PaddockError;
use crate::config::RestApiConfig;
use crate::info::{RestApiInfo, WeatherInfo, WeatherNode};
use crate::telemetry::GameSource;

/// Whether a task is fetched once per garage-out or on every active tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    RunOnce,
    Repeat,
}

/// Sections written by the REST fetcher, published together after each pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestOutputs {
    pub weather: WeatherInfo,
    pub rest: RestApiInfo,
}

/// Read-model field a REST value is bound to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestField {
    PrivateQualifying,
    PitStopTimeEstimate,
    PitStopFuelRatio,
    VirtualEnergyMax,
    BrakeWear,
    SuspensionDamage,
    PenaltyCount,
    ForecastPractice,
    ForecastQualify,
    ForecastRace,
}

fn parse_bool(value: &Value) -> Option<bool> {
    value
        .as_bool()
        .or_else(|| value.as_i64().map(|v| v != 0))
}

fn parse_wheels(value: &Value) -> Option<[f64; 4]> {
    let wheels = value.as_array()?;
    if wheels.len() != 4 {
        return None;
    }
    Some([
        wheels[0].as_f64()?,
        wheels[1].as_f64()?,
        wheels[2].as_f64()?,
        wheels[3].as_f64()?,
    ])
}

fn parse_weather_node(node: &Value) -> Option<WeatherNode> {
    Some(WeatherNode {
        start_time_s: node.get("startTime")?.as_f64()?,
        sky_type: node.get("sky")?.as_i64()?,
        temperature_c: node.get("temperature")?.as_f64()?,
        rain_chance_pct: node.get("rainChance")?.as_f64()?,
    })
}

/// Forecast nodes come either as an array or as an object keyed by node name
fn parse_forecast(value: &Value) -> Option<Vec<WeatherNode>> {
    let nodes: Vec<&Value> = match value {
        Value::Array(nodes) => nodes.iter().collect(),
        Value::Object(nodes) => nodes.values().collect(),
        _ => return None,
    };
    let mut forecast = nodes
        .into_iter()
        .map(parse_weather_node)
        .collect::<Option<Vec<_>>>()?;
    forecast.sort_by(|a, b| a.start_time_s.total_cmp(&b.start_time_s));
    Some(forecast)
}

impl RestField {
    /// Write `value` into its field, a missing or mistyped value resets the field to its
    /// default.
    pub fn apply(&self, outputs: &mut RestOutputs, value: Option<&Value>) {
        let rest = &mut outputs.rest;
        let weather = &mut outputs.weather;
        match self {
            RestField::PrivateQualifying => {
                rest.private_qualifying = value.and_then(parse_bool).unwrap_or_default()
            }
            RestField::PitStopTimeEstimate => {
                rest.pit_stop_time_estimate_s = value.and_then(Value::as_f64).unwrap_or_default()
            }
            RestField::PitStopFuelRatio => {
                rest.pit_stop_fuel_ratio = value.and_then(Value::as_f64).unwrap_or_default()
            }
            RestField::VirtualEnergyMax => {
                rest.virtual_energy_max = value.and_then(Value::as_f64).unwrap_or_default()
            }
            RestField::BrakeWear => {
                rest.brake_wear_pct = value.and_then(parse_wheels).unwrap_or_default()
            }
            RestField::SuspensionDamage => {
                rest.suspension_damage_pct = value.and_then(parse_wheels).unwrap_or_default()
            }
            RestField::PenaltyCount => {
                rest.penalty_count = value.and_then(Value::as_i64).unwrap_or_default()
            }
            RestField::ForecastPractice => {
                weather.forecast_practice = value.and_then(parse_forecast).unwrap_or_default()
            }
            RestField::ForecastQualify => {
                weather.forecast_qualify = value.and_then(parse_forecast).unwrap_or_default()
            }
            RestField::ForecastRace => {
                weather.forecast_race = value.and_then(parse_forecast).unwrap_or_default()
            }
        }
    }
}

/// Walk a dotted key path, numeric segments index into arrays. An empty path is the whole
/// payload.
pub fn resolve_key_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |node, key| match node {
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Object(map) => map.get(key),
        _ => None,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputBinding {
    pub field: RestField,
    pub key_path: &'static str,
}

const fn bind(field: RestField, key_path: &'static str) -> OutputBinding {
    OutputBinding { field, key_path }
}

/// One REST resource to poll
#[derive(Clone, Debug)]
pub struct ForecastTask {
    pub resource: &'static str,
    pub bindings: Vec<OutputBinding>,
    pub condition: fn(&RestApiConfig) -> bool,
    pub kind: TaskKind,
}

impl ForecastTask {
    fn new(
        resource: &'static str,
        bindings: &[OutputBinding],
        condition: fn(&RestApiConfig) -> bool,
        kind: TaskKind,
    ) -> Self {
        Self {
            resource,
            bindings: bindings.to_vec(),
            condition,
            kind,
        }
    }

    pub fn is_enabled(&self, config: &RestApiConfig) -> bool {
        (self.condition)(config)
    }

    /// Apply a fetched payload to every binding
    pub fn apply(&self, outputs: &mut RestOutputs, payload: &Value) {
        for binding in &self.bindings {
            binding
                .field
                .apply(outputs, resolve_key_path(payload, binding.key_path));
        }
    }

    /// Reset every bound field after a failed fetch
    pub fn reset(&self, outputs: &mut RestOutputs) {
        for binding in &self.bindings {
            binding.field.apply(outputs, None);
        }
    }
}

/// Base url of the sim's REST api
pub fn base_url(game: GameSource, config: &RestApiConfig) -> Result<String, PaddockError> {
    let port = match game {
        GameSource::LeMansUltimate => config.url_port_lmu,
        GameSource::RFactor2 => config.url_port_rf2,
        other => {
            return Err(PaddockError::RestApiUnsupported {
                game: other.to_string(),
            });
        }
    };
    Ok(format!("http://{}:{}/rest", config.url_host, port))
}

fn weather_tasks() -> ForecastTask {
    ForecastTask::new(
        "sessions/weather",
        &[
            bind(RestField::ForecastPractice, "PRACTICE"),
            bind(RestField::ForecastQualify, "QUALIFY"),
            bind(RestField::ForecastRace, "RACE"),
        ],
        |config| config.enable_weather_info,
        TaskKind::Repeat,
    )
}

fn private_qualifying_task() -> ForecastTask {
    ForecastTask::new(
        "sessions/setting/SESSSET_private_qualy",
        &[bind(RestField::PrivateQualifying, "currentValue")],
        |config| config.enable_session_info,
        TaskKind::RunOnce,
    )
}

/// Tasks available for `game`
pub fn tasks_for(game: GameSource) -> Result<Vec<ForecastTask>, PaddockError> {
    match game {
        GameSource::LeMansUltimate => Ok(vec![
            private_qualifying_task(),
            ForecastTask::new(
                "pitStopTimes/times",
                &[
                    bind(RestField::PitStopTimeEstimate, "total"),
                    bind(RestField::PitStopFuelRatio, "fuelRatio"),
                ],
                |config| config.enable_pit_info,
                TaskKind::RunOnce,
            ),
            ForecastTask::new(
                "garage/getPlayerGarageData",
                &[bind(RestField::VirtualEnergyMax, "virtualEnergy.max")],
                |config| config.enable_pit_info,
                TaskKind::RunOnce,
            ),
            weather_tasks(),
            ForecastTask::new(
                "garage/UIScreen/RepairAndRefuel",
                &[
                    bind(RestField::BrakeWear, "wearables.brakes"),
                    bind(RestField::SuspensionDamage, "wearables.suspension"),
                ],
                |config| config.enable_wear_info,
                TaskKind::Repeat,
            ),
            ForecastTask::new(
                "sessions/penalties",
                &[bind(RestField::PenaltyCount, "count")],
                |config| config.enable_session_info,
                TaskKind::Repeat,
            ),
        ]),
        GameSource::RFactor2 => Ok(vec![private_qualifying_task(), weather_tasks()]),
        other => Err(PaddockError::RestApiUnsupported {
            game: other.to_string(),
        }),
    }
}
