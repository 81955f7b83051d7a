// Records persisted alongside lap traces

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionIdentity;

/// Number of completed laps kept in the consumption history
pub const CONSUMPTION_HISTORY_CAPACITY: usize = 100;
/// Placeholder for a sector without a recorded time
pub const NO_SECTOR_TIME: f64 = 99999.;

/// Consumption snapshot of one completed lap
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub lap_number: u32,
    pub is_valid: bool,
    pub lap_time_s: f64,
    pub fuel_used_l: f64,
    pub energy_used_pct: f64,
    pub battery_drain_pct: f64,
    pub battery_regen_pct: f64,
    pub tank_capacity_l: f64,
}

impl Default for ConsumptionRecord {
    fn default() -> Self {
        Self {
            lap_number: 0,
            is_valid: false,
            lap_time_s: 0.,
            fuel_used_l: 0.,
            energy_used_pct: 0.,
            battery_drain_pct: 0.,
            battery_regen_pct: 0.,
            tank_capacity_l: 0.,
        }
    }
}

impl ConsumptionRecord {
    /// Build a record from a loosely typed row, every missing or mistyped column takes its
    /// default value.
    pub fn from_value(row: &Value) -> Self {
        let default = Self::default();
        let number = |key: &str, fallback: f64| -> f64 {
            row.get(key).and_then(Value::as_f64).unwrap_or(fallback)
        };
        Self {
            lap_number: row
                .get("lap_number")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(default.lap_number),
            is_valid: row
                .get("is_valid")
                .and_then(Value::as_bool)
                .unwrap_or(default.is_valid),
            lap_time_s: number("lap_time_s", default.lap_time_s),
            fuel_used_l: number("fuel_used_l", default.fuel_used_l),
            energy_used_pct: number("energy_used_pct", default.energy_used_pct),
            battery_drain_pct: number("battery_drain_pct", default.battery_drain_pct),
            battery_regen_pct: number("battery_regen_pct", default.battery_regen_pct),
            tank_capacity_l: number("tank_capacity_l", default.tank_capacity_l),
        }
    }
}

/// Ring buffer of the most recent laps, newest first
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConsumptionHistory {
    records: VecDeque<ConsumptionRecord>,
    dirty: bool,
}

impl ConsumptionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap loaded records, newest first, keeping at most the ring capacity
    pub fn from_records(records: Vec<ConsumptionRecord>) -> Self {
        let mut records: VecDeque<ConsumptionRecord> = records.into();
        records.truncate(CONSUMPTION_HISTORY_CAPACITY);
        Self {
            records,
            dirty: false,
        }
    }

    pub fn push(&mut self, record: ConsumptionRecord) {
        self.records.push_front(record);
        self.records.truncate(CONSUMPTION_HISTORY_CAPACITY);
        self.dirty = true;
    }

    pub fn records(&self) -> impl Iterator<Item = &ConsumptionRecord> {
        self.records.iter()
    }

    pub fn latest(&self) -> Option<&ConsumptionRecord> {
        self.records.front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub fn to_vec(&self) -> Vec<ConsumptionRecord> {
        self.records.iter().cloned().collect()
    }
}

/// Content of a sector best file
#[derive(Clone, Debug, PartialEq)]
pub struct SectorBestRecord {
    pub identity: SessionIdentity,
    pub session_theoretical: [f64; 3],
    pub session_personal: [f64; 3],
    pub alltime_theoretical: [f64; 3],
    pub alltime_personal: [f64; 3],
}

impl Default for SectorBestRecord {
    fn default() -> Self {
        Self {
            identity: SessionIdentity::default(),
            session_theoretical: [NO_SECTOR_TIME; 3],
            session_personal: [NO_SECTOR_TIME; 3],
            alltime_theoretical: [NO_SECTOR_TIME; 3],
            alltime_personal: [NO_SECTOR_TIME; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_loose_row() {
        let row = json!({
            "lap_number": 12,
            "is_valid": "yes",
            "lap_time_s": 95.4,
            "fuel_used_l": "oops",
        });
        let record = ConsumptionRecord::from_value(&row);
        assert_eq!(record.lap_number, 12);
        assert!(!record.is_valid);
        assert_eq!(record.lap_time_s, 95.4);
        assert_eq!(record.fuel_used_l, 0.);
    }

    #[test]
    fn test_history_is_bounded_newest_first() {
        let mut history = ConsumptionHistory::new();
        for lap in 0..(CONSUMPTION_HISTORY_CAPACITY as u32 + 5) {
            history.push(ConsumptionRecord {
                lap_number: lap,
                ..Default::default()
            });
        }
        assert_eq!(history.len(), CONSUMPTION_HISTORY_CAPACITY);
        assert_eq!(history.latest().unwrap().lap_number, 104);
        assert_eq!(history.records().last().unwrap().lap_number, 5);
        assert!(history.is_dirty());
        history.mark_saved();
        assert!(!history.is_dirty());
    }
}
