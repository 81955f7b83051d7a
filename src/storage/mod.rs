// History file storage for lap traces, consumption history and sector bests

pub mod records;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::errors::PaddockError;
use crate::session::SessionIdentity;
use crate::trace::{LapTrace, TraceSample};

pub use records::{
    CONSUMPTION_HISTORY_CAPACITY, ConsumptionHistory, ConsumptionRecord, NO_SECTOR_TIME,
    SectorBestRecord,
};

/// Rows past `track length * this factor` are treated as corrupt. A full lap plus half a track
/// of slack; anything shorter would clip valid traces, which end 10m past the line.
const MAX_TRACE_DISTANCE_FACTOR: f64 = 1.5;
const SECTOR_BEST_ROWS: usize = 5;

/// Kind of lap trace, each kind is stored in its own directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TraceKind {
    DeltaBest,
    Fuel,
    Energy,
}

impl TraceKind {
    fn dir_name(&self) -> &'static str {
        match self {
            TraceKind::DeltaBest => "deltabest",
            TraceKind::Fuel => "fuel",
            TraceKind::Energy => "energy",
        }
    }
}

/// Key-value store for everything the calculators persist between sessions, keyed by combo id.
pub trait HistoryStorage: Send + Sync {
    /// Load a lap trace, `Ok(None)` when there is no usable history
    fn load_trace(
        &self,
        kind: TraceKind,
        combo_id: &str,
        track_length_m: f64,
    ) -> Result<Option<LapTrace>, PaddockError>;

    fn save_trace(
        &self,
        kind: TraceKind,
        combo_id: &str,
        trace: &LapTrace,
    ) -> Result<(), PaddockError>;

    /// Load the consumption history, newest first. Never empty: a missing or broken file
    /// yields a single default record.
    fn load_consumption(&self, combo_id: &str) -> Result<Vec<ConsumptionRecord>, PaddockError>;

    fn save_consumption(
        &self,
        combo_id: &str,
        records: &[ConsumptionRecord],
    ) -> Result<(), PaddockError>;

    fn load_sector_best(&self, combo_id: &str) -> Result<Option<SectorBestRecord>, PaddockError>;

    fn save_sector_best(
        &self,
        combo_id: &str,
        record: &SectorBestRecord,
    ) -> Result<(), PaddockError>;
}

/// File-based implementation of the history storage.
///
/// Every file is JSON Lines, one row per line, written to a temporary file, verified by
/// reading it back and then renamed over the target.
pub struct FileHistoryStorage {
    storage_path: PathBuf,
}

impl FileHistoryStorage {
    pub fn new(storage_path: PathBuf) -> Result<Self, PaddockError> {
        if !storage_path.exists() {
            fs::create_dir_all(&storage_path)
                .map_err(|e| PaddockError::ConfigIOError { source: e })?;
        }
        Ok(Self { storage_path })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn file_path(&self, dir: &str, combo_id: &str) -> PathBuf {
        self.storage_path
            .join(dir)
            .join(format!("{}.jsonl", normalize_combo_id(combo_id)))
    }

    fn read_rows(path: &Path) -> Result<Vec<Value>, PaddockError> {
        serde_jsonlines::json_lines(path)
            .map_err(|e| PaddockError::FileOperationError {
                operation: "read_history_file".to_string(),
                reason: format!("{:?}: {}", path, e),
            })?
            .collect::<Result<Vec<Value>, std::io::Error>>()
            .map_err(|e| PaddockError::HistoryStorageError {
                reason: format!("Failed to parse {:?}: {}", path, e),
            })
    }

    fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), PaddockError> {
        let parent = path.parent().ok_or_else(|| PaddockError::FileOperationError {
            operation: "write_history_file".to_string(),
            reason: "Cannot determine parent directory".to_string(),
        })?;
        fs::create_dir_all(parent).map_err(|e| PaddockError::FileOperationError {
            operation: "write_history_file".to_string(),
            reason: format!("Cannot create directory {:?}: {}", parent, e),
        })?;

        let tmp_path = path.with_extension("jsonl.tmp");
        serde_jsonlines::write_json_lines(&tmp_path, rows).map_err(|e| {
            PaddockError::FileOperationError {
                operation: "write_history_file".to_string(),
                reason: format!("{:?}: {}", tmp_path, e),
            }
        })?;

        let written = Self::read_rows(&tmp_path).map(|read| read.len()).unwrap_or(0);
        if written != rows.len() {
            let _ = fs::remove_file(&tmp_path);
            return Err(PaddockError::WriteVerificationError {
                path: format!("{:?}", path),
            });
        }

        fs::rename(&tmp_path, path).map_err(|e| PaddockError::FileOperationError {
            operation: "replace_history_file".to_string(),
            reason: format!("{:?}: {}", path, e),
        })?;
        debug!("Saved {} rows to {:?}", rows.len(), path);
        Ok(())
    }
}

impl HistoryStorage for FileHistoryStorage {
    fn load_trace(
        &self,
        kind: TraceKind,
        combo_id: &str,
        track_length_m: f64,
    ) -> Result<Option<LapTrace>, PaddockError> {
        let path = self.file_path(kind.dir_name(), combo_id);
        if !path.exists() {
            debug!("No {:?} trace for {}", kind, combo_id);
            return Ok(None);
        }

        let rows = Self::read_rows(&path)?;
        let mut trace = trace_from_rows(&rows).ok_or_else(|| PaddockError::HistoryStorageError {
            reason: format!("Malformed trace rows in {:?}", path),
        })?;

        if track_length_m > 0. {
            let dropped = trace.truncate_beyond(track_length_m * MAX_TRACE_DISTANCE_FACTOR);
            if dropped > 0 {
                warn!(
                    "Dropped {} out of range samples from {:?}, rewriting file",
                    dropped, path
                );
                if trace.is_persistable() {
                    if let Err(e) = self.save_trace(kind, combo_id, &trace) {
                        warn!("Could not rewrite corrected trace {:?}: {}", path, e);
                    }
                }
            }
        }

        if !trace.is_persistable() {
            warn!("Ignoring incomplete trace in {:?}", path);
            return Ok(None);
        }
        Ok(Some(trace))
    }

    fn save_trace(
        &self,
        kind: TraceKind,
        combo_id: &str,
        trace: &LapTrace,
    ) -> Result<(), PaddockError> {
        if !trace.is_persistable() {
            return Err(PaddockError::HistoryStorageError {
                reason: format!("Trace with {} samples is not persistable", trace.len()),
            });
        }
        let path = self.file_path(kind.dir_name(), combo_id);
        Self::write_rows(&path, &trace_to_rows(trace))
    }

    fn load_consumption(&self, combo_id: &str) -> Result<Vec<ConsumptionRecord>, PaddockError> {
        let path = self.file_path("consumption", combo_id);
        if !path.exists() {
            return Ok(vec![ConsumptionRecord::default()]);
        }
        let rows = match Self::read_rows(&path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Consumption history {:?} unreadable, using defaults: {}", path, e);
                return Ok(vec![ConsumptionRecord::default()]);
            }
        };
        let mut records: Vec<ConsumptionRecord> =
            rows.iter().map(ConsumptionRecord::from_value).collect();
        records.truncate(CONSUMPTION_HISTORY_CAPACITY);
        if records.is_empty() {
            records.push(ConsumptionRecord::default());
        }
        Ok(records)
    }

    fn save_consumption(
        &self,
        combo_id: &str,
        records: &[ConsumptionRecord],
    ) -> Result<(), PaddockError> {
        let path = self.file_path("consumption", combo_id);
        Self::write_rows(&path, records)
    }

    fn load_sector_best(&self, combo_id: &str) -> Result<Option<SectorBestRecord>, PaddockError> {
        let path = self.file_path("sectors", combo_id);
        if !path.exists() {
            return Ok(None);
        }
        let rows = Self::read_rows(&path)?;
        let record = sector_best_from_rows(&rows);
        if record.is_none() {
            warn!("Malformed sector best file {:?}", path);
        }
        Ok(record)
    }

    fn save_sector_best(
        &self,
        combo_id: &str,
        record: &SectorBestRecord,
    ) -> Result<(), PaddockError> {
        let path = self.file_path("sectors", combo_id);
        Self::write_rows(&path, &sector_best_to_rows(record)?)
    }
}

/// In-memory history storage, nothing survives the process
#[derive(Default)]
pub struct MemoryHistoryStorage {
    traces: Mutex<HashMap<(TraceKind, String), LapTrace>>,
    consumption: Mutex<HashMap<String, Vec<ConsumptionRecord>>>,
    sector_best: Mutex<HashMap<String, SectorBestRecord>>,
}

impl MemoryHistoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStorage for MemoryHistoryStorage {
    fn load_trace(
        &self,
        kind: TraceKind,
        combo_id: &str,
        _track_length_m: f64,
    ) -> Result<Option<LapTrace>, PaddockError> {
        Ok(self
            .traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, combo_id.to_string()))
            .cloned())
    }

    fn save_trace(
        &self,
        kind: TraceKind,
        combo_id: &str,
        trace: &LapTrace,
    ) -> Result<(), PaddockError> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((kind, combo_id.to_string()), trace.clone());
        Ok(())
    }

    fn load_consumption(&self, combo_id: &str) -> Result<Vec<ConsumptionRecord>, PaddockError> {
        Ok(self
            .consumption
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(combo_id)
            .cloned()
            .unwrap_or_else(|| vec![ConsumptionRecord::default()]))
    }

    fn save_consumption(
        &self,
        combo_id: &str,
        records: &[ConsumptionRecord],
    ) -> Result<(), PaddockError> {
        self.consumption
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(combo_id.to_string(), records.to_vec());
        Ok(())
    }

    fn load_sector_best(&self, combo_id: &str) -> Result<Option<SectorBestRecord>, PaddockError> {
        Ok(self
            .sector_best
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(combo_id)
            .cloned())
    }

    fn save_sector_best(
        &self,
        combo_id: &str,
        record: &SectorBestRecord,
    ) -> Result<(), PaddockError> {
        self.sector_best
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(combo_id.to_string(), record.clone());
        Ok(())
    }
}

/// Normalize a combo id for consistent file naming
fn normalize_combo_id(combo_id: &str) -> String {
    combo_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn trace_to_rows(trace: &LapTrace) -> Vec<Vec<f64>> {
    let last = trace.len().saturating_sub(1);
    trace
        .samples()
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if i == last {
                vec![s.distance, s.value, trace.lap_time()]
            } else {
                vec![s.distance, s.value]
            }
        })
        .collect()
}

fn trace_from_rows(rows: &[Value]) -> Option<LapTrace> {
    let mut samples = Vec::with_capacity(rows.len());
    let mut lap_time = None;
    for row in rows {
        let columns = row.as_array()?;
        let distance = columns.first()?.as_f64()?;
        let value = columns.get(1)?.as_f64()?;
        lap_time = columns.get(2).and_then(Value::as_f64).or(lap_time);
        samples.push(TraceSample::new(distance, value));
    }
    let total = samples.last().map(|s| s.value).unwrap_or(0.);
    Some(LapTrace::new(samples, lap_time.unwrap_or(total)))
}

fn sector_best_to_rows(record: &SectorBestRecord) -> Result<Vec<Value>, PaddockError> {
    let identity = serde_json::to_value(&record.identity)
        .map_err(|e| PaddockError::ConfigSerializeError { source: e })?;
    Ok(vec![
        identity,
        Value::from(record.session_theoretical.to_vec()),
        Value::from(record.session_personal.to_vec()),
        Value::from(record.alltime_theoretical.to_vec()),
        Value::from(record.alltime_personal.to_vec()),
    ])
}

fn sector_best_from_rows(rows: &[Value]) -> Option<SectorBestRecord> {
    if rows.len() != SECTOR_BEST_ROWS {
        return None;
    }
    let identity: SessionIdentity = serde_json::from_value(rows[0].clone()).ok()?;
    let triple = |row: &Value| -> Option<[f64; 3]> {
        let columns = row.as_array()?;
        if columns.len() != 3 {
            return None;
        }
        Some([
            columns[0].as_f64()?,
            columns[1].as_f64()?,
            columns[2].as_f64()?,
        ])
    };
    Some(SectorBestRecord {
        identity,
        session_theoretical: triple(&rows[1])?,
        session_personal: triple(&rows[2])?,
        alltime_theoretical: triple(&rows[3])?,
        alltime_personal: triple(&rows[4])?,
    })
}

/// Create the default file storage under `dir`, logging where history files live
pub fn open_file_storage(dir: PathBuf) -> Result<FileHistoryStorage, PaddockError> {
    let storage = FileHistoryStorage::new(dir)?;
    info!("History files stored in {:?}", storage.storage_path());
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_trace(samples: usize) -> LapTrace {
        LapTrace::new(
            (0..samples)
                .map(|i| TraceSample::new(i as f64 * 100., i as f64 * 8.))
                .collect(),
            (samples as f64 - 1.) * 8.,
        )
    }

    #[test]
    fn test_trace_round_trip_keeps_lap_time() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        let trace = LapTrace::new(sample_trace(12).samples().to_vec(), 90.5);
        storage.save_trace(TraceKind::DeltaBest, "Monza-GT3", &trace).unwrap();

        let loaded = storage
            .load_trace(TraceKind::DeltaBest, "Monza-GT3", 5000.)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, trace);
        assert!(!dir.path().join("deltabest").join("monza-gt3.jsonl.tmp").exists());
    }

    #[test]
    fn test_short_trace_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        assert!(
            storage
                .save_trace(TraceKind::Fuel, "combo", &sample_trace(4))
                .is_err()
        );
        assert!(storage.load_trace(TraceKind::Fuel, "combo", 0.).unwrap().is_none());
    }

    #[test]
    fn test_runaway_samples_are_dropped_and_file_rewritten() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        // 15 samples up to 1400m on a 800m track: everything past 1200m is dropped
        storage
            .save_trace(TraceKind::DeltaBest, "combo", &sample_trace(15))
            .unwrap();
        let loaded = storage
            .load_trace(TraceKind::DeltaBest, "combo", 800.)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.len(), 13);

        let rows = FileHistoryStorage::read_rows(
            &dir.path().join("deltabest").join("combo.jsonl"),
        )
        .unwrap();
        assert_eq!(rows.len(), 13);
    }

    #[test]
    fn test_rows_just_past_cutoff_are_dropped() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        // full 1000m lap, one row on the 1500m cutoff and one just beyond it
        let mut samples: Vec<TraceSample> = (0..=10)
            .map(|i| TraceSample::new(i as f64 * 100., i as f64 * 9.))
            .collect();
        samples.push(TraceSample::new(1500., 95.));
        samples.push(TraceSample::new(1500.5, 96.));
        storage
            .save_trace(TraceKind::Fuel, "combo", &LapTrace::new(samples, 96.))
            .unwrap();

        let loaded = storage
            .load_trace(TraceKind::Fuel, "combo", 1000.)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.len(), 12);
        let last = loaded.samples()[loaded.len() - 1];
        assert_eq!(last.distance, 1500.);
        // the full lap survives the trim
        assert_eq!(loaded.lookup(1000.), 90.);

        let rows = FileHistoryStorage::read_rows(&dir.path().join("fuel").join("combo.jsonl"))
            .unwrap();
        assert_eq!(rows.len(), 12);
    }

    #[test]
    fn test_corrupt_trace_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        let path = dir.path().join("energy");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("combo.jsonl"), "[1.0, 2.0]\n{\"not\": \"a row\"}\n").unwrap();
        assert!(storage.load_trace(TraceKind::Energy, "combo", 0.).is_err());
    }

    #[test]
    fn test_missing_consumption_history_yields_default_record() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        let records = storage.load_consumption("combo").unwrap();
        assert_eq!(records, vec![ConsumptionRecord::default()]);

        let path = dir.path().join("consumption");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("combo.jsonl"), "not json at all").unwrap();
        let records = storage.load_consumption("combo").unwrap();
        assert_eq!(records, vec![ConsumptionRecord::default()]);
    }

    #[test]
    fn test_consumption_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        let records = vec![
            ConsumptionRecord {
                lap_number: 2,
                is_valid: true,
                lap_time_s: 92.1,
                fuel_used_l: 2.4,
                ..Default::default()
            },
            ConsumptionRecord {
                lap_number: 1,
                ..Default::default()
            },
        ];
        storage.save_consumption("combo", &records).unwrap();
        assert_eq!(storage.load_consumption("combo").unwrap(), records);
    }

    #[test]
    fn test_sector_best_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = FileHistoryStorage::new(dir.path().to_path_buf()).unwrap();
        let record = SectorBestRecord {
            identity: SessionIdentity {
                combo_id: "combo".to_string(),
                session_stamp: 4,
                session_elapsed: 300.,
                lap_count: 3,
            },
            session_theoretical: [30.1, 31.2, 29.9],
            ..Default::default()
        };
        storage.save_sector_best("combo", &record).unwrap();
        assert_eq!(storage.load_sector_best("combo").unwrap(), Some(record));
        assert_eq!(storage.load_sector_best("other").unwrap(), None);
    }
}
