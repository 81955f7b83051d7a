use std::{collections::VecDeque, path::Path};

use log::{debug, info};

use crate::PaddockError;

use super::{GameSource, SessionInfo, TelemetryData, TelemetryOutput};

/// Trait for telemetry producers that provide data from racing simulations.
///
/// The trait returns `TelemetryData` from the `telemetry()` method, a unified snapshot of the
/// player and every vehicle on track. Simulator specific adapters (shared memory readers)
/// implement this trait outside of the derivation pipeline, the crate ships a replay producer
/// and an in-memory producer.
///
/// # Lifecycle
///
/// 1. Call `start()` to initialize the connection to the game or data source
/// 2. Call `session_info()` to retrieve session metadata (track, vehicle, game)
/// 3. Call `telemetry()` repeatedly to get telemetry snapshots
/// 4. Use `game_source()` to identify which game the data is coming from
pub trait TelemetryProducer {
    /// Initialize the telemetry producer and establish connection to the data source.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn start(&mut self) -> Result<(), PaddockError>;

    /// Retrieve session information for the snapshot returned by the last `telemetry()` call.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer is not started or if session info cannot be retrieved.
    fn session_info(&mut self) -> Result<SessionInfo, PaddockError>;

    /// Get the next telemetry snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PaddockError::TelemetryExhausted`] once a finite source has no more data.
    fn telemetry(&mut self) -> Result<TelemetryData, PaddockError>;

    fn game_source(&self) -> GameSource;
}

/// Replays a recorded JSON Lines file of [`TelemetryOutput`] records.
///
/// Session changes found in the file update the session info returned by the producer
/// before the next data point is handed out.
pub struct ReplayTelemetryProducer {
    records: VecDeque<TelemetryOutput>,
    session_info: SessionInfo,
    started: bool,
}

impl ReplayTelemetryProducer {
    pub fn from_records(records: Vec<TelemetryOutput>) -> Self {
        Self {
            records: records.into(),
            session_info: SessionInfo::default(),
            started: false,
        }
    }

    /// Load a replay from a JSON Lines file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or a line is not a valid record.
    pub fn from_file(file: &Path) -> Result<Self, PaddockError> {
        let records = serde_jsonlines::json_lines(file)
            .map_err(|e| PaddockError::TelemetryFileError { source: e })?
            .collect::<Result<Vec<TelemetryOutput>, std::io::Error>>()
            .map_err(|e| PaddockError::TelemetryProducerError {
                description: format!("Could not parse replay file {:?}: {}", file, e),
            })?;
        info!("Loaded {} replay records from {:?}", records.len(), file);
        Ok(Self::from_records(records))
    }
}

impl TelemetryProducer for ReplayTelemetryProducer {
    fn start(&mut self) -> Result<(), PaddockError> {
        self.started = true;
        // pick up the session info that precedes the first data point
        while let Some(TelemetryOutput::SessionChange(_)) = self.records.front() {
            if let Some(TelemetryOutput::SessionChange(info)) = self.records.pop_front() {
                self.session_info = info;
            }
        }
        Ok(())
    }

    fn session_info(&mut self) -> Result<SessionInfo, PaddockError> {
        if !self.started {
            return Err(PaddockError::TelemetryProducerError {
                description: "The replay is not started, call start() first.".to_string(),
            });
        }
        Ok(self.session_info.clone())
    }

    fn telemetry(&mut self) -> Result<TelemetryData, PaddockError> {
        if !self.started {
            return Err(PaddockError::TelemetryProducerError {
                description: "The replay is not started, call start() first.".to_string(),
            });
        }
        while let Some(record) = self.records.pop_front() {
            match record {
                TelemetryOutput::SessionChange(info) => {
                    debug!("Replay session change: {}", info.combo_id());
                    self.session_info = info;
                }
                TelemetryOutput::DataPoint(point) => return Ok(*point),
            }
        }
        Err(PaddockError::TelemetryExhausted)
    }

    fn game_source(&self) -> GameSource {
        self.session_info.game_source
    }
}

/// A mock telemetry producer for testing.
///
/// Hands out the provided points in order with a fixed session info.
pub struct MockTelemetryProducer {
    cur_tick: usize,
    points: Vec<TelemetryData>,
    pub session_info: SessionInfo,
}

impl MockTelemetryProducer {
    pub fn from_points(points: Vec<TelemetryData>, session_info: SessionInfo) -> Self {
        Self {
            cur_tick: 0,
            points,
            session_info,
        }
    }
}

impl TelemetryProducer for MockTelemetryProducer {
    fn start(&mut self) -> Result<(), PaddockError> {
        Ok(())
    }

    fn session_info(&mut self) -> Result<SessionInfo, PaddockError> {
        Ok(self.session_info.clone())
    }

    fn telemetry(&mut self) -> Result<TelemetryData, PaddockError> {
        let point = self
            .points
            .get(self.cur_tick)
            .cloned()
            .ok_or(PaddockError::TelemetryExhausted)?;
        self.cur_tick += 1;
        Ok(point)
    }

    fn game_source(&self) -> GameSource {
        self.session_info.game_source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_replay_applies_session_changes() {
        let first = SessionInfo {
            track_name: "Monza".to_string(),
            game_source: GameSource::LeMansUltimate,
            ..Default::default()
        };
        let second = SessionInfo {
            track_name: "Spa".to_string(),
            ..first.clone()
        };
        let mut producer = ReplayTelemetryProducer::from_records(vec![
            TelemetryOutput::SessionChange(first),
            TelemetryOutput::DataPoint(Box::new(TelemetryData {
                point_no: 1,
                ..Default::default()
            })),
            TelemetryOutput::SessionChange(second),
            TelemetryOutput::DataPoint(Box::new(TelemetryData {
                point_no: 2,
                ..Default::default()
            })),
        ]);
        assert!(producer.session_info().is_err());
        producer.start().unwrap();
        assert_eq!(producer.session_info().unwrap().track_name, "Monza");
        assert_eq!(producer.game_source(), GameSource::LeMansUltimate);

        assert_eq!(producer.telemetry().unwrap().point_no, 1);
        assert_eq!(producer.telemetry().unwrap().point_no, 2);
        assert_eq!(producer.session_info().unwrap().track_name, "Spa");
        assert!(matches!(
            producer.telemetry(),
            Err(PaddockError::TelemetryExhausted)
        ));
    }

    #[test]
    fn test_replay_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("replay.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        let records = vec![
            TelemetryOutput::SessionChange(SessionInfo::default()),
            TelemetryOutput::DataPoint(Box::new(TelemetryData {
                point_no: 7,
                ..Default::default()
            })),
        ];
        for record in &records {
            writeln!(file, "{}", serde_json::to_string(record).unwrap()).unwrap();
        }
        drop(file);

        let mut producer = ReplayTelemetryProducer::from_file(&path).unwrap();
        producer.start().unwrap();
        assert_eq!(producer.telemetry().unwrap().point_no, 7);
    }

    #[test]
    fn test_mock_producer_exhausts() {
        let mut producer =
            MockTelemetryProducer::from_points(vec![TelemetryData::default()], SessionInfo::default());
        assert!(producer.start().is_ok());
        assert!(producer.telemetry().is_ok());
        assert!(producer.telemetry().is_err());
    }
}
