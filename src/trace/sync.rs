// Position/time synchronization for lap distance samples

/// Consecutive backward readings tolerated before the raw position is accepted
pub const DESYNC_TOLERANCE: u32 = 20;
/// A single backward jump larger than this is accepted immediately
pub const DESYNC_MAX_JUMP: f64 = 200.;
/// Lap time below which a lap counts as just started
pub const LAP_START_WINDOW_S: f64 = 1.;
/// Distance above which a reading at lap start is considered stale
pub const LAP_START_MAX_DISTANCE: f64 = 300.;

/// Turns raw lap distance readings into a monotonic "synced" position.
///
/// Short backward glitches are ignored, while a persistent or large regression is treated as
/// the new authority.
#[derive(Debug, Clone, Default)]
pub struct PositionSynchronizer {
    synced: Option<f64>,
    desync_count: u32,
    resync_count: u32,
}

impl PositionSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw position and get the synced position back
    pub fn step(&mut self, raw: f64) -> f64 {
        let synced = match self.synced {
            None => {
                self.desync_count = 0;
                raw
            }
            Some(synced) if synced > raw => {
                if self.desync_count > DESYNC_TOLERANCE || synced - raw > DESYNC_MAX_JUMP {
                    self.desync_count = 0;
                    self.resync_count += 1;
                    raw
                } else {
                    self.desync_count += 1;
                    synced
                }
            }
            Some(synced) if synced < raw => {
                self.desync_count = 0;
                raw
            }
            Some(synced) => synced,
        };
        self.synced = Some(synced);
        synced
    }

    /// Forget the current position, the next reading is accepted as is
    pub fn reset(&mut self) {
        self.synced = None;
        self.desync_count = 0;
    }

    pub fn synced(&self) -> f64 {
        self.synced.unwrap_or(0.)
    }

    /// Number of times the synchronizer snapped to a backward reading
    pub fn resync_count(&self) -> u32 {
        self.resync_count
    }
}

/// Protects a new lap against a stale end-of-lap distance reading
pub fn guard_lap_start_distance(laptime: f64, distance: f64) -> f64 {
    if laptime < LAP_START_WINDOW_S && distance > LAP_START_MAX_DISTANCE {
        0.
    } else {
        distance
    }
}
