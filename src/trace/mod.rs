//! Lap traces: sparse distance -> cumulative value samples of a single lap.
//!
//! A [`TraceRecorder`] collects the samples of the lap in progress and hands a completed
//! [`LapTrace`] back once the lap has been confirmed by the sim's official lap time:
//!
//! ```text
//! Idle -> Recording -> PendingValidation -> Committed | Discarded -> Recording (next lap)
//! ```
//!
//! Validation of the previous lap runs while the next lap is already being recorded, so the
//! pending slot is kept separate from the recording buffer.

pub mod sync;

use serde::{Deserialize, Serialize};

use crate::calc;

pub use sync::{PositionSynchronizer, guard_lap_start_distance};

/// Minimum samples for a trace to be saved to or accepted from disk
pub const MIN_PERSIST_SAMPLES: usize = 10;
/// Distance added past the last recorded sample for the terminal sample of a lap
pub const TERMINAL_DISTANCE_OFFSET: f64 = 10.;
/// Seconds after the line before a finished lap may be validated
pub const VALIDATION_MIN_DELAY_S: f64 = 1.;
/// Seconds after the line after which an unconfirmed lap is discarded
pub const VALIDATION_TIMEOUT_S: f64 = 10.;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceSample {
    pub distance: f64,
    pub value: f64,
}

impl TraceSample {
    pub fn new(distance: f64, value: f64) -> Self {
        Self { distance, value }
    }
}

/// Samples of one completed lap plus the lap time it was recorded with
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LapTrace {
    samples: Vec<TraceSample>,
    lap_time: f64,
}

impl LapTrace {
    pub fn new(samples: Vec<TraceSample>, lap_time: f64) -> Self {
        Self { samples, lap_time }
    }

    pub fn samples(&self) -> &[TraceSample] {
        &self.samples
    }

    pub fn lap_time(&self) -> f64 {
        self.lap_time
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Cumulative value at the end of the lap
    pub fn total(&self) -> f64 {
        self.samples.last().map(|s| s.value).unwrap_or(0.)
    }

    /// Interpolated value at `distance`, clamped to the first and last samples.
    pub fn lookup(&self, distance: f64) -> f64 {
        let (first, last) = match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.,
        };
        if distance <= first.distance {
            return first.value;
        }
        if distance >= last.distance {
            return last.value;
        }
        // index of the first sample past `distance`, always in 1..len here
        let upper = self.samples.partition_point(|s| s.distance <= distance);
        let lo = &self.samples[upper - 1];
        let hi = &self.samples[upper];
        calc::linear_interp(distance, lo.distance, lo.value, hi.distance, hi.value)
    }

    /// Whether the trace is complete enough to be persisted or loaded
    pub fn is_persistable(&self) -> bool {
        if self.samples.len() < MIN_PERSIST_SAMPLES {
            return false;
        }
        let increasing = self
            .samples
            .windows(2)
            .all(|pair| pair[1].distance > pair[0].distance);
        let first_value = self
            .samples
            .iter()
            .map(|s| s.value)
            .find(|value| *value != 0.)
            .unwrap_or(0.);
        increasing && self.total() > first_value
    }

    /// Drop samples past `max_distance`, returns how many were dropped
    pub fn truncate_beyond(&mut self, max_distance: f64) -> usize {
        let before = self.samples.len();
        self.samples.retain(|s| s.distance <= max_distance);
        before - self.samples.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// Outcome of validating the pending lap
#[derive(Clone, Debug, PartialEq)]
pub enum Validation {
    NothingPending,
    Pending,
    Committed(LapTrace),
    Discarded,
}

/// Records the samples of the current lap and validates finished laps.
#[derive(Debug, Clone)]
pub struct TraceRecorder {
    min_delta_distance: f64,
    recording: bool,
    pit_lap: bool,
    samples: Vec<TraceSample>,
    pending: Option<LapTrace>,
}

impl TraceRecorder {
    pub fn new(min_delta_distance: f64) -> Self {
        Self {
            min_delta_distance,
            recording: false,
            pit_lap: false,
            samples: Vec::new(),
            pending: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        if self.recording {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_pit_lap(&self) -> bool {
        self.pit_lap
    }

    /// Samples of the lap in progress
    pub fn current(&self) -> &[TraceSample] {
        &self.samples
    }

    /// Start recording if the lap has just begun and it is not a pit lap
    pub fn begin_lap(&mut self, laptime: f64, in_pit: bool) -> bool {
        if in_pit {
            self.mark_pit();
        }
        if !self.recording && !self.pit_lap && laptime < sync::LAP_START_WINDOW_S {
            self.samples.clear();
            self.recording = true;
            return true;
        }
        false
    }

    /// The lap in progress touched the pit lane and must not be used as a reference
    pub fn mark_pit(&mut self) {
        self.pit_lap = true;
        self.recording = false;
        self.samples.clear();
    }

    /// Add a sample if recording and far enough from the previous one
    pub fn append(&mut self, distance: f64, value: f64) -> bool {
        if !self.recording {
            return false;
        }
        let far_enough = self
            .samples
            .last()
            .is_none_or(|last| distance - last.distance >= self.min_delta_distance);
        if far_enough {
            self.samples.push(TraceSample::new(distance, value));
        }
        far_enough
    }

    /// Close the lap in progress and arm deferred validation.
    ///
    /// Returns `true` when a candidate trace is now pending. Pit laps, laps with fewer than
    /// two samples and laps whose final value does not exceed the last sample are dropped.
    pub fn finalize_lap(&mut self, final_value: f64, final_laptime: f64) -> bool {
        let samples = std::mem::take(&mut self.samples);
        let was_recording = self.recording;
        let was_pit_lap = self.pit_lap;
        self.recording = false;
        self.pit_lap = false;

        if !was_recording || was_pit_lap || samples.len() < 2 {
            return false;
        }
        let last = samples[samples.len() - 1];
        if final_value <= last.value {
            return false;
        }
        let mut samples = samples;
        samples.push(TraceSample::new(
            last.distance + TERMINAL_DISTANCE_OFFSET,
            final_value,
        ));
        self.pending = Some(LapTrace::new(samples, final_laptime));
        true
    }

    /// Check the pending lap against the sim's official lap time.
    pub fn validate(&mut self, elapsed_since_finish: f64, official_laptime: f64) -> Validation {
        let measured = match self.pending {
            None => return Validation::NothingPending,
            Some(ref pending) => pending.lap_time(),
        };
        if elapsed_since_finish > VALIDATION_TIMEOUT_S {
            self.pending = None;
            return Validation::Discarded;
        }
        if elapsed_since_finish > VALIDATION_MIN_DELAY_S
            && official_laptime > 0.
            && official_laptime.trunc() == measured.trunc()
        {
            return match self.pending.take() {
                Some(trace) => Validation::Committed(trace),
                None => Validation::NothingPending,
            };
        }
        Validation::Pending
    }

    pub fn reset(&mut self) {
        self.recording = false;
        self.pit_lap = false;
        self.samples.clear();
        self.pending = None;
    }
}

/// Exponential smoothing of a live delta with a quiet period at the start of each lap.
#[derive(Debug, Clone)]
pub struct DeltaSmoother {
    factor: f64,
    start_delay_s: f64,
    value: f64,
}

impl DeltaSmoother {
    pub fn new(samples: usize, start_delay_s: f64) -> Self {
        Self {
            factor: calc::ema_factor(samples),
            start_delay_s,
            value: 0.,
        }
    }

    /// Smoothed delta, `None` while inside the start delay
    pub fn update(&mut self, laptime: f64, raw_delta: f64) -> Option<f64> {
        if laptime < self.start_delay_s {
            return None;
        }
        self.value = calc::ema(self.value, raw_delta, self.factor);
        Some(self.value)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.;
    }
}
