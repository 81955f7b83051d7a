// Session identity shared by every calculator that keeps per-session state

use serde::{Deserialize, Serialize};

use crate::telemetry::{SessionInfo, TelemetryData};

/// Identity of a session as seen at one tick.
///
/// Two identities belong to the same session when the combo and the sim's session stamp match
/// and neither the elapsed time nor the lap count went backwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionIdentity {
    pub combo_id: String,
    pub session_stamp: i64,
    pub session_elapsed: f64,
    pub lap_count: u32,
}

impl SessionIdentity {
    pub fn from_telemetry(session_info: &SessionInfo, telemetry: &TelemetryData) -> Self {
        Self {
            combo_id: session_info.combo_id(),
            session_stamp: telemetry.session.session_stamp,
            session_elapsed: telemetry.session.elapsed_s,
            lap_count: telemetry.player().laps_done,
        }
    }

    /// Whether `current` continues the session this identity was taken from
    pub fn is_same_session(&self, current: &SessionIdentity) -> bool {
        self.combo_id == current.combo_id
            && self.session_stamp == current.session_stamp
            && self.session_elapsed <= current.session_elapsed
            && self.lap_count <= current.lap_count
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionChange {
    /// Same session as the previous tick
    Same,
    /// New session on the same car and track
    NewSession,
    /// Car or track changed, history files must be reloaded
    NewCombo,
}

/// Remembers the identity seen on the previous tick and classifies the next one
#[derive(Debug, Default)]
pub struct SessionTracker {
    last: Option<SessionIdentity>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, current: SessionIdentity) -> SessionChange {
        let change = match self.last {
            None => SessionChange::NewCombo,
            Some(ref last) if last.combo_id != current.combo_id => SessionChange::NewCombo,
            Some(ref last) if !last.is_same_session(&current) => SessionChange::NewSession,
            Some(_) => SessionChange::Same,
        };
        self.last = Some(current);
        change
    }

    pub fn current(&self) -> Option<&SessionIdentity> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(stamp: i64, elapsed: f64, laps: u32) -> SessionIdentity {
        SessionIdentity {
            combo_id: "monza-gt3".to_string(),
            session_stamp: stamp,
            session_elapsed: elapsed,
            lap_count: laps,
        }
    }

    #[test]
    fn test_same_session_requires_progress() {
        let stored = identity(1, 100., 3);
        assert!(stored.is_same_session(&identity(1, 150., 3)));
        assert!(stored.is_same_session(&identity(1, 100., 4)));
        assert!(!stored.is_same_session(&identity(1, 50., 3)));
        assert!(!stored.is_same_session(&identity(1, 150., 2)));
        assert!(!stored.is_same_session(&identity(2, 150., 3)));
    }

    #[test]
    fn test_tracker_classifies_changes() {
        let mut tracker = SessionTracker::new();
        assert_eq!(tracker.check(identity(1, 10., 0)), SessionChange::NewCombo);
        assert_eq!(tracker.check(identity(1, 11., 0)), SessionChange::Same);
        assert_eq!(tracker.check(identity(1, 2., 0)), SessionChange::NewSession);
        let other_combo = SessionIdentity {
            combo_id: "spa-gt3".to_string(),
            ..identity(1, 3., 0)
        };
        assert_eq!(tracker.check(other_combo), SessionChange::NewCombo);
    }
}
