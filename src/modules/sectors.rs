// Sector times, theoretical best and personal best lap sectors

use std::sync::Arc;

use log::{debug, info, warn};

use crate::PaddockError;
use crate::config::{ModuleTiming, SectorsConfig};
use crate::info::{Published, SectorsInfo};
use crate::session::{SessionChange, SessionIdentity, SessionTracker};
use crate::storage::{HistoryStorage, NO_SECTOR_TIME, SectorBestRecord};
use crate::telemetry::{SessionInfo, TelemetryData};

use super::DataModule;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SectorsInput {
    pub sector_index: u8,
    pub cur_sector1: f64,
    pub cur_sector2: f64,
    pub last_sector1: f64,
    pub last_sector2: f64,
    pub last_laptime: f64,
    pub in_pits: bool,
    pub is_last_lap_valid: bool,
}

impl SectorsInput {
    pub fn from_telemetry(telemetry: &TelemetryData) -> Self {
        let player = telemetry.player();
        Self {
            sector_index: player.sector_index,
            cur_sector1: player.cur_sector1_s,
            cur_sector2: player.cur_sector2_s,
            last_sector1: player.last_sector1_s,
            last_sector2: player.last_sector2_s,
            last_laptime: player.last_laptime_s,
            in_pits: player.in_pits,
            is_last_lap_valid: player.is_last_lap_valid,
        }
    }
}

fn has_time(time: f64) -> bool {
    time > 0. && time < NO_SECTOR_TIME
}

fn lap_total(sectors: &[f64; 3]) -> f64 {
    if sectors.iter().all(|t| has_time(*t)) {
        sectors.iter().sum()
    } else {
        NO_SECTOR_TIME
    }
}

fn gap(time: f64, best: f64) -> Option<f64> {
    if has_time(best) {
        Some(time - best)
    } else {
        None
    }
}

/// Sector bests of one combo.
pub struct SectorsTracker {
    best: SectorBestRecord,
    last_index: Option<u8>,
    current: [f64; 3],
    info: SectorsInfo,
    pit_lap: bool,
    changed: bool,
}

impl SectorsTracker {
    pub fn new(best: SectorBestRecord) -> Self {
        let mut tracker = Self {
            best,
            last_index: None,
            current: [NO_SECTOR_TIME; 3],
            info: SectorsInfo::default(),
            pit_lap: false,
            changed: false,
        };
        tracker.sync_bests();
        tracker
    }

    pub fn best(&self) -> &SectorBestRecord {
        &self.best
    }

    pub fn info(&self) -> &SectorsInfo {
        &self.info
    }

    /// Whether bests changed since the last call
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Drop session bests, the all-time bests survive
    pub fn reset_session(&mut self) {
        self.best.session_theoretical = [NO_SECTOR_TIME; 3];
        self.best.session_personal = [NO_SECTOR_TIME; 3];
        self.last_index = None;
        self.current = [NO_SECTOR_TIME; 3];
        self.pit_lap = false;
        self.info = SectorsInfo::default();
        self.sync_bests();
    }

    fn sync_bests(&mut self) {
        self.info.session_theoretical = self.best.session_theoretical;
        self.info.session_personal = self.best.session_personal;
        self.info.alltime_theoretical = self.best.alltime_theoretical;
        self.info.alltime_personal = self.best.alltime_personal;
    }

    fn complete_sector(&mut self, sector: usize, time: f64) {
        if !has_time(time) {
            return;
        }
        self.current[sector] = time;
        self.info.last_completed_sector = Some(sector);
        self.info.gap_theoretical_session = gap(time, self.best.session_theoretical[sector]);
        self.info.gap_personal_session = gap(time, self.best.session_personal[sector]);
        self.info.gap_theoretical_alltime = gap(time, self.best.alltime_theoretical[sector]);
        self.info.gap_personal_alltime = gap(time, self.best.alltime_personal[sector]);

        if self.pit_lap {
            return;
        }
        if time < self.best.session_theoretical[sector] {
            self.best.session_theoretical[sector] = time;
            self.changed = true;
        }
        if time < self.best.alltime_theoretical[sector] {
            self.best.alltime_theoretical[sector] = time;
            self.changed = true;
        }
    }

    fn complete_lap(&mut self, lap_valid: bool) {
        let sectors = self.current;
        self.info.sectors_last = sectors;
        self.current = [NO_SECTOR_TIME; 3];
        let was_pit_lap = std::mem::take(&mut self.pit_lap);
        let total = lap_total(&sectors);
        if was_pit_lap || !lap_valid || !has_time(total) {
            return;
        }
        if total < lap_total(&self.best.session_personal) {
            self.best.session_personal = sectors;
            self.changed = true;
        }
        if total < lap_total(&self.best.alltime_personal) {
            debug!("New personal best lap {:.3}s from sectors", total);
            self.best.alltime_personal = sectors;
            self.changed = true;
        }
    }

    pub fn step(&mut self, input: &SectorsInput) {
        if input.in_pits {
            self.pit_lap = true;
        }
        self.info.sector_index = input.sector_index;
        let previous = self.last_index.replace(input.sector_index);
        match (previous, input.sector_index) {
            (Some(0), 1) => self.complete_sector(0, input.cur_sector1),
            (Some(1), 2) => self.complete_sector(1, input.cur_sector2 - input.cur_sector1),
            (Some(2), 0) => {
                self.complete_sector(2, input.last_laptime - input.last_sector2);
                self.current[0] = input.last_sector1;
                self.current[1] = input.last_sector2 - input.last_sector1;
                self.complete_lap(input.is_last_lap_valid);
            }
            (Some(from), to) if from != to => {
                // skipped a sector, the lap cannot be used
                self.current = [NO_SECTOR_TIME; 3];
                self.pit_lap = true;
            }
            _ => {}
        }
        self.sync_bests();
    }
}

pub struct SectorsModule {
    config: SectorsConfig,
    output: Published<SectorsInfo>,
    storage: Arc<dyn HistoryStorage>,
    sessions: SessionTracker,
    tracker: SectorsTracker,
    combo_id: String,
}

impl SectorsModule {
    pub fn new(
        config: SectorsConfig,
        output: Published<SectorsInfo>,
        storage: Arc<dyn HistoryStorage>,
    ) -> Self {
        Self {
            config,
            output,
            storage,
            sessions: SessionTracker::new(),
            tracker: SectorsTracker::new(SectorBestRecord::default()),
            combo_id: String::new(),
        }
    }

    fn load(&mut self, identity: &SessionIdentity) {
        let mut best = match self.storage.load_sector_best(&self.combo_id) {
            Ok(Some(record)) => record,
            Ok(None) => SectorBestRecord::default(),
            Err(e) => {
                warn!("Sector best history unusable, starting fresh: {}", e);
                SectorBestRecord::default()
            }
        };
        if !best.identity.is_same_session(identity) {
            best.session_theoretical = [NO_SECTOR_TIME; 3];
            best.session_personal = [NO_SECTOR_TIME; 3];
        } else {
            info!("Resuming session sector bests for {}", self.combo_id);
        }
        best.identity = identity.clone();
        self.tracker = SectorsTracker::new(best);
    }

    fn save(&mut self, identity: Option<SessionIdentity>) {
        if self.combo_id.is_empty() {
            return;
        }
        let mut record = self.tracker.best().clone();
        if let Some(identity) = identity {
            record.identity = identity;
        }
        if let Err(e) = self.storage.save_sector_best(&self.combo_id, &record) {
            warn!("Could not save sector bests: {}", e);
        }
    }
}

impl DataModule for SectorsModule {
    fn name(&self) -> &'static str {
        "sectors"
    }

    fn timing(&self) -> &ModuleTiming {
        &self.config.timing
    }

    fn update(
        &mut self,
        session_info: &SessionInfo,
        telemetry: &TelemetryData,
    ) -> Result<(), PaddockError> {
        let identity = SessionIdentity::from_telemetry(session_info, telemetry);
        match self.sessions.check(identity.clone()) {
            SessionChange::NewCombo => {
                self.combo_id = session_info.combo_id();
                self.load(&identity);
            }
            SessionChange::NewSession => self.tracker.reset_session(),
            SessionChange::Same => {}
        }

        self.tracker.step(&SectorsInput::from_telemetry(telemetry));
        if self.tracker.take_changed() {
            self.save(Some(identity));
        }
        self.output.set(self.tracker.info().clone());
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), PaddockError> {
        let identity = self.sessions.current().cloned();
        self.save(identity);
        Ok(())
    }
}
