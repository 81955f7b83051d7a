use std::{
    sync::{
        Arc, PoisonError, RwLock,
        mpsc::{Receiver, RecvTimeoutError},
    },
    time::Duration,
};

use log::{info, warn};

use crate::PaddockError;

use super::{SessionInfo, TelemetryData, producer::TelemetryProducer};

/// Latest session info and telemetry snapshot read by the calculators
#[derive(Clone, Debug)]
pub struct FeedSnapshot {
    pub session_info: Arc<SessionInfo>,
    pub telemetry: Arc<TelemetryData>,
}

/// Shared slot holding the most recent telemetry snapshot.
///
/// The collector thread is the only writer. Calculator threads grab a cheap clone of the
/// `Arc`s on every tick.
#[derive(Clone, Debug, Default)]
pub struct TelemetryFeed {
    latest: Arc<RwLock<Option<FeedSnapshot>>>,
}

impl TelemetryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, session_info: Arc<SessionInfo>, telemetry: TelemetryData) {
        let snapshot = FeedSnapshot {
            session_info,
            telemetry: Arc::new(telemetry),
        };
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    pub fn latest(&self) -> Option<FeedSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Polls the producer every `refresh` and stores the result in the feed until a stop signal is
/// received or the producer runs out of data.
pub fn collect_telemetry(
    mut producer: impl TelemetryProducer,
    feed: TelemetryFeed,
    stop: Receiver<()>,
    refresh: Duration,
) -> Result<(), PaddockError> {
    producer.start()?;
    info!("Telemetry collector started for {}", producer.game_source());

    let mut session_info: Option<Arc<SessionInfo>> = None;
    loop {
        match stop.recv_timeout(refresh) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Telemetry collector stopped");
                return Ok(());
            }
        }

        let telemetry = match producer.telemetry() {
            Ok(telemetry) => telemetry,
            Err(PaddockError::TelemetryExhausted) => {
                info!("Telemetry source exhausted, collector exiting");
                return Ok(());
            }
            Err(e) => {
                warn!("Could not read telemetry: {}", e);
                continue;
            }
        };

        let cur_session = producer.session_info()?;
        let changed = session_info
            .as_ref()
            .is_none_or(|last| last.as_ref() != &cur_session);
        if changed {
            info!("Session changed: {}", cur_session.combo_id());
            session_info = Some(Arc::new(cur_session));
        }
        if let Some(ref info) = session_info {
            feed.publish(Arc::clone(info), telemetry);
        }
    }
}
