//! Calculators that derive race metrics from the telemetry feed.
//!
//! Every calculator implements [`DataModule`] and runs on its own thread, see
//! [`spawn_module`]. The thread blocks on its stop channel with a timeout equal to the polling
//! interval, so a stop request is served within one loop iteration.

pub mod consumption;
pub mod delta;
pub mod forecast;
pub mod hybrid;
pub mod relative;
pub mod restapi;
pub mod sectors;
pub mod vehicles;
pub mod wheels;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, RecvTimeoutError, Sender},
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::PaddockError;
use crate::config::ModuleTiming;
use crate::telemetry::{SessionInfo, TelemetryData, TelemetryFeed};

/// A calculator driven by the module runner.
pub trait DataModule: Send {
    /// Name used for the thread and in log lines
    fn name(&self) -> &'static str;

    fn timing(&self) -> &ModuleTiming;

    /// Runs once per active tick, while the player is on track.
    fn update(
        &mut self,
        session_info: &SessionInfo,
        telemetry: &TelemetryData,
    ) -> Result<(), PaddockError>;

    /// Runs once when the player leaves the track or telemetry goes away.
    fn idle(&mut self) -> Result<(), PaddockError> {
        Ok(())
    }

    /// Runs on the module thread right before it exits.
    fn on_stop(&mut self) -> Result<(), PaddockError> {
        Ok(())
    }
}

/// Handle to a running calculator thread
pub struct ModuleHandle {
    name: &'static str,
    stop_tx: Sender<()>,
    closed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ModuleHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the thread to exit after its current iteration
    pub fn stop(&self) {
        // the thread may already be gone
        let _ = self.stop_tx.send(());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Poll the closed flag until the thread exits or `timeout` elapses
    pub fn wait_closed(&mut self, timeout: Duration) -> Result<(), PaddockError> {
        let start = Instant::now();
        while !self.is_closed() {
            if start.elapsed() >= timeout {
                return Err(PaddockError::ModuleStopTimeout {
                    module: self.name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(Duration::from_millis(5));
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Module {} thread panicked", self.name);
            }
        }
        Ok(())
    }
}

/// Start `module` on a dedicated thread reading from `feed`.
pub fn spawn_module(
    mut module: Box<dyn DataModule>,
    feed: TelemetryFeed,
) -> Result<ModuleHandle, PaddockError> {
    let name = module.name();
    let (stop_tx, stop_rx) = mpsc::channel();
    let closed = Arc::new(AtomicBool::new(false));
    let thread_closed = Arc::clone(&closed);

    let thread = thread::Builder::new()
        .name(format!("paddock-{}", name))
        .spawn(move || {
            info!("Module {} started", name);
            let mut active = false;
            loop {
                let interval = match feed.latest() {
                    Some(snapshot) if snapshot.telemetry.is_on_track() => {
                        active = true;
                        if let Err(e) = module.update(&snapshot.session_info, &snapshot.telemetry)
                        {
                            warn!("Module {} update failed: {}", name, e);
                        }
                        module.timing().update_interval_ms
                    }
                    _ => {
                        if active {
                            active = false;
                            debug!("Module {} going idle", name);
                            if let Err(e) = module.idle() {
                                warn!("Module {} idle handling failed: {}", name, e);
                            }
                        }
                        module.timing().idle_update_interval_ms
                    }
                };

                match stop_rx.recv_timeout(Duration::from_millis(interval)) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            if let Err(e) = module.on_stop() {
                warn!("Module {} failed to stop cleanly: {}", name, e);
            }
            info!("Module {} stopped", name);
            thread_closed.store(true, Ordering::Release);
        })
        .map_err(|e| PaddockError::ModuleSpawnError {
            module: name.to_string(),
            source: e,
        })?;

    Ok(ModuleHandle {
        name,
        stop_tx,
        closed,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::VehicleTelemetry;
    use std::sync::atomic::AtomicUsize;

    struct CountingModule {
        timing: ModuleTiming,
        updates: Arc<AtomicUsize>,
        idles: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
    }

    impl DataModule for CountingModule {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn timing(&self) -> &ModuleTiming {
            &self.timing
        }

        fn update(&mut self, _: &SessionInfo, _: &TelemetryData) -> Result<(), PaddockError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Err(PaddockError::TelemetryProducerError {
                description: "update errors are logged, not fatal".to_string(),
            })
        }

        fn idle(&mut self) -> Result<(), PaddockError> {
            self.idles.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_stop(&mut self) -> Result<(), PaddockError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn on_track() -> TelemetryData {
        TelemetryData {
            vehicles: vec![VehicleTelemetry {
                is_player: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_module_runs_until_stopped() {
        let feed = TelemetryFeed::new();
        let updates = Arc::new(AtomicUsize::new(0));
        let idles = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let module = CountingModule {
            timing: ModuleTiming {
                enable: true,
                update_interval_ms: 10,
                idle_update_interval_ms: 10,
            },
            updates: Arc::clone(&updates),
            idles: Arc::clone(&idles),
            stopped: Arc::clone(&stopped),
        };

        feed.publish(Arc::new(SessionInfo::default()), on_track());
        let mut handle = spawn_module(Box::new(module), feed.clone()).unwrap();
        assert_eq!(handle.name(), "counting");

        let start = Instant::now();
        while updates.load(Ordering::SeqCst) < 3 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(updates.load(Ordering::SeqCst) >= 3);

        feed.clear();
        let start = Instant::now();
        while idles.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(idles.load(Ordering::SeqCst), 1);

        handle.stop();
        handle.wait_closed(Duration::from_secs(5)).unwrap();
        assert!(handle.is_closed());
        assert!(stopped.load(Ordering::SeqCst));
    }
}
