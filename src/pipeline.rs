//! Wires the telemetry collector and every enabled calculator together.

use std::sync::{
    Arc,
    mpsc::{self, Sender},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::PaddockError;
use crate::config::PaddockConfig;
use crate::info::ModuleInfo;
use crate::modules::{
    DataModule, ModuleHandle, consumption::ConsumptionModule, delta::DeltaModule,
    hybrid::HybridModule, relative::RelativeModule, restapi::RestApiModule,
    sectors::SectorsModule, spawn_module, vehicles::VehiclesModule, wheels::WheelsModule,
};
use crate::storage::HistoryStorage;
use crate::telemetry::{TelemetryFeed, collect_telemetry, producer::TelemetryProducer};

/// Instantiate the calculators enabled in `config`, all writing to `info`
pub fn build_modules(
    config: &PaddockConfig,
    info: &ModuleInfo,
    storage: Arc<dyn HistoryStorage>,
) -> Result<Vec<Box<dyn DataModule>>, PaddockError> {
    let mut modules: Vec<Box<dyn DataModule>> = Vec::new();
    if config.delta.timing.enable {
        modules.push(Box::new(DeltaModule::new(
            config.delta.clone(),
            info.delta.clone(),
            Arc::clone(&storage),
        )));
    }
    // hybrid confirms lap totals before the fuel history records the same lap
    if config.hybrid.timing.enable {
        modules.push(Box::new(HybridModule::new(
            config.hybrid.clone(),
            info.clone(),
        )));
    }
    if config.fuel.timing.enable {
        modules.push(Box::new(ConsumptionModule::fuel(
            config.fuel.clone(),
            info.clone(),
            Arc::clone(&storage),
        )));
    }
    if config.energy.timing.enable {
        modules.push(Box::new(ConsumptionModule::energy(
            config.energy.clone(),
            info.clone(),
            Arc::clone(&storage),
        )));
    }
    if config.wheels.timing.enable {
        modules.push(Box::new(WheelsModule::new(
            config.wheels.clone(),
            info.clone(),
        )));
    }
    if config.sectors.timing.enable {
        modules.push(Box::new(SectorsModule::new(
            config.sectors.clone(),
            info.sectors.clone(),
            Arc::clone(&storage),
        )));
    }
    if config.relative.timing.enable {
        modules.push(Box::new(RelativeModule::new(
            config.relative.clone(),
            info.relative.clone(),
        )));
    }
    if config.vehicles.timing.enable {
        modules.push(Box::new(VehiclesModule::new(
            config.vehicles.clone(),
            info.clone(),
        )));
    }
    if config.restapi.timing.enable {
        modules.push(Box::new(RestApiModule::new(
            config.restapi.clone(),
            info.clone(),
        )?));
    }
    Ok(modules)
}

/// Running collector plus calculator threads
pub struct Pipeline {
    info: ModuleInfo,
    feed: TelemetryFeed,
    collector_stop: Sender<()>,
    collector: Option<JoinHandle<Result<(), PaddockError>>>,
    modules: Vec<ModuleHandle>,
}

impl Pipeline {
    /// Start collecting from `producer` and spawn every enabled calculator
    pub fn start<P>(
        config: &PaddockConfig,
        producer: P,
        storage: Arc<dyn HistoryStorage>,
    ) -> Result<Self, PaddockError>
    where
        P: TelemetryProducer + Send + 'static,
    {
        let info = ModuleInfo::new();
        let feed = TelemetryFeed::new();
        let modules = build_modules(config, &info, storage)?;

        let mut handles = Vec::with_capacity(modules.len());
        for module in modules {
            handles.push(spawn_module(module, feed.clone())?);
        }
        info!(
            "Started modules: {}",
            handles
                .iter()
                .map(ModuleHandle::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let (collector_stop, stop_rx) = mpsc::channel();
        let collector_feed = feed.clone();
        let refresh = Duration::from_millis(config.refresh_rate_ms);
        let collector = thread::Builder::new()
            .name("paddock-collector".to_string())
            .spawn(move || {
                let result = collect_telemetry(producer, collector_feed.clone(), stop_rx, refresh);
                // calculators go idle once the source is gone
                collector_feed.clear();
                result
            })
            .map_err(|e| PaddockError::ModuleSpawnError {
                module: "collector".to_string(),
                source: e,
            })?;

        Ok(Self {
            info,
            feed,
            collector_stop,
            collector: Some(collector),
            modules: handles,
        })
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn feed(&self) -> &TelemetryFeed {
        &self.feed
    }

    /// True while the collector thread is still reading telemetry
    pub fn is_collecting(&self) -> bool {
        self.collector
            .as_ref()
            .is_some_and(|collector| !collector.is_finished())
    }

    /// Stop the collector and every calculator, waiting up to `timeout` for each module
    pub fn stop(&mut self, timeout: Duration) -> Result<(), PaddockError> {
        let _ = self.collector_stop.send(());
        if let Some(collector) = self.collector.take() {
            match collector.join() {
                Ok(Err(e)) => warn!("Telemetry collector failed: {}", e),
                Err(_) => warn!("Telemetry collector thread panicked"),
                Ok(Ok(())) => {}
            }
        }

        for module in &self.modules {
            module.stop();
        }
        let mut result = Ok(());
        for module in &mut self.modules {
            if let Err(e) = module.wait_closed(timeout) {
                warn!("{}", e);
                result = Err(e);
            }
        }
        self.modules.clear();
        result
    }
}
