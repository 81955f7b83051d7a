//! Auxiliary data pulled from the sim's local REST api.
//!
//! Run-once resources are fetched when a session starts or the player leaves the garage, with
//! a bounded number of retries. A resource that keeps failing is skipped until the next session
//! or garage-out. Repeat resources are fetched every active tick without retrying.

mod tasks;

pub use tasks::{
    ForecastTask, OutputBinding, RestField, RestOutputs, TaskKind, base_url, resolve_key_path,
    tasks_for,
};

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use serde_json::Value;

use crate::PaddockError;
use crate::config::{ModuleTiming, RestApiConfig};
use crate::info::ModuleInfo;
use crate::session::{SessionChange, SessionIdentity, SessionTracker};
use crate::telemetry::{GameSource, SessionInfo, TelemetryData};

use super::DataModule;

/// Source of REST payloads
pub trait ResourceFetcher {
    fn get_json(&self, url: &str) -> impl Future<Output = Result<Value, PaddockError>>;
}

/// Fetches resources over http with `reqwest`
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceFetcher for HttpFetcher {
    async fn get_json(&self, url: &str) -> Result<Value, PaddockError> {
        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| PaddockError::RestRequestError {
                    url: url.to_string(),
                    source: e,
                })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PaddockError::RestStatusError {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| PaddockError::RestRequestError {
                url: url.to_string(),
                source: e,
            })
    }
}

/// Fetch `url` up to `attempts` times, sleeping `delay` between failures
async fn fetch_with_retry<F: ResourceFetcher>(
    fetcher: &F,
    url: String,
    timeout: Duration,
    attempts: u32,
    delay: Duration,
) -> Result<Value, PaddockError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(timeout, fetcher.get_json(&url)).await {
            Ok(result) => result,
            Err(_) => Err(PaddockError::RestTimeout { url: url.clone() }),
        };
        match result {
            Ok(payload) => return Ok(payload),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!("Attempt {} for {} failed: {}", attempt, url, e);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// REST fetcher pass, owns the weather and restapi sections
pub struct RestApiModule<F: ResourceFetcher = HttpFetcher> {
    config: RestApiConfig,
    info: ModuleInfo,
    fetcher: F,
    runtime: tokio::runtime::Runtime,
    sessions: SessionTracker,
    game: Option<GameSource>,
    base_url: Option<String>,
    tasks: Vec<ForecastTask>,
    unavailable: HashSet<&'static str>,
    run_once_pending: bool,
    outputs: RestOutputs,
}

impl RestApiModule<HttpFetcher> {
    pub fn new(config: RestApiConfig, info: ModuleInfo) -> Result<Self, PaddockError> {
        Self::with_fetcher(config, info, HttpFetcher::new())
    }
}

impl<F: ResourceFetcher> RestApiModule<F> {
    pub fn with_fetcher(
        config: RestApiConfig,
        info: ModuleInfo,
        fetcher: F,
    ) -> Result<Self, PaddockError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PaddockError::RuntimeError { source: e })?;
        Ok(Self {
            config,
            info,
            fetcher,
            runtime,
            sessions: SessionTracker::new(),
            game: None,
            base_url: None,
            tasks: Vec::new(),
            unavailable: HashSet::new(),
            run_once_pending: true,
            outputs: RestOutputs::default(),
        })
    }

    /// Resources given up on until the next session or garage-out
    pub fn unavailable(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.unavailable.iter().copied()
    }

    fn select_game(&mut self, game: GameSource) {
        self.game = Some(game);
        let resolved = base_url(game, &self.config).and_then(|url| Ok((url, tasks_for(game)?)));
        match resolved {
            Ok((url, tasks)) => {
                info!("REST api for {} at {}", game, url);
                self.base_url = Some(url);
                self.tasks = tasks;
            }
            Err(e) => {
                info!("{}", e);
                self.base_url = None;
                self.tasks.clear();
            }
        }
    }

    fn rearm(&mut self) {
        self.unavailable.clear();
        self.run_once_pending = true;
    }

    fn run_batch(&mut self, kind: TaskKind) {
        let Some(base) = self.base_url.as_deref() else {
            return;
        };
        let config = &self.config;
        let unavailable = &self.unavailable;
        let pending: Vec<&ForecastTask> = self
            .tasks
            .iter()
            .filter(|task| {
                task.kind == kind && task.is_enabled(config) && !unavailable.contains(task.resource)
            })
            .collect();
        if pending.is_empty() {
            return;
        }

        let timeout = Duration::from_millis(config.connection_timeout_ms);
        let (attempts, delay) = match kind {
            TaskKind::RunOnce => (
                config.connection_retry,
                Duration::from_millis(config.connection_retry_delay_ms),
            ),
            TaskKind::Repeat => (1, Duration::ZERO),
        };
        let fetcher = &self.fetcher;
        let results = self.runtime.block_on(join_all(pending.iter().map(|task| {
            fetch_with_retry(
                fetcher,
                format!("{}/{}", base, task.resource),
                timeout,
                attempts,
                delay,
            )
        })));

        for (task, result) in pending.into_iter().zip(results) {
            match result {
                Ok(payload) => task.apply(&mut self.outputs, &payload),
                Err(e) => {
                    task.reset(&mut self.outputs);
                    match kind {
                        TaskKind::RunOnce => {
                            info!("REST resource {} unavailable: {}", task.resource, e);
                            self.unavailable.insert(task.resource);
                        }
                        TaskKind::Repeat => debug!("Skipped REST resource {}: {}", task.resource, e),
                    }
                }
            }
        }
    }

    fn publish(&self) {
        self.info.weather.set(self.outputs.weather.clone());
        self.info.restapi.set(self.outputs.rest.clone());
    }
}

impl<F: ResourceFetcher + Send + 'static> DataModule for RestApiModule<F> {
    fn name(&self) -> &'static str {
        "restapi"
    }

    fn timing(&self) -> &ModuleTiming {
        &self.config.timing
    }

    fn update(
        &mut self,
        session_info: &SessionInfo,
        telemetry: &TelemetryData,
    ) -> Result<(), PaddockError> {
        if self.game != Some(session_info.game_source) {
            self.select_game(session_info.game_source);
            self.rearm();
        }
        match self
            .sessions
            .check(SessionIdentity::from_telemetry(session_info, telemetry))
        {
            SessionChange::Same => {}
            SessionChange::NewSession | SessionChange::NewCombo => {
                self.outputs = RestOutputs::default();
                self.rearm();
            }
        }
        if self.base_url.is_none() {
            return Ok(());
        }

        if self.run_once_pending {
            self.run_once_pending = false;
            self.run_batch(TaskKind::RunOnce);
        }
        self.run_batch(TaskKind::Repeat);
        self.publish();
        Ok(())
    }

    fn idle(&mut self) -> Result<(), PaddockError> {
        // back in the garage, run-once data may change before the next outing
        self.rearm();
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), PaddockError> {
        if !self.unavailable.is_empty() {
            warn!(
                "REST resources unavailable at shutdown: {}",
                self.unavailable.iter().copied().collect::<Vec<_>>().join(", ")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::telemetry::VehicleTelemetry;

    /// Answers from a fixed table, counts every call per resource
    #[derive(Clone, Default)]
    struct ScriptedFetcher {
        responses: Arc<Mutex<HashMap<String, Value>>>,
        calls: Arc<Mutex<HashMap<String, usize>>>,
    }

    impl ScriptedFetcher {
        fn respond(&self, resource: &str, payload: Value) {
            self.responses
                .lock()
                .unwrap()
                .insert(resource.to_string(), payload);
        }

        fn calls(&self, resource: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .get(resource)
                .copied()
                .unwrap_or_default()
        }
    }

    impl ResourceFetcher for ScriptedFetcher {
        async fn get_json(&self, url: &str) -> Result<Value, PaddockError> {
            let resource = url
                .split_once("/rest/")
                .map(|(_, resource)| resource.to_string())
                .unwrap_or_default();
            *self
                .calls
                .lock()
                .unwrap()
                .entry(resource.clone())
                .or_default() += 1;
            self.responses
                .lock()
                .unwrap()
                .get(&resource)
                .cloned()
                .ok_or(PaddockError::RestStatusError {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn config() -> RestApiConfig {
        RestApiConfig {
            connection_retry_delay_ms: 1,
            ..Default::default()
        }
    }

    fn session(game: GameSource) -> SessionInfo {
        SessionInfo {
            track_name: "Sebring".to_string(),
            vehicle_name: "GT3".to_string(),
            game_source: game,
            ..Default::default()
        }
    }

    fn telemetry() -> TelemetryData {
        TelemetryData {
            vehicles: vec![VehicleTelemetry {
                is_player: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_failing_run_once_resource_is_dropped_after_retries() {
        let fetcher = ScriptedFetcher::default();
        fetcher.respond("sessions/setting/SESSSET_private_qualy", json!({"currentValue": 1}));
        fetcher.respond(
            "sessions/weather",
            json!({"RACE": [{"startTime": 0.0, "sky": 2, "temperature": 25.0, "rainChance": 10.0}]}),
        );
        let info = ModuleInfo::new();
        let mut module =
            RestApiModule::with_fetcher(config(), info.clone(), fetcher.clone()).unwrap();
        let session_info = session(GameSource::LeMansUltimate);

        module.update(&session_info, &telemetry()).unwrap();
        assert_eq!(fetcher.calls("pitStopTimes/times"), 3);
        assert!(module.unavailable().any(|r| r == "pitStopTimes/times"));
        let rest = info.restapi.snapshot();
        assert!(rest.private_qualifying);
        assert_eq!(rest.pit_stop_time_estimate_s, 0.);
        assert_eq!(info.weather.snapshot().forecast_race.len(), 1);

        // no further attempts within the same session
        module.update(&session_info, &telemetry()).unwrap();
        module.update(&session_info, &telemetry()).unwrap();
        assert_eq!(fetcher.calls("pitStopTimes/times"), 3);
        assert_eq!(fetcher.calls("sessions/setting/SESSSET_private_qualy"), 1);
        // repeat resources are fetched once per tick without retry
        assert_eq!(fetcher.calls("sessions/weather"), 3);
        assert_eq!(fetcher.calls("sessions/penalties"), 3);
    }

    #[test]
    fn test_garage_out_rearms_run_once_resources() {
        let fetcher = ScriptedFetcher::default();
        let info = ModuleInfo::new();
        let mut module =
            RestApiModule::with_fetcher(config(), info.clone(), fetcher.clone()).unwrap();
        let session_info = session(GameSource::LeMansUltimate);

        module.update(&session_info, &telemetry()).unwrap();
        assert_eq!(fetcher.calls("pitStopTimes/times"), 3);

        fetcher.respond("pitStopTimes/times", json!({"total": 41.5, "fuelRatio": 0.92}));
        module.idle().unwrap();
        module.update(&session_info, &telemetry()).unwrap();
        assert_eq!(fetcher.calls("pitStopTimes/times"), 4);
        assert_eq!(module.unavailable().count(), 2);
        let rest = info.restapi.snapshot();
        assert_eq!(rest.pit_stop_time_estimate_s, 41.5);
        assert_eq!(rest.pit_stop_fuel_ratio, 0.92);
    }

    #[test]
    fn test_unsupported_sim_fetches_nothing() {
        let fetcher = ScriptedFetcher::default();
        let info = ModuleInfo::new();
        let mut module =
            RestApiModule::with_fetcher(config(), info.clone(), fetcher.clone()).unwrap();
        module
            .update(&session(GameSource::IRacing), &telemetry())
            .unwrap();
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(info.restapi.snapshot(), Default::default());
    }

    #[test]
    fn test_disabled_groups_are_not_fetched() {
        let fetcher = ScriptedFetcher::default();
        let config = RestApiConfig {
            enable_weather_info: false,
            enable_wear_info: false,
            ..config()
        };
        let mut module =
            RestApiModule::with_fetcher(config, ModuleInfo::new(), fetcher.clone()).unwrap();
        module
            .update(&session(GameSource::RFactor2), &telemetry())
            .unwrap();
        assert_eq!(fetcher.calls("sessions/weather"), 0);
        assert_eq!(fetcher.calls("sessions/setting/SESSSET_private_qualy"), 3);
    }

    #[test]
    fn test_slow_resource_times_out() {
        struct SlowFetcher;
        impl ResourceFetcher for SlowFetcher {
            async fn get_json(&self, _url: &str) -> Result<Value, PaddockError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!({}))
            }
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(fetch_with_retry(
            &SlowFetcher,
            "http://localhost:6397/rest/sessions/weather".to_string(),
            Duration::from_millis(10),
            1,
            Duration::ZERO,
        ));
        assert!(matches!(result, Err(PaddockError::RestTimeout { .. })));
    }
}
