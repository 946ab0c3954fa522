//! `RunnerHandler` (§4.8): fleet membership, health, capacity accounting,
//! and load-based runner selection. Grounded on the teacher's `ws::WsHub`
//! shape (`DashMap` registries plus a `broadcast` channel of fleet events
//! consumers can subscribe to) adapted from connection bookkeeping to
//! runner-host bookkeeping.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ac_protocol::model::{RunnerCapabilities, RunnerLoad, RunnerStatus};

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct RunnerRegistryConfig {
    pub max_runners: usize,
    pub load_factor: f32,
    pub heartbeat_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for RunnerRegistryConfig {
    fn default() -> Self {
        Self {
            max_runners: 1000,
            load_factor: 0.8,
            heartbeat_timeout: Duration::from_millis(60_000),
            health_check_interval: Duration::from_millis(30_000),
        }
    }
}

/// §3 `StoredRunner`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRunner {
    pub runner_id: String,
    pub hostname: String,
    pub status: RunnerStatus,
    pub capabilities: RunnerCapabilities,
    pub load: RunnerLoad,
    #[serde(default)]
    pub runtime_versions: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub active_sessions: HashSet<Uuid>,
}

impl StoredRunner {
    fn utilization(&self) -> f32 {
        if self.capabilities.max_concurrent_sessions == 0 {
            return f32::MAX;
        }
        self.load.active_sessions as f32 / self.capabilities.max_concurrent_sessions as f32
    }
}

/// Fleet membership changes, for the control plane's own logging and event
/// fan-out (§4.8 `emit runner_online` etc).
#[derive(Debug, Clone)]
pub enum RunnerFleetEvent {
    RunnerRegistered { runner_id: String },
    RunnerOnline { runner_id: String },
    RunnerOffline { runner_id: String },
    RunnerDraining { runner_id: String },
    RunnerRemoved { runner_id: String },
    VersionReported { runner_id: String, provider: String, version: String },
}

pub struct RegisterRunnerRequest {
    pub hostname: String,
    pub capabilities: RunnerCapabilities,
    pub metadata: HashMap<String, String>,
}

pub struct HeartbeatRequest {
    pub runner_id: String,
    pub timestamp: DateTime<Utc>,
    pub active_sessions: HashSet<Uuid>,
    pub load: RunnerLoad,
    pub runtime_versions: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerListFilters {
    pub status: Option<RunnerStatus>,
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
}

pub struct CapacitySnapshot {
    pub total_capacity: u32,
    pub used: u32,
    pub available: u32,
}

/// Fleet registry: `runnerId -> StoredRunner`, plus a `hostname -> runnerId`
/// index enforcing the 1-to-1 invariant of §3.
pub struct RunnerHandler {
    config: RunnerRegistryConfig,
    runners: DashMap<String, StoredRunner>,
    by_hostname: DashMap<String, String>,
    events: broadcast::Sender<RunnerFleetEvent>,
}

impl RunnerHandler {
    pub fn new(config: RunnerRegistryConfig) -> Self {
        let (events, _rx) = broadcast::channel(1024);
        Self { config, runners: DashMap::new(), by_hostname: DashMap::new(), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerFleetEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RunnerFleetEvent) {
        let _ = self.events.send(event);
    }

    /// §4.8 `registerRunner`.
    pub fn register_runner(&self, req: RegisterRunnerRequest) -> Result<StoredRunner, ApiError> {
        if let Some(runner_id) = self.by_hostname.get(&req.hostname).map(|e| e.clone()) {
            let mut runner = self.runners.get_mut(&runner_id).expect("hostname index out of sync");
            runner.capabilities = req.capabilities;
            runner.metadata = req.metadata;
            runner.status = RunnerStatus::Online;
            runner.last_heartbeat = Utc::now();
            info!(runner_id = %runner_id, hostname = %req.hostname, "runner re-registered");
            self.emit(RunnerFleetEvent::RunnerOnline { runner_id: runner_id.clone() });
            return Ok(runner.clone());
        }

        if self.runners.len() >= self.config.max_runners {
            return Err(ApiError::RunnerLimitExceeded(format!(
                "fleet already has {} runners",
                self.runners.len()
            )));
        }

        let runner_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let runner = StoredRunner {
            runner_id: runner_id.clone(),
            hostname: req.hostname.clone(),
            status: RunnerStatus::Online,
            capabilities: req.capabilities,
            load: RunnerLoad::default(),
            runtime_versions: HashMap::new(),
            metadata: req.metadata,
            registered_at: now,
            last_heartbeat: now,
            active_sessions: HashSet::new(),
        };
        self.runners.insert(runner_id.clone(), runner.clone());
        self.by_hostname.insert(req.hostname, runner_id.clone());
        info!(runner_id = %runner_id, "runner registered");
        self.emit(RunnerFleetEvent::RunnerRegistered { runner_id });
        Ok(runner)
    }

    /// §4.8 `processHeartbeat`.
    pub fn process_heartbeat(&self, req: HeartbeatRequest) -> Result<(), ApiError> {
        let mut runner = self
            .runners
            .get_mut(&req.runner_id)
            .ok_or_else(|| ApiError::RunnerNotFound(req.runner_id.clone()))?;

        let was_offline = runner.status == RunnerStatus::Offline;
        runner.status = RunnerStatus::Online;
        runner.last_heartbeat = req.timestamp;
        runner.load = req.load;
        runner.active_sessions = req.active_sessions;

        let mut changed_versions = Vec::new();
        for (provider, version) in &req.runtime_versions {
            if runner.runtime_versions.get(provider) != Some(version) {
                changed_versions.push((provider.clone(), version.clone()));
            }
        }
        runner.runtime_versions = req.runtime_versions;
        let runner_id = runner.runner_id.clone();
        drop(runner);

        if was_offline {
            self.emit(RunnerFleetEvent::RunnerOnline { runner_id: runner_id.clone() });
        }
        for (provider, version) in changed_versions {
            self.emit(RunnerFleetEvent::VersionReported { runner_id: runner_id.clone(), provider, version });
        }
        Ok(())
    }

    /// §4.8 `drainRunner`.
    pub fn drain_runner(&self, runner_id: &str) -> Result<(), ApiError> {
        let mut runner = self
            .runners
            .get_mut(runner_id)
            .ok_or_else(|| ApiError::RunnerNotFound(runner_id.to_string()))?;
        runner.status = RunnerStatus::Draining;
        drop(runner);
        self.emit(RunnerFleetEvent::RunnerDraining { runner_id: runner_id.to_string() });
        Ok(())
    }

    /// §4.8 `removeRunner`.
    pub fn remove_runner(&self, runner_id: &str) -> Result<(), ApiError> {
        let runner = self
            .runners
            .get(runner_id)
            .ok_or_else(|| ApiError::RunnerNotFound(runner_id.to_string()))?;
        if !runner.active_sessions.is_empty() {
            return Err(ApiError::RunnerHasActiveSessions(runner_id.to_string()));
        }
        let hostname = runner.hostname.clone();
        drop(runner);

        self.runners.remove(runner_id);
        self.by_hostname.remove(&hostname);
        self.emit(RunnerFleetEvent::RunnerRemoved { runner_id: runner_id.to_string() });
        Ok(())
    }

    /// §4.8 `listRunners`: filter, sort ascending by hostname, paginate.
    pub fn list_runners(&self, pagination: Pagination, filters: RunnerListFilters) -> Vec<StoredRunner> {
        let mut matched: Vec<StoredRunner> = self
            .runners
            .iter()
            .map(|e| e.clone())
            .filter(|r| filters.status.is_none_or(|s| r.status == s))
            .filter(|r| {
                filters
                    .provider_id
                    .as_deref()
                    .is_none_or(|p| r.capabilities.providers.iter().any(|cp| cp == p))
            })
            .collect();
        matched.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        let page = pagination.page.max(1);
        let page_size = pagination.page_size.max(1);
        let start = (page - 1) * page_size;
        matched.into_iter().skip(start).take(page_size).collect()
    }

    /// §4.8 `selectRunner`: lowest-utilization online candidate advertising
    /// `provider_id`, ties broken by hostname.
    pub fn select_runner(&self, provider_id: &str) -> Option<StoredRunner> {
        self.runners
            .iter()
            .map(|e| e.clone())
            .filter(|r| r.status == RunnerStatus::Online)
            .filter(|r| r.capabilities.providers.iter().any(|p| p == provider_id))
            .filter(|r| {
                (r.load.active_sessions as f32)
                    < r.capabilities.max_concurrent_sessions as f32 * self.config.load_factor
            })
            .min_by(|a, b| {
                a.utilization()
                    .partial_cmp(&b.utilization())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.hostname.cmp(&b.hostname))
            })
    }

    /// §4.8 `assignSession`.
    pub fn assign_session(&self, runner_id: &str, session_id: Uuid) -> Result<(), ApiError> {
        let mut runner = self
            .runners
            .get_mut(runner_id)
            .ok_or_else(|| ApiError::RunnerNotFound(runner_id.to_string()))?;
        if runner.active_sessions.insert(session_id) {
            runner.load.active_sessions = runner.active_sessions.len() as u32;
        }
        Ok(())
    }

    /// §4.8 `releaseSession`.
    pub fn release_session(&self, runner_id: &str, session_id: Uuid) -> Result<(), ApiError> {
        let mut runner = self
            .runners
            .get_mut(runner_id)
            .ok_or_else(|| ApiError::RunnerNotFound(runner_id.to_string()))?;
        if runner.active_sessions.remove(&session_id) {
            runner.load.active_sessions = runner.active_sessions.len() as u32;
        }
        Ok(())
    }

    pub fn get(&self, runner_id: &str) -> Option<StoredRunner> {
        self.runners.get(runner_id).map(|e| e.clone())
    }

    /// Capacity accounting per §4.8: summed over `online` runners only.
    pub fn capacity(&self) -> CapacitySnapshot {
        let (total, used) = self
            .runners
            .iter()
            .filter(|e| e.status == RunnerStatus::Online)
            .fold((0u32, 0u32), |(total, used), e| {
                (total + e.capabilities.max_concurrent_sessions, used + e.load.active_sessions)
            });
        CapacitySnapshot { total_capacity: total, used, available: total.saturating_sub(used) }
    }

    /// Background health sweep: any online runner whose last heartbeat
    /// exceeds `heartbeat_timeout` is marked offline and retained (§4.8,
    /// §5 "offline runners are retained, do not disappear silently").
    pub async fn run_health_sweep_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let mut newly_offline = Vec::new();
            for mut entry in self.runners.iter_mut() {
                if entry.status == RunnerStatus::Online {
                    let elapsed = now.signed_duration_since(entry.last_heartbeat);
                    if elapsed.to_std().unwrap_or(Duration::ZERO) > self.config.heartbeat_timeout {
                        entry.status = RunnerStatus::Offline;
                        newly_offline.push(entry.runner_id.clone());
                    }
                }
            }
            for runner_id in newly_offline {
                warn!(%runner_id, "runner heartbeat timed out, marking offline");
                self.emit(RunnerFleetEvent::RunnerOffline { runner_id });
            }
            debug!(runners = self.runners.len(), "health sweep complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(providers: &[&str], max: u32) -> RunnerCapabilities {
        RunnerCapabilities {
            providers: providers.iter().map(|s| s.to_string()).collect(),
            max_concurrent_sessions: max,
            features: Vec::new(),
        }
    }

    #[test]
    fn register_then_reregister_same_hostname_updates_in_place() {
        let handler = RunnerHandler::new(RunnerRegistryConfig::default());
        let r1 = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "host-a".into(),
                capabilities: capabilities(&["codex"], 4),
                metadata: HashMap::new(),
            })
            .unwrap();
        let r2 = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "host-a".into(),
                capabilities: capabilities(&["codex", "claude_code"], 8),
                metadata: HashMap::new(),
            })
            .unwrap();
        assert_eq!(r1.runner_id, r2.runner_id);
        assert_eq!(handler.list_runners(Pagination { page: 1, page_size: 10 }, RunnerListFilters::default()).len(), 1);
    }

    #[test]
    fn select_runner_picks_lowest_utilization_then_hostname() {
        let handler = RunnerHandler::new(RunnerRegistryConfig::default());
        let busy = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "busy".into(),
                capabilities: capabilities(&["codex"], 10),
                metadata: HashMap::new(),
            })
            .unwrap();
        let idle = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "idle".into(),
                capabilities: capabilities(&["codex"], 10),
                metadata: HashMap::new(),
            })
            .unwrap();
        handler
            .process_heartbeat(HeartbeatRequest {
                runner_id: busy.runner_id.clone(),
                timestamp: Utc::now(),
                active_sessions: HashSet::new(),
                load: RunnerLoad { active_sessions: 5, ..Default::default() },
                runtime_versions: HashMap::new(),
            })
            .unwrap();

        let selected = handler.select_runner("codex").unwrap();
        assert_eq!(selected.runner_id, idle.runner_id);
    }

    #[test]
    fn select_runner_excludes_over_load_factor_candidates() {
        let handler = RunnerHandler::new(RunnerRegistryConfig::default());
        let runner = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "host".into(),
                capabilities: capabilities(&["codex"], 10),
                metadata: HashMap::new(),
            })
            .unwrap();
        handler
            .process_heartbeat(HeartbeatRequest {
                runner_id: runner.runner_id,
                timestamp: Utc::now(),
                active_sessions: HashSet::new(),
                load: RunnerLoad { active_sessions: 9, ..Default::default() },
                runtime_versions: HashMap::new(),
            })
            .unwrap();
        assert!(handler.select_runner("codex").is_none());
    }

    #[test]
    fn remove_runner_refuses_with_active_sessions() {
        let handler = RunnerHandler::new(RunnerRegistryConfig::default());
        let runner = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "host".into(),
                capabilities: capabilities(&["codex"], 4),
                metadata: HashMap::new(),
            })
            .unwrap();
        handler.assign_session(&runner.runner_id, Uuid::new_v4()).unwrap();
        let err = handler.remove_runner(&runner.runner_id).unwrap_err();
        assert!(matches!(err, ApiError::RunnerHasActiveSessions(_)));
    }

    #[test]
    fn capacity_accounting_sums_only_online_runners() {
        let handler = RunnerHandler::new(RunnerRegistryConfig::default());
        let online = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "online".into(),
                capabilities: capabilities(&["codex"], 10),
                metadata: HashMap::new(),
            })
            .unwrap();
        handler
            .process_heartbeat(HeartbeatRequest {
                runner_id: online.runner_id.clone(),
                timestamp: Utc::now(),
                active_sessions: HashSet::new(),
                load: RunnerLoad { active_sessions: 3, ..Default::default() },
                runtime_versions: HashMap::new(),
            })
            .unwrap();
        let draining = handler
            .register_runner(RegisterRunnerRequest {
                hostname: "draining".into(),
                capabilities: capabilities(&["codex"], 10),
                metadata: HashMap::new(),
            })
            .unwrap();
        handler.drain_runner(&draining.runner_id).unwrap();

        let capacity = handler.capacity();
        assert_eq!(capacity.total_capacity, 10);
        assert_eq!(capacity.used, 3);
        assert_eq!(capacity.available, 7);
    }
}
