// simulation.rs
//! In-process network: every intersection agent and the observer on one tokio runtime,
//! connected through a `LocalBus`.

use crate::communication::transport::{LocalBus, Transport};
use crate::config::{ConfigError, NetworkConfig, Scenario};
use crate::control_system::intersection_agent::{IntersectionAgent, IntersectionHandle};
use crate::control_system::signal_controller::ControllerState;
use crate::global_variables::OBSERVER_ADDRESS;
use crate::monitoring::observer::{AggregateMetrics, Observer};
use crate::monitoring::observer_agent::{ObserverAgent, ObserverHandle};
use crate::simulation_engine::intersection::{Direction, IntersectionId};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::{sleep, Duration};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no intersection named {0}")]
    UnknownIntersection(IntersectionId),
    #[error("{0} is not running")]
    NotRunning(IntersectionId),
    #[error("{0} is already running")]
    AlreadyRunning(IntersectionId),
    #[error("agent task failed: {0}")]
    Join(#[from] JoinError),
}

/// What is left once the network has stopped.
#[derive(Debug)]
pub struct NetworkSummary {
    pub final_states: Vec<ControllerState>,
    pub observer: Observer,
}

pub struct Network {
    config: NetworkConfig,
    bus: Arc<LocalBus>,
    agents: BTreeMap<IntersectionId, IntersectionHandle>,
    observer: ObserverHandle,
}

impl Network {
    /// Validates `config` and spawns the observer and one agent per intersection.
    /// Must be called from within a tokio runtime.
    pub fn start(config: NetworkConfig, report_csv: Option<PathBuf>) -> Result<Self, NetworkError> {
        config.validate()?;
        let bus = Arc::new(LocalBus::default());

        let mut observer = ObserverAgent::for_network(&config, bus.register(OBSERVER_ADDRESS))?;
        if let Some(path) = report_csv {
            observer = observer.with_csv(path);
        }

        let mut network = Self {
            observer: observer.spawn(),
            config,
            bus,
            agents: BTreeMap::new(),
        };
        let ids: Vec<IntersectionId> = network.config.intersections.iter().map(|i| i.id.clone()).collect();
        for id in ids {
            network.spawn_agent(&id)?;
        }
        log::info!("Network started with {} intersections", network.agents.len());
        Ok(network)
    }

    fn spawn_agent(&mut self, id: &IntersectionId) -> Result<(), NetworkError> {
        let config = self
            .config
            .intersection(id)
            .cloned()
            .ok_or_else(|| NetworkError::UnknownIntersection(id.clone()))?;
        let transport: Arc<dyn Transport> = self.bus.clone();
        let agent = IntersectionAgent::new(config, transport, self.bus.register(id.as_str()))?;
        self.agents.insert(id.clone(), agent.spawn());
        Ok(())
    }

    fn handle(&self, id: &IntersectionId) -> Result<&IntersectionHandle, NetworkError> {
        match self.agents.get(id) {
            Some(handle) => Ok(handle),
            None if self.config.intersection(id).is_some() => Err(NetworkError::NotRunning(id.clone())),
            None => Err(NetworkError::UnknownIntersection(id.clone())),
        }
    }

    /// Switches every intersection to the rates of `scenario`, including ones restarted later.
    pub fn set_scenario(&mut self, scenario: Scenario) {
        let (arrival, departure) = scenario.rates();
        log::info!(
            "Scenario {}: arrival {:.2}, departure {:.2}",
            scenario.name(),
            arrival,
            departure
        );
        self.config.apply_scenario(scenario);
        for handle in self.agents.values() {
            handle.set_rates(arrival, departure);
        }
    }

    pub fn inject_burst(&self, id: &IntersectionId, direction: Direction, count: u32) -> Result<(), NetworkError> {
        if self.handle(id)?.inject_burst(direction, count) {
            Ok(())
        } else {
            Err(NetworkError::NotRunning(id.clone()))
        }
    }

    /// Takes one intersection offline. Its neighbors keep running and their sends to it fail.
    pub async fn stop_intersection(&mut self, id: &IntersectionId) -> Result<ControllerState, NetworkError> {
        self.handle(id)?;
        let handle = self
            .agents
            .remove(id)
            .ok_or_else(|| NetworkError::NotRunning(id.clone()))?;
        self.bus.unregister(id.as_str());
        let state = handle.shutdown().await?;
        log::warn!("{} taken offline", id);
        Ok(state)
    }

    /// Brings a stopped intersection back with fresh state.
    pub fn restart_intersection(&mut self, id: &IntersectionId) -> Result<(), NetworkError> {
        if self.agents.contains_key(id) {
            return Err(NetworkError::AlreadyRunning(id.clone()));
        }
        self.spawn_agent(id)?;
        log::info!("{} back online", id);
        Ok(())
    }

    pub fn running(&self) -> Vec<IntersectionId> {
        self.agents.keys().cloned().collect()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn latest_report(&self) -> Option<AggregateMetrics> {
        self.observer.latest_report()
    }

    pub fn subscribe_reports(&self) -> watch::Receiver<Option<AggregateMetrics>> {
        self.observer.subscribe()
    }

    /// Stops every agent, then the observer.
    pub async fn shutdown(self) -> Result<NetworkSummary, NetworkError> {
        let mut final_states = Vec::with_capacity(self.agents.len());
        for (_, handle) in self.agents {
            final_states.push(handle.shutdown().await?);
        }
        let observer = self.observer.shutdown().await?;
        log::info!("Network stopped");
        Ok(NetworkSummary {
            final_states,
            observer,
        })
    }
}

/// Runs `config` for `duration` and returns the final state.
pub async fn run_network(config: NetworkConfig, duration: Duration) -> Result<NetworkSummary, NetworkError> {
    let network = Network::start(config, None)?;
    sleep(duration).await;
    network.shutdown().await
}
