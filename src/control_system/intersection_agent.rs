use crate::communication::messages::Envelope;
use crate::communication::transport::{Mailbox, Transport};
use crate::config::{ConfigError, IntersectionConfig};
use crate::control_system::coordination::announce;
use crate::control_system::signal_controller::{ControllerState, SignalController};
use crate::global_variables::OBSERVER_ADDRESS;
use crate::shared_data::current_timestamp_ms;
use crate::simulation_engine::intersection::{Direction, IntersectionId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Operator commands accepted by a running agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgentCommand {
    SetRates { arrival: f64, departure: f64 },
    InjectBurst { direction: Direction, count: u32 },
}

/// One intersection: its controller plus the three periodic behaviors (control, coordination,
/// snapshot) and the inbound mailbox, all driven from a single task.
///
/// Every mutation of the controller state happens on that task, so a tick, an inbound
/// pressure update and a snapshot never interleave.
pub struct IntersectionAgent {
    config: IntersectionConfig,
    controller: SignalController,
    transport: Arc<dyn Transport>,
    mailbox: Mailbox,
}

fn periodic(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl IntersectionAgent {
    pub fn new(
        config: IntersectionConfig,
        transport: Arc<dyn Transport>,
        mailbox: Mailbox,
    ) -> Result<Self, ConfigError> {
        let controller = SignalController::new(&config)?;
        Ok(Self {
            config,
            controller,
            transport,
            mailbox,
        })
    }

    pub fn id(&self) -> &IntersectionId {
        &self.config.id
    }

    pub fn controller(&self) -> &SignalController {
        &self.controller
    }

    /// Starts the agent on the current tokio runtime.
    pub fn spawn(self) -> IntersectionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let id = self.config.id.clone();
        let join = tokio::spawn(self.run(command_rx, shutdown_rx));
        IntersectionHandle {
            id,
            commands: command_tx,
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<AgentCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ControllerState {
        let periods = self.config.periods;
        let mut control = periodic(periods.control());
        let mut coordination = periodic(periods.coordination());
        let mut snapshot = periodic(periods.snapshot());

        log::info!(
            "[{}] Started: phase {}, green {:.1}s, neighbors {:?}",
            self.config.id,
            self.controller.state().phase,
            self.controller.state().green_time_target,
            self.config.neighbors
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = control.tick() => {
                    self.controller.tick(current_timestamp_ms());
                }
                _ = coordination.tick() => self.announce_pressure(),
                _ = snapshot.tick() => self.publish_snapshot(),
                Some(payload) = self.mailbox.recv() => self.handle_inbound(&payload),
                Some(command) = commands.recv() => self.handle_command(command),
            }
        }

        log::info!(
            "[{}] Stopped after {} cycles, {} vehicles processed",
            self.config.id,
            self.controller.state().cycle_count,
            self.controller.state().total_vehicles_processed
        );
        self.controller.into_state()
    }

    fn announce_pressure(&self) {
        let report = announce(
            &self.config.id,
            self.controller.current_pressure(),
            &self.config.neighbors,
            current_timestamp_ms(),
            self.transport.as_ref(),
        );
        log::debug!(
            "[{}] Pressure sent to {}/{} neighbors",
            self.config.id,
            report.delivered,
            self.config.neighbors.len()
        );
    }

    fn publish_snapshot(&self) {
        let snapshot = self.controller.snapshot(current_timestamp_ms());
        let payload = match Envelope::Snapshot(snapshot).encode() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("[{}] Could not encode snapshot: {}", self.config.id, e);
                return;
            }
        };
        if let Err(e) = self.transport.send(OBSERVER_ADDRESS, &payload) {
            log::warn!("[{}] Snapshot not delivered: {}", self.config.id, e);
        }
    }

    fn handle_inbound(&mut self, payload: &[u8]) {
        match Envelope::decode(payload) {
            Ok(Envelope::Pressure(message)) => {
                let received_ms = current_timestamp_ms();
                if let Err(reason) = self.controller.receive_pressure(&message, received_ms) {
                    log::warn!(
                        "[{}] Ignored pressure from {}: {}",
                        self.config.id,
                        message.sender,
                        reason
                    );
                }
            }
            Ok(other) => {
                log::warn!(
                    "[{}] Ignored unexpected {} message",
                    self.config.id,
                    other.kind()
                );
            }
            Err(e) => log::warn!("[{}] Dropped inbound payload: {}", self.config.id, e),
        }
    }

    fn handle_command(&mut self, command: AgentCommand) {
        match command {
            AgentCommand::SetRates { arrival, departure } => {
                match self.controller.set_rates(arrival, departure) {
                    Ok(()) => log::info!(
                        "[{}] Rates set to arrival {:.2}, departure {:.2}",
                        self.config.id,
                        arrival,
                        departure
                    ),
                    Err(e) => log::warn!("[{}] Rejected new rates: {}", self.config.id, e),
                }
            }
            AgentCommand::InjectBurst { direction, count } => {
                let admitted = self.controller.inject_burst(direction, count);
                log::info!(
                    "[{}] Burst of {} vehicles on {:?} ({} admitted)",
                    self.config.id,
                    count,
                    direction,
                    admitted
                );
            }
        }
    }
}

/// Control side of a running agent.
#[derive(Debug)]
pub struct IntersectionHandle {
    id: IntersectionId,
    commands: mpsc::UnboundedSender<AgentCommand>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<ControllerState>,
}

impl IntersectionHandle {
    pub fn id(&self) -> &IntersectionId {
        &self.id
    }

    /// Returns false once the agent has stopped.
    pub fn send(&self, command: AgentCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn set_rates(&self, arrival: f64, departure: f64) -> bool {
        self.send(AgentCommand::SetRates { arrival, departure })
    }

    pub fn inject_burst(&self, direction: Direction, count: u32) -> bool {
        self.send(AgentCommand::InjectBurst { direction, count })
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the agent and returns its final state.
    pub async fn shutdown(self) -> Result<ControllerState, JoinError> {
        let _ = self.shutdown.send(true);
        self.join.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::transport::LocalBus;
    use crate::shared_data::PressureMessage;
    use std::time::Duration;

    fn quiet_config(id: &str, neighbors: &[&str]) -> IntersectionConfig {
        let mut config = IntersectionConfig::new(id, neighbors);
        config.queue.arrival_rate = 0.0;
        config.queue.seed = Some(3);
        config.periods.control_ms = 100;
        config.periods.coordination_ms = 100;
        config.periods.snapshot_ms = 100;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_and_reports_to_observer() {
        let bus = Arc::new(LocalBus::new(64));
        let mut observer = bus.register(OBSERVER_ADDRESS);
        let mailbox = bus.register("A");
        let agent = IntersectionAgent::new(quiet_config("A", &[]), bus.clone(), mailbox).unwrap();
        let handle = agent.spawn();

        tokio::time::sleep(Duration::from_millis(350)).await;
        let state = handle.shutdown().await.unwrap();
        assert!(state.elapsed_in_phase > 0.0 || state.cycle_count > 0);

        let payload = observer.recv().await.unwrap();
        match Envelope::decode(&payload).unwrap() {
            Envelope::Snapshot(snapshot) => assert_eq!(snapshot.intersection, IntersectionId::from("A")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn neighbors_learn_each_other() {
        let bus = Arc::new(LocalBus::new(64));
        let _observer = bus.register(OBSERVER_ADDRESS);
        let a = IntersectionAgent::new(quiet_config("A", &["B"]), bus.clone(), bus.register("A"))
            .unwrap()
            .spawn();
        let b = IntersectionAgent::new(quiet_config("B", &["A"]), bus.clone(), bus.register("B"))
            .unwrap()
            .spawn();
        a.inject_burst(Direction::North, 10);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let state_a = a.shutdown().await.unwrap();
        let state_b = b.shutdown().await.unwrap();
        assert!(state_a.neighbor_pressures.reading(&IntersectionId::from("B")).is_some());
        assert!(state_b.neighbor_pressures.reading(&IntersectionId::from("A")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_and_strangers_do_not_disturb_the_agent() {
        let bus = Arc::new(LocalBus::new(64));
        let _observer = bus.register(OBSERVER_ADDRESS);
        let handle = IntersectionAgent::new(quiet_config("A", &["B"]), bus.clone(), bus.register("A"))
            .unwrap()
            .spawn();

        bus.send("A", b"not json").unwrap();
        let stranger = Envelope::Pressure(PressureMessage {
            sender: IntersectionId::from("Z"),
            pressure: 0.5,
            timestamp_ms: 0,
        });
        bus.send("A", &stranger.encode().unwrap()).unwrap();
        assert!(handle.set_rates(2.0, 0.5));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!handle.is_finished());
        let state = handle.shutdown().await.unwrap();
        assert!(state.neighbor_pressures.is_empty());
    }
}
