use crate::config::{ConfigError, IntersectionConfig, SignalTiming};
use crate::control_system::coordination::{NeighborTable, RejectReason};
use crate::control_system::pressure::{current_axis_pressure, opposite_axis_pressure};
use crate::shared_data::{PressureMessage, SystemSnapshot};
use crate::simulation_engine::intersection::{Direction, IntersectionId, Phase, QueueState};
use crate::simulation_engine::queue_model::{QueueModel, RateError};
use serde::{Deserialize, Serialize};

/// Which rule of the green-time decision fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionBranch {
    /// Current axis more than twice as loaded as the opposite one: hold green as long as allowed.
    FavorCurrent,
    /// Opposite axis more than 1.5 times as loaded: hand over as soon as allowed.
    YieldToOpposite,
    /// Locally balanced: lengthen or shorten green by comparison with the neighborhood.
    NeighborBalance,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GreenDecision {
    pub green_time: f64,
    pub branch: DecisionBranch,
}

/// Green time for the axis that is (or is about to be) green.
///
/// The result is always within `[timing.min_green, timing.max_green]`.
pub fn decide_green_time(
    current: f64,
    opposite: f64,
    neighbor: f64,
    timing: &SignalTiming,
) -> GreenDecision {
    let (green_time, branch) = if current > 2.0 * opposite {
        (timing.max_green, DecisionBranch::FavorCurrent)
    } else if opposite > 1.5 * current {
        (timing.min_green, DecisionBranch::YieldToOpposite)
    } else {
        let adjusted = timing.base_green + (current - neighbor) * timing.adjustment_factor;
        (adjusted, DecisionBranch::NeighborBalance)
    };
    GreenDecision {
        green_time: green_time.clamp(timing.min_green, timing.max_green),
        branch,
    }
}

/// Everything one controller owns.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub id: IntersectionId,
    pub phase: Phase,
    /// Seconds since the last phase switch.
    pub elapsed_in_phase: f64,
    pub green_time_target: f64,
    pub cycle_count: u64,
    pub queues: QueueState,
    pub total_vehicles_processed: u64,
    pub neighbor_pressures: NeighborTable,
    pub last_branch: DecisionBranch,
}

/// Result of one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub arrivals: u32,
    pub departures: u32,
    pub dropped: u32,
    /// `(from, to)` when the tick ended a cycle.
    pub switched: Option<(Phase, Phase)>,
    pub decision: GreenDecision,
}

/// Two-phase signal state machine with pressure-driven green times.
#[derive(Debug)]
pub struct SignalController {
    state: ControllerState,
    timing: SignalTiming,
    max_queue: u32,
    control_period_secs: f64,
    queue_model: QueueModel,
}

impl SignalController {
    pub fn new(config: &IntersectionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let queue_model = QueueModel::new(&config.queue).map_err(|e| match e {
            RateError::OutOfRange { field, value } => ConfigError::ProbabilityOutOfRange {
                id: config.id.clone(),
                field,
                value,
            },
            RateError::ZeroCapacity => ConfigError::ZeroMaxQueue {
                id: config.id.clone(),
            },
        })?;

        let mut controller = Self {
            state: ControllerState {
                id: config.id.clone(),
                phase: config.initial_phase,
                elapsed_in_phase: 0.0,
                green_time_target: config.timing.base_green,
                cycle_count: 0,
                queues: QueueState::default(),
                total_vehicles_processed: 0,
                neighbor_pressures: NeighborTable::new(
                    config.id.clone(),
                    config.neighbors.clone(),
                    config.neighbor_expiry,
                ),
                last_branch: DecisionBranch::NeighborBalance,
            },
            timing: config.timing,
            max_queue: config.queue.max_queue,
            control_period_secs: config.periods.control().as_secs_f64(),
            queue_model,
        };
        controller.apply_decision(0);
        Ok(controller)
    }

    pub fn current_pressure(&self) -> f64 {
        current_axis_pressure(&self.state.queues, self.state.phase, self.max_queue)
    }

    pub fn opposite_pressure(&self) -> f64 {
        opposite_axis_pressure(&self.state.queues, self.state.phase, self.max_queue)
    }

    /// Evaluates the decision rule for the current phase without changing anything.
    pub fn evaluate(&self, now_ms: u64) -> GreenDecision {
        decide_green_time(
            self.current_pressure(),
            self.opposite_pressure(),
            self.state.neighbor_pressures.average(now_ms),
            &self.timing,
        )
    }

    fn apply_decision(&mut self, now_ms: u64) -> GreenDecision {
        let decision = self.evaluate(now_ms);
        self.state.green_time_target = decision.green_time;
        self.state.last_branch = decision.branch;
        log::debug!(
            "[{}] Pressure: current={:.2} opposite={:.2} neighbors={:.2} -> green {:.1}s ({:?})",
            self.state.id,
            self.current_pressure(),
            self.opposite_pressure(),
            self.state.neighbor_pressures.average(now_ms),
            decision.green_time,
            decision.branch
        );
        decision
    }

    /// One control period: move vehicles, re-decide, and switch phase if green has run out.
    ///
    /// Departures are gated by the phase active when the tick starts. The whole tick is
    /// applied before returning, so state is never observed mid-transition.
    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let outcome = self.queue_model.step(&mut self.state.queues, self.state.phase);
        self.state.total_vehicles_processed += u64::from(outcome.departures);
        self.state.elapsed_in_phase += self.control_period_secs;

        let mut decision = self.apply_decision(now_ms);
        let mut switched = None;
        if self.state.elapsed_in_phase >= self.state.green_time_target {
            let from = self.state.phase;
            self.state.phase = from.next();
            self.state.elapsed_in_phase = 0.0;
            self.state.cycle_count += 1;
            decision = self.apply_decision(now_ms);
            switched = Some((from, self.state.phase));
            log::info!(
                "[{}] Phase switch: {} -> {} (green {:.1}s, cycle {})",
                self.state.id,
                from,
                self.state.phase,
                decision.green_time,
                self.state.cycle_count
            );
        }

        TickReport {
            arrivals: outcome.arrivals,
            departures: outcome.departures,
            dropped: outcome.dropped,
            switched,
            decision,
        }
    }

    /// Inbound half of the coordination protocol. Only `neighbor_pressures` is touched.
    pub fn receive_pressure(&mut self, message: &PressureMessage, now_ms: u64) -> Result<(), RejectReason> {
        self.state.neighbor_pressures.ingest(message, now_ms)
    }

    pub fn snapshot(&self, now_ms: u64) -> SystemSnapshot {
        SystemSnapshot {
            intersection: self.state.id.clone(),
            phase: self.state.phase,
            elapsed_in_phase: self.state.elapsed_in_phase,
            green_time_target: self.state.green_time_target,
            cycle_count: self.state.cycle_count,
            queues: self.state.queues,
            total_queue: self.state.queues.total(),
            vehicles_processed: self.state.total_vehicles_processed,
            known_neighbors: self.state.neighbor_pressures.fresh_count(now_ms),
            timestamp_ms: now_ms,
        }
    }

    pub fn set_rates(&mut self, arrival_rate: f64, departure_rate: f64) -> Result<(), RateError> {
        self.queue_model.set_rates(arrival_rate, departure_rate)
    }

    pub fn inject_burst(&mut self, direction: Direction, count: u32) -> u32 {
        self.queue_model
            .inject_burst(&mut self.state.queues, direction, count)
    }

    pub fn queue_model(&self) -> &QueueModel {
        &self.queue_model
    }

    pub fn timing(&self) -> &SignalTiming {
        &self.timing
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn into_state(self) -> ControllerState {
        self.state
    }
}
