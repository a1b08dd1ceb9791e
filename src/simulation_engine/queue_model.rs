use crate::config::{QueueParams, SaturationPolicy};
use crate::simulation_engine::intersection::{Direction, Phase, QueueState};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RateError {
    #[error("{field} = {value} is outside [0, 1]")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("max_queue must be at least 1")]
    ZeroCapacity,
}

fn check_rate(field: &'static str, value: f64) -> Result<(), RateError> {
    // NaN fails the range check too
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RateError::OutOfRange { field, value })
    }
}

/// Vehicles that moved during one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Vehicles that joined a queue (new arrivals and admitted deferred vehicles).
    pub arrivals: u32,
    pub departures: u32,
    /// Arrivals discarded because the approach was full.
    pub dropped: u32,
}

/// Stochastic arrivals and departures for the four approaches of one intersection.
///
/// The model knows which approaches are green only through the `Phase` passed to `step`;
/// it has no view of how the controller picks phases.
#[derive(Debug)]
pub struct QueueModel {
    arrival_rate: f64,
    departure_rate: f64,
    max_queue: u32,
    saturation: SaturationPolicy,
    deferred: QueueState,
    rng: SmallRng,
    total_arrivals: u64,
    total_departures: u64,
    total_dropped: u64,
}

impl QueueModel {
    pub fn new(params: &QueueParams) -> Result<Self, RateError> {
        check_rate("arrival_rate", params.arrival_rate)?;
        check_rate("departure_rate", params.departure_rate)?;
        if params.max_queue == 0 {
            return Err(RateError::ZeroCapacity);
        }
        let rng = match params.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Ok(Self {
            arrival_rate: params.arrival_rate,
            departure_rate: params.departure_rate,
            max_queue: params.max_queue,
            saturation: params.saturation,
            deferred: QueueState::default(),
            rng,
            total_arrivals: 0,
            total_departures: 0,
            total_dropped: 0,
        })
    }

    /// Advances every approach by one time unit.
    ///
    /// Each approach draws one arrival; approaches green under `phase` draw one departure.
    /// Red approaches never lose vehicles.
    pub fn step(&mut self, queues: &mut QueueState, phase: Phase) -> StepOutcome {
        let mut outcome = StepOutcome::default();

        for direction in Direction::ALL {
            let mut count = queues.get(direction);

            if self.rng.random_bool(self.arrival_rate) {
                if count < self.max_queue {
                    count += 1;
                    outcome.arrivals += 1;
                } else {
                    self.saturate(direction, 1, &mut outcome);
                }
            }

            if phase.is_green(direction) && count > 0 && self.rng.random_bool(self.departure_rate) {
                count -= 1;
                outcome.departures += 1;
            }

            count += self.admit_deferred(direction, count, &mut outcome);
            queues.set(direction, count);
        }

        self.total_arrivals += u64::from(outcome.arrivals);
        self.total_departures += u64::from(outcome.departures);
        self.total_dropped += u64::from(outcome.dropped);
        outcome
    }

    /// Adds `count` vehicles to one approach at once. Returns how many joined the queue;
    /// the remainder follows the saturation policy.
    pub fn inject_burst(&mut self, queues: &mut QueueState, direction: Direction, count: u32) -> u32 {
        let current = queues.get(direction);
        let admitted = count.min(self.max_queue.saturating_sub(current));
        queues.set(direction, current + admitted);

        let mut outcome = StepOutcome {
            arrivals: admitted,
            ..StepOutcome::default()
        };
        self.saturate(direction, count - admitted, &mut outcome);
        self.total_arrivals += u64::from(outcome.arrivals);
        self.total_dropped += u64::from(outcome.dropped);
        admitted
    }

    pub fn set_rates(&mut self, arrival_rate: f64, departure_rate: f64) -> Result<(), RateError> {
        check_rate("arrival_rate", arrival_rate)?;
        check_rate("departure_rate", departure_rate)?;
        self.arrival_rate = arrival_rate;
        self.departure_rate = departure_rate;
        Ok(())
    }

    fn saturate(&mut self, direction: Direction, excess: u32, outcome: &mut StepOutcome) {
        if excess == 0 {
            return;
        }
        match self.saturation {
            SaturationPolicy::Drop => outcome.dropped = outcome.dropped.saturating_add(excess),
            SaturationPolicy::Defer => {
                let waiting = self.deferred.get(direction);
                self.deferred.set(direction, waiting.saturating_add(excess));
            }
        }
    }

    fn admit_deferred(&mut self, direction: Direction, count: u32, outcome: &mut StepOutcome) -> u32 {
        let waiting = self.deferred.get(direction);
        let admitted = waiting.min(self.max_queue.saturating_sub(count));
        if admitted > 0 {
            self.deferred.set(direction, waiting - admitted);
            outcome.arrivals = outcome.arrivals.saturating_add(admitted);
        }
        admitted
    }

    pub fn arrival_rate(&self) -> f64 {
        self.arrival_rate
    }

    pub fn departure_rate(&self) -> f64 {
        self.departure_rate
    }

    pub fn max_queue(&self) -> u32 {
        self.max_queue
    }

    /// Vehicles held upstream of a full approach (only under `SaturationPolicy::Defer`).
    pub fn deferred(&self, direction: Direction) -> u32 {
        self.deferred.get(direction)
    }

    pub fn total_arrivals(&self) -> u64 {
        self.total_arrivals
    }

    pub fn total_departures(&self) -> u64 {
        self.total_departures
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }
}
