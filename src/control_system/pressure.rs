use crate::simulation_engine::intersection::{Phase, QueueState};

/// Normalized congestion of the axis served by `phase`, in [0, 1].
///
/// `max_queue` must be non-zero; configuration validation guarantees it.
pub fn axis_pressure(queues: &QueueState, phase: Phase, max_queue: u32) -> f64 {
    let raw = f64::from(queues.axis_total(phase)) / f64::from(max_queue);
    raw.clamp(0.0, 1.0)
}

/// Pressure of the axis that is green under `phase`.
pub fn current_axis_pressure(queues: &QueueState, phase: Phase, max_queue: u32) -> f64 {
    axis_pressure(queues, phase, max_queue)
}

/// Pressure of the axis that is red under `phase`.
pub fn opposite_axis_pressure(queues: &QueueState, phase: Phase, max_queue: u32) -> f64 {
    axis_pressure(queues, phase.next(), max_queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_by_max_queue() {
        let queues = QueueState::from_counts(5, 3, 4, 2);
        assert_eq!(axis_pressure(&queues, Phase::NorthSouthGreen, 20), 0.4);
        assert_eq!(axis_pressure(&queues, Phase::EastWestGreen, 20), 0.3);
    }

    #[test]
    fn current_and_opposite_follow_phase() {
        let queues = QueueState::from_counts(5, 3, 4, 2);
        let ns = Phase::NorthSouthGreen;
        assert_eq!(current_axis_pressure(&queues, ns, 20), 0.4);
        assert_eq!(opposite_axis_pressure(&queues, ns, 20), 0.3);
        assert_eq!(current_axis_pressure(&queues, ns.next(), 20), 0.3);
    }

    #[test]
    fn clamps_two_full_approaches() {
        // two approaches at capacity sum to twice max_queue
        let queues = QueueState::from_counts(20, 20, 0, 0);
        assert_eq!(axis_pressure(&queues, Phase::NorthSouthGreen, 20), 1.0);
        assert_eq!(axis_pressure(&queues, Phase::EastWestGreen, 20), 0.0);
    }
}
