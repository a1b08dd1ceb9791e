// src/shared_data.rs

use crate::simulation_engine::intersection::{IntersectionId, Phase, QueueState};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One intersection's current-axis pressure, announced to a neighbor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureMessage {
    pub sender: IntersectionId,
    pub pressure: f64,
    pub timestamp_ms: u64,
}

/// Point-in-time copy of a controller's public state, sent to the observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub intersection: IntersectionId,
    pub phase: Phase,
    pub elapsed_in_phase: f64,
    pub green_time_target: f64,
    pub cycle_count: u64,
    pub queues: QueueState,
    pub total_queue: u32,
    pub vehicles_processed: u64,
    pub known_neighbors: usize,
    pub timestamp_ms: u64,
}
