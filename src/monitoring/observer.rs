//! Network-wide view built from controller snapshots.
//!
//! The observer is purely passive: it never sends anything to a controller. Every
//! metric is derived from the most recent snapshot of each controller, so a report
//! is an estimate of the network, not a measurement of it.

use crate::config::ObserverConfig;
use crate::global_variables::OBSERVER_ADDRESS;
use crate::shared_data::{current_timestamp_ms, SystemSnapshot};
use crate::simulation_engine::intersection::IntersectionId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub generated_at_ms: u64,
    pub active_controllers: usize,
    /// Silent controllers with the queue they last reported.
    pub stale_controllers: Vec<(IntersectionId, u32)>,
    /// Vehicles waiting across active controllers.
    pub total_waiting: u32,
    pub average_queue: f64,
    pub throughput_per_minute: f64,
    pub total_processed: u64,
    /// Active controllers whose total queue exceeds the congestion threshold.
    pub congested: Vec<(IntersectionId, u32)>,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
struct ControllerRecord {
    snapshot: SystemSnapshot,
    received_at: Instant,
}

/// Processed counter and cycle count seen at the previous report.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    processed: u64,
    cycle_count: u64,
}

#[derive(Debug, Serialize)]
struct ControllerView<'a> {
    snapshot: &'a SystemSnapshot,
    silent_ms: u64,
    stale: bool,
}

#[derive(Debug, Serialize)]
struct ObserverExport<'a> {
    controllers: Vec<ControllerView<'a>>,
    history: &'a VecDeque<AggregateMetrics>,
}

#[derive(Debug)]
pub struct Observer {
    config: ObserverConfig,
    stale_after: Duration,
    roster: HashSet<IntersectionId>,
    controllers: HashMap<IntersectionId, ControllerRecord>,
    baselines: HashMap<IntersectionId, Baseline>,
    last_report_at: Instant,
    history: VecDeque<AggregateMetrics>,
}

impl Observer {
    /// `snapshot_period` is the period at which controllers publish; staleness is a
    /// multiple of it. Only controllers named in `roster` are recorded.
    pub fn new(
        config: ObserverConfig,
        snapshot_period: Duration,
        roster: impl IntoIterator<Item = IntersectionId>,
        now: Instant,
    ) -> Self {
        Self {
            stale_after: config.stale_after(snapshot_period).unwrap_or(Duration::MAX),
            roster: roster.into_iter().collect(),
            config,
            controllers: HashMap::new(),
            baselines: HashMap::new(),
            last_report_at: now,
            history: VecDeque::with_capacity(config.history_capacity),
        }
    }

    /// Stores `snapshot` as the latest state of its controller. Returns false if it was dropped.
    ///
    /// Snapshots from outside the roster, or whose total disagrees with their per-approach
    /// counts, are dropped. An out-of-order snapshot does not replace newer content, but
    /// still counts as a sign of life.
    pub fn record(&mut self, snapshot: SystemSnapshot, received_at: Instant) -> bool {
        if snapshot.intersection.as_str() == OBSERVER_ADDRESS {
            log::warn!("[Observer] Dropped snapshot claiming the observer's own address");
            return false;
        }
        if !self.roster.contains(&snapshot.intersection) {
            log::warn!("[Observer] Dropped snapshot from unknown sender {}", snapshot.intersection);
            return false;
        }
        if snapshot.total_queue != snapshot.queues.total() {
            log::warn!(
                "[Observer] Dropped inconsistent snapshot from {}: total {} vs queues {:?}",
                snapshot.intersection,
                snapshot.total_queue,
                snapshot.queues.as_array()
            );
            return false;
        }
        match self.controllers.get_mut(&snapshot.intersection) {
            Some(record) => {
                if snapshot.timestamp_ms >= record.snapshot.timestamp_ms {
                    record.snapshot = snapshot;
                }
                record.received_at = received_at;
            }
            None => {
                log::info!("[Observer] First snapshot from {}", snapshot.intersection);
                self.controllers.insert(
                    snapshot.intersection.clone(),
                    ControllerRecord {
                        snapshot,
                        received_at,
                    },
                );
            }
        }
        true
    }

    fn is_stale(&self, record: &ControllerRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.received_at) > self.stale_after
    }

    /// Computes one report and appends it to the history.
    ///
    /// Throughput is the growth of each controller's processed counter since the previous
    /// report. A counter or cycle count that went backwards marks a restart, and the new
    /// counter is taken whole. A restart that overtakes both old values before the next
    /// report goes unnoticed and is counted as ordinary growth.
    pub fn report(&mut self, now: Instant) -> AggregateMetrics {
        let mut ids: Vec<&IntersectionId> = self.controllers.keys().collect();
        ids.sort();

        let mut active = 0usize;
        let mut stale = Vec::new();
        let mut congested = Vec::new();
        let mut total_waiting = 0u32;
        let mut total_processed = 0u64;
        let mut departed = 0u64;
        let mut new_baselines = Vec::new();

        for id in ids {
            let record = &self.controllers[id];
            let snapshot = &record.snapshot;
            total_processed = total_processed.saturating_add(snapshot.vehicles_processed);

            if self.is_stale(record, now) {
                stale.push((id.clone(), snapshot.total_queue));
                continue;
            }

            active += 1;
            total_waiting = total_waiting.saturating_add(snapshot.total_queue);
            if snapshot.total_queue > self.config.congestion_threshold {
                congested.push((id.clone(), snapshot.total_queue));
            }

            let current = Baseline {
                processed: snapshot.vehicles_processed,
                cycle_count: snapshot.cycle_count,
            };
            let delta = match self.baselines.get(id) {
                Some(previous)
                    if current.processed >= previous.processed
                        && current.cycle_count >= previous.cycle_count =>
                {
                    current.processed - previous.processed
                }
                // first sighting, or the controller restarted from zero
                _ => current.processed,
            };
            departed = departed.saturating_add(delta);
            new_baselines.push((id.clone(), current));
        }
        self.baselines.extend(new_baselines);

        let elapsed = now.saturating_duration_since(self.last_report_at).as_secs_f64();
        self.last_report_at = now;
        let throughput_per_minute = if elapsed > 0.0 {
            departed as f64 / elapsed * 60.0
        } else {
            0.0
        };

        let average_queue = if active == 0 {
            0.0
        } else {
            f64::from(total_waiting) / active as f64
        };

        for (id, queue) in &stale {
            log::warn!("[Observer] {} is unresponsive (last queue {})", id, queue);
        }
        for (id, queue) in &congested {
            log::warn!("[Observer] Congestion at {}: {} vehicles waiting", id, queue);
        }

        let metrics = AggregateMetrics {
            generated_at_ms: current_timestamp_ms(),
            active_controllers: active,
            degraded: !stale.is_empty(),
            stale_controllers: stale,
            total_waiting,
            average_queue,
            throughput_per_minute,
            total_processed,
            congested,
        };

        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(metrics.clone());
        metrics
    }

    pub fn latest(&self, id: &IntersectionId) -> Option<&SystemSnapshot> {
        self.controllers.get(id).map(|r| &r.snapshot)
    }

    pub fn known_controllers(&self) -> usize {
        self.controllers.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &AggregateMetrics> {
        self.history.iter()
    }

    pub fn last_report(&self) -> Option<&AggregateMetrics> {
        self.history.back()
    }

    /// Current per-controller state plus the report history, as pretty JSON.
    pub fn export_json(&self, now: Instant) -> Result<String, serde_json::Error> {
        let mut controllers: Vec<ControllerView> = self
            .controllers
            .values()
            .map(|record| ControllerView {
                snapshot: &record.snapshot,
                silent_ms: now.saturating_duration_since(record.received_at).as_millis() as u64,
                stale: self.is_stale(record, now),
            })
            .collect();
        controllers.sort_by(|a, b| a.snapshot.intersection.cmp(&b.snapshot.intersection));
        serde_json::to_string_pretty(&ObserverExport {
            controllers,
            history: &self.history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::intersection::{Phase, QueueState};

    const SNAPSHOT_PERIOD: Duration = Duration::from_secs(3);

    const ROSTER: [&str; 2] = ["A", "B"];

    fn snapshot(id: &str, queues: [u32; 4], processed: u64, timestamp_ms: u64) -> SystemSnapshot {
        let queues = QueueState::from_counts(queues[0], queues[1], queues[2], queues[3]);
        SystemSnapshot {
            intersection: IntersectionId::from(id),
            phase: Phase::NorthSouthGreen,
            elapsed_in_phase: 0.0,
            green_time_target: 12.0,
            cycle_count: 0,
            queues,
            total_queue: queues.total(),
            vehicles_processed: processed,
            known_neighbors: 0,
            timestamp_ms,
        }
    }

    fn observer(start: Instant) -> Observer {
        Observer::new(ObserverConfig::default(), SNAPSHOT_PERIOD, roster(), start)
    }

    fn roster() -> Vec<IntersectionId> {
        ROSTER.iter().map(|&id| IntersectionId::from(id)).collect()
    }

    #[test]
    fn empty_observer_reports_zeroes() {
        let start = Instant::now();
        let mut obs = observer(start);
        let report = obs.report(start + Duration::from_secs(10));
        assert_eq!(report.active_controllers, 0);
        assert_eq!(report.total_waiting, 0);
        assert_eq!(report.average_queue, 0.0);
        assert!(!report.degraded);
    }

    #[test]
    fn aggregates_latest_snapshots() {
        let start = Instant::now();
        let mut obs = observer(start);
        obs.record(snapshot("A", [1, 2, 3, 4], 0, 1), start);
        obs.record(snapshot("B", [2, 0, 0, 0], 0, 1), start);
        obs.record(snapshot("A", [0, 0, 0, 4], 0, 2), start);

        let report = obs.report(start + Duration::from_secs(1));
        assert_eq!(report.active_controllers, 2);
        assert_eq!(report.total_waiting, 6);
        assert_eq!(report.average_queue, 3.0);
    }

    #[test]
    fn older_snapshot_keeps_content_but_refreshes_liveness() {
        let start = Instant::now();
        let mut obs = observer(start);
        obs.record(snapshot("A", [5, 0, 0, 0], 0, 200), start);
        obs.record(snapshot("A", [1, 0, 0, 0], 0, 100), start + Duration::from_secs(8));

        assert_eq!(obs.latest(&IntersectionId::from("A")).unwrap().total_queue, 5);
        let report = obs.report(start + Duration::from_secs(12));
        assert_eq!(report.active_controllers, 1);
    }

    #[test]
    fn silent_controller_is_excluded_and_flagged() {
        let start = Instant::now();
        let mut obs = observer(start);
        obs.record(snapshot("A", [3, 0, 0, 0], 0, 1), start);
        obs.record(snapshot("B", [4, 0, 0, 0], 0, 1), start);

        // only A keeps reporting; threshold is 3 x 3s
        let later = start + Duration::from_secs(10);
        obs.record(snapshot("A", [3, 0, 0, 0], 0, 2), later);
        let report = obs.report(later);

        assert_eq!(report.active_controllers, 1);
        assert_eq!(report.total_waiting, 3);
        assert_eq!(report.stale_controllers, vec![(IntersectionId::from("B"), 4)]);
        assert!(report.degraded);

        // B comes back
        obs.record(snapshot("B", [0, 0, 0, 0], 0, 3), later + Duration::from_secs(1));
        let report = obs.report(later + Duration::from_secs(2));
        assert_eq!(report.active_controllers, 2);
        assert!(!report.degraded);
    }

    #[test]
    fn throughput_from_processed_deltas() {
        let start = Instant::now();
        let mut obs = observer(start);
        obs.record(snapshot("A", [0; 4], 10, 1), start);
        obs.record(snapshot("B", [0; 4], 20, 1), start);
        let first = obs.report(start + Duration::from_secs(30));
        assert!((first.throughput_per_minute - 60.0).abs() < 1e-9);

        let t = start + Duration::from_secs(55);
        obs.record(snapshot("A", [0; 4], 15, 2), t);
        obs.record(snapshot("B", [0; 4], 25, 2), t);
        let second = obs.report(start + Duration::from_secs(60));
        assert!((second.throughput_per_minute - 20.0).abs() < 1e-9);
        assert_eq!(second.total_processed, 40);
    }

    #[test]
    fn counter_reset_never_goes_negative() {
        let start = Instant::now();
        let mut obs = observer(start);
        obs.record(snapshot("A", [0; 4], 100, 1), start);
        obs.report(start + Duration::from_secs(6));

        obs.record(snapshot("A", [0; 4], 3, 2), start + Duration::from_secs(7));
        let report = obs.report(start + Duration::from_secs(12));
        assert!((report.throughput_per_minute - 30.0).abs() < 1e-9);
    }

    #[test]
    fn flags_congestion_and_drops_reserved_sender() {
        let start = Instant::now();
        let mut obs = observer(start);
        assert!(obs.record(snapshot("A", [8, 8, 0, 0], 0, 1), start));
        assert!(obs.record(snapshot("B", [8, 7, 0, 0], 0, 1), start));
        assert!(!obs.record(snapshot(OBSERVER_ADDRESS, [1, 0, 0, 0], 0, 1), start));

        let report = obs.report(start);
        assert_eq!(report.congested, vec![(IntersectionId::from("A"), 16)]);
        assert_eq!(obs.known_controllers(), 2);
    }

    #[test]
    fn drops_senders_outside_the_roster() {
        let start = Instant::now();
        let mut obs = observer(start);
        assert!(!obs.record(snapshot("NOT_IN_NETWORK", [1, 0, 0, 0], 0, 1), start));

        let report = obs.report(start);
        assert_eq!(report.active_controllers, 0);
        assert_eq!(obs.known_controllers(), 0);
        assert!(obs.latest(&IntersectionId::from("NOT_IN_NETWORK")).is_none());
    }

    #[test]
    fn inconsistent_totals_are_dropped_and_sums_saturate() {
        let start = Instant::now();
        let mut obs = observer(start);

        let mut forged = snapshot("A", [1, 0, 0, 0], 0, 1);
        forged.total_queue = u32::MAX;
        assert!(!obs.record(forged, start));

        assert!(obs.record(snapshot("A", [u32::MAX - 1, 0, 0, 0], u64::MAX, 1), start));
        assert!(obs.record(snapshot("B", [5, 0, 0, 0], 7, 1), start));
        let report = obs.report(start + Duration::from_secs(1));
        assert_eq!(report.active_controllers, 2);
        assert_eq!(report.total_waiting, u32::MAX);
        assert_eq!(report.total_processed, u64::MAX);
    }

    #[test]
    fn restart_detected_by_cycle_count() {
        let start = Instant::now();
        let mut obs = observer(start);
        let mut before = snapshot("A", [0; 4], 10, 1);
        before.cycle_count = 8;
        obs.record(before, start);
        obs.report(start + Duration::from_secs(6));

        // restarted and already past the old counter, but on an earlier cycle
        let mut after = snapshot("A", [0; 4], 12, 2);
        after.cycle_count = 1;
        obs.record(after, start + Duration::from_secs(7));
        let report = obs.report(start + Duration::from_secs(12));
        assert!((report.throughput_per_minute - 120.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_staleness_window_does_not_panic() {
        let start = Instant::now();
        let config = ObserverConfig {
            staleness_multiple: 1e20,
            ..ObserverConfig::default()
        };
        let mut obs = Observer::new(config, SNAPSHOT_PERIOD, roster(), start);
        obs.record(snapshot("A", [2, 0, 0, 0], 0, 1), start);
        let report = obs.report(start + Duration::from_secs(3_600));
        assert_eq!(report.active_controllers, 1);
    }

    #[test]
    fn history_is_bounded() {
        let start = Instant::now();
        let config = ObserverConfig {
            history_capacity: 3,
            ..ObserverConfig::default()
        };
        let mut obs = Observer::new(config, SNAPSHOT_PERIOD, roster(), start);
        for i in 0..5u64 {
            obs.record(snapshot("A", [i as u32, 0, 0, 0], 0, i), start);
            obs.report(start);
        }
        let waiting: Vec<u32> = obs.history().map(|m| m.total_waiting).collect();
        assert_eq!(waiting, vec![2, 3, 4]);
        assert_eq!(obs.last_report().unwrap().total_waiting, 4);
    }

    #[test]
    fn exports_json() {
        let start = Instant::now();
        let mut obs = observer(start);
        obs.record(snapshot("A", [1, 0, 0, 0], 0, 1), start);
        obs.report(start);
        let json: serde_json::Value =
            serde_json::from_str(&obs.export_json(start + Duration::from_secs(20)).unwrap()).unwrap();
        assert_eq!(json["controllers"][0]["snapshot"]["intersection"], "A");
        assert_eq!(json["controllers"][0]["stale"], true);
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
    }
}
