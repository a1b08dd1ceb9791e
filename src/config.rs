//! Network configuration: one explicit structure handed to each agent at construction.
//!
//! Every value is checked by `validate` before an agent is allowed to run.
//! Invalid values are reported, never clamped.

use crate::global_variables::*;
use crate::simulation_engine::intersection::{IntersectionId, Phase};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{id}: green times must satisfy 0 < min ({min}) <= base ({base}) <= max ({max})")]
    GreenTimeOrdering {
        id: IntersectionId,
        min: f64,
        base: f64,
        max: f64,
    },
    #[error("{id}: {field} = {value} is outside [0, 1]")]
    ProbabilityOutOfRange {
        id: IntersectionId,
        field: &'static str,
        value: f64,
    },
    #[error("{id}: {field} must be a finite number")]
    NonFinite {
        id: IntersectionId,
        field: &'static str,
    },
    #[error("{id}: max_queue must be at least 1")]
    ZeroMaxQueue { id: IntersectionId },
    #[error("{id}: {task} period must be positive")]
    ZeroPeriod {
        id: IntersectionId,
        task: &'static str,
    },
    #[error("{id}: {task} period of {ms} ms exceeds the {max} ms limit")]
    PeriodTooLong {
        id: IntersectionId,
        task: &'static str,
        ms: u64,
        max: u64,
    },
    #[error("{id}: neighbor expiry window must be positive")]
    ZeroExpiryWindow { id: IntersectionId },
    #[error("{id}: unknown neighbor {neighbor}")]
    UnknownNeighbor {
        id: IntersectionId,
        neighbor: IntersectionId,
    },
    #[error("{id} lists itself as a neighbor")]
    SelfNeighbor { id: IntersectionId },
    #[error("duplicate intersection id {0}")]
    DuplicateId(IntersectionId),
    #[error("'{0}' is reserved and cannot name an intersection")]
    ReservedId(IntersectionId),
    #[error("network has no intersections")]
    EmptyNetwork,
    #[error("observer: {0}")]
    Observer(String),
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
    #[error("failed to read config: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// What happens to an arrival when its approach already holds `max_queue` vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// The arrival is discarded and counted as dropped.
    #[default]
    Drop,
    /// The arrival waits upstream and joins the queue once there is room.
    Defer,
}

/// Whether silent neighbors keep contributing their last pressure to the average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum NeighborExpiry {
    #[default]
    Never,
    After { max_age_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalTiming {
    pub min_green: f64,
    pub base_green: f64,
    pub max_green: f64,
    pub adjustment_factor: f64,
}

impl Default for SignalTiming {
    fn default() -> Self {
        Self {
            min_green: DEFAULT_MIN_GREEN_TIME,
            base_green: DEFAULT_BASE_GREEN_TIME,
            max_green: DEFAULT_MAX_GREEN_TIME,
            adjustment_factor: DEFAULT_ADJUSTMENT_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueParams {
    pub max_queue: u32,
    pub arrival_rate: f64,
    pub departure_rate: f64,
    pub saturation: SaturationPolicy,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for QueueParams {
    fn default() -> Self {
        Self {
            max_queue: DEFAULT_MAX_QUEUE,
            arrival_rate: DEFAULT_ARRIVAL_RATE,
            departure_rate: DEFAULT_DEPARTURE_RATE,
            saturation: SaturationPolicy::Drop,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPeriods {
    pub control_ms: u64,
    pub coordination_ms: u64,
    pub snapshot_ms: u64,
}

impl Default for TaskPeriods {
    fn default() -> Self {
        Self {
            control_ms: DEFAULT_CONTROL_PERIOD_MS,
            coordination_ms: DEFAULT_COORDINATION_PERIOD_MS,
            snapshot_ms: DEFAULT_SNAPSHOT_PERIOD_MS,
        }
    }
}

impl TaskPeriods {
    pub fn control(&self) -> Duration {
        Duration::from_millis(self.control_ms)
    }

    pub fn coordination(&self) -> Duration {
        Duration::from_millis(self.coordination_ms)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_millis(self.snapshot_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionConfig {
    pub id: IntersectionId,
    #[serde(default)]
    pub neighbors: Vec<IntersectionId>,
    #[serde(default = "default_initial_phase")]
    pub initial_phase: Phase,
    #[serde(default)]
    pub timing: SignalTiming,
    #[serde(default)]
    pub queue: QueueParams,
    #[serde(default)]
    pub periods: TaskPeriods,
    #[serde(default)]
    pub neighbor_expiry: NeighborExpiry,
}

fn default_initial_phase() -> Phase {
    Phase::NorthSouthGreen
}

fn check_probability(id: &IntersectionId, field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite {
            id: id.clone(),
            field,
        });
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ProbabilityOutOfRange {
            id: id.clone(),
            field,
            value,
        });
    }
    Ok(())
}

impl IntersectionConfig {
    pub fn new(id: impl Into<String>, neighbors: &[&str]) -> Self {
        Self {
            id: IntersectionId::new(id),
            neighbors: neighbors.iter().map(|&n| IntersectionId::from(n)).collect(),
            initial_phase: default_initial_phase(),
            timing: SignalTiming::default(),
            queue: QueueParams::default(),
            periods: TaskPeriods::default(),
            neighbor_expiry: NeighborExpiry::Never,
        }
    }

    /// Checks everything that can be checked without knowing the rest of the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = &self.id;
        if id.as_str() == OBSERVER_ADDRESS {
            return Err(ConfigError::ReservedId(id.clone()));
        }

        let t = &self.timing;
        for (field, value) in [
            ("min_green", t.min_green),
            ("base_green", t.base_green),
            ("max_green", t.max_green),
            ("adjustment_factor", t.adjustment_factor),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite {
                    id: id.clone(),
                    field,
                });
            }
        }
        if !(t.min_green > 0.0 && t.min_green <= t.base_green && t.base_green <= t.max_green) {
            return Err(ConfigError::GreenTimeOrdering {
                id: id.clone(),
                min: t.min_green,
                base: t.base_green,
                max: t.max_green,
            });
        }

        check_probability(id, "arrival_rate", self.queue.arrival_rate)?;
        check_probability(id, "departure_rate", self.queue.departure_rate)?;
        if self.queue.max_queue == 0 {
            return Err(ConfigError::ZeroMaxQueue { id: id.clone() });
        }

        for (task, ms) in [
            ("control", self.periods.control_ms),
            ("coordination", self.periods.coordination_ms),
            ("snapshot", self.periods.snapshot_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::ZeroPeriod {
                    id: id.clone(),
                    task,
                });
            }
            if ms > MAX_PERIOD_MS {
                return Err(ConfigError::PeriodTooLong {
                    id: id.clone(),
                    task,
                    ms,
                    max: MAX_PERIOD_MS,
                });
            }
        }

        if let NeighborExpiry::After { max_age_ms: 0 } = self.neighbor_expiry {
            return Err(ConfigError::ZeroExpiryWindow { id: id.clone() });
        }

        if self.neighbors.contains(id) {
            return Err(ConfigError::SelfNeighbor { id: id.clone() });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub report_ms: u64,
    /// A controller is stale after `staleness_multiple` snapshot periods of silence.
    pub staleness_multiple: f64,
    pub congestion_threshold: u32,
    pub history_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            report_ms: DEFAULT_REPORT_PERIOD_MS,
            staleness_multiple: DEFAULT_STALENESS_MULTIPLE,
            congestion_threshold: DEFAULT_CONGESTION_THRESHOLD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ObserverConfig {
    pub fn report_period(&self) -> Duration {
        Duration::from_millis(self.report_ms)
    }

    /// Silence after which a controller publishing every `snapshot_period` counts as stale.
    pub fn stale_after(&self, snapshot_period: Duration) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(snapshot_period.as_secs_f64() * self.staleness_multiple).map_err(|e| {
            ConfigError::Observer(format!(
                "staleness window of {} x {:?} is not representable: {}",
                self.staleness_multiple, snapshot_period, e
            ))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.report_ms == 0 {
            return Err(ConfigError::Observer("report period must be positive".into()));
        }
        if self.report_ms > MAX_PERIOD_MS {
            return Err(ConfigError::Observer(format!(
                "report period of {} ms exceeds the {} ms limit",
                self.report_ms, MAX_PERIOD_MS
            )));
        }
        if !self.staleness_multiple.is_finite()
            || self.staleness_multiple <= 0.0
            || self.staleness_multiple > MAX_STALENESS_MULTIPLE
        {
            return Err(ConfigError::Observer(format!(
                "staleness multiple must be in (0, {}], got {}",
                MAX_STALENESS_MULTIPLE, self.staleness_multiple
            )));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Observer("history capacity must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub intersections: Vec<IntersectionConfig>,
    #[serde(default)]
    pub observer: ObserverConfig,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intersections.is_empty() {
            return Err(ConfigError::EmptyNetwork);
        }
        self.observer.validate()?;

        let mut known = HashSet::new();
        for intersection in &self.intersections {
            intersection.validate()?;
            if !known.insert(intersection.id.clone()) {
                return Err(ConfigError::DuplicateId(intersection.id.clone()));
            }
        }
        for intersection in &self.intersections {
            if let Some(missing) = intersection.neighbors.iter().find(|n| !known.contains(*n)) {
                return Err(ConfigError::UnknownNeighbor {
                    id: intersection.id.clone(),
                    neighbor: missing.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn intersection(&self, id: &IntersectionId) -> Option<&IntersectionConfig> {
        self.intersections.iter().find(|i| &i.id == id)
    }

    /// Parses and validates a JSON network description.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: NetworkConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&json)
    }

    /// A single junction run by four approach controllers, each adjacent to the other three.
    pub fn four_way_junction() -> Self {
        let intersections = vec![
            IntersectionConfig::new("TL_NORTH", &["TL_SOUTH", "TL_EAST", "TL_WEST"]),
            IntersectionConfig::new("TL_SOUTH", &["TL_NORTH", "TL_EAST", "TL_WEST"]),
            IntersectionConfig::new("TL_EAST", &["TL_WEST", "TL_NORTH", "TL_SOUTH"]),
            IntersectionConfig::new("TL_WEST", &["TL_EAST", "TL_NORTH", "TL_SOUTH"]),
        ];
        Self {
            intersections,
            observer: ObserverConfig::default(),
        }
    }

    /// A `rows` x `cols` grid where each intersection neighbors its 4-neighborhood.
    pub fn grid(rows: usize, cols: usize) -> Self {
        let name = |r: usize, c: usize| format!("TL_{}_{}", r, c);
        let mut intersections = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                let mut neighbors = Vec::new();
                if r > 0 {
                    neighbors.push(IntersectionId::new(name(r - 1, c)));
                }
                if r + 1 < rows {
                    neighbors.push(IntersectionId::new(name(r + 1, c)));
                }
                if c > 0 {
                    neighbors.push(IntersectionId::new(name(r, c - 1)));
                }
                if c + 1 < cols {
                    neighbors.push(IntersectionId::new(name(r, c + 1)));
                }
                let mut config = IntersectionConfig::new(name(r, c), &[]);
                config.neighbors = neighbors;
                intersections.push(config);
            }
        }
        Self {
            intersections,
            observer: ObserverConfig::default(),
        }
    }

    /// Applies the arrival/departure rates of `scenario` to every intersection.
    pub fn apply_scenario(&mut self, scenario: Scenario) {
        let (arrival, departure) = scenario.rates();
        for intersection in &mut self.intersections {
            intersection.queue.arrival_rate = arrival;
            intersection.queue.departure_rate = departure;
        }
    }
}

/// Named traffic conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Normal,
    RushHour,
    Light,
    Heavy,
    Directional,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Normal,
        Scenario::RushHour,
        Scenario::Light,
        Scenario::Heavy,
        Scenario::Directional,
    ];

    /// (arrival_rate, departure_rate)
    pub fn rates(self) -> (f64, f64) {
        match self {
            Scenario::Normal => (0.3, 0.4),
            Scenario::RushHour => (0.6, 0.4),
            Scenario::Light => (0.1, 0.5),
            Scenario::Heavy => (0.8, 0.3),
            Scenario::Directional => (0.8, 0.4),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Normal => "normal",
            Scenario::RushHour => "rush_hour",
            Scenario::Light => "light",
            Scenario::Heavy => "heavy",
            Scenario::Directional => "directional",
        }
    }
}

impl FromStr for Scenario {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| ConfigError::UnknownScenario(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_junction_is_valid() {
        let config = NetworkConfig::four_way_junction();
        assert_eq!(config.intersections.len(), 4);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn grid_neighbors_are_symmetric() {
        let config = NetworkConfig::grid(2, 3);
        assert_eq!(config.validate(), Ok(()));
        for a in &config.intersections {
            for n in &a.neighbors {
                let b = config.intersection(n).unwrap();
                assert!(b.neighbors.contains(&a.id), "{} -> {} not mirrored", a.id, b.id);
            }
        }
        let corner = config.intersection(&IntersectionId::from("TL_0_0")).unwrap();
        assert_eq!(corner.neighbors.len(), 2);
    }

    #[test]
    fn rejects_green_time_ordering() {
        let mut config = IntersectionConfig::new("A", &[]);
        config.timing.min_green = 10.0;
        config.timing.base_green = 8.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GreenTimeOrdering { .. })
        ));

        let mut config = IntersectionConfig::new("A", &[]);
        config.timing.min_green = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GreenTimeOrdering { .. })
        ));
    }

    #[test]
    fn rejects_probability_outside_unit_interval() {
        let mut config = IntersectionConfig::new("A", &[]);
        config.queue.arrival_rate = 1.2;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ProbabilityOutOfRange {
                id: IntersectionId::from("A"),
                field: "arrival_rate",
                value: 1.2,
            })
        );

        let mut config = IntersectionConfig::new("A", &[]);
        config.queue.departure_rate = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::NonFinite { .. })));
    }

    #[test]
    fn rejects_unknown_and_self_neighbors() {
        let mut config = NetworkConfig::four_way_junction();
        config.intersections[0].neighbors.push(IntersectionId::from("TL_NOWHERE"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownNeighbor { .. })
        ));

        let config = IntersectionConfig::new("A", &["A"]);
        assert!(matches!(config.validate(), Err(ConfigError::SelfNeighbor { .. })));
    }

    #[test]
    fn rejects_duplicate_reserved_and_empty() {
        let mut config = NetworkConfig::four_way_junction();
        config.intersections.push(IntersectionConfig::new("TL_NORTH", &[]));
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateId(_))));

        let reserved = IntersectionConfig::new(OBSERVER_ADDRESS, &[]);
        assert!(matches!(reserved.validate(), Err(ConfigError::ReservedId(_))));

        let empty = NetworkConfig {
            intersections: vec![],
            observer: ObserverConfig::default(),
        };
        assert_eq!(empty.validate(), Err(ConfigError::EmptyNetwork));
    }

    #[test]
    fn rejects_zero_periods_and_queue() {
        let mut config = IntersectionConfig::new("A", &[]);
        config.periods.coordination_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroPeriod { task: "coordination", .. })
        ));

        let mut config = IntersectionConfig::new("A", &[]);
        config.queue.max_queue = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxQueue { .. })));

        let mut config = IntersectionConfig::new("A", &[]);
        config.neighbor_expiry = NeighborExpiry::After { max_age_ms: 0 };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroExpiryWindow { .. })));
    }

    #[test]
    fn rejects_unrepresentable_durations() {
        let mut config = IntersectionConfig::new("A", &[]);
        config.periods.control_ms = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PeriodTooLong { task: "control", .. })
        ));

        let mut config = IntersectionConfig::new("A", &[]);
        config.periods.snapshot_ms = MAX_PERIOD_MS;
        assert!(config.validate().is_ok());

        let observer = ObserverConfig {
            staleness_multiple: 1e20,
            ..ObserverConfig::default()
        };
        assert!(matches!(observer.validate(), Err(ConfigError::Observer(_))));
        assert!(observer.stale_after(Duration::from_secs(3)).is_err());

        let observer = ObserverConfig {
            report_ms: u64::MAX,
            ..ObserverConfig::default()
        };
        assert!(observer.validate().is_err());

        let observer = ObserverConfig::default();
        assert_eq!(
            observer.stale_after(Duration::from_secs(3)).unwrap(),
            Duration::from_secs(9)
        );
    }

    #[test]
    fn parses_json_with_defaults() {
        let json = r#"{
            "intersections": [
                { "id": "A", "neighbors": ["B"], "timing": { "base_green": 6.0 } },
                { "id": "B", "neighbors": ["A"], "initial_phase": "east_west_green",
                  "queue": { "saturation": "defer", "seed": 7 },
                  "neighbor_expiry": { "policy": "after", "max_age_ms": 9000 } }
            ],
            "observer": { "report_ms": 5000 }
        }"#;
        let config = NetworkConfig::from_json_str(json).unwrap();
        let a = &config.intersections[0];
        assert_eq!(a.timing.base_green, 6.0);
        assert_eq!(a.timing.min_green, DEFAULT_MIN_GREEN_TIME);
        assert_eq!(a.initial_phase, Phase::NorthSouthGreen);
        let b = &config.intersections[1];
        assert_eq!(b.initial_phase, Phase::EastWestGreen);
        assert_eq!(b.queue.saturation, SaturationPolicy::Defer);
        assert_eq!(b.queue.seed, Some(7));
        assert_eq!(b.neighbor_expiry, NeighborExpiry::After { max_age_ms: 9000 });
        assert_eq!(config.observer.report_ms, 5000);
        assert_eq!(config.observer.congestion_threshold, DEFAULT_CONGESTION_THRESHOLD);
    }

    #[test]
    fn json_is_validated() {
        let json = r#"{ "intersections": [ { "id": "A", "neighbors": ["Z"] } ] }"#;
        assert!(matches!(
            NetworkConfig::from_json_str(json),
            Err(ConfigError::UnknownNeighbor { .. })
        ));
        assert!(matches!(
            NetworkConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn scenarios_parse_and_apply() {
        assert_eq!("rush_hour".parse::<Scenario>(), Ok(Scenario::RushHour));
        assert!("gridlock".parse::<Scenario>().is_err());

        let mut config = NetworkConfig::four_way_junction();
        config.apply_scenario(Scenario::Light);
        assert!(config
            .intersections
            .iter()
            .all(|i| i.queue.arrival_rate == 0.1 && i.queue.departure_rate == 0.5));
    }
}
