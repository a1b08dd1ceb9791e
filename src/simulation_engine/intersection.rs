use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of an intersection. Doubles as the transport address of its agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntersectionId(pub String);

impl IntersectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntersectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The four approaches of an intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::South => 1,
            Direction::East => 2,
            Direction::West => 3,
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "N" | "NORTH" => Ok(Direction::North),
            "S" | "SOUTH" => Ok(Direction::South),
            "E" | "EAST" => Ok(Direction::East),
            "W" | "WEST" => Ok(Direction::West),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Which axis currently holds the green light.
///
/// Two variants and nothing else: an intersection can never show green on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// North and South flow.
    NorthSouthGreen,
    /// East and West flow.
    EastWestGreen,
}

impl Phase {
    pub fn next(self) -> Phase {
        match self {
            Phase::NorthSouthGreen => Phase::EastWestGreen,
            Phase::EastWestGreen => Phase::NorthSouthGreen,
        }
    }

    pub fn green_directions(self) -> [Direction; 2] {
        match self {
            Phase::NorthSouthGreen => [Direction::North, Direction::South],
            Phase::EastWestGreen => [Direction::East, Direction::West],
        }
    }

    pub fn is_green(self, direction: Direction) -> bool {
        self.green_directions().contains(&direction)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NorthSouthGreen => f.write_str("NS_GREEN"),
            Phase::EastWestGreen => f.write_str("EW_GREEN"),
        }
    }
}

/// Vehicles waiting on each approach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    counts: [u32; 4],
}

impl QueueState {
    pub fn from_counts(north: u32, south: u32, east: u32, west: u32) -> Self {
        Self {
            counts: [north, south, east, west],
        }
    }

    pub fn get(&self, direction: Direction) -> u32 {
        self.counts[direction.index()]
    }

    pub fn set(&mut self, direction: Direction, count: u32) {
        self.counts[direction.index()] = count;
    }

    /// Saturates at `u32::MAX` instead of overflowing.
    pub fn total(&self) -> u32 {
        self.counts.iter().fold(0, |sum: u32, &c| sum.saturating_add(c))
    }

    /// Vehicles waiting on the two approaches served by `phase`.
    pub fn axis_total(&self, phase: Phase) -> u32 {
        phase
            .green_directions()
            .iter()
            .fold(0, |sum: u32, &d| sum.saturating_add(self.get(d)))
    }

    /// Counts in N, S, E, W order.
    pub fn as_array(&self) -> [u32; 4] {
        self.counts
    }
}
