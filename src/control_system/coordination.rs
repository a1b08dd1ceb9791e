//! Neighbor pressure gossip.
//!
//! Outbound: every coordination period an intersection sends its current-axis pressure
//! to each configured neighbor, one independent send per neighbor.
//! Inbound: a received reading overwrites whatever was stored for that sender.
//! There are no acknowledgements and no retries.

use crate::communication::messages::Envelope;
use crate::communication::transport::{Transport, TransportError};
use crate::config::NeighborExpiry;
use crate::shared_data::PressureMessage;
use crate::simulation_engine::intersection::IntersectionId;
use std::collections::HashMap;
use thiserror::Error;

/// Why an inbound pressure message was dropped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RejectReason {
    #[error("sender {0} is not a configured neighbor")]
    UnknownSender(IntersectionId),
    #[error("message claims to come from this intersection")]
    SelfAddressed,
    #[error("pressure {0} is outside [0, 1]")]
    PressureOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborReading {
    pub pressure: f64,
    /// Sender's clock at send time. Informational only.
    pub sent_at_ms: u64,
    /// Receiver's clock at ingest; expiry is measured from here.
    pub received_at_ms: u64,
}

/// Most recent pressure heard from each neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborTable {
    own_id: IntersectionId,
    configured: Vec<IntersectionId>,
    readings: HashMap<IntersectionId, NeighborReading>,
    expiry: NeighborExpiry,
}

impl NeighborTable {
    pub fn new(own_id: IntersectionId, configured: Vec<IntersectionId>, expiry: NeighborExpiry) -> Self {
        Self {
            own_id,
            configured,
            readings: HashMap::new(),
            expiry,
        }
    }

    /// Stores `message` as the latest reading of its sender, stamped with the local
    /// `received_ms`. Last write wins.
    pub fn ingest(&mut self, message: &PressureMessage, received_ms: u64) -> Result<(), RejectReason> {
        if message.sender == self.own_id {
            return Err(RejectReason::SelfAddressed);
        }
        if !self.configured.contains(&message.sender) {
            return Err(RejectReason::UnknownSender(message.sender.clone()));
        }
        if !(0.0..=1.0).contains(&message.pressure) {
            return Err(RejectReason::PressureOutOfRange(message.pressure));
        }
        self.readings.insert(
            message.sender.clone(),
            NeighborReading {
                pressure: message.pressure,
                sent_at_ms: message.timestamp_ms,
                received_at_ms: received_ms,
            },
        );
        Ok(())
    }

    fn is_fresh(&self, reading: &NeighborReading, now_ms: u64) -> bool {
        match self.expiry {
            NeighborExpiry::Never => true,
            NeighborExpiry::After { max_age_ms } => {
                now_ms.saturating_sub(reading.received_at_ms) <= max_age_ms
            }
        }
    }

    /// Mean of the readings that count at `now_ms`; 0 when there are none.
    pub fn average(&self, now_ms: u64) -> f64 {
        let (sum, count) = self
            .readings
            .values()
            .filter(|r| self.is_fresh(r, now_ms))
            .fold((0.0, 0usize), |(sum, count), r| (sum + r.pressure, count + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    pub fn fresh_count(&self, now_ms: u64) -> usize {
        self.readings
            .values()
            .filter(|r| self.is_fresh(r, now_ms))
            .count()
    }

    pub fn reading(&self, neighbor: &IntersectionId) -> Option<&NeighborReading> {
        self.readings.get(neighbor)
    }

    pub fn configured(&self) -> &[IntersectionId] {
        &self.configured
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Outcome of one announcement round.
#[derive(Debug, Default, PartialEq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: Vec<(IntersectionId, TransportError)>,
}

/// Sends `pressure` to every neighbor. A failure for one neighbor does not stop the rest.
pub fn announce<T: Transport + ?Sized>(
    sender: &IntersectionId,
    pressure: f64,
    neighbors: &[IntersectionId],
    now_ms: u64,
    transport: &T,
) -> FanOutReport {
    let mut report = FanOutReport::default();
    let envelope = Envelope::Pressure(PressureMessage {
        sender: sender.clone(),
        pressure,
        timestamp_ms: now_ms,
    });
    let payload = match envelope.encode() {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("[{}] Could not encode pressure announcement: {}", sender, e);
            report.failed = neighbors
                .iter()
                .map(|n| (n.clone(), TransportError::Encode(e.to_string())))
                .collect();
            return report;
        }
    };

    for neighbor in neighbors {
        match transport.send(neighbor.as_str(), &payload) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                log::warn!("[{}] Pressure to {} not delivered: {}", sender, neighbor, e);
                report.failed.push((neighbor.clone(), e));
            }
        }
    }
    report
}
