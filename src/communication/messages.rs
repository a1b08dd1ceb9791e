use crate::shared_data::{PressureMessage, SystemSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every payload that travels between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Pressure(PressureMessage),
    Snapshot(SystemSnapshot),
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Pressure(_) => "pressure",
            Envelope::Snapshot(_) => "snapshot",
        }
    }
}
