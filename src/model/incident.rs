//! Incident records

use crate::model::{IncidentId, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Why an incident was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Operator decision
    Administrative,
    /// Peer's private key is believed to be compromised
    CompromisedKey,
    /// Detector flagged unusual traffic
    AnomalousTraffic,
    /// Peer violated a usage policy
    PolicyViolation,
}

impl ReasonCode {
    /// Action taken when the caller does not choose one
    pub fn default_action(&self) -> IncidentAction {
        match self {
            ReasonCode::Administrative
            | ReasonCode::CompromisedKey
            | ReasonCode::PolicyViolation => IncidentAction::Block,
            ReasonCode::AnomalousTraffic => IncidentAction::Isolate,
        }
    }
}

/// Effect an open incident has on the peers it targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentAction {
    /// Soft isolation: reachable through jump peers only
    Isolate,
    /// Quarantine: configuration withheld entirely
    Block,
}

/// Incident lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Affecting trust state
    Open,
    /// No longer affecting trust state
    Resolved,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Incident record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Incident identifier
    pub id: IncidentId,
    /// Affected peers
    pub peers: BTreeSet<PeerId>,
    /// Reason code
    pub reason: ReasonCode,
    /// Effect while open
    pub action: IncidentAction,
    /// Lifecycle status
    pub status: IncidentStatus,
    /// Free-form note from the operator or detector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Incident {
    /// Whether the incident still affects trust state
    pub fn is_open(&self) -> bool {
        self.status == IncidentStatus::Open
    }

    /// Whether the incident is open and targets `peer`
    pub fn targets(&self, peer: &PeerId) -> bool {
        self.is_open() && self.peers.contains(peer)
    }
}
