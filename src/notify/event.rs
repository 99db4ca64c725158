//! Change events
//!
//! Events are hints: they tell an agent that something it depends on changed
//! and carry the committed version, never the policy itself. Receivers
//! re-fetch their configuration on any event they care about.

use crate::model::{IncidentId, NetworkId, PeerId, TrustState};
use serde::{Deserialize, Serialize};

/// A committed change to one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Network the change belongs to
    pub network_id: NetworkId,
    /// Version of the network after the change
    pub version: u64,
    /// What changed
    pub change: ChangeKind,
}

/// What changed in a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    /// Network created or its settings changed
    NetworkUpdated,
    /// Network deleted with all its peers
    NetworkDeleted,
    /// Peer added
    PeerCreated {
        /// New peer
        peer_id: PeerId,
    },
    /// Peer settings or address changed
    PeerUpdated {
        /// Changed peer
        peer_id: PeerId,
    },
    /// Peer removed; its token no longer resolves
    PeerDeleted {
        /// Removed peer
        peer_id: PeerId,
    },
    /// Peer trust state changed
    AclChanged {
        /// Affected peer
        peer_id: PeerId,
        /// Previous state
        from: TrustState,
        /// New state
        to: TrustState,
    },
    /// Incident opened
    IncidentOpened {
        /// New incident
        incident_id: IncidentId,
    },
    /// Incident resolved
    IncidentResolved {
        /// Resolved incident
        incident_id: IncidentId,
    },
}

impl ChangeKind {
    /// Peer the change is about, if any
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::PeerCreated { peer_id }
            | Self::PeerUpdated { peer_id }
            | Self::PeerDeleted { peer_id }
            | Self::AclChanged { peer_id, .. } => Some(*peer_id),
            Self::NetworkUpdated
            | Self::NetworkDeleted
            | Self::IncidentOpened { .. }
            | Self::IncidentResolved { .. } => None,
        }
    }
}

impl ChangeEvent {
    /// Create an event
    pub fn new(network_id: NetworkId, version: u64, change: ChangeKind) -> Self {
        Self {
            network_id,
            version,
            change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let peer_id = PeerId::new();
        let event = ChangeEvent::new(
            NetworkId::new(),
            7,
            ChangeKind::AclChanged {
                peer_id,
                from: TrustState::Active,
                to: TrustState::Blocked,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["version"], 7);
        assert_eq!(json["change"]["type"], "acl_changed");
        assert_eq!(json["change"]["to"], "blocked");
        assert_eq!(json["change"]["peer_id"], peer_id.to_string());

        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_peer_accessor() {
        let peer_id = PeerId::new();
        assert_eq!(ChangeKind::PeerDeleted { peer_id }.peer(), Some(peer_id));
        assert_eq!(ChangeKind::NetworkUpdated.peer(), None);
    }
}
