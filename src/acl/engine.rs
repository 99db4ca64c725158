//! Trust-state evaluation and incident lifecycle
//!
//! A peer's trust state is a function of its `is_isolated` flag and the
//! open incidents that target it:
//!
//! | open Block incident | isolated (flag or open Isolate incident) | state    |
//! |---------------------|------------------------------------------|----------|
//! | yes                 | any                                      | Blocked  |
//! | no                  | yes                                      | Isolated |
//! | no                  | no                                       | Active   |
//!
//! Jump peers are never isolated; only a blocking incident changes their
//! state.

use crate::error::{MeshError, Result};
use crate::model::{
    Incident, IncidentAction, IncidentId, IncidentStatus, NetworkRecord, Peer, PeerId,
    ReasonCode, TrustState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A trust-state change produced by reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustTransition {
    /// Affected peer
    pub peer: PeerId,
    /// Previous state
    pub from: TrustState,
    /// New state
    pub to: TrustState,
}

/// Trust state `peer` should be in given the record's incidents
pub fn evaluate(record: &NetworkRecord, peer: &Peer) -> TrustState {
    let mut blocked = false;
    let mut soft_isolated = false;
    for incident in record.open_incidents_for(&peer.id) {
        match incident.action {
            IncidentAction::Block => blocked = true,
            IncidentAction::Isolate => soft_isolated = true,
        }
    }

    if blocked {
        return TrustState::Blocked;
    }
    if peer.is_jump() {
        return TrustState::Active;
    }
    if peer.is_isolated || soft_isolated {
        return TrustState::Isolated;
    }
    TrustState::Active
}

/// Recompute every peer's trust state and the network's blocklist
pub fn reconcile(record: &mut NetworkRecord) -> Vec<TrustTransition> {
    let next: Vec<(PeerId, TrustState)> = record
        .peers
        .values()
        .map(|peer| (peer.id, evaluate(record, peer)))
        .collect();

    let mut transitions = Vec::new();
    for (id, state) in next {
        if let Some(peer) = record.peers.get_mut(&id) {
            if peer.trust != state {
                info!(
                    "Peer '{}' trust state {} -> {}",
                    peer.name, peer.trust, state
                );
                transitions.push(TrustTransition {
                    peer: id,
                    from: peer.trust,
                    to: state,
                });
                peer.trust = state;
            }
        }
    }

    record.network.blocked = record
        .peers
        .values()
        .filter(|p| p.is_blocked())
        .map(|p| p.id)
        .collect();

    transitions
}

/// Open an incident against one or more member peers
pub fn open_incident(
    record: &mut NetworkRecord,
    peers: BTreeSet<PeerId>,
    reason: ReasonCode,
    action: Option<IncidentAction>,
    note: Option<String>,
) -> Result<IncidentId> {
    if peers.is_empty() {
        return Err(MeshError::Validation(
            "An incident must reference at least one peer".to_string(),
        ));
    }

    let action = action.unwrap_or_else(|| reason.default_action());
    for id in &peers {
        let peer = record.peer(id)?;
        if peer.is_jump() && action == IncidentAction::Isolate {
            warn!(
                "Isolation incident against jump peer '{}' has no effect on its routing duties",
                peer.name
            );
        }
    }

    let incident = Incident {
        id: IncidentId::new(),
        peers,
        reason,
        action,
        status: IncidentStatus::Open,
        note,
    };
    let id = incident.id;
    info!(
        "Opened incident {} ({:?}, {:?}) against {} peer(s)",
        id,
        reason,
        action,
        incident.peers.len()
    );
    record.incidents.insert(id, incident);
    Ok(id)
}

/// Resolve an open incident
pub fn resolve_incident(record: &mut NetworkRecord, id: &IncidentId) -> Result<()> {
    let incident = record
        .incidents
        .get_mut(id)
        .ok_or_else(|| MeshError::IncidentNotFound(id.to_string()))?;

    if !incident.is_open() {
        return Err(MeshError::InvalidState(format!(
            "Incident {} is already resolved",
            id
        )));
    }

    incident.status = IncidentStatus::Resolved;
    info!("Resolved incident {}", id);
    Ok(())
}

/// Drop a deleted peer from every incident
///
/// Open incidents left without peers resolve themselves; their ids are
/// returned.
pub fn forget_peer(record: &mut NetworkRecord, peer: &PeerId) -> Vec<IncidentId> {
    let mut auto_resolved = Vec::new();
    for incident in record.incidents.values_mut() {
        if incident.peers.remove(peer) && incident.peers.is_empty() && incident.is_open() {
            debug!("Incident {} lost its last peer; resolving", incident.id);
            incident.status = IncidentStatus::Resolved;
            auto_resolved.push(incident.id);
        }
    }
    record.network.blocked.remove(peer);
    auto_resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JumpSettings, Network, NetworkId, PeerKind};
    use crate::wireguard::KeyPair;
    use std::net::Ipv4Addr;

    fn record_with(kinds: &[PeerKind]) -> (NetworkRecord, Vec<PeerId>) {
        let mut record = NetworkRecord::new(Network {
            id: NetworkId::new(),
            name: "acl".to_string(),
            cidr: "10.0.0.0/24".parse().unwrap(),
            domain: "acl.mesh".to_string(),
            reserve_gateway: false,
            blocked: BTreeSet::new(),
        });
        let mut ids = Vec::new();
        for (i, kind) in kinds.iter().enumerate() {
            let seq = record.take_seq();
            let peer = Peer {
                id: PeerId::new(),
                network: record.id(),
                name: format!("peer-{}", i),
                address: Ipv4Addr::new(10, 0, 0, i as u8 + 1),
                public_key: KeyPair::generate().public,
                kind: kind.clone(),
                endpoint: None,
                is_isolated: false,
                full_encapsulation: false,
                additional_allowed_ips: Vec::new(),
                enrollment_token: None,
                trust: TrustState::Active,
                created_seq: seq,
            };
            ids.push(peer.id);
            record.peers.insert(peer.id, peer);
        }
        (record, ids)
    }

    #[test]
    fn test_block_and_resolve() {
        let (mut record, ids) = record_with(&[PeerKind::RegularDynamic]);
        let a = ids[0];

        let incident = open_incident(
            &mut record,
            BTreeSet::from([a]),
            ReasonCode::CompromisedKey,
            None,
            None,
        )
        .unwrap();
        let transitions = reconcile(&mut record);
        assert_eq!(
            transitions,
            vec![TrustTransition { peer: a, from: TrustState::Active, to: TrustState::Blocked }]
        );
        assert!(record.network.blocked.contains(&a));

        resolve_incident(&mut record, &incident).unwrap();
        reconcile(&mut record);
        assert_eq!(record.peers[&a].trust, TrustState::Active);
        assert!(record.network.blocked.is_empty());

        assert!(matches!(
            resolve_incident(&mut record, &incident),
            Err(MeshError::InvalidState(_))
        ));
    }

    #[test]
    fn test_blocked_stays_blocked_while_another_incident_is_open() {
        let (mut record, ids) = record_with(&[PeerKind::RegularDynamic]);
        let a = ids[0];
        let first = open_incident(&mut record, BTreeSet::from([a]), ReasonCode::Administrative, None, None).unwrap();
        open_incident(&mut record, BTreeSet::from([a]), ReasonCode::PolicyViolation, None, None).unwrap();
        reconcile(&mut record);

        resolve_incident(&mut record, &first).unwrap();
        reconcile(&mut record);
        assert_eq!(record.peers[&a].trust, TrustState::Blocked);
    }

    #[test]
    fn test_blocked_returns_to_isolated_when_flag_set() {
        let (mut record, ids) = record_with(&[PeerKind::RegularDynamic]);
        let a = ids[0];
        record.peers.get_mut(&a).unwrap().is_isolated = true;
        let incident = open_incident(&mut record, BTreeSet::from([a]), ReasonCode::Administrative, None, None).unwrap();
        reconcile(&mut record);
        assert_eq!(record.peers[&a].trust, TrustState::Blocked);

        resolve_incident(&mut record, &incident).unwrap();
        reconcile(&mut record);
        assert_eq!(record.peers[&a].trust, TrustState::Isolated);

        record.peers.get_mut(&a).unwrap().is_isolated = false;
        reconcile(&mut record);
        assert_eq!(record.peers[&a].trust, TrustState::Active);
    }

    #[test]
    fn test_soft_isolation_incident() {
        let (mut record, ids) = record_with(&[PeerKind::RegularDynamic]);
        open_incident(&mut record, BTreeSet::from([ids[0]]), ReasonCode::AnomalousTraffic, None, None).unwrap();
        reconcile(&mut record);
        assert_eq!(record.peers[&ids[0]].trust, TrustState::Isolated);
        assert!(record.network.blocked.is_empty());
    }

    #[test]
    fn test_jump_is_never_isolated() {
        let (mut record, ids) = record_with(&[PeerKind::Jump(JumpSettings::default())]);
        let j = ids[0];
        open_incident(&mut record, BTreeSet::from([j]), ReasonCode::AnomalousTraffic, None, None).unwrap();
        reconcile(&mut record);
        assert_eq!(record.peers[&j].trust, TrustState::Active);

        open_incident(&mut record, BTreeSet::from([j]), ReasonCode::Administrative, None, None).unwrap();
        reconcile(&mut record);
        assert_eq!(record.peers[&j].trust, TrustState::Blocked);
    }

    #[test]
    fn test_open_incident_validation() {
        let (mut record, _) = record_with(&[PeerKind::RegularDynamic]);
        assert!(matches!(
            open_incident(&mut record, BTreeSet::new(), ReasonCode::Administrative, None, None),
            Err(MeshError::Validation(_))
        ));
        assert!(matches!(
            open_incident(&mut record, BTreeSet::from([PeerId::new()]), ReasonCode::Administrative, None, None),
            Err(MeshError::PeerNotFound(_))
        ));
        assert!(record.incidents.is_empty());
    }

    #[test]
    fn test_forget_peer_resolves_orphaned_incidents() {
        let (mut record, ids) = record_with(&[PeerKind::RegularDynamic, PeerKind::RegularDynamic]);
        let solo = open_incident(&mut record, BTreeSet::from([ids[0]]), ReasonCode::Administrative, None, None).unwrap();
        let shared = open_incident(&mut record, BTreeSet::from([ids[0], ids[1]]), ReasonCode::Administrative, None, None).unwrap();
        reconcile(&mut record);

        record.peers.remove(&ids[0]);
        let resolved = forget_peer(&mut record, &ids[0]);
        assert_eq!(resolved, vec![solo]);
        assert!(record.incidents[&shared].is_open());
        assert!(!record.network.blocked.contains(&ids[0]));
    }
}
