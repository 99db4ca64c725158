//! Per-network transactions
//!
//! A [`NetworkTxn`] holds the network's lock for its whole lifetime and
//! mutates a private draft of the record. Every operation validates its
//! input before touching the draft, so a failed operation leaves the draft
//! as it was. Nothing becomes visible until [`NetworkTxn::commit`] persists
//! the draft; dropping the transaction discards it.

use crate::acl;
use crate::config::validation;
use crate::error::{MeshError, Result};
use crate::ipam;
use crate::model::{
    IncidentAction, IncidentId, NetworkRecord, Peer, PeerId, ReasonCode, TrustState,
};
use crate::notify::{ChangeEvent, ChangeKind};
use crate::registry::request::{CreatedPeer, PeerSpec, PeerUpdate};
use crate::registry::Mesh;
use crate::wireguard::{EnrollmentToken, KeyPair, PublicKey};
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// Outcome of a committed transaction
#[derive(Debug, Clone, Serialize)]
pub struct CommitReceipt {
    /// Version the network is now at
    pub version: u64,
    /// Events published for the commit
    pub events: Vec<ChangeEvent>,
    /// Compilation failure, when the previous policy stays in effect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_error: Option<String>,
}

/// Exclusive, all-or-nothing mutation handle for one network
pub struct NetworkTxn<'a> {
    mesh: &'a Mesh,
    guard: OwnedMutexGuard<NetworkRecord>,
    draft: NetworkRecord,
    changes: Vec<ChangeKind>,
}

impl<'a> NetworkTxn<'a> {
    pub(crate) fn new(mesh: &'a Mesh, guard: OwnedMutexGuard<NetworkRecord>) -> Self {
        let draft = guard.clone();
        Self {
            mesh,
            guard,
            draft,
            changes: Vec::new(),
        }
    }

    /// Current state of the draft
    pub fn record(&self) -> &NetworkRecord {
        &self.draft
    }

    /// Create a peer, allocating its address
    pub fn create_peer(&mut self, spec: PeerSpec) -> Result<CreatedPeer> {
        validation::validate_peer_name(&spec.name)?;
        self.ensure_unique_name(&spec.name, None)?;
        let kind = spec.kind(self.mesh.jump_defaults())?;
        let additional_allowed_ips = spec.allowed_ips()?;
        if let Some(endpoint) = &spec.endpoint {
            validation::validate_endpoint(endpoint)?;
        }

        let (public_key, private_key) = match &spec.public_key {
            Some(key) => {
                validation::validate_public_key(key)?;
                (PublicKey::from_base64(key)?, None)
            }
            None => {
                let pair = KeyPair::generate();
                (pair.public, Some(pair.private))
            }
        };
        self.ensure_unique_key(&public_key, None)?;

        let address = ipam::pool_for(&self.draft).allocate()?;
        let enrollment_token = kind.has_token().then(EnrollmentToken::generate);

        let peer = Peer {
            id: PeerId::new(),
            network: self.draft.id(),
            name: spec.name,
            address,
            public_key: public_key.clone(),
            kind,
            endpoint: spec.endpoint,
            is_isolated: spec.is_isolated,
            full_encapsulation: spec.full_encapsulation,
            additional_allowed_ips,
            enrollment_token: enrollment_token.clone(),
            trust: TrustState::Active,
            created_seq: self.draft.take_seq(),
        };
        let peer_id = peer.id;

        info!(
            "Creating {} peer '{}' at {} in network '{}'",
            peer.kind.label(),
            peer.name,
            address,
            self.draft.network.name
        );
        self.draft.peers.insert(peer_id, peer);
        self.changes.push(ChangeKind::PeerCreated { peer_id });

        Ok(CreatedPeer {
            peer_id,
            address,
            public_key,
            enrollment_token,
            private_key,
        })
    }

    /// Modify a peer's settings
    pub fn update_peer(&mut self, id: &PeerId, update: PeerUpdate) -> Result<()> {
        let peer = self.draft.peer(id)?;

        if let Some(name) = &update.name {
            validation::validate_peer_name(name)?;
            self.ensure_unique_name(name, Some(id))?;
        }
        let public_key = match &update.public_key {
            Some(key) => {
                validation::validate_public_key(key)?;
                let key = PublicKey::from_base64(key)?;
                self.ensure_unique_key(&key, Some(id))?;
                Some(key)
            }
            None => None,
        };
        if let Some(endpoint) = update.endpoint.as_deref().filter(|e| !e.is_empty()) {
            validation::validate_endpoint(endpoint)?;
        }
        if update.is_isolated == Some(true) && peer.is_jump() {
            return Err(MeshError::Validation(
                "Jump peers cannot be isolated".to_string(),
            ));
        }
        let additional_allowed_ips = update
            .additional_allowed_ips
            .as_deref()
            .map(validation::parse_allowed_ips::<String>)
            .transpose()?;

        let peer = self.draft.peer_mut(id)?;
        if let Some(name) = update.name {
            peer.name = name;
        }
        if let Some(key) = public_key {
            peer.public_key = key;
        }
        if let Some(endpoint) = update.endpoint {
            peer.endpoint = (!endpoint.is_empty()).then_some(endpoint);
        }
        if let Some(flag) = update.is_isolated {
            peer.is_isolated = flag;
        }
        if let Some(flag) = update.full_encapsulation {
            peer.full_encapsulation = flag;
        }
        if let Some(ranges) = additional_allowed_ips {
            peer.additional_allowed_ips = ranges;
        }
        debug!("Updated peer '{}'", peer.name);

        self.changes.push(ChangeKind::PeerUpdated { peer_id: *id });
        Ok(())
    }

    /// Remove a peer, releasing its address and revoking its token
    pub fn delete_peer(&mut self, id: &PeerId) -> Result<()> {
        let peer = self
            .draft
            .peers
            .remove(id)
            .ok_or_else(|| MeshError::PeerNotFound(id.to_string()))?;
        info!(
            "Deleting peer '{}' ({}) from network '{}'",
            peer.name, peer.address, self.draft.network.name
        );

        for incident_id in acl::forget_peer(&mut self.draft, id) {
            self.changes.push(ChangeKind::IncidentResolved { incident_id });
        }
        self.changes.push(ChangeKind::PeerDeleted { peer_id: *id });
        Ok(())
    }

    /// Move the network to a new CIDR, re-addressing every peer
    pub fn update_cidr(&mut self, cidr: &str) -> Result<()> {
        let new_cidr = validation::parse_network_cidr(cidr)?;
        if let Some(peer) = self.draft.peers.values().find(|p| p.kind.is_static()) {
            return Err(MeshError::CidrChangeRejected(format!(
                "static peer '{}' has its address baked into an offline configuration",
                peer.name
            )));
        }
        if new_cidr == self.draft.network.cidr {
            debug!("CIDR of '{}' unchanged", self.draft.network.name);
            return Ok(());
        }

        let assignments = ipam::reassign(&self.draft, new_cidr)?;

        info!(
            "Moving network '{}' from {} to {}",
            self.draft.network.name, self.draft.network.cidr, new_cidr
        );
        self.draft.network.cidr = new_cidr;
        for (peer_id, address) in assignments {
            if let Some(peer) = self.draft.peers.get_mut(&peer_id) {
                peer.address = address;
            }
            self.changes.push(ChangeKind::PeerUpdated { peer_id });
        }
        self.changes.push(ChangeKind::NetworkUpdated);
        Ok(())
    }

    /// Change the network's DNS domain
    pub fn update_domain(&mut self, domain: &str) -> Result<()> {
        validation::validate_domain(domain)?;
        self.draft.network.domain = domain.to_string();
        self.changes.push(ChangeKind::NetworkUpdated);
        Ok(())
    }

    /// Open an incident against member peers
    pub fn open_incident(
        &mut self,
        peers: BTreeSet<PeerId>,
        reason: ReasonCode,
        action: Option<IncidentAction>,
        note: Option<String>,
    ) -> Result<IncidentId> {
        let incident_id = acl::open_incident(&mut self.draft, peers, reason, action, note)?;
        self.changes.push(ChangeKind::IncidentOpened { incident_id });
        Ok(incident_id)
    }

    /// Resolve an open incident
    pub fn resolve_incident(&mut self, id: &IncidentId) -> Result<()> {
        acl::resolve_incident(&mut self.draft, id)?;
        self.changes.push(ChangeKind::IncidentResolved { incident_id: *id });
        Ok(())
    }

    /// Persist the draft and publish its effects
    ///
    /// A store failure leaves the network untouched. A policy conflict does
    /// not fail the commit: the previous compiled policy stays in effect and
    /// the conflict is reported in the receipt.
    pub async fn commit(self) -> Result<CommitReceipt> {
        let NetworkTxn {
            mesh,
            mut guard,
            mut draft,
            mut changes,
        } = self;

        if changes.is_empty() {
            return Ok(CommitReceipt {
                version: guard.version,
                events: Vec::new(),
                policy_error: None,
            });
        }

        for transition in acl::reconcile(&mut draft) {
            changes.push(ChangeKind::AclChanged {
                peer_id: transition.peer,
                from: transition.from,
                to: transition.to,
            });
        }
        draft.version = guard.version + 1;

        mesh.store().put(&draft)?;

        let previous = std::mem::replace(&mut *guard, draft);
        let record = &*guard;
        let policy_error = mesh.apply_commit(&previous, record);

        let events: Vec<ChangeEvent> = changes
            .into_iter()
            .map(|change| ChangeEvent::new(record.id(), record.version, change))
            .collect();
        mesh.notifier().publish(&events);

        info!(
            "Committed network '{}' v{} ({} change(s))",
            record.network.name,
            record.version,
            events.len()
        );

        Ok(CommitReceipt {
            version: record.version,
            events,
            policy_error,
        })
    }

    fn ensure_unique_name(&self, name: &str, except: Option<&PeerId>) -> Result<()> {
        let taken = self
            .draft
            .peers
            .values()
            .any(|p| p.name == name && Some(&p.id) != except);
        if taken {
            return Err(MeshError::Validation(format!(
                "Peer name '{}' is already used in network '{}'",
                name, self.draft.network.name
            )));
        }
        Ok(())
    }

    fn ensure_unique_key(&self, key: &PublicKey, except: Option<&PeerId>) -> Result<()> {
        let taken = self
            .draft
            .peers
            .values()
            .any(|p| &p.public_key == key && Some(&p.id) != except);
        if taken {
            return Err(MeshError::Validation(
                "Public key is already used by another peer".to_string(),
            ));
        }
        Ok(())
    }
}
