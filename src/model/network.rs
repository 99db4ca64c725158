//! Network records
//!
//! A [`NetworkRecord`] is the unit of storage, locking and compilation: the
//! network itself plus every peer and incident it owns.

use crate::error::{MeshError, Result};
use crate::model::{Incident, IncidentId, NetworkId, Peer, PeerId};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// Network definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Network identifier
    pub id: NetworkId,
    /// Unique name
    pub name: String,
    /// Address space
    pub cidr: Ipv4Net,
    /// DNS domain
    pub domain: String,
    /// Keep the first host address out of the allocation pool
    #[serde(default)]
    pub reserve_gateway: bool,
    /// Peers currently blocked by an open incident (ACL)
    #[serde(default)]
    pub blocked: BTreeSet<PeerId>,
}

impl Network {
    /// Reserved gateway address, when the network keeps one
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        if !self.reserve_gateway || self.cidr.prefix_len() >= 31 {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.cidr.network()) + 1))
    }
}

/// Network aggregate: the network and everything it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// The network
    pub network: Network,
    /// Member peers
    #[serde(default)]
    pub peers: BTreeMap<PeerId, Peer>,
    /// Incidents raised against member peers
    #[serde(default)]
    pub incidents: BTreeMap<IncidentId, Incident>,
    /// Incremented on every committed transaction
    #[serde(default)]
    pub version: u64,
    /// Next peer creation sequence number
    #[serde(default)]
    pub next_seq: u64,
}

impl NetworkRecord {
    /// Create an empty record for a network
    pub fn new(network: Network) -> Self {
        Self {
            network,
            peers: BTreeMap::new(),
            incidents: BTreeMap::new(),
            version: 0,
            next_seq: 0,
        }
    }

    /// Network identifier
    pub fn id(&self) -> NetworkId {
        self.network.id
    }

    /// Member peer identifiers
    pub fn members(&self) -> BTreeSet<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Identifiers of the gateway (jump) subset
    pub fn gateways(&self) -> BTreeSet<PeerId> {
        self.peers
            .values()
            .filter(|p| p.is_jump())
            .map(|p| p.id)
            .collect()
    }

    /// Look up a peer
    pub fn peer(&self, id: &PeerId) -> Result<&Peer> {
        self.peers
            .get(id)
            .ok_or_else(|| MeshError::PeerNotFound(id.to_string()))
    }

    /// Look up a peer for modification
    pub fn peer_mut(&mut self, id: &PeerId) -> Result<&mut Peer> {
        self.peers
            .get_mut(id)
            .ok_or_else(|| MeshError::PeerNotFound(id.to_string()))
    }

    /// Whether any RegularStatic peer exists (locks the CIDR)
    pub fn has_static_peers(&self) -> bool {
        self.peers.values().any(|p| p.kind.is_static())
    }

    /// Peers in creation order
    pub fn peers_by_creation(&self) -> Vec<&Peer> {
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|p| p.created_seq);
        peers
    }

    /// Peers in address order
    pub fn peers_by_address(&self) -> Vec<&Peer> {
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|p| (p.address, p.id));
        peers
    }

    /// Addresses currently held by peers
    pub fn allocated_addresses(&self) -> Vec<Ipv4Addr> {
        self.peers.values().map(|p| p.address).collect()
    }

    /// Take the next creation sequence number
    pub fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Look up an incident
    pub fn incident(&self, id: &IncidentId) -> Result<&Incident> {
        self.incidents
            .get(id)
            .ok_or_else(|| MeshError::IncidentNotFound(id.to_string()))
    }

    /// Open incidents targeting `peer`
    pub fn open_incidents_for<'a>(
        &'a self,
        peer: &'a PeerId,
    ) -> impl Iterator<Item = &'a Incident> + 'a {
        self.incidents.values().filter(move |i| i.targets(peer))
    }
}
