//! Policy compiler
//!
//! A pure, deterministic function from a network record (network, peers,
//! trust states) to the artifacts agents enforce:
//!
//! - a [`PeerPolicy`] for every peer that is not blocked, carrying its
//!   AllowedIPs set and the remote peers it talks to;
//! - a [`JumpPolicy`] (ordered firewall rules) for every active jump peer.
//!
//! Both are built from explicit ordered rule tables (see `allowed_ips` and
//! `firewall`). Compiling the same record twice yields identical output.
//! Compilation fails with `InvalidTopology` only when the record holds a
//! conflict the precedence rules cannot resolve; the caller keeps its last
//! good artifacts in that case.

mod allowed_ips;
mod firewall;
mod jump_policy;

pub use allowed_ips::{default_route, AllowedIpsRule, ALLOWED_IPS_RULES, DEFAULT_ROUTE};
pub use firewall::{FirewallStage, FIREWALL_STAGES};
pub use jump_policy::JumpPolicy;

use crate::error::{MeshError, Result};
use crate::model::{NetworkId, NetworkRecord, Peer, PeerId, PeerKind};
use crate::wireguard::PublicKey;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Keepalive used by peers behind NAT towards jump peers
pub const DEFAULT_KEEPALIVE_SECS: u16 = 25;

/// Compiled artifacts for one network version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledNetwork {
    /// Network identifier
    pub network_id: NetworkId,
    /// Record version the artifacts were compiled from
    pub version: u64,
    /// Configuration per non-blocked peer
    pub peers: BTreeMap<PeerId, PeerPolicy>,
    /// Firewall policy per active jump peer
    pub jump_policies: BTreeMap<PeerId, JumpPolicy>,
}

/// Compiled WireGuard configuration for one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPolicy {
    /// Peer identifier
    pub peer_id: PeerId,
    /// Display name
    pub name: String,
    /// Record version the policy was compiled from
    pub version: u64,
    /// Tunnel address
    pub address: Ipv4Addr,
    /// Peer's own public key
    pub public_key: PublicKey,
    /// Network DNS domain
    pub domain: String,
    /// Listen port (jump peers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    /// Ranges routed into the tunnel
    pub allowed_ips: Vec<IpNet>,
    /// Peers this peer exchanges traffic with directly
    pub remotes: Vec<RemotePeer>,
}

/// A `[Peer]` section of a compiled configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePeer {
    /// Remote peer identifier
    pub peer_id: PeerId,
    /// Remote peer name
    pub name: String,
    /// Remote public key
    pub public_key: PublicKey,
    /// Remote endpoint (host:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Ranges routed to this remote
    pub allowed_ips: Vec<IpNet>,
    /// Persistent keepalive in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

/// Read-only view of a record used by the rule tables
pub struct Topology<'a> {
    /// The record being compiled
    pub record: &'a NetworkRecord,
    /// Every peer, ordered by address
    pub peers: Vec<&'a Peer>,
    /// Jump peers that still perform routing (not blocked), ordered by address
    pub jumps: Vec<&'a Peer>,
}

impl<'a> Topology<'a> {
    /// Build the view, rejecting records that violate address invariants
    pub fn new(record: &'a NetworkRecord) -> Result<Self> {
        let peers = record.peers_by_address();
        check_addresses(record, &peers)?;

        let jumps = peers
            .iter()
            .copied()
            .filter(|p| p.is_jump() && !p.is_blocked())
            .collect();

        Ok(Self {
            record,
            peers,
            jumps,
        })
    }

    /// Regular peers other than `peer`
    pub fn other_regular_peers<'b>(&'b self, peer: &'b Peer) -> impl Iterator<Item = &'a Peer> + 'b {
        self.peers
            .iter()
            .copied()
            .filter(move |p| p.id != peer.id && !p.is_jump())
    }
}

/// Compile every artifact for a network record
pub fn compile(record: &NetworkRecord) -> Result<CompiledNetwork> {
    let topology = Topology::new(record)?;

    let mut peers = BTreeMap::new();
    let mut jump_policies = BTreeMap::new();

    for peer in &topology.peers {
        if peer.is_blocked() {
            debug!("Withholding configuration from blocked peer '{}'", peer.name);
            continue;
        }

        let policy = match &peer.kind {
            PeerKind::Jump(settings) => {
                let rules = firewall::compile_rules(&topology, peer, settings);
                jump_policies.insert(peer.id, JumpPolicy::new(peer.address.to_string(), rules));
                jump_peer_policy(&topology, peer, settings.listen_port)
            }
            PeerKind::RegularDynamic | PeerKind::RegularStatic => {
                regular_peer_policy(&topology, peer)?
            }
        };
        peers.insert(peer.id, policy);
    }

    debug!(
        "Compiled network '{}' v{}: {} peer configs, {} jump policies",
        record.network.name,
        record.version,
        peers.len(),
        jump_policies.len()
    );

    Ok(CompiledNetwork {
        network_id: record.id(),
        version: record.version,
        peers,
        jump_policies,
    })
}

fn regular_peer_policy(topology: &Topology<'_>, peer: &Peer) -> Result<PeerPolicy> {
    let allowed_ips = allowed_ips::compute(topology, peer)?;

    if topology.jumps.is_empty() {
        warn!(
            "Peer '{}' in network '{}' has no active jump peer to route through",
            peer.name, topology.record.network.name
        );
    }

    // The lowest-addressed jump is primary and carries the routed ranges;
    // secondary jumps only carry their own host route.
    let mut remotes = Vec::with_capacity(topology.jumps.len());
    for (idx, jump) in topology.jumps.iter().enumerate() {
        let routed = if idx == 0 {
            allowed_ips
                .iter()
                .copied()
                .filter(|net| {
                    !topology.jumps[1..]
                        .iter()
                        .any(|other| *net == IpNet::V4(other.host_net()))
                })
                .collect()
        } else {
            vec![IpNet::V4(jump.host_net())]
        };
        remotes.push(remote(jump, routed, Some(DEFAULT_KEEPALIVE_SECS)));
    }

    Ok(PeerPolicy {
        peer_id: peer.id,
        name: peer.name.clone(),
        version: topology.record.version,
        address: peer.address,
        public_key: peer.public_key.clone(),
        domain: topology.record.network.domain.clone(),
        listen_port: None,
        allowed_ips,
        remotes,
    })
}

// Every entry of `allowed_ips` belongs to exactly one remote. The jump's own
// additional ranges are local to it and stay out.
fn jump_peer_policy(topology: &Topology<'_>, jump: &Peer, listen_port: u16) -> PeerPolicy {
    let mut allowed_ips = Vec::new();
    let mut remotes = Vec::new();

    for other in &topology.peers {
        if other.id == jump.id || other.is_blocked() {
            continue;
        }
        let host = IpNet::V4(other.host_net());
        allowed_ips.push(host);
        let keepalive = other.is_jump().then_some(DEFAULT_KEEPALIVE_SECS);
        remotes.push(remote(other, vec![host], keepalive));
    }

    PeerPolicy {
        peer_id: jump.id,
        name: jump.name.clone(),
        version: topology.record.version,
        address: jump.address,
        public_key: jump.public_key.clone(),
        domain: topology.record.network.domain.clone(),
        listen_port: Some(listen_port),
        allowed_ips,
        remotes,
    }
}

fn remote(peer: &Peer, allowed_ips: Vec<IpNet>, persistent_keepalive: Option<u16>) -> RemotePeer {
    RemotePeer {
        peer_id: peer.id,
        name: peer.name.clone(),
        public_key: peer.public_key.clone(),
        endpoint: peer.endpoint.clone(),
        allowed_ips,
        persistent_keepalive,
    }
}

fn check_addresses(record: &NetworkRecord, peers: &[&Peer]) -> Result<()> {
    let cidr = record.network.cidr;
    let mut seen: HashMap<Ipv4Addr, &Peer> = HashMap::with_capacity(peers.len());

    for peer in peers {
        if !cidr.contains(&peer.address)
            || peer.address == cidr.network()
            || peer.address == cidr.broadcast()
        {
            return Err(MeshError::InvalidTopology(format!(
                "peer '{}' address {} is not a host address of {}",
                peer.name, peer.address, cidr
            )));
        }
        if let Some(existing) = seen.insert(peer.address, peer) {
            return Err(MeshError::InvalidTopology(format!(
                "peers '{}' and '{}' share address {}",
                existing.name, peer.name, peer.address
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::model::{
        JumpSettings, Network, NetworkId, NetworkRecord, Peer, PeerId, PeerKind, TrustState,
    };
    use crate::wireguard::KeyPair;
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    pub fn record(cidr: &str) -> NetworkRecord {
        NetworkRecord::new(Network {
            id: NetworkId::new(),
            name: "policy".to_string(),
            cidr: cidr.parse().unwrap(),
            domain: "policy.mesh".to_string(),
            reserve_gateway: false,
            blocked: BTreeSet::new(),
        })
    }

    pub fn add(record: &mut NetworkRecord, name: &str, last_octet: u8, kind: PeerKind) -> PeerId {
        let seq = record.take_seq();
        let peer = Peer {
            id: PeerId::new(),
            network: record.id(),
            name: name.to_string(),
            address: Ipv4Addr::new(10, 0, 0, last_octet),
            public_key: KeyPair::generate().public,
            kind,
            endpoint: None,
            is_isolated: false,
            full_encapsulation: false,
            additional_allowed_ips: Vec::new(),
            enrollment_token: None,
            trust: TrustState::Active,
            created_seq: seq,
        };
        let id = peer.id;
        record.peers.insert(id, peer);
        id
    }

    pub fn jump() -> PeerKind {
        PeerKind::Jump(JumpSettings::default())
    }
}
