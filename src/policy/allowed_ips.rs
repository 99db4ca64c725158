//! AllowedIPs computation for regular peers
//!
//! The set is assembled by walking [`ALLOWED_IPS_RULES`] in order; each rule
//! contributes zero or more ranges and the first occurrence of a range wins.
//! Isolation never adds a rule of its own: other regular peers' addresses
//! are simply never contributed. An isolated peer whose configured ranges
//! would make another regular peer reachable is a conflict the table cannot
//! resolve and is reported as `InvalidTopology`.

use crate::error::{MeshError, Result};
use crate::model::{Peer, TrustState};
use crate::policy::Topology;
use ipnet::{IpNet, Ipv4Net};
use std::net::Ipv4Addr;

/// One row of the AllowedIPs table
pub struct AllowedIpsRule {
    /// Rule name, used in logs and tests
    pub name: &'static str,
    /// Ranges contributed for a peer
    pub contribute: fn(&Topology<'_>, &Peer) -> Vec<IpNet>,
}

/// Ordered AllowedIPs rules
pub const ALLOWED_IPS_RULES: &[AllowedIpsRule] = &[
    AllowedIpsRule {
        name: "default-route",
        contribute: default_route_rule,
    },
    AllowedIpsRule {
        name: "own-address",
        contribute: own_address_rule,
    },
    AllowedIpsRule {
        name: "jump-routes",
        contribute: jump_routes_rule,
    },
    AllowedIpsRule {
        name: "additional-ranges",
        contribute: additional_ranges_rule,
    },
];

/// The unrestricted IPv4 default route
pub const DEFAULT_ROUTE: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::UNSPECIFIED, 0);

/// [`DEFAULT_ROUTE`] as an AllowedIPs entry
pub fn default_route() -> IpNet {
    IpNet::V4(DEFAULT_ROUTE)
}

fn default_route_rule(_: &Topology<'_>, peer: &Peer) -> Vec<IpNet> {
    if peer.full_encapsulation {
        vec![default_route()]
    } else {
        Vec::new()
    }
}

fn own_address_rule(_: &Topology<'_>, peer: &Peer) -> Vec<IpNet> {
    if peer.full_encapsulation {
        Vec::new()
    } else {
        vec![IpNet::V4(peer.host_net())]
    }
}

fn jump_routes_rule(topology: &Topology<'_>, _: &Peer) -> Vec<IpNet> {
    topology
        .jumps
        .iter()
        .map(|jump| IpNet::V4(jump.host_net()))
        .collect()
}

fn additional_ranges_rule(_: &Topology<'_>, peer: &Peer) -> Vec<IpNet> {
    peer.additional_allowed_ips.clone()
}

/// Compute the AllowedIPs set for a regular peer
pub fn compute(topology: &Topology<'_>, peer: &Peer) -> Result<Vec<IpNet>> {
    if peer.trust == TrustState::Isolated {
        check_isolation(topology, peer)?;
    }

    let mut allowed: Vec<IpNet> = Vec::new();
    for rule in ALLOWED_IPS_RULES {
        for net in (rule.contribute)(topology, peer) {
            if !allowed.contains(&net) {
                allowed.push(net);
            }
        }
    }
    Ok(allowed)
}

fn check_isolation(topology: &Topology<'_>, peer: &Peer) -> Result<()> {
    let cidr = topology.record.network.cidr;
    for range in &peer.additional_allowed_ips {
        let IpNet::V4(range) = range else { continue };
        if !range_overlaps(range, &cidr) {
            continue;
        }
        if let Some(other) = topology
            .other_regular_peers(peer)
            .find(|other| !other.is_blocked() && range.contains(&other.address))
        {
            return Err(MeshError::InvalidTopology(format!(
                "isolated peer '{}' has range {} covering regular peer '{}' ({})",
                peer.name, range, other.name, other.address
            )));
        }
    }
    Ok(())
}

fn range_overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}
