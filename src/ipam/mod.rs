//! IP address management
//!
//! Address assignment within a network's CIDR. A pool is rebuilt from the
//! peer records of a network transaction, so every allocation is a
//! read-modify-write performed under that network's lock: two allocations
//! on the same network can never observe each other's in-flight state.

mod allocator;

pub use allocator::AddressPool;

use crate::error::Result;
use crate::model::{Network, NetworkRecord, PeerId};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use tracing::debug;

/// Pool reflecting the current allocations of a network record
pub fn pool_for(record: &NetworkRecord) -> AddressPool {
    AddressPool::for_network(&record.network).with_allocated(&record.allocated_addresses())
}

/// Compute new addresses for every peer after a CIDR change
///
/// Peers are re-allocated in creation order, lowest address first, so the
/// result depends only on the peer set and the new CIDR. Fails with
/// `AddressSpaceExhausted` when the new block cannot hold every peer.
pub fn reassign(
    record: &NetworkRecord,
    new_cidr: Ipv4Net,
) -> Result<Vec<(PeerId, Ipv4Addr)>> {
    let target = Network {
        cidr: new_cidr,
        ..record.network.clone()
    };
    let mut pool = AddressPool::for_network(&target);

    let mut assignments = Vec::with_capacity(record.peers.len());
    for peer in record.peers_by_creation() {
        let address = pool.allocate()?;
        debug!(
            "Reassigning peer {} from {} to {}",
            peer.name, peer.address, address
        );
        assignments.push((peer.id, address));
    }

    Ok(assignments)
}
