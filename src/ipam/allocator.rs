//! Per-network address pool
//!
//! Allocates individual host addresses within a network CIDR block. Used
//! addresses live in a `BTreeSet<u32>` so the lowest free address is found
//! by walking the set for the first gap.

use crate::error::{MeshError, Result};
use crate::model::Network;
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Address pool for a single network
///
/// The network and broadcast addresses are never handed out, nor is the
/// gateway address when the network reserves one.
#[derive(Debug, Clone)]
pub struct AddressPool {
    /// Network CIDR block
    cidr: Ipv4Net,
    /// First allocatable host (inclusive)
    first_host: u32,
    /// Last allocatable host (inclusive)
    last_host: u32,
    /// Addresses that are never allocated
    reserved: BTreeSet<u32>,
    /// Allocated plus reserved addresses
    used: BTreeSet<u32>,
}

impl AddressPool {
    /// Create an empty pool for `cidr`, optionally reserving a gateway
    pub fn new(cidr: Ipv4Net, gateway: Option<Ipv4Addr>) -> Self {
        let network = u32::from(cidr.network());
        let broadcast = u32::from(cidr.broadcast());

        // For /31 or /32 there are no usable hosts
        let (first_host, last_host) = if cidr.prefix_len() >= 31 {
            (1, 0)
        } else {
            (network + 1, broadcast - 1)
        };

        let mut reserved = BTreeSet::new();
        reserved.insert(network);
        reserved.insert(broadcast);
        if let Some(gw) = gateway.filter(|gw| cidr.contains(gw)) {
            reserved.insert(u32::from(gw));
        }

        Self {
            cidr,
            first_host,
            last_host,
            used: reserved.clone(),
            reserved,
        }
    }

    /// Pool for a network, with its gateway reservation applied
    pub fn for_network(network: &Network) -> Self {
        Self::new(network.cidr, network.gateway())
    }

    /// Restore pool state from addresses already held by peers
    pub fn with_allocated(mut self, allocated: &[Ipv4Addr]) -> Self {
        for ip in allocated {
            let ip = u32::from(*ip);
            if (self.first_host..=self.last_host).contains(&ip) {
                self.used.insert(ip);
            }
        }
        self
    }

    /// Get the pool CIDR
    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    /// Allocate the lowest unused address
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let ip = self.lowest_free().ok_or_else(|| {
            MeshError::AddressSpaceExhausted(self.cidr.to_string())
        })?;
        self.used.insert(ip);
        Ok(Ipv4Addr::from(ip))
    }

    /// Claim a specific address
    pub fn reserve(&mut self, ip: Ipv4Addr) -> Result<()> {
        let ip_u32 = u32::from(ip);

        if !(self.first_host..=self.last_host).contains(&ip_u32) {
            return Err(MeshError::Validation(format!(
                "Address {} is not a host address of {}",
                ip, self.cidr
            )));
        }

        if !self.used.insert(ip_u32) {
            return Err(MeshError::Validation(format!(
                "Address {} is already in use in {}",
                ip, self.cidr
            )));
        }

        Ok(())
    }

    /// Return an address to the free pool
    ///
    /// Released addresses are immediately eligible for reuse. Reserved
    /// addresses cannot be released. Returns whether anything was freed.
    pub fn release(&mut self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        if self.reserved.contains(&ip) {
            return false;
        }
        self.used.remove(&ip)
    }

    /// Check if an address is allocated or reserved
    pub fn is_allocated(&self, ip: Ipv4Addr) -> bool {
        self.used.contains(&u32::from(ip))
    }

    /// Number of addresses still available
    pub fn available_count(&self) -> usize {
        if self.last_host < self.first_host {
            return 0;
        }
        let total = (self.last_host - self.first_host) as usize + 1;
        let used_in_range = self.used.range(self.first_host..=self.last_host).count();
        total - used_in_range
    }

    /// Allocated (non-reserved) addresses in ascending order
    pub fn allocated_ips(&self) -> Vec<Ipv4Addr> {
        self.used
            .difference(&self.reserved)
            .map(|&ip| Ipv4Addr::from(ip))
            .collect()
    }

    fn lowest_free(&self) -> Option<u32> {
        if self.last_host < self.first_host {
            return None;
        }

        let mut candidate = self.first_host;
        for &ip in self.used.range(self.first_host..=self.last_host) {
            if ip != candidate {
                break;
            }
            if candidate == self.last_host {
                return None;
            }
            candidate += 1;
        }
        Some(candidate)
    }
}
