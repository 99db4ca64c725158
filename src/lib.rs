//! harmony-mesh: orchestration core for a WireGuard overlay mesh
//!
//! This library allocates overlay addresses, tracks peer membership and
//! trust state, compiles per-peer WireGuard configuration and jump peer
//! firewall rules, and tells enforcement agents when to re-fetch them.
//!
//! # Architecture
//!
//! Every mutation runs as a transaction scoped to one network. A commit
//! persists the new record, reconciles trust states against open incidents,
//! recompiles the network's policy and publishes change events. Compilation
//! failures leave the last good policy in place.
//!
//! # Modules
//!
//! - `model`: Networks, peers and incidents
//! - `ipam`: Address allocation inside a network CIDR
//! - `acl`: Incident tracking and trust state derivation
//! - `policy`: AllowedIPs and iptables rule compilation
//! - `registry`: The [`Mesh`] and its per-network transactions
//! - `notify`: Change event fan-out to subscribers
//! - `store`: Record persistence
//! - `wireguard`: Key material and wg-quick rendering
//! - `control`: Control API over a Unix socket
//! - `monitoring`: Network statistics and metrics
//! - `config`: Configuration parsing and management
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acl;
pub mod config;
pub mod control;
pub mod error;
pub mod ipam;
pub mod model;
pub mod monitoring;
pub mod notify;
pub mod policy;
pub mod registry;
pub mod store;
pub mod wireguard;

// Re-export commonly used types
pub use error::{MeshError, Result};
pub use registry::Mesh;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
