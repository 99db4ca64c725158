//! Peer records and their type-specific behavior
//!
//! The peer variants form a closed set. Behavior that differs per variant
//! (enrollment tokens, NAT duties, configuration delivery) is decided by an
//! explicit `match` on [`PeerKind`], so adding a variant is a compile error
//! everywhere it matters.

use crate::model::{NetworkId, PeerId};
use crate::wireguard::{EnrollmentToken, PublicKey};
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Routing settings carried by every jump peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpSettings {
    /// WireGuard listen port on the jump host
    pub listen_port: u16,
    /// WireGuard interface name on the jump host
    pub tunnel_interface: String,
    /// External interface used for forwarding and masquerade
    pub nat_interface: String,
}

impl Default for JumpSettings {
    fn default() -> Self {
        Self {
            listen_port: 51820,
            tunnel_interface: "wg0".to_string(),
            nat_interface: "eth0".to_string(),
        }
    }
}

/// Peer variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerKind {
    /// Routing hub / gateway running an agent
    Jump(JumpSettings),
    /// Regular peer running an agent that re-fetches its configuration
    RegularDynamic,
    /// Regular peer configured once, offline (no agent)
    RegularStatic,
}

impl PeerKind {
    /// Whether peers of this variant receive an enrollment token
    pub fn has_token(&self) -> bool {
        match self {
            PeerKind::Jump(_) | PeerKind::RegularDynamic => true,
            PeerKind::RegularStatic => false,
        }
    }

    /// Whether peers of this variant route and NAT for others
    pub fn is_gateway_capable(&self) -> bool {
        match self {
            PeerKind::Jump(_) => true,
            PeerKind::RegularDynamic | PeerKind::RegularStatic => false,
        }
    }

    /// Whether the peer's address is baked into an offline configuration
    pub fn is_static(&self) -> bool {
        match self {
            PeerKind::RegularStatic => true,
            PeerKind::Jump(_) | PeerKind::RegularDynamic => false,
        }
    }

    /// Jump settings, for jump peers
    pub fn jump_settings(&self) -> Option<&JumpSettings> {
        match self {
            PeerKind::Jump(settings) => Some(settings),
            PeerKind::RegularDynamic | PeerKind::RegularStatic => None,
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            PeerKind::Jump(_) => "jump",
            PeerKind::RegularDynamic => "regular_dynamic",
            PeerKind::RegularStatic => "regular_static",
        }
    }
}

/// Trust state maintained by the ACL engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    /// Full participation
    #[default]
    Active,
    /// Reachable only through jump peers
    Isolated,
    /// Quarantined: no configuration, dropped by every jump
    Blocked,
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Isolated => write!(f, "isolated"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Peer record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Peer identifier
    pub id: PeerId,
    /// Owning network
    pub network: NetworkId,
    /// Display name
    pub name: String,
    /// Allocated tunnel address
    pub address: Ipv4Addr,
    /// WireGuard public key
    pub public_key: PublicKey,
    /// Variant
    pub kind: PeerKind,
    /// Public endpoint (host:port)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Administrative isolation flag
    #[serde(default)]
    pub is_isolated: bool,
    /// Route the peer's default route through a jump peer
    #[serde(default)]
    pub full_encapsulation: bool,
    /// Extra ranges routed into the tunnel, in configured order
    #[serde(default)]
    pub additional_allowed_ips: Vec<IpNet>,
    /// Enrollment token (agent-capable variants only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_token: Option<EnrollmentToken>,
    /// Current trust state
    #[serde(default)]
    pub trust: TrustState,
    /// Creation order within the network
    pub created_seq: u64,
}

impl Peer {
    /// Host route for the peer's address
    pub fn host_net(&self) -> Ipv4Net {
        host_net(self.address)
    }

    /// Whether this is a jump peer
    pub fn is_jump(&self) -> bool {
        self.kind.is_gateway_capable()
    }

    /// Whether the peer is currently quarantined
    pub fn is_blocked(&self) -> bool {
        self.trust == TrustState::Blocked
    }
}

/// `/32` network for a single address
pub fn host_net(addr: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::from(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_per_variant() {
        let jump = PeerKind::Jump(JumpSettings::default());
        assert!(jump.has_token());
        assert!(jump.is_gateway_capable());
        assert!(!jump.is_static());

        assert!(PeerKind::RegularDynamic.has_token());
        assert!(!PeerKind::RegularDynamic.is_gateway_capable());

        assert!(!PeerKind::RegularStatic.has_token());
        assert!(PeerKind::RegularStatic.is_static());
    }

    #[test]
    fn test_peer_kind_wire_format() {
        let json = serde_json::to_value(PeerKind::Jump(JumpSettings::default())).unwrap();
        assert_eq!(json["type"], "jump");
        assert_eq!(json["listen_port"], 51820);
        assert_eq!(json["nat_interface"], "eth0");

        let kind: PeerKind =
            serde_json::from_value(serde_json::json!({"type": "regular_static"})).unwrap();
        assert_eq!(kind, PeerKind::RegularStatic);
    }

    #[test]
    fn test_host_net() {
        let net = host_net(Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(net.to_string(), "10.0.0.7/32");
    }

    #[test]
    fn test_trust_state_display() {
        assert_eq!(TrustState::Blocked.to_string(), "blocked");
        assert_eq!(TrustState::default(), TrustState::Active);
    }
}
