//! Mutation requests accepted by the registry

use crate::config::validation;
use crate::error::{MeshError, Result};
use crate::model::{JumpSettings, PeerId, PeerKind};
use crate::wireguard::{EnrollmentToken, PrivateKey, PublicKey};
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Network creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Unique network name
    pub name: String,
    /// IPv4 address space
    pub cidr: String,
    /// DNS domain
    pub domain: String,
    /// Keep the first host address out of the pool
    #[serde(default)]
    pub reserve_gateway: bool,
}

impl NetworkSpec {
    /// Validate and parse the CIDR
    pub fn validate(&self) -> Result<Ipv4Net> {
        validation::validate_network_name(&self.name)?;
        validation::validate_domain(&self.domain)?;
        validation::parse_network_cidr(&self.cidr)
    }
}

/// Peer variant requested at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerVariant {
    /// Routing hub
    Jump,
    /// Agent-managed regular peer
    RegularDynamic,
    /// Offline regular peer
    RegularStatic,
}

/// Peer creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSpec {
    /// Display name, unique within the network
    pub name: String,
    /// Variant
    pub variant: PeerVariant,
    /// Base64 public key; a key pair is generated when absent
    #[serde(default)]
    pub public_key: Option<String>,
    /// Public endpoint (host:port)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Administrative isolation (regular peers only)
    #[serde(default)]
    pub is_isolated: bool,
    /// Route the default route through a jump peer
    #[serde(default)]
    pub full_encapsulation: bool,
    /// Extra ranges in CIDR notation
    #[serde(default)]
    pub additional_allowed_ips: Vec<String>,
    /// Jump settings overriding the configured defaults
    #[serde(default)]
    pub jump: Option<JumpSettings>,
}

impl PeerSpec {
    /// Minimal request for a peer of the given variant
    pub fn new(name: impl Into<String>, variant: PeerVariant) -> Self {
        Self {
            name: name.into(),
            variant,
            public_key: None,
            endpoint: None,
            is_isolated: false,
            full_encapsulation: false,
            additional_allowed_ips: Vec::new(),
            jump: None,
        }
    }

    /// Resolve the variant into a peer kind
    pub(crate) fn kind(&self, jump_defaults: &JumpSettings) -> Result<PeerKind> {
        let kind = match self.variant {
            PeerVariant::Jump => {
                let settings = self.jump.clone().unwrap_or_else(|| jump_defaults.clone());
                validation::validate_listen_port(settings.listen_port)?;
                validation::validate_interface_name(&settings.tunnel_interface)?;
                validation::validate_interface_name(&settings.nat_interface)?;
                PeerKind::Jump(settings)
            }
            PeerVariant::RegularDynamic => PeerKind::RegularDynamic,
            PeerVariant::RegularStatic => PeerKind::RegularStatic,
        };
        if self.jump.is_some() && !kind.is_gateway_capable() {
            return Err(MeshError::Validation(
                "Jump settings are only accepted for jump peers".to_string(),
            ));
        }
        if self.is_isolated && kind.is_gateway_capable() {
            return Err(MeshError::Validation(
                "Jump peers cannot be isolated".to_string(),
            ));
        }
        Ok(kind)
    }

    /// Validated additional ranges
    pub(crate) fn allowed_ips(&self) -> Result<Vec<IpNet>> {
        validation::parse_allowed_ips(&self.additional_allowed_ips)
    }
}

/// Peer modification request; absent fields stay unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerUpdate {
    /// New display name
    #[serde(default)]
    pub name: Option<String>,
    /// New public key (rotates the peer's key)
    #[serde(default)]
    pub public_key: Option<String>,
    /// New endpoint; an empty string clears it
    #[serde(default)]
    pub endpoint: Option<String>,
    /// New isolation flag
    #[serde(default)]
    pub is_isolated: Option<bool>,
    /// New encapsulation flag
    #[serde(default)]
    pub full_encapsulation: Option<bool>,
    /// Replacement list of additional ranges
    #[serde(default)]
    pub additional_allowed_ips: Option<Vec<String>>,
}

/// Result of a peer creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPeer {
    /// New peer identifier
    pub peer_id: PeerId,
    /// Allocated address
    pub address: Ipv4Addr,
    /// Public key in use
    pub public_key: PublicKey,
    /// Enrollment token for agent-capable variants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrollment_token: Option<EnrollmentToken>,
    /// Generated private key, returned exactly once
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "expose_key")]
    pub private_key: Option<PrivateKey>,
}

fn expose_key<S>(key: &Option<PrivateKey>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match key {
        Some(key) => serializer.serialize_some(&key.to_base64()),
        None => serializer.serialize_none(),
    }
}
