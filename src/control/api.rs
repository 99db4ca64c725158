//! Control API request and response types
//!
//! Newline-delimited JSON. Every request names an action, optionally the
//! network it applies to (by name or id) and action-specific parameters:
//!
//! ```json
//! {"id":"1","action":"create_peer","network":"office","params":{"name":"laptop","variant":"regular_dynamic"}}
//! ```

use crate::error::MeshError;
use crate::model::{IncidentAction, IncidentId, PeerId, ReasonCode};
use crate::registry::PeerUpdate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    /// List networks with their statistics
    ListNetworks,
    /// Create a network
    CreateNetwork,
    /// Delete a network and all its peers
    DeleteNetwork,
    /// Move a network to a new CIDR
    UpdateCidr,
    /// Change a network's DNS domain
    UpdateDomain,
    /// Show the compiled artifacts of a network
    ShowPolicy,
    /// Create a peer
    CreatePeer,
    /// Modify a peer
    UpdatePeer,
    /// Delete a peer
    DeletePeer,
    /// Open an incident
    OpenIncident,
    /// Resolve an incident
    ResolveIncident,
    /// Fetch a peer configuration by enrollment token
    FetchConfig,
    /// Fetch a jump firewall policy by enrollment token
    FetchJumpPolicy,
    /// Service status and metrics
    Status,
    /// Turn the connection into a change event stream
    Subscribe,
}

/// API request from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Request ID for tracking
    #[serde(default = "default_request_id")]
    pub id: String,

    /// Action to perform
    pub action: ControlAction,

    /// Network name or id to operate on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Action parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Create a new API request
    pub fn new(id: impl Into<String>, action: ControlAction) -> Self {
        Self {
            id: id.into(),
            action,
            network: None,
            params: None,
        }
    }

    /// Target a network
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Attach parameters
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Decode the parameters
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let value = self.params.clone().ok_or_else(|| {
            ApiError::ParseError(format!("Action {:?} requires params", self.action))
        })?;
        serde_json::from_value(value).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    /// Network argument
    pub fn network(&self) -> Result<&str, ApiError> {
        self.network.as_deref().ok_or_else(|| {
            ApiError::ParseError(format!("Action {:?} requires a network", self.action))
        })
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::ParseError(e.to_string()))
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::SerializationError(e.to_string()))
    }
}

/// `update_cidr` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidrParams {
    /// New CIDR
    pub cidr: String,
}

/// `update_domain` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainParams {
    /// New domain
    pub domain: String,
}

/// Parameters naming one peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerParams {
    /// Target peer
    pub peer_id: PeerId,
}

/// `update_peer` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePeerParams {
    /// Target peer
    pub peer_id: PeerId,
    /// Fields to change
    #[serde(flatten)]
    pub update: PeerUpdate,
}

/// `open_incident` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentParams {
    /// Targeted peers
    pub peers: Vec<PeerId>,
    /// Reason code
    pub reason: ReasonCode,
    /// Action overriding the reason's default
    #[serde(default)]
    pub action: Option<IncidentAction>,
    /// Free-form note
    #[serde(default)]
    pub note: Option<String>,
}

/// `resolve_incident` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveParams {
    /// Incident to resolve
    pub incident_id: IncidentId,
}

/// Token-authenticated fetch parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenParams {
    /// Enrollment token
    pub token: String,
}

/// API response to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Request ID this response corresponds to
    pub id: String,

    /// Whether the request was successful
    pub success: bool,

    /// Optional result data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Optional error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    /// Create a successful response
    pub fn success(id: String, data: Option<serde_json::Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: String, error: ApiError) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(|e| ApiError::SerializationError(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::ParseError(e.to_string()))
    }
}

/// API error types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "message")]
pub enum ApiError {
    /// Failed to parse request
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize response
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Rejected input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed CIDR
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    /// CIDR change refused
    #[error("CIDR change rejected: {0}")]
    CidrChangeRejected(String),

    /// No free address
    #[error("Address space exhausted: {0}")]
    AddressSpaceExhausted(String),

    /// Unresolvable policy conflict
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Unknown or revoked token
    #[error("Enrollment token is not valid")]
    TokenInvalid,

    /// Configuration withheld
    #[error("Quarantined: {0}")]
    Quarantined(String),

    /// Invalid action for current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Network not found
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Incident not found
    #[error("Incident not found: {0}")]
    IncidentNotFound(String),

    /// Duplicate network
    #[error("Network already exists: {0}")]
    NetworkExists(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<MeshError> for ApiError {
    fn from(err: MeshError) -> Self {
        match err {
            MeshError::AddressSpaceExhausted(msg) => ApiError::AddressSpaceExhausted(msg),
            MeshError::CidrChangeRejected(msg) => ApiError::CidrChangeRejected(msg),
            MeshError::InvalidCidr(msg) => ApiError::InvalidCidr(msg),
            MeshError::InvalidTopology(msg) => ApiError::InvalidTopology(msg),
            MeshError::TokenInvalid => ApiError::TokenInvalid,
            MeshError::PeerNotFound(msg) => ApiError::PeerNotFound(msg),
            MeshError::NetworkNotFound(msg) => ApiError::NetworkNotFound(msg),
            MeshError::IncidentNotFound(msg) => ApiError::IncidentNotFound(msg),
            MeshError::NetworkExists(msg) => ApiError::NetworkExists(msg),
            MeshError::Quarantined(msg) => ApiError::Quarantined(msg),
            MeshError::Config(msg) => ApiError::ConfigError(msg),
            MeshError::InvalidState(msg) => ApiError::InvalidState(msg),
            MeshError::Validation(msg) => ApiError::Validation(msg),
            MeshError::Serialization(msg) => ApiError::SerializationError(msg),
            MeshError::Store(_) | MeshError::Io(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

fn default_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("req-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}
