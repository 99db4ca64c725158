//! Error types for harmony-mesh
//!
//! This module defines the error types used throughout the orchestration core.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary.

use thiserror::Error;

/// Main error type for mesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    /// No free address remains in the network CIDR
    #[error("Address space exhausted in {0}")]
    AddressSpaceExhausted(String),

    /// CIDR change refused because a static peer exists
    #[error("CIDR change rejected: {0}")]
    CidrChangeRejected(String),

    /// Malformed network CIDR or additional allowed range
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    /// Policy conflict the compiler cannot resolve
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Enrollment token unknown or revoked
    #[error("Enrollment token is not valid")]
    TokenInvalid,

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Network not found
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    /// Incident not found
    #[error("Incident not found: {0}")]
    IncidentNotFound(String),

    /// A network with the same name already exists
    #[error("Network already exists: {0}")]
    NetworkExists(String),

    /// Configuration withheld from a blocked peer
    #[error("Peer {0} is quarantined")]
    Quarantined(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record store errors
    #[error("Store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using MeshError
pub type Result<T> = std::result::Result<T, MeshError>;

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for MeshError {
    fn from(err: toml::de::Error) -> Self {
        MeshError::Config(err.to_string())
    }
}

impl From<ipnet::AddrParseError> for MeshError {
    fn from(err: ipnet::AddrParseError) -> Self {
        MeshError::InvalidCidr(err.to_string())
    }
}
