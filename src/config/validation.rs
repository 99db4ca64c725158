//! Configuration and input validation functions
//!
//! This module provides validation for every externally supplied field:
//! network names, CIDR blocks, allowed ranges, endpoints, keys and
//! interface names. CIDR problems are reported as `InvalidCidr` so callers
//! can reject them before any registry mutation.

use crate::error::{MeshError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ipnet::{IpNet, Ipv4Net};

/// Validate interface name (alphanumeric, max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MeshError::Config(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > 15 {
        return Err(MeshError::Config(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(MeshError::Config(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Validate network name (alphanumeric, dashes, underscores)
pub fn validate_network_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MeshError::Validation(
            "Network name cannot be empty".to_string(),
        ));
    }

    if name.len() > 64 {
        return Err(MeshError::Validation(
            "Network name too long (max 64 characters)".to_string(),
        ));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(MeshError::Validation(format!(
            "Invalid network name '{}': only alphanumeric, dash, and underscore allowed",
            name
        )));
    }

    if name.starts_with('-') || name.starts_with('_') {
        return Err(MeshError::Validation(
            "Network name cannot start with dash or underscore".to_string(),
        ));
    }

    Ok(())
}

/// Validate peer display name
pub fn validate_peer_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MeshError::Validation("Peer name cannot be empty".to_string()));
    }

    if name.len() > 128 {
        return Err(MeshError::Validation(
            "Peer name too long (max 128 characters)".to_string(),
        ));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(MeshError::Validation(format!(
            "Peer name '{}' contains control characters",
            name.escape_default()
        )));
    }

    Ok(())
}

/// Validate DNS domain (dot-separated labels of 1-63 chars)
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > 253 {
        return Err(MeshError::Validation(format!(
            "Invalid domain '{}': length must be 1-253 characters",
            domain
        )));
    }

    for label in domain.trim_end_matches('.').split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(MeshError::Validation(format!(
                "Invalid domain '{}': bad label '{}'",
                domain, label
            )));
        }
    }

    Ok(())
}

/// Parse a network CIDR block
///
/// Networks are IPv4 and must be given by their network address: host bits
/// set (`10.0.0.5/24`) are rejected rather than silently truncated.
pub fn parse_network_cidr(cidr: &str) -> Result<Ipv4Net> {
    let net: Ipv4Net = cidr.trim().parse().map_err(|_| {
        MeshError::InvalidCidr(format!(
            "'{}' is not an IPv4 CIDR block (expected format: IP/prefix)",
            cidr
        ))
    })?;

    if net != net.trunc() {
        return Err(MeshError::InvalidCidr(format!(
            "'{}' has host bits set (did you mean {}?)",
            cidr,
            net.trunc()
        )));
    }

    Ok(net)
}

/// Parse an additional allowed range (IPv4 or IPv6, CIDR notation required)
pub fn parse_allowed_ip(cidr: &str) -> Result<IpNet> {
    if !cidr.contains('/') {
        return Err(MeshError::InvalidCidr(format!(
            "'{}' is missing a prefix length (expected format: IP/prefix)",
            cidr
        )));
    }

    let net: IpNet = cidr.trim().parse().map_err(|_| {
        MeshError::InvalidCidr(format!("'{}' is not valid CIDR notation", cidr))
    })?;

    Ok(net.trunc())
}

/// Parse a list of additional allowed ranges, keeping first occurrences only
pub fn parse_allowed_ips<S: AsRef<str>>(ranges: &[S]) -> Result<Vec<IpNet>> {
    let mut parsed: Vec<IpNet> = Vec::with_capacity(ranges.len());
    for range in ranges {
        let net = parse_allowed_ip(range.as_ref())?;
        if !parsed.contains(&net) {
            parsed.push(net);
        }
    }
    Ok(parsed)
}

/// Validate endpoint format (host:port)
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    let parts: Vec<&str> = endpoint.rsplitn(2, ':').collect();

    if parts.len() != 2 {
        return Err(MeshError::Validation(format!(
            "Invalid endpoint format: {} (expected format: host:port)",
            endpoint
        )));
    }

    let port: u16 = parts[0].parse().map_err(|_| {
        MeshError::Validation(format!("Invalid port in endpoint: {}", endpoint))
    })?;

    if port == 0 {
        return Err(MeshError::Validation(
            "Port number cannot be 0".to_string(),
        ));
    }

    // Host validation is lenient (can be hostname or IP)
    let host = parts[1];
    if host.is_empty() {
        return Err(MeshError::Validation(
            "Host cannot be empty in endpoint".to_string(),
        ));
    }

    Ok(())
}

/// Validate base64-encoded WireGuard public key (32 bytes)
pub fn validate_public_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MeshError::Validation(
            "Public key cannot be empty".to_string(),
        ));
    }

    // WireGuard keys are 32 bytes, base64 encoded = 44 characters (with padding)
    if key.len() != 44 {
        return Err(MeshError::Validation(format!(
            "Invalid public key length: {} (expected 44 characters)",
            key.len()
        )));
    }

    let decoded = BASE64.decode(key).map_err(|e| {
        MeshError::Validation(format!("Public key is not valid base64: {}", e))
    })?;

    if decoded.len() != 32 {
        return Err(MeshError::Validation(format!(
            "Public key decodes to {} bytes (expected 32)",
            decoded.len()
        )));
    }

    Ok(())
}

/// Validate a listen port
pub fn validate_listen_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(MeshError::Validation(
            "Listen port cannot be 0".to_string(),
        ));
    }
    Ok(())
}
