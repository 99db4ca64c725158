//! WireGuard key material and enrollment tokens
//!
//! Public keys are stored with every peer record. Private keys are only
//! produced when the controller generates a key pair on a peer's behalf and
//! are handed back exactly once, never persisted. Enrollment tokens are the
//! credential an agent presents to fetch its compiled configuration.

use crate::error::{MeshError, Result};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// WireGuard private key (32 bytes, x25519)
#[derive(Clone)]
pub struct PrivateKey {
    secret: Zeroizing<[u8; 32]>,
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self {
            secret: Zeroizing::new(secret.to_bytes()),
        }
    }

    /// Parse a private key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = decode_key(s, "private")?;
        Ok(Self {
            secret: Zeroizing::new(bytes),
        })
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(*self.secret)
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.secret);
        let public = X25519PublicKey::from(&secret);
        PublicKey {
            key: public.to_bytes(),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

// Ensure private keys are never accidentally logged
impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// WireGuard public key (32 bytes, x25519), base64 on the wire
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey {
    key: [u8; 32],
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Parse a public key from base64-encoded string
    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self::from_bytes(decode_key(s, "public")?))
    }

    /// Convert to base64-encoded string
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// WireGuard key pair (private + public)
#[derive(Clone)]
pub struct KeyPair {
    /// Private key
    pub private: PrivateKey,
    /// Public key (derived from private)
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let private = PrivateKey::generate();
        let public = private.public_key();
        Self { private, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

/// Enrollment token held by agent-capable peers
///
/// 32 random bytes, URL-safe base64 without padding. Revocation is the
/// deletion of the owning peer record; there is no separate revoked state.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrollmentToken(String);

impl EnrollmentToken {
    /// Generate a fresh random token
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self(URL_SAFE_NO_PAD.encode(*bytes))
    }

    /// Wrap a token presented by an agent
    pub fn from_presented(token: &str) -> Self {
        Self(token.trim().to_string())
    }

    /// Token text as handed to the agent
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EnrollmentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnrollmentToken([REDACTED])")
    }
}

fn decode_key(s: &str, kind: &str) -> Result<[u8; 32]> {
    let decoded = BASE64
        .decode(s.trim())
        .map_err(|e| MeshError::Validation(format!("Invalid base64 {} key: {}", kind, e)))?;

    if decoded.len() != 32 {
        return Err(MeshError::Validation(format!(
            "Invalid {} key length: expected 32 bytes, got {}",
            kind,
            decoded.len()
        )));
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_key_to_base64() {
        let private = PrivateKey::generate();
        let base64_str = private.to_base64();
        assert_eq!(base64_str.len(), 44); // Base64 of 32 bytes
    }

    #[test]
    fn test_private_key_from_base64() {
        let private = PrivateKey::generate();
        let restored = PrivateKey::from_base64(&private.to_base64()).unwrap();
        assert_eq!(private.public_key(), restored.public_key());
    }

    #[test]
    fn test_public_key_derivation() {
        let private = PrivateKey::generate();
        assert_eq!(private.public_key(), private.public_key());
        assert_ne!(private.public_key(), PrivateKey::generate().public_key());
    }

    #[test]
    fn test_public_key_serde_as_base64() {
        let public = KeyPair::generate().public;
        let json = serde_json::to_string(&public).unwrap();
        assert_eq!(json, format!("\"{}\"", public.to_base64()));

        let restored: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(public, restored);

        assert!(serde_json::from_str::<PublicKey>("\"not-a-key\"").is_err());
    }

    #[test]
    fn test_private_key_not_logged() {
        let keypair = KeyPair::generate();
        let debug_str = format!("{:?}", keypair);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains(&keypair.private.to_base64()));
    }

    #[test]
    fn test_enrollment_token_unique_and_redacted() {
        let a = EnrollmentToken::generate();
        let b = EnrollmentToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.expose().len(), 43);
        assert!(!format!("{:?}", a).contains(a.expose()));
        assert_eq!(EnrollmentToken::from_presented(&format!(" {}\n", a.expose())), a);
    }

    #[test]
    fn test_invalid_length() {
        let short_key = BASE64.encode([0u8; 16]);
        assert!(PrivateKey::from_base64(&short_key).is_err());
        assert!(PublicKey::from_base64(&short_key).is_err());
        assert!(PublicKey::from_base64("invalid!@#$").is_err());
    }
}
