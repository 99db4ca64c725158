//! WireGuard key material and configuration rendering
//!
//! The mesh core never speaks the WireGuard protocol itself; it only needs
//! X25519 keys for peers enrolled without one, enrollment tokens, and the
//! wg-quick text format for offline peers.

mod keys;
mod render;

pub use keys::{EnrollmentToken, KeyPair, PrivateKey, PublicKey};
pub use render::render_wg_quick;
