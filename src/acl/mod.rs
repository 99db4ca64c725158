//! ACL and incident engine
//!
//! Maintains per-peer trust state (active / isolated / blocked) from the
//! administrative isolation flag and incident signals. Every function here
//! works on a network record inside a registry transaction; the caller is
//! responsible for calling [`reconcile`] before committing.

mod engine;

pub use engine::{
    evaluate, forget_peer, open_incident, reconcile, resolve_incident, TrustTransition,
};
