//! Control API for operators and agents
//!
//! This module provides the control interface for receiving commands over a
//! Unix socket, one JSON request per line.

mod api;
mod handler;
mod server;

pub use api::{
    ApiError, ApiRequest, ApiResponse, CidrParams, ControlAction, DomainParams, IncidentParams,
    PeerParams, ResolveParams, TokenParams, UpdatePeerParams,
};
pub use handler::CommandHandler;
pub use server::ControlServer;
