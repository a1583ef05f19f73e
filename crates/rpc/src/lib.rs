//! PeerShare tracker HTTP API
//!
//! Exposes the peer registry over HTTP. The request and response bodies in
//! [`api`] are shared with the peer-side tracker client.

pub mod api;
pub mod server;

pub use api::{
    AnnounceRequest, AnnounceResponse, ErrorResponse, HealthResponse, HeartbeatRequest,
    HeartbeatResponse, HolderLookupResponse, STATUS_SUCCESS, STATUS_WARNING,
};
pub use server::{build_router, serve, start_server, AppState};
