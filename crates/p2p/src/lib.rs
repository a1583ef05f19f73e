//! PeerShare peer data plane.
//!
//! Everything a peer process runs next to the tracker:
//! - **file_server**: embedded HTTP endpoint streaming files from the shared root
//! - **watcher**: debounced folder watcher that triggers re-announces
//! - **retrieval**: ordered multi-path download with per-path timeouts
//! - **tracker**: typed client for the tracker API
//! - **nat**: public reachability providers (static URL, UPnP)
//! - **announcer** / **heartbeat**: keeping the tracker's view of this peer current
//! - **session**: the above wired together and reconfigurable as one unit

pub mod address;
pub mod announcer;
pub mod error;
pub mod file_server;
pub mod heartbeat;
pub mod nat;
pub mod retrieval;
pub mod session;
pub mod tracker;
pub mod watcher;

pub use address::{download_url, ensure_http_scheme, normalize_base_url};
pub use announcer::Announcer;
pub use error::{AttemptFailure, RetrievalError, ServeError, TrackerError, WatchError};
pub use file_server::{FileServer, STREAM_CHUNK_SIZE};
pub use heartbeat::{HeartbeatSender, DEFAULT_HEARTBEAT_INTERVAL};
pub use nat::{
    detect_local_ip, NoPublicEndpoint, PublicEndpointProvider, StaticPublicUrl, UpnpPortMapper,
};
pub use retrieval::{plan_candidates, Candidate, PathKind, RetrievalConfig, Retriever};
pub use session::{PeerConfig, PeerSession};
pub use tracker::TrackerClient;
pub use watcher::{ChangeWatcher, Debouncer, ReannounceHook, DEFAULT_DEBOUNCE_WINDOW};
