//! PeerShare peer registry
//!
//! Server-side bookkeeping of which holder currently serves which file:
//! - **holders**: identity directory (registration, credential lookup)
//! - **store**: peer offers keyed by (holder, fingerprint) plus first-seen content records
//! - **registry**: announce / heartbeat / search over the store
//! - **sweeper**: periodic removal of offers whose heartbeat expired

pub mod clock;
pub mod errors;
pub mod holders;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{RegistryError, Result};
pub use holders::{HolderDirectory, MemoryHolderDirectory};
pub use registry::{PeerRegistry, RegistryConfig, RegistryStats};
pub use store::{MemoryOfferStore, OfferStore, StoreCounts};
pub use sweeper::LivenessSweeper;
pub use types::{
    Endpoint, HeartbeatReport, Holder, HolderId, ObservedEndpoint, PeerOffer, SearchGroup,
    SearchPeer,
};
