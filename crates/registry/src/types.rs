//! Registry data model.

use chrono::{DateTime, Utc};
use peershare_files::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Identifier of an authenticated holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(pub u64);

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A party that can serve files it has locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub id: HolderId,
    /// Unique, lower-cased human-readable name.
    pub label: String,
}

/// Where a holder can be reached.
///
/// Offer replacement is keyed on `(holder, ip_address, port)`; `public_url`
/// is carried along but is not part of the endpoint identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip_address: IpAddr,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl Endpoint {
    pub fn new(ip_address: IpAddr, port: u16, public_url: Option<String>) -> Self {
        Self {
            ip_address,
            port,
            public_url,
        }
    }

    pub fn same_address(&self, ip_address: IpAddr, port: u16) -> bool {
        self.ip_address == ip_address && self.port == port
    }
}

/// Live assertion that a holder serves a fingerprint at an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOffer {
    pub holder_id: HolderId,
    pub fingerprint: Fingerprint,
    pub ip_address: IpAddr,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
}

impl PeerOffer {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip_address, self.port, self.public_url.clone())
    }
}

/// Endpoint details a heartbeat may carry for drift detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEndpoint {
    #[serde(default)]
    pub ip_address: Option<IpAddr>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl ObservedEndpoint {
    pub fn is_empty(&self) -> bool {
        self.ip_address.is_none() && self.port.is_none()
    }

    pub fn matches(&self, offer: &PeerOffer) -> bool {
        self.ip_address.map_or(true, |ip| ip == offer.ip_address)
            && self.port.map_or(true, |port| port == offer.port)
    }
}

/// Outcome of a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Offers whose `last_heartbeat` was refreshed.
    pub refreshed: usize,
    /// The heartbeat reported an address none of the holder's offers use.
    pub endpoint_drift: bool,
}

impl HeartbeatReport {
    pub fn needs_reannounce(&self) -> bool {
        self.refreshed == 0 || self.endpoint_drift
    }
}

/// One holder of a searched file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPeer {
    pub holder_id: HolderId,
    pub ip_address: IpAddr,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub holder_label: String,
    pub last_heartbeat: DateTime<Utc>,
}

/// A file matching a search, with the holders currently offering it.
///
/// Peers are ordered most recently refreshed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchGroup {
    pub fingerprint: Fingerprint,
    pub display_name: String,
    pub size_bytes: u64,
    pub peers: Vec<SearchPeer>,
}
