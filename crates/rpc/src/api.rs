//! Wire types of the tracker API.

use peershare_files::ContentRecord;
use peershare_registry::{HolderId, ObservedEndpoint};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_WARNING: &str = "warning";

/// Body of `POST /announce`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub holder_id: HolderId,
    pub port: u16,
    /// Defaults to the address the request arrived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub files: Vec<ContentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceResponse {
    pub status: String,
    pub announced: usize,
}

/// Optional body of `POST /heartbeat`.
pub type HeartbeatRequest = ObservedEndpoint;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HeartbeatResponse {
    pub fn success() -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            message: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_WARNING.to_string(),
            message: Some(message.into()),
        }
    }

    /// The tracker asked the holder to announce again.
    pub fn is_warning(&self) -> bool {
        self.status == STATUS_WARNING
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderLookupResponse {
    pub holder_id: HolderId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub holders: usize,
    pub records: usize,
    pub offers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
