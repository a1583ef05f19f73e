//! Public reachability for a peer's file server.
//!
//! A provider is asked once before every announce whether the local port is
//! reachable from outside the LAN and under which URL.

use async_trait::async_trait;
use igd::aio::search_gateway;
use igd::{PortMappingProtocol, SearchOptions};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use tracing::{debug, info, warn};

use crate::address::ensure_http_scheme;

#[async_trait]
pub trait PublicEndpointProvider: Send + Sync {
    /// URL under which `local_port` is reachable publicly, or `None` for
    /// direct-only operation.
    async fn acquire_public_endpoint(&self, local_port: u16) -> Option<String>;

    /// Undo whatever `acquire_public_endpoint` set up.
    async fn release(&self) {}
}

/// Direct LAN access only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPublicEndpoint;

#[async_trait]
impl PublicEndpointProvider for NoPublicEndpoint {
    async fn acquire_public_endpoint(&self, _local_port: u16) -> Option<String> {
        None
    }
}

/// A URL established out of band, e.g. a tunnel started by the operator.
#[derive(Debug, Clone)]
pub struct StaticPublicUrl {
    url: String,
}

impl StaticPublicUrl {
    pub fn new(url: impl AsRef<str>) -> Self {
        Self {
            url: ensure_http_scheme(url.as_ref().trim()),
        }
    }
}

#[async_trait]
impl PublicEndpointProvider for StaticPublicUrl {
    async fn acquire_public_endpoint(&self, _local_port: u16) -> Option<String> {
        Some(self.url.clone())
    }
}

/// Maps the local port on the LAN gateway via UPnP and advertises
/// `http://<external-ip>:<port>`.
pub struct UpnpPortMapper {
    lease_secs: u32,
    description: String,
    mapped_port: Mutex<Option<u16>>,
}

impl UpnpPortMapper {
    pub fn new(lease_secs: u32, description: impl Into<String>) -> Self {
        Self {
            lease_secs,
            description: description.into(),
            mapped_port: Mutex::new(None),
        }
    }
}

impl Default for UpnpPortMapper {
    fn default() -> Self {
        Self::new(0, "PeerShare")
    }
}

#[async_trait]
impl PublicEndpointProvider for UpnpPortMapper {
    async fn acquire_public_endpoint(&self, local_port: u16) -> Option<String> {
        let IpAddr::V4(local_ip) = detect_local_ip() else {
            debug!("UPnP mapping skipped: no local IPv4 address");
            return None;
        };

        let gateway = match search_gateway(SearchOptions::default()).await {
            Ok(gateway) => gateway,
            Err(err) => {
                debug!("UPnP gateway discovery failed: {}", err);
                return None;
            }
        };

        let external_ip = match gateway.get_external_ip().await {
            Ok(ip) => ip,
            Err(err) => {
                debug!("Failed to fetch external IP via UPnP: {}", err);
                return None;
            }
        };

        if let Err(err) = gateway
            .add_port(
                PortMappingProtocol::TCP,
                local_port,
                SocketAddrV4::new(local_ip, local_port),
                self.lease_secs,
                &self.description,
            )
            .await
        {
            warn!("UPnP port mapping for {} failed: {}", local_port, err);
            return None;
        }

        *self.mapped_port.lock() = Some(local_port);
        let url = format!("http://{external_ip}:{local_port}");
        info!("UPnP mapped {} -> {}:{}", url, local_ip, local_port);
        Some(url)
    }

    async fn release(&self) {
        let Some(port) = self.mapped_port.lock().take() else {
            return;
        };
        match search_gateway(SearchOptions::default()).await {
            Ok(gateway) => {
                if let Err(err) = gateway.remove_port(PortMappingProtocol::TCP, port).await {
                    debug!("Failed to remove UPnP mapping for {}: {}", port, err);
                }
            }
            Err(err) => debug!("UPnP gateway discovery failed: {}", err),
        }
    }
}

/// LAN address other peers should use for direct downloads.
pub fn detect_local_ip() -> IpAddr {
    match local_ip_address::local_ip() {
        Ok(ip) => ip,
        Err(err) => {
            warn!("Could not detect local IP address, using loopback: {}", err);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_url_gets_scheme() {
        let provider = StaticPublicUrl::new(" abc.ngrok.io ");
        assert_eq!(
            provider.acquire_public_endpoint(8001).await,
            Some("http://abc.ngrok.io".to_string())
        );
    }

    #[tokio::test]
    async fn test_no_public_endpoint() {
        assert_eq!(NoPublicEndpoint.acquire_public_endpoint(8001).await, None);
    }
}
