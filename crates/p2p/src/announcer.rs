//! Builds and sends announces for the local shared folder.

use crate::nat::PublicEndpointProvider;
use crate::tracker::TrackerClient;
use crate::watcher::ReannounceHook;
use anyhow::{Context, Result};
use async_trait::async_trait;
use peershare_files::scan_shared_folder;
use peershare_registry::{HolderId, ObservedEndpoint};
use peershare_rpc::AnnounceRequest;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct Announcer {
    tracker: TrackerClient,
    holder_id: HolderId,
    shared_folder: PathBuf,
    local_ip: IpAddr,
    port: u16,
    public: Arc<dyn PublicEndpointProvider>,
    /// Serialises announces coming from the watcher and the heartbeat loop.
    in_flight: Mutex<()>,
}

impl Announcer {
    pub fn new(
        tracker: TrackerClient,
        holder_id: HolderId,
        shared_folder: PathBuf,
        local_ip: IpAddr,
        port: u16,
        public: Arc<dyn PublicEndpointProvider>,
    ) -> Self {
        Self {
            tracker,
            holder_id,
            shared_folder,
            local_ip,
            port,
            public,
            in_flight: Mutex::new(()),
        }
    }

    /// Endpoint this peer advertises, as sent with heartbeats.
    pub fn observed_endpoint(&self) -> ObservedEndpoint {
        ObservedEndpoint {
            ip_address: Some(self.local_ip),
            port: Some(self.port),
        }
    }

    pub fn tracker(&self) -> &TrackerClient {
        &self.tracker
    }

    /// Scan the shared folder and replace this endpoint's offers with it.
    pub async fn announce(&self) -> Result<usize> {
        let _guard = self.in_flight.lock().await;

        let folder = self.shared_folder.clone();
        let files = tokio::task::spawn_blocking(move || scan_shared_folder(&folder))
            .await
            .context("shared folder scan panicked")?
            .context("failed to scan shared folder")?;

        let public_url = self.public.acquire_public_endpoint(self.port).await;
        let request = AnnounceRequest {
            holder_id: self.holder_id,
            port: self.port,
            ip_address: Some(self.local_ip),
            public_url,
            files,
        };

        let response = self
            .tracker
            .announce(&request)
            .await
            .context("announce rejected")?;
        info!(
            "Announced {} file(s) from {}:{}",
            response.announced, self.local_ip, self.port
        );
        Ok(response.announced)
    }

    /// Announce an empty file list from this endpoint so the tracker drops
    /// its offers before the endpoint goes away.
    pub async fn withdraw(&self) -> Result<()> {
        let _guard = self.in_flight.lock().await;
        let request = AnnounceRequest {
            holder_id: self.holder_id,
            port: self.port,
            ip_address: Some(self.local_ip),
            public_url: None,
            files: Vec::new(),
        };
        self.tracker
            .announce(&request)
            .await
            .context("withdraw rejected")?;
        info!("Withdrew offers from {}:{}", self.local_ip, self.port);
        Ok(())
    }
}

#[async_trait]
impl ReannounceHook for Announcer {
    async fn reannounce(&self) -> Result<()> {
        self.announce().await.map(|_| ())
    }
}
