//! A running peer: file server, folder watcher and heartbeat loop bound to
//! one configuration.

use crate::announcer::Announcer;
use crate::file_server::FileServer;
use crate::heartbeat::{HeartbeatSender, DEFAULT_HEARTBEAT_INTERVAL};
use crate::nat::{detect_local_ip, PublicEndpointProvider};
use crate::retrieval::{RetrievalConfig, Retriever};
use crate::tracker::TrackerClient;
use crate::watcher::{ChangeWatcher, DEFAULT_DEBOUNCE_WINDOW};
use anyhow::{Context, Result};
use peershare_registry::{HolderId, SearchGroup};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Everything a peer session needs to run.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    pub tracker_url: String,
    pub holder_id: HolderId,
    pub credential: String,
    /// Interface the file server binds to.
    pub bind_host: IpAddr,
    /// File server port; `0` picks a free one.
    pub port: u16,
    /// Address advertised for direct downloads; detected when unset.
    pub advertise_ip: Option<IpAddr>,
    pub shared_folder: PathBuf,
    pub download_folder: PathBuf,
    pub heartbeat_interval: Duration,
    pub debounce_window: Duration,
    pub retrieval: RetrievalConfig,
}

impl PeerConfig {
    pub fn new(tracker_url: impl Into<String>, holder_id: HolderId, credential: impl Into<String>) -> Self {
        Self {
            tracker_url: tracker_url.into(),
            holder_id,
            credential: credential.into(),
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8001,
            advertise_ip: None,
            shared_folder: PathBuf::from("shared"),
            download_folder: PathBuf::from("downloads"),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            retrieval: RetrievalConfig::default(),
        }
    }
}

struct Services {
    server: FileServer,
    watcher: ChangeWatcher,
    heartbeat: HeartbeatSender,
    announcer: Arc<Announcer>,
}

pub struct PeerSession {
    config: PeerConfig,
    public: Arc<dyn PublicEndpointProvider>,
    tracker: TrackerClient,
    retriever: Retriever,
    services: Option<Services>,
}

impl PeerSession {
    /// Create the folders, start serving and watching, announce once and
    /// begin heartbeats.
    pub async fn start(config: PeerConfig, public: Arc<dyn PublicEndpointProvider>) -> Result<Self> {
        let tracker = TrackerClient::new(&config.tracker_url, Some(config.credential.clone()))?;
        let retriever = Retriever::new(config.retrieval)?;
        let services = start_services(&config, tracker.clone(), public.clone()).await?;
        Ok(Self {
            config,
            public,
            tracker,
            retriever,
            services: Some(services),
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &TrackerClient {
        &self.tracker
    }

    /// Port the file server actually listens on.
    pub fn port(&self) -> Option<u16> {
        self.services.as_ref().map(|s| s.server.port())
    }

    /// Announce the shared folder now.
    pub async fn announce(&self) -> Result<usize> {
        let services = self
            .services
            .as_ref()
            .context("peer session is not running")?;
        services.announcer.announce().await
    }

    /// Replace the running services with ones built from `config`. The old
    /// server, watcher and heartbeat are fully stopped first so two
    /// configurations never run side by side.
    pub async fn reconfigure(&mut self, config: PeerConfig) -> Result<()> {
        if let Some(services) = self.services.take() {
            stop_services(services, self.public.as_ref()).await;
        }

        self.tracker = TrackerClient::new(&config.tracker_url, Some(config.credential.clone()))?;
        self.retriever = Retriever::new(config.retrieval)?;
        let services = start_services(&config, self.tracker.clone(), self.public.clone()).await?;
        self.services = Some(services);
        self.config = config;
        info!("Peer session reconfigured");
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if let Some(services) = self.services.take() {
            stop_services(services, self.public.as_ref()).await;
        }
        info!("Peer session stopped");
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchGroup>> {
        Ok(self.tracker.search(query).await?)
    }

    /// Fetch `group` into the configured download folder.
    pub async fn download(
        &self,
        group: &SearchGroup,
        progress: &(dyn Fn(u64) + Send + Sync),
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<PathBuf> {
        Ok(self
            .retriever
            .retrieve(group, &self.config.download_folder, progress, cancel)
            .await?)
    }
}

async fn start_services(
    config: &PeerConfig,
    tracker: TrackerClient,
    public: Arc<dyn PublicEndpointProvider>,
) -> Result<Services> {
    ensure_dir(&config.shared_folder).await?;
    ensure_dir(&config.download_folder).await?;

    let server = FileServer::start(
        &config.shared_folder,
        SocketAddr::new(config.bind_host, config.port),
    )
    .await?;

    let local_ip = config.advertise_ip.unwrap_or_else(detect_local_ip);
    let announcer = Arc::new(Announcer::new(
        tracker,
        config.holder_id,
        config.shared_folder.clone(),
        local_ip,
        server.port(),
        public,
    ));

    let watcher = ChangeWatcher::start(
        &config.shared_folder,
        config.debounce_window,
        announcer.clone(),
    )?;

    if let Err(err) = announcer.announce().await {
        warn!("Initial announce failed, heartbeat will retry: {:#}", err);
    }

    let heartbeat = HeartbeatSender::spawn(announcer.clone(), config.heartbeat_interval);

    Ok(Services {
        server,
        watcher,
        heartbeat,
        announcer,
    })
}

async fn stop_services(services: Services, public: &dyn PublicEndpointProvider) {
    services.heartbeat.stop().await;
    services.watcher.stop().await;
    if let Err(err) = services.announcer.withdraw().await {
        warn!("Failed to withdraw offers: {:#}", err);
    }
    services.server.stop().await;
    public.release().await;
}

async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))
}
