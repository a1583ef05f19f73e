use anyhow::{Context, Result};
use config::{Config, File as ConfigFile};
use peershare_p2p::{normalize_base_url, PeerConfig, RetrievalConfig};
use peershare_registry::{HolderId, PeerRegistry, RegistryConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// A holder account the tracker is seeded with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HolderAccount {
    #[serde(default)]
    pub id: Option<u64>,
    pub label: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // Tracker
    pub tracker_host: IpAddr,
    pub tracker_port: u16,
    pub sweep_interval_secs: u64,
    pub staleness_secs: u64,
    pub holders: Vec<HolderAccount>,

    // Peer
    pub tracker_url: String,
    pub holder_id: Option<u64>,
    pub credential: Option<String>,
    pub peer_host: IpAddr,
    pub peer_port: u16,
    pub advertise_ip: Option<IpAddr>,
    pub shared_folder: PathBuf,
    pub download_folder: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub debounce_ms: u64,
    pub direct_timeout_ms: u64,
    pub public_timeout_ms: u64,
    pub enable_upnp: bool,
    pub upnp_lease_secs: u32,
    pub public_url: Option<String>,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            tracker_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tracker_port: 8000,
            sweep_interval_secs: 60,
            staleness_secs: 60,
            holders: Vec::new(),
            tracker_url: "http://127.0.0.1:8000".to_string(),
            holder_id: None,
            credential: None,
            peer_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            peer_port: 8001,
            advertise_ip: None,
            shared_folder: PathBuf::from("shared"),
            download_folder: PathBuf::from("downloads"),
            heartbeat_interval_secs: 30,
            debounce_ms: 1_000,
            direct_timeout_ms: 3_000,
            public_timeout_ms: 15_000,
            enable_upnp: false,
            upnp_lease_secs: 3_600,
            public_url: None,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Layer the optional TOML file and `PEERSHARE_*` environment variables
    /// over the built-in defaults.
    pub fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            default_config_path().filter(|path| path.exists())
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("PEERSHARE"));
        let source = builder.build()?;

        let mut config = Self {
            config_path: resolved_path,
            ..Self::default()
        };

        if let Some(host) = get_string_value(&source, &["tracker_host"]) {
            config.tracker_host = parse_ip(&host, "tracker_host")?;
        }
        config.tracker_port = get_u64_value(&source, &["tracker_port"], config.tracker_port as u64)?
            .try_into()
            .context("tracker_port out of range")?;
        config.sweep_interval_secs =
            get_u64_value(&source, &["sweep_interval_secs"], config.sweep_interval_secs)?;
        config.staleness_secs = get_u64_value(&source, &["staleness_secs"], config.staleness_secs)?;
        config.holders = match source.get::<Vec<HolderAccount>>("holders") {
            Ok(accounts) => accounts,
            Err(_) => match get_string_value(&source, &["holders"]) {
                Some(raw) => parse_holder_list(&raw)?,
                None => Vec::new(),
            },
        };

        if let Some(url) = get_string_value(&source, &["tracker_url"]) {
            config.tracker_url = url;
        }
        if let Some(raw) = get_string_value(&source, &["holder_id"]) {
            config.holder_id = Some(
                raw.parse()
                    .with_context(|| format!("holder_id must be a number, got {raw:?}"))?,
            );
        }
        config.credential = get_string_value(&source, &["credential", "token"]);
        if let Some(host) = get_string_value(&source, &["peer_host"]) {
            config.peer_host = parse_ip(&host, "peer_host")?;
        }
        config.peer_port = get_u64_value(&source, &["peer_port"], config.peer_port as u64)?
            .try_into()
            .context("peer_port out of range")?;
        if let Some(ip) = get_string_value(&source, &["advertise_ip"]) {
            config.advertise_ip = Some(parse_ip(&ip, "advertise_ip")?);
        }
        if let Some(path) = get_string_value(&source, &["shared_folder"]) {
            config.shared_folder = PathBuf::from(path);
        }
        if let Some(path) = get_string_value(&source, &["download_folder"]) {
            config.download_folder = PathBuf::from(path);
        }
        config.heartbeat_interval_secs = get_u64_value(
            &source,
            &["heartbeat_interval_secs"],
            config.heartbeat_interval_secs,
        )?;
        config.debounce_ms = get_u64_value(&source, &["debounce_ms"], config.debounce_ms)?;
        config.direct_timeout_ms =
            get_u64_value(&source, &["direct_timeout_ms"], config.direct_timeout_ms)?;
        config.public_timeout_ms =
            get_u64_value(&source, &["public_timeout_ms"], config.public_timeout_ms)?;
        config.enable_upnp = get_bool_value(&source, &["enable_upnp", "upnp"], config.enable_upnp);
        config.upnp_lease_secs =
            get_u64_value(&source, &["upnp_lease_secs"], config.upnp_lease_secs as u64)?
                .try_into()
                .context("upnp_lease_secs out of range")?;
        config.public_url = get_string_value(&source, &["public_url"]);

        if let Some(level) = get_string_value(&source, &["log_level"]) {
            config.log_level = level;
        }
        if let Some(format) = get_string_value(&source, &["log_format"]) {
            config.log_format = format;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!(
                "log_format must be 'pretty' or 'json', got '{}'",
                self.log_format
            );
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("log_level must not be empty");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than zero");
        }
        if self.staleness_secs == 0 {
            anyhow::bail!("staleness_secs must be greater than zero");
        }
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs must be greater than zero");
        }
        if self.direct_timeout_ms == 0 || self.public_timeout_ms == 0 {
            anyhow::bail!("download timeouts must be greater than zero");
        }
        if self.tracker_url.trim().is_empty() {
            anyhow::bail!("tracker_url must not be empty");
        }
        normalize_base_url(&self.tracker_url)
            .with_context(|| format!("invalid tracker_url '{}'", self.tracker_url))?;
        if let Some(url) = &self.public_url {
            normalize_base_url(url).with_context(|| format!("invalid public_url '{url}'"))?;
        }
        for account in &self.holders {
            if account.label.trim().is_empty() || account.token.trim().is_empty() {
                anyhow::bail!("holder accounts need both a label and a token");
            }
        }
        Ok(())
    }

    pub fn tracker_addr(&self) -> SocketAddr {
        SocketAddr::new(self.tracker_host, self.tracker_port)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            staleness_threshold: Duration::from_secs(self.staleness_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            direct_timeout: Duration::from_millis(self.direct_timeout_ms),
            public_timeout: Duration::from_millis(self.public_timeout_ms),
        }
    }

    /// In-memory registry seeded with the configured holder accounts.
    pub fn build_registry(&self) -> Result<PeerRegistry> {
        let registry = PeerRegistry::in_memory(self.registry_config());
        for account in &self.holders {
            let holder = match account.id {
                Some(id) => registry
                    .holders()
                    .register_with_id(HolderId(id), &account.label, &account.token),
                None => registry.holders().register(&account.label, &account.token),
            }
            .with_context(|| format!("failed to register holder '{}'", account.label))?;
            info!("Registered holder {} ({})", holder.label, holder.id);
        }
        Ok(registry)
    }

    /// Settings for a sharing peer. Requires a holder id and credential.
    pub fn peer_config(&self) -> Result<PeerConfig> {
        let holder_id = self
            .holder_id
            .context("holder_id is required to share files (--holder-id or PEERSHARE_HOLDER_ID)")?;
        let credential = self
            .credential
            .clone()
            .filter(|token| !token.trim().is_empty())
            .context("credential is required to share files (--token or PEERSHARE_CREDENTIAL)")?;

        let mut peer = PeerConfig::new(self.tracker_url.clone(), HolderId(holder_id), credential);
        peer.bind_host = self.peer_host;
        peer.port = self.peer_port;
        peer.advertise_ip = self.advertise_ip;
        peer.shared_folder = self.shared_folder.clone();
        peer.download_folder = self.download_folder.clone();
        peer.heartbeat_interval = Duration::from_secs(self.heartbeat_interval_secs);
        peer.debounce_window = Duration::from_millis(self.debounce_ms);
        peer.retrieval = self.retrieval_config();
        Ok(peer)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("peershare").join("peershare.toml"))
}

fn parse_ip(value: &str, key: &str) -> Result<IpAddr> {
    value
        .parse()
        .with_context(|| format!("{key} must be an IP address, got {value:?}"))
}

/// `label:token[,label:token...]`, the flat form used by `PEERSHARE_HOLDERS`.
pub fn parse_holder_list(raw: &str) -> Result<Vec<HolderAccount>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (label, token) = entry
                .split_once(':')
                .with_context(|| format!("holder entry {entry:?} is not label:token"))?;
            Ok(HolderAccount {
                id: None,
                label: label.trim().to_string(),
                token: token.trim().to_string(),
            })
        })
        .collect()
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_u64_value(config: &Config, keys: &[&str], default: u64) -> Result<u64> {
    for key in keys {
        if let Ok(value) = config.get_int(key) {
            return u64::try_from(value).with_context(|| format!("{key} must not be negative"));
        }
        if let Some(raw) = get_string_value(config, &[key]) {
            return raw
                .parse()
                .with_context(|| format!("{key} must be a number, got {raw:?}"));
        }
    }
    Ok(default)
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}
