use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use peershare_p2p::{
    NoPublicEndpoint, PeerSession, PublicEndpointProvider, RetrievalError, Retriever,
    StaticPublicUrl, TrackerClient, UpnpPortMapper,
};
use peershare_registry::SearchGroup;
use peershare_rpc::start_server;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod version;

use config::AppConfig;
use version::{git_commit_hash, PEERSHARE_VERSION};

const UPNP_DESCRIPTION: &str = "PeerShare file server";

fn build_cli() -> Command {
    Command::new("peershare-node")
        .version(PEERSHARE_VERSION)
        .about("PeerShare tracker and peer")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format")
                .global(true),
        )
        .arg(
            Arg::new("tracker-url")
                .long("tracker-url")
                .value_name("URL")
                .help("Tracker base URL used by peer, search and download")
                .global(true),
        )
        .arg(
            Arg::new("download-folder")
                .long("download-folder")
                .value_name("DIR")
                .help("Folder downloaded files are written to")
                .global(true),
        )
        .subcommand(
            Command::new("tracker")
                .about("Run the tracker API and liveness sweeper")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("IP")
                        .value_parser(value_parser!(std::net::IpAddr))
                        .help("Override tracker bind address"),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("Override tracker port"),
                )
                .arg(
                    Arg::new("sweep-interval")
                        .long("sweep-interval")
                        .value_name("SECS")
                        .value_parser(value_parser!(u64))
                        .help("Seconds between liveness sweeps"),
                )
                .arg(
                    Arg::new("staleness")
                        .long("staleness")
                        .value_name("SECS")
                        .value_parser(value_parser!(u64))
                        .help("Seconds without a heartbeat before an offer is removed"),
                ),
        )
        .subcommand(
            Command::new("peer")
                .about("Share a folder and keep the tracker informed")
                .arg(
                    Arg::new("holder-id")
                        .long("holder-id")
                        .value_name("ID")
                        .value_parser(value_parser!(u64))
                        .help("Holder id issued by the tracker"),
                )
                .arg(
                    Arg::new("token")
                        .long("token")
                        .value_name("TOKEN")
                        .help("Bearer credential for the holder"),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("File server port"),
                )
                .arg(
                    Arg::new("shared-folder")
                        .long("shared-folder")
                        .value_name("DIR")
                        .help("Folder to share"),
                )
                .arg(
                    Arg::new("advertise-ip")
                        .long("advertise-ip")
                        .value_name("IP")
                        .value_parser(value_parser!(std::net::IpAddr))
                        .help("Address announced for direct downloads"),
                )
                .arg(
                    Arg::new("heartbeat-interval")
                        .long("heartbeat-interval")
                        .value_name("SECS")
                        .value_parser(value_parser!(u64))
                        .help("Seconds between heartbeats"),
                )
                .arg(
                    Arg::new("public-url")
                        .long("public-url")
                        .value_name("URL")
                        .help("Publicly reachable URL of this peer, e.g. a tunnel"),
                )
                .arg(
                    Arg::new("upnp")
                        .long("upnp")
                        .action(ArgAction::SetTrue)
                        .help("Map the file server port on the gateway via UPnP"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Search the tracker for shared files")
                .arg(
                    Arg::new("query")
                        .value_name("QUERY")
                        .default_value("")
                        .help("Case-insensitive name fragment"),
                ),
        )
        .subcommand(
            Command::new("download")
                .about("Search and download one result")
                .arg(
                    Arg::new("query")
                        .value_name("QUERY")
                        .required(true)
                        .help("Case-insensitive name fragment"),
                )
                .arg(
                    Arg::new("pick")
                        .long("pick")
                        .value_name("N")
                        .value_parser(value_parser!(usize))
                        .default_value("1")
                        .help("Which search result to download, counting from 1"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = load_config_with_overrides(&matches)?;
    init_logging(&config)?;

    info!(
        "PeerShare {} (commit {}) starting",
        PEERSHARE_VERSION,
        git_commit_hash()
    );
    if let Some(path) = &config.config_path {
        debug!("Loaded configuration from {}", path.display());
    }

    match matches.subcommand() {
        Some(("tracker", _)) => run_tracker(&config).await,
        Some(("peer", _)) => run_peer(&config).await,
        Some(("search", sub)) => {
            let query = sub.get_one::<String>("query").map(String::as_str).unwrap_or("");
            run_search(&config, query).await
        }
        Some(("download", sub)) => {
            let query = sub
                .get_one::<String>("query")
                .context("download needs a query")?;
            let pick = sub.get_one::<usize>("pick").copied().unwrap_or(1);
            run_download(&config, query, pick).await
        }
        _ => Err(anyhow!("Unknown command")),
    }
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(url) = matches.get_one::<String>("tracker-url") {
        config.tracker_url = url.clone();
    }

    if let Some(folder) = matches.get_one::<String>("download-folder") {
        config.download_folder = PathBuf::from(folder);
    }

    match matches.subcommand() {
        Some(("tracker", sub)) => {
            if let Some(host) = sub.get_one::<std::net::IpAddr>("host") {
                config.tracker_host = *host;
            }
            if let Some(port) = sub.get_one::<u16>("port") {
                config.tracker_port = *port;
            }
            if let Some(secs) = sub.get_one::<u64>("sweep-interval") {
                config.sweep_interval_secs = *secs;
            }
            if let Some(secs) = sub.get_one::<u64>("staleness") {
                config.staleness_secs = *secs;
            }
        }
        Some(("peer", sub)) => {
            if let Some(id) = sub.get_one::<u64>("holder-id") {
                config.holder_id = Some(*id);
            }
            if let Some(token) = sub.get_one::<String>("token") {
                config.credential = Some(token.clone());
            }
            if let Some(port) = sub.get_one::<u16>("port") {
                config.peer_port = *port;
            }
            if let Some(folder) = sub.get_one::<String>("shared-folder") {
                config.shared_folder = PathBuf::from(folder);
            }
            if let Some(ip) = sub.get_one::<std::net::IpAddr>("advertise-ip") {
                config.advertise_ip = Some(*ip);
            }
            if let Some(secs) = sub.get_one::<u64>("heartbeat-interval") {
                config.heartbeat_interval_secs = *secs;
            }
            if let Some(url) = sub.get_one::<String>("public-url") {
                config.public_url = Some(url.clone());
            }
            if sub.get_flag("upnp") {
                config.enable_upnp = true;
            }
        }
        _ => {}
    }
}

async fn run_tracker(config: &AppConfig) -> Result<()> {
    let addr = config.tracker_addr();
    ensure_port_available(addr, "Tracker").map_err(|err| anyhow!(err))?;

    let registry = config.build_registry()?;
    if config.holders.is_empty() {
        warn!("No holder accounts configured; every announce will be rejected");
    }
    info!(
        "Tracker sweeping every {}s, staleness threshold {}s",
        config.sweep_interval_secs, config.staleness_secs
    );

    start_server(registry, &addr.to_string(), shutdown_signal()).await
}

async fn run_peer(config: &AppConfig) -> Result<()> {
    let peer_config = config.peer_config()?;
    if peer_config.port != 0 {
        ensure_port_available(
            SocketAddr::new(peer_config.bind_host, peer_config.port),
            "File server",
        )
        .map_err(|err| anyhow!(err))?;
    }

    let public = public_endpoint_provider(config);
    let mut session = PeerSession::start(peer_config, public).await?;
    info!(
        "Sharing {} on port {} via tracker {}",
        session.config().shared_folder.display(),
        session.port().unwrap_or_default(),
        session.tracker().base_url()
    );

    shutdown_signal().await;
    session.shutdown().await;
    Ok(())
}

async fn run_search(config: &AppConfig, query: &str) -> Result<()> {
    let tracker = TrackerClient::new(&config.tracker_url, None)?;
    let groups = tracker.search(query).await?;
    if groups.is_empty() {
        println!("No shared files match '{query}'");
    } else {
        print_groups(&groups);
    }
    Ok(())
}

async fn run_download(config: &AppConfig, query: &str, pick: usize) -> Result<()> {
    let tracker = TrackerClient::new(&config.tracker_url, None)?;
    let groups = tracker.search(query).await?;
    if groups.is_empty() {
        anyhow::bail!("No shared files match '{query}'");
    }
    let group = pick
        .checked_sub(1)
        .and_then(|index| groups.get(index))
        .with_context(|| format!("--pick must be between 1 and {}", groups.len()))?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = cancel_tx.send(true);
    });

    let total = group.size_bytes;
    let progress = move |received: u64| {
        debug!("Received {} of {} bytes", received, total);
    };

    info!(
        "Downloading {} ({} bytes) from {} holder(s)",
        group.display_name,
        group.size_bytes,
        group.peers.len()
    );
    let retriever = Retriever::new(config.retrieval_config())?;
    match retriever
        .retrieve(group, &config.download_folder, &progress, Some(cancel_rx))
        .await
    {
        Ok(path) => {
            println!("Saved {}", path.display());
            Ok(())
        }
        Err(RetrievalError::AllPathsFailed { attempts }) => {
            for attempt in &attempts {
                warn!("Download path failed: {}", attempt);
            }
            anyhow::bail!(
                "Could not download {} from any holder ({} paths tried)",
                group.display_name,
                attempts.len()
            )
        }
        Err(err) => Err(err.into()),
    }
}

fn print_groups(groups: &[SearchGroup]) {
    for (index, group) in groups.iter().enumerate() {
        println!(
            "[{}] {} ({} bytes) {}",
            index + 1,
            group.display_name,
            group.size_bytes,
            group.fingerprint
        );
        for peer in &group.peers {
            let public = peer
                .public_url
                .as_deref()
                .map(|url| format!(" public {url}"))
                .unwrap_or_default();
            println!(
                "    {} at {}{} (last seen {})",
                peer.holder_label,
                SocketAddr::new(peer.ip_address, peer.port),
                public,
                peer.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
}

fn public_endpoint_provider(config: &AppConfig) -> Arc<dyn PublicEndpointProvider> {
    if let Some(url) = &config.public_url {
        info!("Advertising static public URL {}", url);
        Arc::new(StaticPublicUrl::new(url))
    } else if config.enable_upnp {
        info!("UPnP port mapping enabled");
        Arc::new(UpnpPortMapper::new(config.upnp_lease_secs, UPNP_DESCRIPTION))
    } else {
        Arc::new(NoPublicEndpoint)
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => {
            warn!("Failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}

fn ensure_port_available(addr: SocketAddr, label: &str) -> Result<(), String> {
    match TcpListener::bind(addr) {
        Ok(listener) => drop(listener),
        Err(err) => {
            return Err(format!(
                "{label} port {addr} is not available for binding: {err}"
            ))
        }
    }
    Ok(())
}
