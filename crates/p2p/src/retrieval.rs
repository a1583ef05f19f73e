//! Multi-path download of a searched file.
//!
//! Every holder offers up to two paths: its direct LAN endpoint and, when it
//! has one, a public URL. Paths are tried strictly in order (holder by
//! holder, direct before public) and the first one that delivers the whole
//! body wins. Each path has its own timeout, applied to the wait for
//! response headers and to every wait for the next body chunk, so a slow
//! but steady transfer of a large file is never cut off.

use crate::address::{download_url, ensure_http_scheme};
use crate::error::{AttemptFailure, RetrievalError};
use peershare_files::validate_display_name;
use peershare_registry::SearchGroup;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Which of a holder's addresses a candidate uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Direct,
    Public,
}

/// One concrete download path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Position of the holder in the search group.
    pub peer_index: usize,
    pub holder_label: String,
    pub kind: PathKind,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    pub direct_timeout: Duration,
    pub public_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            direct_timeout: Duration::from_secs(3),
            public_timeout: Duration::from_secs(15),
        }
    }
}

/// Ordered list of paths to try for `group`.
pub fn plan_candidates(group: &SearchGroup, config: &RetrievalConfig) -> Vec<Candidate> {
    let mut plan = Vec::with_capacity(group.peers.len() * 2);
    for (peer_index, peer) in group.peers.iter().enumerate() {
        let host = match peer.ip_address {
            std::net::IpAddr::V4(ip) => ip.to_string(),
            std::net::IpAddr::V6(ip) => format!("[{ip}]"),
        };
        plan.push(Candidate {
            peer_index,
            holder_label: peer.holder_label.clone(),
            kind: PathKind::Direct,
            base_url: format!("http://{}:{}", host, peer.port),
            timeout: config.direct_timeout,
        });

        if let Some(public_url) = peer.public_url.as_deref().map(str::trim) {
            if !public_url.is_empty() {
                plan.push(Candidate {
                    peer_index,
                    holder_label: peer.holder_label.clone(),
                    kind: PathKind::Public,
                    base_url: ensure_http_scheme(public_url),
                    timeout: config.public_timeout,
                });
            }
        }
    }
    plan
}

/// Why a single attempt ended.
enum AttemptError {
    /// Try the next candidate.
    Failed(String),
    /// Abort the whole retrieval.
    Fatal(RetrievalError),
}

/// Sequential downloader.
#[derive(Clone)]
pub struct Retriever {
    client: Client,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Download `group` into `destination`, returning the final path.
    ///
    /// `progress` receives the cumulative byte count of the current attempt.
    /// When `cancel` flips to `true` the in-flight read is abandoned and
    /// `Cancelled` is returned; a partial `.part` file may remain but the
    /// final name is never written.
    pub async fn retrieve(
        &self,
        group: &SearchGroup,
        destination: &Path,
        progress: &(dyn Fn(u64) + Send + Sync),
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<PathBuf, RetrievalError> {
        validate_display_name(&group.display_name)
            .map_err(|_| RetrievalError::InvalidName(group.display_name.clone()))?;

        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| RetrievalError::io(destination, e))?;

        let final_path = destination.join(&group.display_name);
        let part_path = destination.join(format!(".{}.part", group.display_name));
        let mut attempts = Vec::new();

        for candidate in plan_candidates(group, &self.config) {
            if is_cancelled(&cancel) {
                return Err(RetrievalError::Cancelled);
            }

            let url = match download_url(&candidate.base_url, &group.display_name) {
                Ok(url) => url,
                Err(err) => {
                    attempts.push(failure(&candidate, &candidate.base_url, err.to_string()));
                    continue;
                }
            };

            debug!(
                "Trying {} path {:?} of holder #{} ({})",
                url, candidate.kind, candidate.peer_index, candidate.holder_label
            );
            match self
                .attempt(&candidate, url.clone(), &part_path, progress, &mut cancel)
                .await
            {
                Ok(bytes) => {
                    tokio::fs::rename(&part_path, &final_path)
                        .await
                        .map_err(|e| RetrievalError::io(&final_path, e))?;
                    info!(
                        "Downloaded {} ({} bytes) from {}",
                        group.display_name, bytes, candidate.holder_label
                    );
                    return Ok(final_path);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Failed(reason)) => {
                    warn!("Download path {} failed: {}", url, reason);
                    attempts.push(failure(&candidate, url.as_str(), reason));
                }
            }
        }

        if !attempts.is_empty() {
            let _ = tokio::fs::remove_file(&part_path).await;
        }
        Err(RetrievalError::AllPathsFailed { attempts })
    }

    async fn attempt(
        &self,
        candidate: &Candidate,
        url: url::Url,
        part_path: &Path,
        progress: &(dyn Fn(u64) + Send + Sync),
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> Result<u64, AttemptError> {
        let limit = candidate.timeout;

        let mut response = tokio::select! {
            sent = timeout(limit, self.client.get(url).send()) => match sent {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => return Err(AttemptError::Failed(format!("request failed: {err}"))),
                Err(_) => return Err(AttemptError::Failed(format!("no response within {limit:?}"))),
            },
            _ = cancelled(cancel) => return Err(AttemptError::Fatal(RetrievalError::Cancelled)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Failed(format!("HTTP {status}")));
        }

        let mut file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| AttemptError::Fatal(RetrievalError::io(part_path, e)))?;
        let mut received = 0u64;

        loop {
            let next = tokio::select! {
                chunk = timeout(limit, response.chunk()) => chunk,
                _ = cancelled(cancel) => return Err(AttemptError::Fatal(RetrievalError::Cancelled)),
            };
            let chunk = match next {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(err)) => {
                    return Err(AttemptError::Failed(format!(
                        "transfer interrupted after {received} bytes: {err}"
                    )))
                }
                Err(_) => {
                    return Err(AttemptError::Failed(format!(
                        "stalled for {limit:?} after {received} bytes"
                    )))
                }
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptError::Fatal(RetrievalError::io(part_path, e)))?;
            received += chunk.len() as u64;
            progress(received);
        }

        file.flush()
            .await
            .map_err(|e| AttemptError::Fatal(RetrievalError::io(part_path, e)))?;
        Ok(received)
    }
}

fn failure(candidate: &Candidate, url: &str, reason: String) -> AttemptFailure {
    AttemptFailure {
        holder_label: candidate.holder_label.clone(),
        url: url.to_string(),
        reason,
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map_or(false, |rx| *rx.borrow())
}

/// Resolves once cancellation is requested; never resolves without a signal.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            if rx.wait_for(|flag| *flag).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
