//! Announce, heartbeat and search over the offer store.

use crate::clock::{Clock, SystemClock};
use crate::errors::{RegistryError, Result};
use crate::holders::{HolderDirectory, MemoryHolderDirectory};
use crate::store::{MemoryOfferStore, OfferStore};
use crate::types::{
    Endpoint, HeartbeatReport, HolderId, ObservedEndpoint, SearchGroup, SearchPeer,
};
use peershare_files::ContentRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Registry tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Offers older than this are removed by the sweeper.
    pub staleness_threshold: Duration,
    /// Period of the sweeper loop.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Snapshot counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub holders: usize,
    pub records: usize,
    pub offers: usize,
}

/// Server-side view of which holder serves which file.
#[derive(Clone)]
pub struct PeerRegistry {
    store: Arc<dyn OfferStore>,
    holders: Arc<dyn HolderDirectory>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

impl PeerRegistry {
    pub fn new(
        store: Arc<dyn OfferStore>,
        holders: Arc<dyn HolderDirectory>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            holders,
            clock,
            config,
        }
    }

    /// Registry backed by in-memory tables and the wall clock.
    pub fn in_memory(config: RegistryConfig) -> Self {
        Self::new(
            Arc::new(MemoryOfferStore::new()),
            Arc::new(MemoryHolderDirectory::new()),
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn holders(&self) -> &Arc<dyn HolderDirectory> {
        &self.holders
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Replace the offers this holder made from `endpoint` with `files`.
    ///
    /// Every file is validated before anything is written, so a rejected
    /// announce leaves the registry untouched.
    pub fn announce(
        &self,
        holder_id: HolderId,
        endpoint: Endpoint,
        files: Vec<ContentRecord>,
    ) -> Result<usize> {
        for file in &files {
            file.validate()?;
        }
        validate_endpoint(&endpoint)?;

        if self.holders.resolve(holder_id).is_none() {
            return Err(RegistryError::NotFound(format!("holder {holder_id}")));
        }

        let now = self.clock.now();
        let announced = self
            .store
            .replace_endpoint_offers(holder_id, &endpoint, &files, now)?;

        info!(
            "Holder {} announced {} file(s) from {}:{}",
            holder_id, announced, endpoint.ip_address, endpoint.port
        );
        Ok(announced)
    }

    /// Refresh liveness of every offer the holder owns.
    ///
    /// Endpoints are never rewritten here. When `observed` names an address
    /// that none of the holder's offers use, the report flags drift so the
    /// caller can ask the holder to re-announce.
    pub fn heartbeat(
        &self,
        holder_id: HolderId,
        observed: Option<ObservedEndpoint>,
    ) -> Result<HeartbeatReport> {
        let now = self.clock.now();
        let refreshed = self.store.refresh_holder(holder_id, now)?;

        let endpoint_drift = match observed {
            Some(observed) if !observed.is_empty() && refreshed > 0 => {
                let offers = self.store.offers_for_holder(holder_id)?;
                !offers.iter().any(|offer| observed.matches(offer))
            }
            _ => false,
        };

        debug!(
            "Heartbeat from holder {}: {} offer(s) refreshed, drift={}",
            holder_id, refreshed, endpoint_drift
        );
        Ok(HeartbeatReport {
            refreshed,
            endpoint_drift,
        })
    }

    /// Files whose display name contains `query`, each with its live holders.
    ///
    /// Expired offers are swept first, so a holder that stopped heartbeating
    /// is never listed past the staleness threshold.
    pub fn search(&self, query: &str) -> Result<Vec<SearchGroup>> {
        self.sweep()?;
        let matches = self.store.search(query)?;
        let mut groups = Vec::with_capacity(matches.len());

        for (record, offers) in matches {
            let peers: Vec<SearchPeer> = offers
                .into_iter()
                .filter_map(|offer| {
                    let holder = self.holders.resolve(offer.holder_id)?;
                    Some(SearchPeer {
                        holder_id: offer.holder_id,
                        ip_address: offer.ip_address,
                        port: offer.port,
                        public_url: offer.public_url,
                        holder_label: holder.label,
                        last_heartbeat: offer.last_heartbeat,
                    })
                })
                .collect();

            if peers.is_empty() {
                continue;
            }
            groups.push(SearchGroup {
                fingerprint: record.fingerprint,
                display_name: record.display_name,
                size_bytes: record.size_bytes,
                peers,
            });
        }

        Ok(groups)
    }

    /// Remove offers whose heartbeat is older than the staleness threshold.
    pub fn sweep(&self) -> Result<usize> {
        let threshold = chrono::Duration::from_std(self.config.staleness_threshold)
            .map_err(|e| RegistryError::Validation(format!("staleness threshold: {e}")))?;
        let cutoff = self.clock.now() - threshold;
        let removed = self.store.remove_stale(cutoff)?;
        if removed > 0 {
            info!("Removed {} stale offer(s)", removed);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        let counts = self.store.counts()?;
        Ok(RegistryStats {
            holders: self.holders.count(),
            records: counts.records,
            offers: counts.offers,
        })
    }
}

fn validate_endpoint(endpoint: &Endpoint) -> Result<()> {
    if endpoint.port == 0 {
        return Err(RegistryError::Validation("port must be non-zero".to_string()));
    }
    if let Some(public_url) = &endpoint.public_url {
        let candidate = if public_url.contains("://") {
            public_url.clone()
        } else {
            format!("http://{public_url}")
        };
        Url::parse(&candidate).map_err(|e| {
            RegistryError::Validation(format!("invalid public_url '{public_url}': {e}"))
        })?;
    }
    Ok(())
}
