//! Storage for content records and peer offers.

use crate::types::{Endpoint, HolderId, PeerOffer};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use peershare_files::{ContentRecord, Fingerprint};
use std::collections::HashMap;

/// Row counts for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub records: usize,
    pub offers: usize,
}

/// Trait for registry storage backends.
///
/// Every method is one atomic unit: a concurrent reader never observes a
/// half-applied call.
pub trait OfferStore: Send + Sync {
    /// Drop every offer created from `(holder_id, endpoint.ip_address, endpoint.port)`,
    /// then insert missing content records (first writer wins) and upsert one
    /// offer per record keyed by `(holder_id, fingerprint)`, stamped with `now`.
    fn replace_endpoint_offers(
        &self,
        holder_id: HolderId,
        endpoint: &Endpoint,
        records: &[ContentRecord],
        now: DateTime<Utc>,
    ) -> Result<usize>;

    /// Set `last_heartbeat = now` on every offer of `holder_id`. Returns rows touched.
    fn refresh_holder(&self, holder_id: HolderId, now: DateTime<Utc>) -> Result<usize>;

    /// Delete offers whose heartbeat is strictly older than `cutoff`.
    fn remove_stale(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Offers currently held by one holder.
    fn offers_for_holder(&self, holder_id: HolderId) -> Result<Vec<PeerOffer>>;

    /// Retrieve a content record by fingerprint.
    fn get_record(&self, fingerprint: &Fingerprint) -> Result<Option<ContentRecord>>;

    /// Records whose display name contains `query` (case-insensitive), in
    /// first-seen order, each paired with its offers newest heartbeat first.
    /// Records without offers are omitted.
    fn search(&self, query: &str) -> Result<Vec<(ContentRecord, Vec<PeerOffer>)>>;

    /// Count stored rows.
    fn counts(&self) -> Result<StoreCounts>;
}

struct StoredRecord {
    record: ContentRecord,
    arrival: u64,
}

#[derive(Default)]
struct RegistryTables {
    /// Primary index: fingerprint -> first-seen record
    records: HashMap<Fingerprint, StoredRecord>,
    next_arrival: u64,

    /// Unique offer per (holder, fingerprint)
    offers: HashMap<(HolderId, Fingerprint), PeerOffer>,
}

/// In-memory store. All tables sit behind a single lock so that announce,
/// heartbeat and sweep are each applied atomically.
#[derive(Default)]
pub struct MemoryOfferStore {
    tables: RwLock<RegistryTables>,
}

impl MemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OfferStore for MemoryOfferStore {
    fn replace_endpoint_offers(
        &self,
        holder_id: HolderId,
        endpoint: &Endpoint,
        records: &[ContentRecord],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tables = self.tables.write();

        tables.offers.retain(|(holder, _), offer| {
            !(*holder == holder_id && endpoint.same_address(offer.ip_address, offer.port))
        });

        for record in records {
            if !tables.records.contains_key(&record.fingerprint) {
                let arrival = tables.next_arrival;
                tables.next_arrival += 1;
                tables.records.insert(
                    record.fingerprint,
                    StoredRecord {
                        record: record.clone(),
                        arrival,
                    },
                );
            }

            tables.offers.insert(
                (holder_id, record.fingerprint),
                PeerOffer {
                    holder_id,
                    fingerprint: record.fingerprint,
                    ip_address: endpoint.ip_address,
                    port: endpoint.port,
                    public_url: endpoint.public_url.clone(),
                    last_heartbeat: now,
                },
            );
        }

        Ok(records.len())
    }

    fn refresh_holder(&self, holder_id: HolderId, now: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write();
        let mut refreshed = 0;
        for offer in tables
            .offers
            .values_mut()
            .filter(|offer| offer.holder_id == holder_id)
        {
            offer.last_heartbeat = now;
            refreshed += 1;
        }
        Ok(refreshed)
    }

    fn remove_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.write();
        let before = tables.offers.len();
        tables
            .offers
            .retain(|_, offer| offer.last_heartbeat >= cutoff);
        Ok(before - tables.offers.len())
    }

    fn offers_for_holder(&self, holder_id: HolderId) -> Result<Vec<PeerOffer>> {
        let tables = self.tables.read();
        let mut offers: Vec<PeerOffer> = tables
            .offers
            .values()
            .filter(|offer| offer.holder_id == holder_id)
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(offers)
    }

    fn get_record(&self, fingerprint: &Fingerprint) -> Result<Option<ContentRecord>> {
        let tables = self.tables.read();
        Ok(tables.records.get(fingerprint).map(|s| s.record.clone()))
    }

    fn search(&self, query: &str) -> Result<Vec<(ContentRecord, Vec<PeerOffer>)>> {
        let needle = query.to_lowercase();
        let tables = self.tables.read();

        let mut matches: Vec<&StoredRecord> = tables
            .records
            .values()
            .filter(|stored| stored.record.display_name.to_lowercase().contains(&needle))
            .collect();
        matches.sort_by_key(|stored| stored.arrival);

        let mut by_fingerprint: HashMap<Fingerprint, Vec<PeerOffer>> = HashMap::new();
        for offer in tables.offers.values() {
            by_fingerprint
                .entry(offer.fingerprint)
                .or_default()
                .push(offer.clone());
        }

        let mut results = Vec::new();
        for stored in matches {
            let Some(mut offers) = by_fingerprint.remove(&stored.record.fingerprint) else {
                continue;
            };
            offers.sort_by(|a, b| {
                b.last_heartbeat
                    .cmp(&a.last_heartbeat)
                    .then(a.holder_id.cmp(&b.holder_id))
            });
            results.push((stored.record.clone(), offers));
        }

        Ok(results)
    }

    fn counts(&self) -> Result<StoreCounts> {
        let tables = self.tables.read();
        Ok(StoreCounts {
            records: tables.records.len(),
            offers: tables.offers.len(),
        })
    }
}
