use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::warn;

use super::{DetailWrite, ListingFilter, ListingStore, StoreStats};
use crate::error::{Result, ScoutError};
use crate::models::{
    DetailRecord, ListingRecord, RunCounts, RunId, RunStatus, ScrapeRun, SearchCriteria,
    StoredDetail, Vin,
};

#[derive(Default)]
struct Tables {
    listings: HashMap<(String, String), ListingRecord>,
    details: HashMap<Vin, StoredDetail>,
    runs: BTreeMap<RunId, ScrapeRun>,
}

impl Tables {
    fn upsert_listing(&mut self, listing: &ListingRecord) {
        let mut incoming = listing.clone();
        incoming.sanitize();

        let key = (incoming.source_site.clone(), incoming.local_id.clone());
        match self.listings.get_mut(&key) {
            Some(stored) => stored.merge_from(&incoming),
            None => {
                self.listings.insert(key, incoming);
            }
        }
    }
}

/// Process-local store with the same merge rules as [`super::PostgresStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    skipped: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut listings: Vec<ListingRecord>) -> Vec<ListingRecord> {
    listings.sort_by(|a, b| {
        b.scraped_at
            .cmp(&a.scraped_at)
            .then_with(|| a.source_site.cmp(&b.source_site))
            .then_with(|| a.local_id.cmp(&b.local_id))
    });
    listings
}

fn page<T>(items: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<()> {
        self.tables.write().await.upsert_listing(listing);
        Ok(())
    }

    async fn upsert_detail(&self, detail: &DetailRecord) -> Result<DetailWrite> {
        let Some(vin) = detail.vin().cloned() else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!("Skipping detail for {} - no VIN", detail.listing.local_id);
            return Ok(DetailWrite::Skipped);
        };

        let mut tables = self.tables.write().await;
        tables.upsert_listing(&detail.listing);

        let observed_at = detail.listing.updated_at;
        let stored = tables.details.entry(vin.clone()).or_insert_with(|| StoredDetail {
            vin,
            source_site: None,
            local_id: None,
            spec: Default::default(),
            scraped_at: observed_at,
        });
        stored.source_site = Some(detail.listing.source_site.clone());
        stored.local_id = Some(detail.listing.local_id.clone());
        stored.spec.merge_from(&detail.spec);
        stored.scraped_at = stored.scraped_at.max(observed_at);

        Ok(DetailWrite::Stored)
    }

    fn skipped_details(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    async fn get_listing(
        &self,
        source_site: &str,
        local_id: &str,
    ) -> Result<Option<ListingRecord>> {
        let key = (source_site.to_string(), local_id.to_string());
        Ok(self.tables.read().await.listings.get(&key).cloned())
    }

    async fn get_detail(&self, vin: &Vin) -> Result<Option<StoredDetail>> {
        Ok(self.tables.read().await.details.get(vin).cloned())
    }

    async fn listings_without_details(&self, limit: i64) -> Result<Vec<ListingRecord>> {
        let tables = self.tables.read().await;
        let pending = tables
            .listings
            .values()
            .filter(|l| matches!(&l.vin, Some(vin) if !tables.details.contains_key(vin)))
            .cloned()
            .collect();
        Ok(page(newest_first(pending), 0, limit))
    }

    async fn list_filtered(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>> {
        let tables = self.tables.read().await;
        let matching = tables
            .listings
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        Ok(page(newest_first(matching), filter.offset, filter.limit))
    }

    async fn start_run(&self, site: &str, criteria: Option<&SearchCriteria>) -> Result<RunId> {
        let mut tables = self.tables.write().await;
        let id = tables.runs.keys().next_back().copied().unwrap_or(0) + 1;
        tables.runs.insert(
            id,
            ScrapeRun {
                id,
                site: site.to_string(),
                criteria: criteria.cloned(),
                started_at: Utc::now(),
                completed_at: None,
                counts: RunCounts::default(),
                status: RunStatus::Running,
            },
        );
        Ok(id)
    }

    async fn complete_run(&self, id: RunId, counts: RunCounts, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(ScoutError::Validation(format!(
                "cannot complete run {id} with status {status}"
            )));
        }

        let mut tables = self.tables.write().await;
        match tables.runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::Running => {
                run.counts = counts;
                run.status = status;
                run.completed_at = Some(Utc::now());
                Ok(())
            }
            Some(run) => Err(ScoutError::StorageContract(format!(
                "run {id} is already {}",
                run.status
            ))),
            None => Err(ScoutError::StorageContract(format!("run {id} does not exist"))),
        }
    }

    async fn get_run(&self, id: RunId) -> Result<Option<ScrapeRun>> {
        Ok(self.tables.read().await.runs.get(&id).cloned())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let tables = self.tables.read().await;
        let listings = || tables.listings.values();

        let unique_vins: HashSet<_> = listings().filter_map(|l| l.vin.as_ref()).collect();
        let unique_makes: HashSet<_> = listings().filter_map(|l| l.make.as_deref()).collect();
        let unique_models: HashSet<_> = listings()
            .filter_map(|l| Some((l.make.as_deref()?, l.model.as_deref()?)))
            .collect();

        Ok(StoreStats {
            total_listings: tables.listings.len() as i64,
            unique_vins: unique_vins.len() as i64,
            unique_makes: unique_makes.len() as i64,
            unique_models: unique_models.len() as i64,
            details_count: tables.details.len() as i64,
            first_scraped: listings().map(|l| l.scraped_at).min(),
            last_scraped: listings().map(|l| l.scraped_at).max(),
        })
    }

    async fn close(&self) {}
}
