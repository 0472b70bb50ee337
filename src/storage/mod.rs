//! Durable storage with VIN identity resolution.
//!
//! Listings are keyed by `(source_site, local_id)`, details by VIN no matter
//! which site they came from. Every write is a coalesce merge: a value that
//! is absent in the incoming record never erases a stored one.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::models::{
    DetailRecord, ListingRecord, RunCounts, RunId, RunStatus, ScrapeRun, SearchCriteria,
    StoredDetail, Vin,
};

/// Query over stored listings. Text filters are case-insensitive
/// substrings; year bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFilter {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            make: None,
            model: None,
            year_min: None,
            year_max: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ListingFilter {
    pub fn matches(&self, listing: &ListingRecord) -> bool {
        fn contains(value: &Option<String>, needle: &Option<String>) -> bool {
            match needle {
                None => true,
                Some(needle) => value
                    .as_deref()
                    .map(|v| v.to_lowercase().contains(&needle.to_lowercase()))
                    .unwrap_or(false),
            }
        }

        let year_ok = |bound: Option<i32>, ok: fn(i32, i32) -> bool| match bound {
            None => true,
            Some(bound) => listing.year.map(|y| ok(y, bound)).unwrap_or(false),
        };

        contains(&listing.make, &self.make)
            && contains(&listing.model, &self.model)
            && year_ok(self.year_min, |y, b| y >= b)
            && year_ok(self.year_max, |y, b| y <= b)
    }
}

/// Totals over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_listings: i64,
    pub unique_vins: i64,
    pub unique_makes: i64,
    /// Distinct (make, model) pairs with both known
    pub unique_models: i64,
    pub details_count: i64,
    pub first_scraped: Option<DateTime<Utc>>,
    pub last_scraped: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub stored: usize,
    pub failed: usize,
}

/// What `upsert_detail` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailWrite {
    Stored,
    /// No VIN; nothing was written
    Skipped,
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Create or update the schema.
    async fn migrate(&self) -> Result<()>;

    /// Insert or coalesce-merge one listing. Idempotent.
    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<()>;

    /// Upsert each listing; one failure does not stop the rest.
    async fn upsert_listings(&self, listings: &[ListingRecord]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for listing in listings {
            match self.upsert_listing(listing).await {
                Ok(()) => outcome.stored += 1,
                Err(e) => {
                    warn!(
                        "Failed to store listing {}/{}: {}",
                        listing.source_site, listing.local_id, e
                    );
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    /// Store a detail page. Without a VIN nothing is written (not even the
    /// listing) and the skip counter goes up.
    async fn upsert_detail(&self, detail: &DetailRecord) -> Result<DetailWrite>;

    /// Detail records dropped for lack of a VIN since this store was opened.
    fn skipped_details(&self) -> u64;

    async fn get_listing(
        &self,
        source_site: &str,
        local_id: &str,
    ) -> Result<Option<ListingRecord>>;

    async fn get_detail(&self, vin: &Vin) -> Result<Option<StoredDetail>>;

    /// Listings with a VIN but no detail row, most recently scraped first.
    async fn listings_without_details(&self, limit: i64) -> Result<Vec<ListingRecord>>;

    /// Most recently scraped first.
    async fn list_filtered(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>>;

    async fn start_run(&self, site: &str, criteria: Option<&SearchCriteria>) -> Result<RunId>;

    /// Record the final state of a run. A run can be completed only once.
    async fn complete_run(&self, id: RunId, counts: RunCounts, status: RunStatus) -> Result<()>;

    async fn get_run(&self, id: RunId) -> Result<Option<ScrapeRun>>;

    async fn stats(&self) -> Result<StoreStats>;

    /// Release connections.
    async fn close(&self);
}
