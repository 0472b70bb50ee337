//! Store behaviour shared by every `ListingStore` implementation.
//!
//! Each check uses its own site/make names so the checks can run one after
//! another against a single shared database.

#![allow(dead_code)]

use async_trait::async_trait;
use auction_scout::models::{
    DetailRecord, ListingRecord, RunCounts, RunId, RunStatus, ScrapeRun, SearchCriteria,
    StoredDetail, VehicleSpec, Vin,
};
use auction_scout::storage::{DetailWrite, ListingFilter, ListingStore, StoreStats};
use auction_scout::{Result, ScoutError};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::HashSet;

const VIN_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKLMNPRSTUVWXYZ";

pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{:08x}", fastrand::u32(..))
}

pub fn random_vin() -> Vin {
    let raw: String = (0..Vin::LEN)
        .map(|_| VIN_ALPHABET[fastrand::usize(..VIN_ALPHABET.len())] as char)
        .collect();
    Vin::parse(&raw).unwrap()
}

/// Postgres keeps microseconds; keep fixtures comparable across stores.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn listing(site: &str, id: &str) -> ListingRecord {
    let mut listing = ListingRecord::new(site, id);
    let at = now();
    listing.scraped_at = at;
    listing.updated_at = at;
    listing
}

pub fn detail(listing: ListingRecord, spec: VehicleSpec) -> DetailRecord {
    DetailRecord { listing, spec }
}

/// Wraps a store and refuses to write the listed lot numbers.
pub struct RejectingStore<S> {
    pub inner: S,
    rejected: HashSet<String>,
}

impl<S: ListingStore> RejectingStore<S> {
    pub fn new(inner: S, rejected: &[&str]) -> Self {
        Self {
            inner,
            rejected: rejected.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[async_trait]
impl<S: ListingStore> ListingStore for RejectingStore<S> {
    async fn migrate(&self) -> Result<()> {
        self.inner.migrate().await
    }

    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<()> {
        if self.rejected.contains(&listing.local_id) {
            return Err(ScoutError::StorageContract(format!(
                "refusing to store {}",
                listing.local_id
            )));
        }
        self.inner.upsert_listing(listing).await
    }

    async fn upsert_detail(&self, detail: &DetailRecord) -> Result<DetailWrite> {
        self.inner.upsert_detail(detail).await
    }

    fn skipped_details(&self) -> u64 {
        self.inner.skipped_details()
    }

    async fn get_listing(
        &self,
        source_site: &str,
        local_id: &str,
    ) -> Result<Option<ListingRecord>> {
        self.inner.get_listing(source_site, local_id).await
    }

    async fn get_detail(&self, vin: &Vin) -> Result<Option<StoredDetail>> {
        self.inner.get_detail(vin).await
    }

    async fn listings_without_details(&self, limit: i64) -> Result<Vec<ListingRecord>> {
        self.inner.listings_without_details(limit).await
    }

    async fn list_filtered(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>> {
        self.inner.list_filtered(filter).await
    }

    async fn start_run(&self, site: &str, criteria: Option<&SearchCriteria>) -> Result<RunId> {
        self.inner.start_run(site, criteria).await
    }

    async fn complete_run(&self, id: RunId, counts: RunCounts, status: RunStatus) -> Result<()> {
        self.inner.complete_run(id, counts, status).await
    }

    async fn get_run(&self, id: RunId) -> Result<Option<ScrapeRun>> {
        self.inner.get_run(id).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

pub async fn upsert_listing_is_idempotent(store: &dyn ListingStore) {
    let site = unique("idem");
    let mut record = listing(&site, "1001");
    record.make = Some("Honda".to_string());
    record.model = Some("Accord".to_string());
    record.year = Some(2020);
    record.current_bid = Some(8500);
    record.vin = Some(random_vin());

    store.upsert_listing(&record).await.unwrap();
    let once = store.get_listing(&site, "1001").await.unwrap().unwrap();
    store.upsert_listing(&record).await.unwrap();
    let twice = store.get_listing(&site, "1001").await.unwrap().unwrap();

    assert_eq!(once, twice);
    assert_eq!(once, record);
}

pub async fn upsert_listing_coalesces(store: &dyn ListingStore) {
    let site = unique("coalesce");
    let mut first = listing(&site, "2002");
    first.make = Some("Toyota".to_string());
    first.model = Some("Camry".to_string());
    first.miles = Some(61_000);
    first.current_bid = Some(4000);
    store.upsert_listing(&first).await.unwrap();

    let mut later = ListingRecord::new(site.as_str(), "2002");
    later.current_bid = Some(4500);
    later.scraped_at = first.scraped_at + Duration::hours(3);
    later.updated_at = first.updated_at + Duration::hours(3);
    store.upsert_listing(&later).await.unwrap();

    let stored = store.get_listing(&site, "2002").await.unwrap().unwrap();
    assert_eq!(stored.make.as_deref(), Some("Toyota"));
    assert_eq!(stored.model.as_deref(), Some("Camry"));
    assert_eq!(stored.miles, Some(61_000));
    assert_eq!(stored.current_bid, Some(4500));
    assert_eq!(stored.scraped_at, first.scraped_at);
    assert_eq!(stored.updated_at, later.updated_at);
}

pub async fn implausible_year_is_stored_as_unknown(store: &dyn ListingStore) {
    let site = unique("year");
    let mut record = listing(&site, "3003");
    record.year = Some(9999);
    record.make = Some("Ford".to_string());
    store.upsert_listing(&record).await.unwrap();

    let stored = store.get_listing(&site, "3003").await.unwrap().unwrap();
    assert_eq!(stored.year, None);
    assert_eq!(stored.make.as_deref(), Some("Ford"));
}

pub async fn batch_upsert_counts_records(store: &dyn ListingStore) {
    let site = unique("batch");
    let records: Vec<_> = (0..3).map(|i| listing(&site, &format!("b{i}"))).collect();

    let outcome = store.upsert_listings(&records).await;

    assert_eq!(outcome.stored, 3);
    assert_eq!(outcome.failed, 0);
    assert!(store.get_listing(&site, "b2").await.unwrap().is_some());
}

/// One bad record must not stop the rest of the batch.
pub async fn batch_upsert_survives_a_failed_record<S: ListingStore>(inner: S) {
    let store = RejectingStore::new(inner, &["b1"]);
    let site = unique("partial");
    let records: Vec<_> = (0..3).map(|i| listing(&site, &format!("b{i}"))).collect();

    let outcome = store.upsert_listings(&records).await;

    assert_eq!(outcome.stored, 2);
    assert_eq!(outcome.failed, 1);
    assert!(store.get_listing(&site, "b0").await.unwrap().is_some());
    assert!(store.get_listing(&site, "b1").await.unwrap().is_none());
    assert!(store.get_listing(&site, "b2").await.unwrap().is_some());
}

pub async fn detail_without_vin_writes_nothing(store: &dyn ListingStore) {
    let site = unique("novin");
    let skipped_before = store.skipped_details();
    let before = store.stats().await.unwrap();

    let mut record = listing(&site, "4004");
    record.make = Some("Kia".to_string());
    let write = store
        .upsert_detail(&detail(record, VehicleSpec {
            engine: Some("2.4L I4".to_string()),
            ..Default::default()
        }))
        .await
        .unwrap();

    assert_eq!(write, DetailWrite::Skipped);
    assert_eq!(store.skipped_details(), skipped_before + 1);
    assert!(store.get_listing(&site, "4004").await.unwrap().is_none());

    let after = store.stats().await.unwrap();
    assert_eq!(after.total_listings, before.total_listings);
    assert_eq!(after.details_count, before.details_count);
}

pub async fn details_merge_by_vin_across_sites(store: &dyn ListingStore) {
    let vin = random_vin();
    let site_a = unique("sitea");
    let site_b = unique("siteb");

    let mut from_a = listing(&site_a, "5005");
    from_a.vin = Some(vin.clone());
    let write = store
        .upsert_detail(&detail(from_a, VehicleSpec {
            engine: Some("1.5L I4 Turbo".to_string()),
            transmission: Some("CVT".to_string()),
            images: vec!["https://img.test/a1.jpg".to_string()],
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(write, DetailWrite::Stored);

    let mut from_b = listing(&site_b, "B-77");
    from_b.vin = Some(vin.clone());
    from_b.updated_at = from_b.updated_at + Duration::minutes(5);
    store
        .upsert_detail(&detail(from_b, VehicleSpec {
            color: Some("Blue".to_string()),
            ..Default::default()
        }))
        .await
        .unwrap();

    let stored = store.get_detail(&vin).await.unwrap().unwrap();
    assert_eq!(stored.spec.engine.as_deref(), Some("1.5L I4 Turbo"));
    assert_eq!(stored.spec.transmission.as_deref(), Some("CVT"));
    assert_eq!(stored.spec.color.as_deref(), Some("Blue"));
    assert_eq!(stored.spec.images, vec!["https://img.test/a1.jpg"]);
    assert_eq!(stored.source_site.as_deref(), Some(site_b.as_str()));
    assert_eq!(stored.local_id.as_deref(), Some("B-77"));

    assert!(store.get_listing(&site_a, "5005").await.unwrap().is_some());
    assert!(store.get_listing(&site_b, "B-77").await.unwrap().is_some());
}

pub async fn listings_without_details_only_lists_pending_vins(store: &dyn ListingStore) {
    let site = unique("pending");

    let mut older = listing(&site, "older");
    older.vin = Some(random_vin());
    older.scraped_at = older.scraped_at - Duration::hours(1);
    let mut newer = listing(&site, "newer");
    newer.vin = Some(random_vin());
    let mut fetched = listing(&site, "fetched");
    fetched.vin = Some(random_vin());
    let no_vin = listing(&site, "novin");

    for record in [&older, &newer, &no_vin] {
        store.upsert_listing(record).await.unwrap();
    }
    store
        .upsert_detail(&detail(fetched, VehicleSpec::default()))
        .await
        .unwrap();

    let pending: Vec<String> = store
        .listings_without_details(10_000)
        .await
        .unwrap()
        .into_iter()
        .filter(|l| l.source_site == site)
        .map(|l| l.local_id)
        .collect();

    assert_eq!(pending, vec!["newer", "older"]);
}

pub async fn filtered_listing_queries(store: &dyn ListingStore) {
    let site = unique("filter");
    let make = unique("Zephyr");
    let base = now();

    let rows = [
        ("f1", "Accord", 2018, 0),
        ("f2", "Civic", 2020, 1),
        ("f3", "Accord Hybrid", 2022, 2),
    ];
    for (id, model, year, minutes) in rows {
        let mut record = listing(&site, id);
        record.make = Some(make.clone());
        record.model = Some(model.to_string());
        record.year = Some(year);
        record.scraped_at = base + Duration::minutes(minutes);
        record.updated_at = record.scraped_at;
        store.upsert_listing(&record).await.unwrap();
    }

    let ids = |listings: Vec<ListingRecord>| -> Vec<String> {
        listings.into_iter().map(|l| l.local_id).collect()
    };

    let accords = ListingFilter {
        make: Some(make.to_lowercase()),
        model: Some("ACCORD".to_string()),
        ..Default::default()
    };
    assert_eq!(ids(store.list_filtered(&accords).await.unwrap()), vec!["f3", "f1"]);

    let bounded = ListingFilter {
        make: Some(make.clone()),
        year_min: Some(2018),
        year_max: Some(2020),
        ..Default::default()
    };
    assert_eq!(ids(store.list_filtered(&bounded).await.unwrap()), vec!["f2", "f1"]);

    let paged = ListingFilter {
        make: Some(make.clone()),
        limit: 1,
        offset: 1,
        ..Default::default()
    };
    assert_eq!(ids(store.list_filtered(&paged).await.unwrap()), vec!["f2"]);
}

pub async fn runs_complete_exactly_once(store: &dyn ListingStore) {
    let criteria = SearchCriteria::new("Honda")
        .with_model("Accord")
        .with_years(Some(2015), Some(2022));
    let site = unique("runs");

    let id = store.start_run(&site, Some(&criteria)).await.unwrap();
    let started = store.get_run(id).await.unwrap().unwrap();
    assert_eq!(started.status, RunStatus::Running);
    assert_eq!(started.criteria.as_ref(), Some(&criteria));
    assert!(started.completed_at.is_none());

    assert!(matches!(
        store.complete_run(id, RunCounts::default(), RunStatus::Running).await,
        Err(ScoutError::Validation(_))
    ));

    let counts = RunCounts {
        listings_found: 3,
        details_fetched: 0,
        errors: 1,
    };
    store
        .complete_run(id, counts, RunStatus::Interrupted)
        .await
        .unwrap();
    assert!(matches!(
        store.complete_run(id, counts, RunStatus::Completed).await,
        Err(ScoutError::StorageContract(_))
    ));

    let finished = store.get_run(id).await.unwrap().unwrap();
    assert_eq!(finished.status, RunStatus::Interrupted);
    assert_eq!(finished.counts, counts);
    assert!(finished.completed_at.is_some());

    let detail_pass = store.start_run(&site, None).await.unwrap();
    assert_ne!(detail_pass, id);
    assert!(store.get_run(detail_pass).await.unwrap().unwrap().criteria.is_none());
}

pub async fn stats_count_distinct_values(store: &dyn ListingStore) {
    let site = unique("stats");
    let make = unique("Statsmobile");
    let before = store.stats().await.unwrap();

    let mut a = listing(&site, "s1");
    a.make = Some(make.clone());
    a.model = Some("One".to_string());
    a.vin = Some(random_vin());
    let mut b = listing(&site, "s2");
    b.make = Some(make.clone());
    b.model = Some("Two".to_string());
    store.upsert_listing(&a).await.unwrap();
    store.upsert_listing(&b).await.unwrap();

    let after = store.stats().await.unwrap();
    assert_eq!(after.total_listings, before.total_listings + 2);
    assert_eq!(after.unique_makes, before.unique_makes + 1);
    assert_eq!(after.unique_models, before.unique_models + 2);
    assert_eq!(after.unique_vins, before.unique_vins + 1);
    assert!(after.last_scraped.is_some());
}
