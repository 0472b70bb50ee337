mod criteria;
mod run;
mod validate;

pub use criteria::SearchCriteria;
pub use run::{RunCounts, RunId, RunStatus, ScrapeRun};
pub use validate::{is_valid_year, max_year, normalize_amount, normalize_year, Vin, MIN_YEAR};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overwrite `slot` only when the incoming observation actually has a value.
fn coalesce<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if incoming.is_some() {
        slot.clone_from(incoming);
    }
}

/// One vehicle as seen on a search-results page.
///
/// Identity is `(source_site, local_id)`; the VIN, when known, links the
/// same physical vehicle across sites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub source_site: String,
    /// Lot number on the source site
    pub local_id: String,
    pub url: Option<String>,
    pub vin: Option<Vin>,
    pub year: Option<i32>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub miles: Option<i64>,
    pub current_bid: Option<i64>,
    pub buy_now_price: Option<i64>,
    pub condition: Option<String>,
    pub damage_type: Option<String>,
    pub secondary_damage: Option<String>,
    pub location: Option<String>,
    pub sale_date: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    /// First time this listing was observed
    pub scraped_at: DateTime<Utc>,
    /// Most recent observation
    pub updated_at: DateTime<Utc>,
}

impl ListingRecord {
    /// A listing with only its identity filled in, observed now.
    pub fn new(source_site: impl Into<String>, local_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source_site: source_site.into(),
            local_id: local_id.into(),
            url: None,
            vin: None,
            year: None,
            make: None,
            model: None,
            trim: None,
            miles: None,
            current_bid: None,
            buy_now_price: None,
            condition: None,
            damage_type: None,
            secondary_damage: None,
            location: None,
            sale_date: None,
            thumbnail_url: None,
            scraped_at: now,
            updated_at: now,
        }
    }

    /// Null out fields that break record invariants. The record itself is
    /// never rejected.
    pub fn sanitize(&mut self) {
        self.year = normalize_year(self.year);
        self.miles = normalize_amount(self.miles);
        self.current_bid = normalize_amount(self.current_bid);
        self.buy_now_price = normalize_amount(self.buy_now_price);
    }

    /// Coalesce merge of a newer observation of the same listing.
    ///
    /// Absent incoming values never erase stored ones. `scraped_at` keeps
    /// the earliest observation and `updated_at` the latest, so merging
    /// the same observation twice is a no-op.
    pub fn merge_from(&mut self, incoming: &ListingRecord) {
        coalesce(&mut self.url, &incoming.url);
        coalesce(&mut self.vin, &incoming.vin);
        coalesce(&mut self.year, &incoming.year);
        coalesce(&mut self.make, &incoming.make);
        coalesce(&mut self.model, &incoming.model);
        coalesce(&mut self.trim, &incoming.trim);
        coalesce(&mut self.miles, &incoming.miles);
        coalesce(&mut self.current_bid, &incoming.current_bid);
        coalesce(&mut self.buy_now_price, &incoming.buy_now_price);
        coalesce(&mut self.condition, &incoming.condition);
        coalesce(&mut self.damage_type, &incoming.damage_type);
        coalesce(&mut self.secondary_damage, &incoming.secondary_damage);
        coalesce(&mut self.location, &incoming.location);
        coalesce(&mut self.sale_date, &incoming.sale_date);
        coalesce(&mut self.thumbnail_url, &incoming.thumbnail_url);

        self.scraped_at = self.scraped_at.min(incoming.scraped_at);
        self.updated_at = self.updated_at.max(incoming.updated_at);
    }

    /// Short human label, e.g. "2020 Honda Accord".
    pub fn title(&self) -> String {
        let year = self.year.map(|y| y.to_string());
        [year.as_deref(), self.make.as_deref(), self.model.as_deref(), self.trim.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Mechanical and sale details only available on a listing's detail page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VehicleSpec {
    pub engine: Option<String>,
    pub transmission: Option<String>,
    pub drive_type: Option<String>,
    pub fuel_type: Option<String>,
    pub color: Option<String>,
    pub interior_color: Option<String>,
    pub keys: Option<String>,
    pub airbags: Option<String>,
    pub seller: Option<String>,
    pub title_type: Option<String>,
    /// Full-size image URLs in page order
    pub images: Vec<String>,
    pub description: Option<String>,
}

impl VehicleSpec {
    /// Same coalesce rule as listings; an empty image list counts as absent.
    pub fn merge_from(&mut self, incoming: &VehicleSpec) {
        coalesce(&mut self.engine, &incoming.engine);
        coalesce(&mut self.transmission, &incoming.transmission);
        coalesce(&mut self.drive_type, &incoming.drive_type);
        coalesce(&mut self.fuel_type, &incoming.fuel_type);
        coalesce(&mut self.color, &incoming.color);
        coalesce(&mut self.interior_color, &incoming.interior_color);
        coalesce(&mut self.keys, &incoming.keys);
        coalesce(&mut self.airbags, &incoming.airbags);
        coalesce(&mut self.seller, &incoming.seller);
        coalesce(&mut self.title_type, &incoming.title_type);
        coalesce(&mut self.description, &incoming.description);

        if !incoming.images.is_empty() {
            self.images.clone_from(&incoming.images);
        }
    }
}

/// Everything extracted from one detail page.
///
/// Persisting it requires a VIN (carried on `listing.vin`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailRecord {
    pub listing: ListingRecord,
    pub spec: VehicleSpec,
}

impl DetailRecord {
    pub fn vin(&self) -> Option<&Vin> {
        self.listing.vin.as_ref()
    }
}

/// A row of the details relation, keyed by VIN regardless of site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredDetail {
    pub vin: Vin,
    /// Site and lot of the most recent observation
    pub source_site: Option<String>,
    pub local_id: Option<String>,
    pub spec: VehicleSpec,
    pub scraped_at: DateTime<Utc>,
}
