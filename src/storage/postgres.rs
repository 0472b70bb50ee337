use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::{DetailWrite, ListingFilter, ListingStore, StoreStats};
use crate::error::{Result, ScoutError};
use crate::models::{
    DetailRecord, ListingRecord, RunCounts, RunId, RunStatus, ScrapeRun, SearchCriteria,
    StoredDetail, VehicleSpec, Vin,
};

/// Server-side cap on any single statement.
const STATEMENT_TIMEOUT: &str = "60s";

const UPSERT_LISTING: &str = r#"
    INSERT INTO scraper.listings AS l
        (source_site, local_id, url, vin, year, make, model, trim, miles,
         current_bid, buy_now_price, condition, damage_type, secondary_damage,
         location, sale_date, thumbnail_url, scraped_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
    ON CONFLICT (source_site, local_id) DO UPDATE SET
        url = COALESCE(EXCLUDED.url, l.url),
        vin = COALESCE(EXCLUDED.vin, l.vin),
        year = COALESCE(EXCLUDED.year, l.year),
        make = COALESCE(EXCLUDED.make, l.make),
        model = COALESCE(EXCLUDED.model, l.model),
        trim = COALESCE(EXCLUDED.trim, l.trim),
        miles = COALESCE(EXCLUDED.miles, l.miles),
        current_bid = COALESCE(EXCLUDED.current_bid, l.current_bid),
        buy_now_price = COALESCE(EXCLUDED.buy_now_price, l.buy_now_price),
        condition = COALESCE(EXCLUDED.condition, l.condition),
        damage_type = COALESCE(EXCLUDED.damage_type, l.damage_type),
        secondary_damage = COALESCE(EXCLUDED.secondary_damage, l.secondary_damage),
        location = COALESCE(EXCLUDED.location, l.location),
        sale_date = COALESCE(EXCLUDED.sale_date, l.sale_date),
        thumbnail_url = COALESCE(EXCLUDED.thumbnail_url, l.thumbnail_url),
        scraped_at = LEAST(l.scraped_at, EXCLUDED.scraped_at),
        updated_at = GREATEST(l.updated_at, EXCLUDED.updated_at)
"#;

const UPSERT_DETAIL: &str = r#"
    INSERT INTO scraper.details AS d
        (vin, source_site, local_id, engine, transmission, drive_type, fuel_type,
         color, interior_color, keys, airbags, seller, title_type, images,
         description, scraped_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
    ON CONFLICT (vin) DO UPDATE SET
        source_site = COALESCE(EXCLUDED.source_site, d.source_site),
        local_id = COALESCE(EXCLUDED.local_id, d.local_id),
        engine = COALESCE(EXCLUDED.engine, d.engine),
        transmission = COALESCE(EXCLUDED.transmission, d.transmission),
        drive_type = COALESCE(EXCLUDED.drive_type, d.drive_type),
        fuel_type = COALESCE(EXCLUDED.fuel_type, d.fuel_type),
        color = COALESCE(EXCLUDED.color, d.color),
        interior_color = COALESCE(EXCLUDED.interior_color, d.interior_color),
        keys = COALESCE(EXCLUDED.keys, d.keys),
        airbags = COALESCE(EXCLUDED.airbags, d.airbags),
        seller = COALESCE(EXCLUDED.seller, d.seller),
        title_type = COALESCE(EXCLUDED.title_type, d.title_type),
        images = COALESCE(EXCLUDED.images, d.images),
        description = COALESCE(EXCLUDED.description, d.description),
        scraped_at = GREATEST(d.scraped_at, EXCLUDED.scraped_at)
"#;

const STATS: &str = r#"
    SELECT
        COUNT(*) AS total_listings,
        COUNT(DISTINCT vin) AS unique_vins,
        COUNT(DISTINCT make) AS unique_makes,
        COUNT(DISTINCT (make, model)) FILTER (WHERE make IS NOT NULL AND model IS NOT NULL)
            AS unique_models,
        (SELECT COUNT(*) FROM scraper.details) AS details_count,
        MIN(scraped_at) AS first_scraped,
        MAX(scraped_at) AS last_scraped
    FROM scraper.listings
"#;

#[derive(Debug, sqlx::FromRow)]
struct ListingRow {
    source_site: String,
    local_id: String,
    url: Option<String>,
    vin: Option<String>,
    year: Option<i32>,
    make: Option<String>,
    model: Option<String>,
    trim: Option<String>,
    miles: Option<i64>,
    current_bid: Option<i64>,
    buy_now_price: Option<i64>,
    condition: Option<String>,
    damage_type: Option<String>,
    secondary_damage: Option<String>,
    location: Option<String>,
    sale_date: Option<DateTime<Utc>>,
    thumbnail_url: Option<String>,
    scraped_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ListingRow> for ListingRecord {
    fn from(row: ListingRow) -> Self {
        Self {
            source_site: row.source_site,
            local_id: row.local_id,
            url: row.url,
            vin: row.vin.as_deref().and_then(Vin::parse),
            year: row.year,
            make: row.make,
            model: row.model,
            trim: row.trim,
            miles: row.miles,
            current_bid: row.current_bid,
            buy_now_price: row.buy_now_price,
            condition: row.condition,
            damage_type: row.damage_type,
            secondary_damage: row.secondary_damage,
            location: row.location,
            sale_date: row.sale_date,
            thumbnail_url: row.thumbnail_url,
            scraped_at: row.scraped_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DetailRow {
    vin: String,
    source_site: Option<String>,
    local_id: Option<String>,
    engine: Option<String>,
    transmission: Option<String>,
    drive_type: Option<String>,
    fuel_type: Option<String>,
    color: Option<String>,
    interior_color: Option<String>,
    keys: Option<String>,
    airbags: Option<String>,
    seller: Option<String>,
    title_type: Option<String>,
    images: Option<Vec<String>>,
    description: Option<String>,
    scraped_at: DateTime<Utc>,
}

impl TryFrom<DetailRow> for StoredDetail {
    type Error = ScoutError;

    fn try_from(row: DetailRow) -> Result<Self> {
        let vin = Vin::parse(&row.vin).ok_or_else(|| {
            ScoutError::StorageContract(format!("details row has invalid VIN {}", row.vin))
        })?;

        Ok(Self {
            vin,
            source_site: row.source_site,
            local_id: row.local_id,
            spec: VehicleSpec {
                engine: row.engine,
                transmission: row.transmission,
                drive_type: row.drive_type,
                fuel_type: row.fuel_type,
                color: row.color,
                interior_color: row.interior_color,
                keys: row.keys,
                airbags: row.airbags,
                seller: row.seller,
                title_type: row.title_type,
                images: row.images.unwrap_or_default(),
                description: row.description,
            },
            scraped_at: row.scraped_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: i64,
    site: String,
    criteria: Option<Json<SearchCriteria>>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    listings_found: i64,
    details_fetched: i64,
    errors: i64,
    status: String,
}

impl TryFrom<RunRow> for ScrapeRun {
    type Error = ScoutError;

    fn try_from(row: RunRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            site: row.site,
            criteria: row.criteria.map(|Json(criteria)| criteria),
            started_at: row.started_at,
            completed_at: row.completed_at,
            counts: RunCounts {
                listings_found: row.listings_found,
                details_fetched: row.details_fetched,
                errors: row.errors,
            },
            status: row.status.parse()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    total_listings: i64,
    unique_vins: i64,
    unique_makes: i64,
    unique_models: i64,
    details_count: i64,
    first_scraped: Option<DateTime<Utc>>,
    last_scraped: Option<DateTime<Utc>>,
}

fn bind_listing<'q>(
    query: Query<'q, Postgres, PgArguments>,
    listing: &'q ListingRecord,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(&listing.source_site)
        .bind(&listing.local_id)
        .bind(&listing.url)
        .bind(listing.vin.as_ref().map(Vin::as_str))
        .bind(listing.year)
        .bind(&listing.make)
        .bind(&listing.model)
        .bind(&listing.trim)
        .bind(listing.miles)
        .bind(listing.current_bid)
        .bind(listing.buy_now_price)
        .bind(&listing.condition)
        .bind(&listing.damage_type)
        .bind(&listing.secondary_damage)
        .bind(&listing.location)
        .bind(listing.sale_date)
        .bind(&listing.thumbnail_url)
        .bind(listing.scraped_at)
        .bind(listing.updated_at)
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// PostgreSQL store in the `scraper` schema.
pub struct PostgresStore {
    pool: PgPool,
    skipped: AtomicU64,
}

impl PostgresStore {
    /// Open a connection pool. Failure here is fatal to the caller.
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to database...");
        let options = PgConnectOptions::from_str(database_url)
            .map_err(ScoutError::Connection)?
            .options([("statement_timeout", STATEMENT_TIMEOUT)]);

        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(60))
            .connect_with(options)
            .await
            .map_err(ScoutError::Connection)?;
        info!("Database connected");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            skipped: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ListingStore for PostgresStore {
    async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    async fn upsert_listing(&self, listing: &ListingRecord) -> Result<()> {
        let mut listing = listing.clone();
        listing.sanitize();

        bind_listing(sqlx::query(UPSERT_LISTING), &listing)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_detail(&self, detail: &DetailRecord) -> Result<DetailWrite> {
        let Some(vin) = detail.vin() else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!("Skipping detail for {} - no VIN", detail.listing.local_id);
            return Ok(DetailWrite::Skipped);
        };

        let mut listing = detail.listing.clone();
        listing.sanitize();
        let spec = &detail.spec;
        let images = (!spec.images.is_empty()).then_some(spec.images.as_slice());

        let mut tx = self.pool.begin().await?;

        bind_listing(sqlx::query(UPSERT_LISTING), &listing)
            .execute(&mut *tx)
            .await?;

        sqlx::query(UPSERT_DETAIL)
            .bind(vin.as_str())
            .bind(&listing.source_site)
            .bind(&listing.local_id)
            .bind(&spec.engine)
            .bind(&spec.transmission)
            .bind(&spec.drive_type)
            .bind(&spec.fuel_type)
            .bind(&spec.color)
            .bind(&spec.interior_color)
            .bind(&spec.keys)
            .bind(&spec.airbags)
            .bind(&spec.seller)
            .bind(&spec.title_type)
            .bind(images)
            .bind(&spec.description)
            .bind(listing.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
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
        let row = sqlx::query_as::<_, ListingRow>(
            "SELECT * FROM scraper.listings WHERE source_site = $1 AND local_id = $2",
        )
        .bind(source_site)
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_detail(&self, vin: &Vin) -> Result<Option<StoredDetail>> {
        sqlx::query_as::<_, DetailRow>("SELECT * FROM scraper.details WHERE vin = $1")
            .bind(vin.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(StoredDetail::try_from)
            .transpose()
    }

    async fn listings_without_details(&self, limit: i64) -> Result<Vec<ListingRecord>> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT l.*
            FROM scraper.listings l
            LEFT JOIN scraper.details d ON l.vin = d.vin
            WHERE l.vin IS NOT NULL AND d.vin IS NULL
            ORDER BY l.scraped_at DESC, l.source_site, l.local_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_filtered(&self, filter: &ListingFilter) -> Result<Vec<ListingRecord>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM scraper.listings WHERE TRUE");

        if let Some(make) = &filter.make {
            query.push(" AND make ILIKE ").push_bind(like_pattern(make));
        }
        if let Some(model) = &filter.model {
            query.push(" AND model ILIKE ").push_bind(like_pattern(model));
        }
        if let Some(year_min) = filter.year_min {
            query.push(" AND year >= ").push_bind(year_min);
        }
        if let Some(year_max) = filter.year_max {
            query.push(" AND year <= ").push_bind(year_max);
        }
        query
            .push(" ORDER BY scraped_at DESC, source_site, local_id LIMIT ")
            .push_bind(filter.limit.max(0))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        let rows = query
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn start_run(&self, site: &str, criteria: Option<&SearchCriteria>) -> Result<RunId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO scraper.runs (site, criteria, status, started_at)
            VALUES ($1, $2, 'running', $3)
            RETURNING id
            "#,
        )
        .bind(site)
        .bind(criteria.map(Json))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn complete_run(&self, id: RunId, counts: RunCounts, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(ScoutError::Validation(format!(
                "cannot complete run {id} with status {status}"
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE scraper.runs
            SET completed_at = $2,
                listings_found = $3,
                details_fetched = $4,
                errors = $5,
                status = $6
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .bind(counts.listings_found)
        .bind(counts.details_fetched)
        .bind(counts.errors)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScoutError::StorageContract(format!(
                "run {id} does not exist or is already completed"
            )));
        }
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<ScrapeRun>> {
        sqlx::query_as::<_, RunRow>("SELECT * FROM scraper.runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ScrapeRun::try_from)
            .transpose()
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query_as::<_, StatsRow>(STATS)
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            total_listings: row.total_listings,
            unique_vins: row.unique_vins,
            unique_makes: row.unique_makes,
            unique_models: row.unique_models,
            details_count: row.details_count,
            first_scraped: row.first_scraped,
            last_scraped: row.last_scraped,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}
