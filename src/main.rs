use anyhow::{bail, Context};
use auction_scout::config::{Settings, SiteDescriptor};
use auction_scout::extract::{AnthropicModel, Extractor};
use auction_scout::models::{RunStatus, SearchCriteria};
use auction_scout::pipeline::{self, RunReport};
use auction_scout::scrapers::{ChromeDriver, NavigationSession, Navigator};
use auction_scout::storage::{ListingFilter, ListingStore, PostgresStore};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "auction-scout", about = "Scrape vehicle listings from auction sites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct SiteArgs {
    /// Built-in site descriptor to use
    #[arg(long, default_value = "copart")]
    site: String,
    /// Load the site descriptor from a TOML file instead
    #[arg(long)]
    site_file: Option<PathBuf>,
}

impl SiteArgs {
    fn load(&self) -> anyhow::Result<SiteDescriptor> {
        let site = match &self.site_file {
            Some(path) => SiteDescriptor::from_path(path)?,
            None => SiteDescriptor::builtin(&self.site)?,
        };
        Ok(site)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    InitDb,
    /// Show database statistics
    Stats,
    /// Search for vehicles and save the listings
    Search {
        /// Vehicle make (e.g. Honda)
        #[arg(long)]
        make: String,
        /// Vehicle model (e.g. Accord)
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        year_min: Option<i32>,
        #[arg(long)]
        year_max: Option<i32>,
        #[arg(long)]
        max_miles: Option<i64>,
        /// Maximum current bid
        #[arg(long)]
        max_price: Option<i64>,
        /// Maximum results pages to scrape
        #[arg(long, default_value = "5")]
        max_pages: u32,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
        #[command(flatten)]
        site: SiteArgs,
    },
    /// Fetch detail pages for listings that do not have them yet
    FetchDetails {
        #[arg(long, default_value = "50")]
        limit: i64,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
        #[command(flatten)]
        site: SiteArgs,
    },
    /// Log in once, save the session and take a screenshot
    TestLogin {
        #[arg(long)]
        headless: bool,
        #[command(flatten)]
        site: SiteArgs,
    },
    /// List stored listings
    List {
        #[arg(long)]
        make: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        year_min: Option<i32>,
        #[arg(long)]
        year_max: Option<i32>,
        #[arg(long, default_value = "20")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Commands::InitDb => {
            let store = connect(&settings).await?;
            let result = store.migrate().await.context("Failed to run migrations");
            store.close().await;
            result?;
            println!("\n✓ Database initialized successfully");
        }
        Commands::Stats => {
            let store = connect(&settings).await?;
            let result = store.stats().await;
            store.close().await;
            print_stats(&result?);
        }
        Commands::Search {
            make,
            model,
            year_min,
            year_max,
            max_miles,
            max_price,
            max_pages,
            headed,
            site,
        } => {
            let criteria = SearchCriteria {
                make,
                model,
                year_min,
                year_max,
                max_miles,
                max_price,
            };
            criteria.validate()?;

            let site = site.load()?;
            let credentials = settings.require_credentials(&site.name)?;
            let extractor = extractor(&settings, &site)?;
            let store = connect(&settings).await?;
            let mut session = session(&settings, site, !headed);

            let result = pipeline::run_search(
                &mut session,
                &extractor,
                &store,
                &criteria,
                &credentials,
                max_pages,
                shutdown_signal(),
            )
            .await;
            store.close().await;

            let report = result?;
            print_report("SCRAPE", &report);
            check(&report)?;
        }
        Commands::FetchDetails {
            limit,
            headed,
            site,
        } => {
            let site = site.load()?;
            let credentials = settings.require_credentials(&site.name)?;
            let extractor = extractor(&settings, &site)?;
            let store = connect(&settings).await?;
            let mut session = session(&settings, site, !headed);

            let result = pipeline::run_details(
                &mut session,
                &extractor,
                &store,
                &credentials,
                limit,
                shutdown_signal(),
            )
            .await;
            store.close().await;

            let report = result?;
            print_report("DETAIL FETCH", &report);
            check(&report)?;
        }
        Commands::TestLogin { headless, site } => {
            let site = site.load()?;
            let credentials = settings.require_credentials(&site.name)?;
            test_login(&settings, site, &credentials, headless).await?;
        }
        Commands::List {
            make,
            model,
            year_min,
            year_max,
            limit,
            offset,
        } => {
            let filter = ListingFilter {
                make,
                model,
                year_min,
                year_max,
                limit,
                offset,
            };
            let store = connect(&settings).await?;
            let result = store.list_filtered(&filter).await;
            store.close().await;
            print_listings(&result?, offset);
        }
    }

    Ok(())
}

async fn connect(settings: &Settings) -> anyhow::Result<PostgresStore> {
    let url = settings.require_database_url()?;
    PostgresStore::connect(url)
        .await
        .context("Failed to connect to database")
}

fn extractor(settings: &Settings, site: &SiteDescriptor) -> anyhow::Result<Extractor> {
    let model = AnthropicModel::from_settings(settings)?;
    Ok(Extractor::new(Arc::new(model), site.clone()))
}

/// Chrome closes itself after `idle` without CDP traffic, and nothing talks
/// to it while a page is with the model.
fn session(
    settings: &Settings,
    site: SiteDescriptor,
    headless: bool,
) -> NavigationSession<ChromeDriver> {
    let idle = settings.model_timeout + site.timeouts.page_load() + Duration::from_secs(60);
    let session_file = settings.session_file(&site.name);
    NavigationSession::new(ChromeDriver::new(headless, idle), site, session_file)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn test_login(
    settings: &Settings,
    site: SiteDescriptor,
    credentials: &auction_scout::config::Credentials,
    headless: bool,
) -> anyhow::Result<()> {
    let name = site.name.clone();
    let mut session = session(settings, site, headless);

    info!("Launching browser...");
    session.start().await?;

    info!("Testing login to {}...", name);
    info!("Username: {}", credentials.username);

    let result: anyhow::Result<()> = match session.login(credentials).await {
        Ok(true) => {
            println!("\n✓ Login successful!");
            let saved = async {
                session.save_session().await?;
                println!("✓ Session cookies saved");
                session
                    .screenshot(&PathBuf::from(format!("{name}_logged_in.png")))
                    .await
            }
            .await;

            if saved.is_ok() && !headless {
                info!("Browser will stay open for 30 seconds...");
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            saved.map_err(Into::into)
        }
        failed => {
            let shot = PathBuf::from(format!("{name}_login_failed.png"));
            if let Err(e) = session.screenshot(&shot).await {
                warn!("Could not take screenshot: {}", e);
            }
            match failed {
                Err(e) => Err(e.into()),
                Ok(_) => Err(anyhow::anyhow!("❌ Login failed!")),
            }
        }
    };

    session.close().await;
    result
}

fn check(report: &RunReport) -> anyhow::Result<()> {
    match report.status {
        RunStatus::Failed => bail!(
            "run #{} failed{}",
            report.run_id,
            report
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        ),
        _ => Ok(()),
    }
}

fn print_report(title: &str, report: &RunReport) {
    let rule = "=".repeat(60);
    println!("\n{rule}");
    println!("{title} {}", report.status.to_string().to_uppercase());
    println!("{rule}");
    println!("Run ID:              #{}", report.run_id);
    println!("Listings Found:      {}", report.counts.listings_found);
    println!("Details Fetched:     {}", report.counts.details_fetched);
    if report.pages > 0 {
        println!("Pages Scraped:       {}", report.pages);
    }
    println!("Errors:              {}", report.counts.errors);
    println!("{rule}\n");
}

fn print_stats(stats: &auction_scout::storage::StoreStats) {
    let rule = "=".repeat(60);
    println!("\n{rule}");
    println!("DATABASE STATISTICS");
    println!("{rule}");
    println!("Total Listings:      {}", stats.total_listings);
    println!("Unique VINs:         {}", stats.unique_vins);
    println!("Unique Makes:        {}", stats.unique_makes);
    println!("Unique Models:       {}", stats.unique_models);
    println!("Details Fetched:     {}", stats.details_count);
    if let Some(first) = stats.first_scraped {
        println!("First Scraped:       {}", first.format("%Y-%m-%d %H:%M"));
    }
    if let Some(last) = stats.last_scraped {
        println!("Last Scraped:        {}", last.format("%Y-%m-%d %H:%M"));
    }
    println!("{rule}\n");
}

fn print_listings(listings: &[auction_scout::models::ListingRecord], offset: i64) {
    if listings.is_empty() {
        println!("\nNo listings found matching criteria");
        return;
    }

    let rule = "=".repeat(80);
    println!("\n{rule}");
    println!(
        "LISTINGS (showing {} of {}+)",
        listings.len(),
        offset + listings.len() as i64
    );
    println!("{rule}");

    for listing in listings {
        let title = listing.title();
        println!("\n{}", if title.is_empty() { "Unknown vehicle" } else { &title });
        println!("ID: {} | Source: {}", listing.local_id, listing.source_site);
        if let Some(vin) = &listing.vin {
            println!("VIN: {vin}");
        }

        let mut details = Vec::new();
        if let Some(miles) = listing.miles {
            details.push(format!("{miles} miles"));
        }
        if let Some(condition) = &listing.condition {
            details.push(condition.clone());
        }
        if let Some(damage) = &listing.damage_type {
            details.push(format!("Damage: {damage}"));
        }
        if !details.is_empty() {
            println!("{}", details.join(" | "));
        }

        let mut pricing = Vec::new();
        if let Some(bid) = listing.current_bid {
            pricing.push(format!("Bid: ${bid}"));
        }
        if let Some(price) = listing.buy_now_price {
            pricing.push(format!("Buy Now: ${price}"));
        }
        if !pricing.is_empty() {
            println!("{}", pricing.join(" | "));
        }

        let mut where_when = Vec::new();
        if let Some(location) = &listing.location {
            where_when.push(location.clone());
        }
        if let Some(sale) = listing.sale_date {
            where_when.push(format!("Sale: {}", sale.format("%Y-%m-%d %H:%M")));
        }
        if !where_when.is_empty() {
            println!("{}", where_when.join(" | "));
        }

        if let Some(url) = &listing.url {
            println!("URL: {url}");
        }
        println!("Scraped: {}", listing.scraped_at.format("%Y-%m-%d %H:%M"));
        println!("{}", "-".repeat(80));
    }
    println!();
}
