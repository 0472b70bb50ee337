//! The acquisition loop: session → extraction → storage, with run bookkeeping.
//!
//! Both passes record a [`ScrapeRun`](crate::models::ScrapeRun) and finish it
//! exactly once, whether the work completes, fails, or is interrupted by the
//! `shutdown` future. The browser session is closed after the run is
//! finalized; the store is left open for the caller to close.

use std::future::Future;
use tracing::{error, info, warn};

use crate::config::Credentials;
use crate::error::{Result, ScoutError};
use crate::extract::Extractor;
use crate::models::{RunCounts, RunId, RunStatus, SearchCriteria};
use crate::scrapers::{Navigator, SessionState};
use crate::storage::{DetailWrite, ListingStore};

/// Outcome of one pipeline run, as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub counts: RunCounts,
    /// Results pages visited (search pass only)
    pub pages: u32,
    /// Why the run failed, if it did
    pub error: Option<String>,
}

/// How the scraping part of a run ended.
enum Ending {
    Finished(Result<bool>),
    Interrupted,
}

fn settle(ending: Ending, counts: &mut RunCounts) -> (RunStatus, Option<String>) {
    match ending {
        Ending::Finished(Ok(true)) => (RunStatus::Completed, None),
        Ending::Finished(Ok(false)) => (RunStatus::Failed, None),
        Ending::Finished(Err(e)) => {
            error!("❌ Run failed: {}", e);
            counts.errors += 1;
            (RunStatus::Failed, Some(e.to_string()))
        }
        Ending::Interrupted => {
            warn!("⚠ Interrupted by user");
            (RunStatus::Interrupted, None)
        }
    }
}

/// Record the terminal status, then release the browser.
async fn finish(
    nav: &mut dyn Navigator,
    store: &dyn ListingStore,
    run_id: RunId,
    counts: RunCounts,
    status: RunStatus,
) -> Result<()> {
    let recorded = store.complete_run(run_id, counts, status).await;
    nav.close().await;
    recorded
}

/// Restore the saved session if the site still accepts it, otherwise log
/// in and save a fresh one. `Ok(false)` when the credentials are rejected.
async fn authenticate(nav: &mut dyn Navigator, credentials: &Credentials) -> Result<bool> {
    match nav.load_session().await {
        Ok(true) => {
            info!("Using saved session");
            return Ok(true);
        }
        Ok(false) => {}
        Err(e) => warn!("Could not restore saved session: {}", e),
    }

    info!("Logging in...");
    if !nav.login(credentials).await? {
        error!("❌ Login failed!");
        return Ok(false);
    }

    if let Err(e) = nav.save_session().await {
        warn!("Could not save session: {}", e);
    }
    Ok(true)
}

/// Search the site and store every listing on up to `max_pages` results pages.
pub async fn run_search<F>(
    nav: &mut dyn Navigator,
    extractor: &Extractor,
    store: &dyn ListingStore,
    criteria: &SearchCriteria,
    credentials: &Credentials,
    max_pages: u32,
    shutdown: F,
) -> Result<RunReport>
where
    F: Future<Output = ()>,
{
    criteria.validate()?;

    let run_id = store.start_run(nav.site(), Some(criteria)).await?;
    info!("Started scrape run #{}", run_id);
    info!(
        "Criteria: {} {}",
        criteria.make,
        criteria.model.as_deref().unwrap_or("All Models")
    );

    let mut counts = RunCounts::default();
    let mut pages = 0;

    let ending = tokio::select! {
        result = scrape_pages(
            nav, extractor, store, criteria, credentials, max_pages, &mut counts, &mut pages,
        ) => {
            Ending::Finished(result)
        }
        _ = shutdown => Ending::Interrupted,
    };

    let (status, error) = settle(ending, &mut counts);
    finish(nav, store, run_id, counts, status).await?;

    info!(
        "Run #{} {}: {} listings, {} pages, {} errors",
        run_id, status, counts.listings_found, pages, counts.errors
    );

    Ok(RunReport {
        run_id,
        status,
        counts,
        pages,
        error,
    })
}

#[allow(clippy::too_many_arguments)]
async fn scrape_pages(
    nav: &mut dyn Navigator,
    extractor: &Extractor,
    store: &dyn ListingStore,
    criteria: &SearchCriteria,
    credentials: &Credentials,
    max_pages: u32,
    counts: &mut RunCounts,
    pages: &mut u32,
) -> Result<bool> {
    info!("Launching browser...");
    nav.start().await?;

    if !authenticate(nav, credentials).await? {
        counts.errors += 1;
        return Ok(false);
    }

    info!("Performing search...");
    if !nav.search(criteria).await? {
        error!("❌ Search failed!");
        counts.errors += 1;
        return Ok(false);
    }

    let mut page = 1;
    while page <= max_pages {
        info!("📄 Page {}/{}", page, max_pages);
        *pages = page;

        match nav.page_markup().await {
            Ok(markup) => match extractor.extract_listings(&markup).await {
                Ok(listings) if listings.is_empty() => {
                    info!("No listings found on this page");
                    break;
                }
                Ok(listings) => {
                    let outcome = store.upsert_listings(&listings).await;
                    counts.listings_found += outcome.stored as i64;
                    counts.errors += outcome.failed as i64;
                    info!("✅ Saved {} listings", outcome.stored);
                }
                Err(e) if e.is_fatal_to_run() => return Err(e),
                Err(e) => {
                    warn!("Skipping page {}: {}", page, e);
                    counts.errors += 1;
                }
            },
            Err(e) if e.is_fatal_to_run() => return Err(e),
            Err(e) => {
                warn!("Could not read page {}: {}", page, e);
                counts.errors += 1;
            }
        }

        if page == max_pages {
            break;
        }
        if !nav.has_next_page().await {
            info!("No more pages available");
            break;
        }
        if !nav.go_next_page().await {
            if nav.state() == SessionState::Failed {
                return Err(ScoutError::Session(format!(
                    "browser lost while leaving page {page}"
                )));
            }
            warn!("Failed to navigate to next page");
            break;
        }
        page += 1;
    }

    Ok(true)
}

/// Fetch detail pages for up to `limit` listings that have a VIN but no
/// detail record yet.
pub async fn run_details<F>(
    nav: &mut dyn Navigator,
    extractor: &Extractor,
    store: &dyn ListingStore,
    credentials: &Credentials,
    limit: i64,
    shutdown: F,
) -> Result<RunReport>
where
    F: Future<Output = ()>,
{
    info!("Finding listings without details (limit: {})...", limit);
    let pending = store.listings_without_details(limit).await?;

    let run_id = store.start_run(nav.site(), None).await?;
    let mut counts = RunCounts::default();

    if pending.is_empty() {
        info!("✅ All listings already have details!");
        store
            .complete_run(run_id, counts, RunStatus::Completed)
            .await?;
        return Ok(RunReport {
            run_id,
            status: RunStatus::Completed,
            counts,
            pages: 0,
            error: None,
        });
    }
    info!("Found {} listings to process", pending.len());

    let ending = tokio::select! {
        result = fetch_details(nav, extractor, store, credentials, &pending, &mut counts) => {
            Ending::Finished(result)
        }
        _ = shutdown => Ending::Interrupted,
    };

    let (status, error) = settle(ending, &mut counts);
    finish(nav, store, run_id, counts, status).await?;

    info!(
        "Detail run #{} {}: {} of {} fetched, {} errors",
        run_id,
        status,
        counts.details_fetched,
        pending.len(),
        counts.errors
    );

    Ok(RunReport {
        run_id,
        status,
        counts,
        pages: 0,
        error,
    })
}

async fn fetch_details(
    nav: &mut dyn Navigator,
    extractor: &Extractor,
    store: &dyn ListingStore,
    credentials: &Credentials,
    pending: &[crate::models::ListingRecord],
    counts: &mut RunCounts,
) -> Result<bool> {
    info!("Launching browser...");
    nav.start().await?;

    if !authenticate(nav, credentials).await? {
        counts.errors += 1;
        return Ok(false);
    }

    for (i, listing) in pending.iter().enumerate() {
        info!("[{}/{}] {} (ID: {})", i + 1, pending.len(), listing.title(), listing.local_id);

        let url = listing
            .url
            .clone()
            .unwrap_or_else(|| nav.listing_url(&listing.local_id));

        let markup = match nav.go_to_listing(&url).await {
            Ok(markup) => markup,
            Err(e) if e.is_fatal_to_run() => return Err(e),
            Err(e) => {
                warn!("Could not open {}: {}", url, e);
                counts.errors += 1;
                continue;
            }
        };

        let mut detail = match extractor
            .extract_detail(&markup, &listing.local_id, Some(&url))
            .await
        {
            Ok(detail) => detail,
            Err(e) => {
                warn!("Failed to extract details for {}: {}", listing.local_id, e);
                counts.errors += 1;
                continue;
            }
        };

        // The page may not show the VIN we already know.
        if detail.listing.vin.is_none() {
            detail.listing.vin = listing.vin.clone();
        }

        match store.upsert_detail(&detail).await {
            Ok(DetailWrite::Stored) => {
                counts.details_fetched += 1;
                if let Some(vin) = detail.vin() {
                    info!("✅ Saved (VIN: {})", vin);
                }
            }
            Ok(DetailWrite::Skipped) => {
                info!("Detail for {} has no VIN, not stored", listing.local_id)
            }
            Err(e) => {
                warn!("Failed to store detail for {}: {}", listing.local_id, e);
                counts.errors += 1;
            }
        }
    }

    Ok(true)
}
