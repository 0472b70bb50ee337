//! Login / search / pagination state machine over a [`PageDriver`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::traits::{Navigator, PageDriver};
use super::types::{CookieRecord, SessionState, WaitOutcome};
use crate::config::{Credentials, SiteDescriptor};
use crate::error::{Result, ScoutError};
use crate::models::SearchCriteria;

/// How often element waits re-query the page.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One browser session against one auction site.
pub struct NavigationSession<D: PageDriver> {
    driver: D,
    site: SiteDescriptor,
    session_file: PathBuf,
    state: SessionState,
    started: bool,
}

impl<D: PageDriver> NavigationSession<D> {
    pub fn new(driver: D, site: SiteDescriptor, session_file: PathBuf) -> Self {
        Self {
            driver,
            site,
            session_file,
            state: SessionState::Unauthenticated,
            started: false,
        }
    }

    /// Random pause between consequential actions.
    async fn pause(&self) {
        let delay = self.site.rate_limit.next_delay();
        if !delay.is_zero() {
            debug!("Pausing {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
    }

    /// A lost browser ends the session; other driver errors leave it as is.
    fn note_failure(&mut self, err: &ScoutError) {
        if matches!(err, ScoutError::Session(_)) && self.state != SessionState::Failed {
            warn!("Browser session lost: {}", err);
            self.state = SessionState::Failed;
        }
    }

    /// Step back to `state` unless the browser was lost on the way.
    fn fall_back(&mut self, state: SessionState) {
        if self.state != SessionState::Failed {
            self.state = state;
        }
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        if !self.started || self.state.is_closed() {
            return Err(ScoutError::Session(format!(
                "cannot {action}: session is {}",
                if self.started { self.state.to_string() } else { "not started".to_string() }
            )));
        }
        Ok(())
    }

    /// Poll until one of `selectors` matches or `timeout` expires.
    ///
    /// A zero timeout checks exactly once. Page errors while polling count
    /// as "not there yet"; a lost browser stops the wait.
    pub async fn wait_for_any(&mut self, selectors: &[&str], timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            for (index, selector) in selectors.iter().enumerate() {
                match self.driver.element(selector).await {
                    Ok(Some(_)) => return WaitOutcome::Found(index),
                    Ok(None) => {}
                    Err(e @ ScoutError::Session(_)) => {
                        self.note_failure(&e);
                        return WaitOutcome::NotFound;
                    }
                    Err(e) => debug!("Lookup of {} failed: {}", selector, e),
                }
            }

            if timeout.is_zero() {
                return WaitOutcome::NotFound;
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    pub async fn wait_for(&mut self, selector: &str, timeout: Duration) -> WaitOutcome {
        self.wait_for_any(&[selector], timeout).await
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let timeout = self.site.timeouts.navigation();
        if let Err(e) = self.driver.navigate(url, timeout).await {
            self.note_failure(&e);
            return Err(e);
        }
        self.pause().await;
        Ok(())
    }

    /// Wait for an input, replace its value, pause. `false` if it never showed up.
    async fn fill_field(&mut self, selector: &str, value: &str) -> bool {
        let timeout = self.site.timeouts.element();
        if !self.wait_for(selector, timeout).await.is_found() {
            warn!("Fill failed for {}: element not found", selector);
            return false;
        }
        if let Err(e) = self.driver.fill(selector, value).await {
            warn!("Fill failed for {}: {}", selector, e);
            self.note_failure(&e);
            return false;
        }
        self.pause().await;
        true
    }

    async fn click_element(&mut self, selector: &str) -> bool {
        let timeout = self.site.timeouts.element();
        if !self.wait_for(selector, timeout).await.is_found() {
            warn!("Click failed for {}: element not found", selector);
            return false;
        }
        if let Err(e) = self.driver.click(selector).await {
            warn!("Click failed for {}: {}", selector, e);
            self.note_failure(&e);
            return false;
        }
        self.pause().await;
        true
    }

    /// Autocomplete step: if a suggestion list shows up, take the first entry.
    async fn accept_first_suggestion(&mut self, dropdown: &str, field: &str) {
        let timeout = self.site.timeouts.autocomplete();
        match self.wait_for(dropdown, timeout).await {
            WaitOutcome::Found(_) => {
                let picked = match self.driver.press_key("ArrowDown").await {
                    Ok(()) => self.driver.press_key("Enter").await,
                    Err(e) => Err(e),
                };
                if let Err(e) = picked {
                    warn!("Could not pick {} suggestion: {}", field, e);
                }
                self.pause().await;
            }
            _ => info!("{} dropdown not found, continuing...", field),
        }
    }

    /// Prefer choosing the year from a `<select>`; fall back to typing it.
    async fn set_year(&mut self, selector: &str, year: i32, bound: &str) {
        let value = year.to_string();
        info!("Setting year {}: {}", bound, year);

        match self.driver.select_option(selector, &value).await {
            Ok(true) => self.pause().await,
            Ok(false) | Err(_) => {
                info!("Year {} is not a select, trying fill...", bound);
                if !self.fill_field(selector, &value).await {
                    warn!("Could not set year {}", bound);
                }
            }
        }
    }

    /// Text that changes whenever a new page of results replaces the old.
    async fn results_fingerprint(&mut self) -> Option<String> {
        let fetched = match self.site.selectors.results.ready.clone() {
            Some(ready) => self.driver.element_text(&ready).await,
            None => self.driver.content().await.map(Some),
        };
        match fetched {
            Ok(text) => text,
            Err(e) => {
                self.note_failure(&e);
                None
            }
        }
    }

    /// Wait for the document to settle and the results to render. With
    /// `previous` set, the rendered results must also differ from it, since
    /// script-driven pages swap rows without a navigation.
    async fn wait_for_results(&mut self, previous: Option<&str>) -> bool {
        let timeout = self.site.timeouts.page_load();
        let deadline = Instant::now() + timeout;

        if let Err(e) = self.driver.wait_until_settled(timeout).await {
            warn!("Results page did not load: {}", e);
            self.note_failure(&e);
            return false;
        }

        loop {
            if self.state == SessionState::Failed {
                return false;
            }
            if let Some(current) = self.results_fingerprint().await {
                if previous != Some(current.as_str()) {
                    return true;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Results did not render within {}ms", timeout.as_millis());
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    pub async fn screenshot(&mut self, path: &Path) -> Result<()> {
        self.ensure_open("take a screenshot")?;
        self.driver.screenshot(path).await
    }
}

#[async_trait]
impl<D: PageDriver + Sync> Navigator for NavigationSession<D> {
    fn site(&self) -> &str {
        &self.site.name
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn listing_url(&self, local_id: &str) -> String {
        self.site.listing_url(local_id)
    }

    async fn start(&mut self) -> Result<()> {
        if self.started && self.driver.is_open() {
            return Ok(());
        }

        if let Err(e) = self.driver.open().await {
            self.state = SessionState::Failed;
            return Err(e);
        }
        self.started = true;
        self.state = SessionState::Unauthenticated;
        Ok(())
    }

    async fn login(&mut self, credentials: &Credentials) -> Result<bool> {
        self.ensure_open("log in")?;
        let sel = self.site.selectors.login.clone();
        let login_url = self.site.urls.login.clone();
        self.state = SessionState::Authenticating;

        info!("Navigating to login page...");
        if let Err(e) = self.navigate(&login_url).await {
            self.state = SessionState::Failed;
            return Err(ScoutError::Session(format!("login page unreachable: {e}")));
        }

        info!("Entering credentials...");
        if !self.fill_field(&sel.username, &credentials.username).await
            || !self.fill_field(&sel.password, &credentials.password).await
        {
            self.fall_back(SessionState::Unauthenticated);
            self.ensure_open("log in")?;
            return Ok(false);
        }

        info!("Submitting login...");
        if !self.click_element(&sel.submit).await {
            self.fall_back(SessionState::Unauthenticated);
            self.ensure_open("log in")?;
            return Ok(false);
        }

        let timeout = self.site.timeouts.navigation();
        match self
            .wait_for_any(
                &[sel.success_indicator.as_str(), sel.error_message.as_str()],
                timeout,
            )
            .await
        {
            WaitOutcome::Found(0) => {
                info!("✅ Login successful");
                self.state = SessionState::Authenticated;
                Ok(true)
            }
            WaitOutcome::Found(_) => {
                let message = self
                    .driver
                    .element_text(&sel.error_message)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                warn!("Login failed: {}", message);
                self.state = SessionState::Unauthenticated;
                Ok(false)
            }
            WaitOutcome::NotFound | WaitOutcome::TimedOut => {
                self.ensure_open("log in")?;
                self.state = SessionState::Failed;
                Err(ScoutError::Session(format!(
                    "no login outcome within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<bool> {
        self.ensure_open("search")?;
        if !self.state.is_authenticated() {
            return Err(ScoutError::Session(format!(
                "cannot search while {}",
                self.state
            )));
        }
        criteria.validate()?;

        let sel = self.site.selectors.search.clone();
        let search_url = self.site.urls.search.clone();
        self.state = SessionState::Searching;

        info!("Navigating to search page...");
        if let Err(e) = self.navigate(&search_url).await {
            warn!("Search page unreachable: {}", e);
            self.fall_back(SessionState::Authenticated);
            self.ensure_open("search")?;
            return Ok(false);
        }

        info!("Setting make: {}", criteria.make);
        if !self.fill_field(&sel.make_input, &criteria.make).await {
            self.fall_back(SessionState::Authenticated);
            self.ensure_open("search")?;
            return Ok(false);
        }
        self.accept_first_suggestion(&sel.make_dropdown, "Make").await;

        if let Some(model) = &criteria.model {
            info!("Setting model: {}", model);
            if self.fill_field(&sel.model_input, model).await {
                self.accept_first_suggestion(&sel.model_dropdown, "Model").await;
            }
        }

        if let Some(year) = criteria.year_min {
            self.set_year(&sel.year_from, year, "from").await;
        }
        if let Some(year) = criteria.year_max {
            self.set_year(&sel.year_to, year, "to").await;
        }

        if let (Some(miles), Some(locator)) = (criteria.max_miles, &sel.max_miles_input) {
            info!("Setting max miles: {}", miles);
            self.fill_field(locator, &miles.to_string()).await;
        }
        if let (Some(price), Some(locator)) = (criteria.max_price, &sel.max_price_input) {
            info!("Setting max price: {}", price);
            self.fill_field(locator, &price.to_string()).await;
        }

        info!("Submitting search...");
        if self.click_element(&sel.search_button).await && self.wait_for_results(None).await {
            self.state = SessionState::Browsing { page: 1 };
            return Ok(true);
        }

        self.fall_back(SessionState::Authenticated);
        self.ensure_open("search")?;
        Ok(false)
    }

    async fn page_markup(&mut self) -> Result<String> {
        self.ensure_open("read the page")?;
        let markup = self.driver.content().await;
        if let Err(e) = &markup {
            self.note_failure(e);
        }
        markup
    }

    async fn has_next_page(&mut self) -> bool {
        if !matches!(self.state, SessionState::Browsing { .. }) {
            return false;
        }

        let selector = self.site.selectors.results.pagination_next.clone();
        match self.driver.element(&selector).await {
            Ok(Some(control)) => !control.is_disabled(),
            Ok(None) => false,
            Err(e) => {
                debug!("Pagination lookup failed: {}", e);
                self.note_failure(&e);
                false
            }
        }
    }

    async fn go_next_page(&mut self) -> bool {
        let SessionState::Browsing { page } = self.state else {
            return false;
        };
        if !self.has_next_page().await {
            return false;
        }

        let before = self.results_fingerprint().await;
        let selector = self.site.selectors.results.pagination_next.clone();
        if !self.click_element(&selector).await {
            return false;
        }

        if !self.wait_for_results(before.as_deref()).await {
            warn!("Failed to go to page {}", page + 1);
            return false;
        }
        self.state = SessionState::Browsing { page: page + 1 };
        true
    }

    async fn go_to_listing(&mut self, url: &str) -> Result<String> {
        self.ensure_open("open a listing")?;
        self.navigate(url).await?;

        // The results page is gone once we leave it.
        if self.state.is_authenticated() {
            self.state = SessionState::Authenticated;
        }
        let markup = self.driver.content().await;
        if let Err(e) = &markup {
            self.note_failure(e);
        }
        markup
    }

    async fn save_session(&mut self) -> Result<()> {
        self.ensure_open("save the session")?;
        let cookies = self.driver.cookies().await?;

        if let Some(parent) = self.session_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&cookies)?;
        tokio::fs::write(&self.session_file, json).await?;

        info!("💾 Saved {} cookies to {}", cookies.len(), self.session_file.display());
        Ok(())
    }

    async fn load_session(&mut self) -> Result<bool> {
        self.ensure_open("load the session")?;

        let raw = match tokio::fs::read_to_string(&self.session_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let cookies: Vec<CookieRecord> = match serde_json::from_str(&raw) {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(
                    "Ignoring unreadable session snapshot {}: {}",
                    self.session_file.display(),
                    e
                );
                return Ok(false);
            }
        };

        if let Err(e) = self.driver.set_cookies(&cookies).await {
            warn!("Failed to load cookies: {}", e);
            return Ok(false);
        }
        info!("Loaded {} cookies from {}", cookies.len(), self.session_file.display());

        let search_url = self.site.urls.search.clone();
        if let Err(e) = self.navigate(&search_url).await {
            warn!("Could not verify saved session: {}", e);
            return Ok(false);
        }

        let indicator = self.site.selectors.login.success_indicator.clone();
        let timeout = self.site.timeouts.element();
        if self.wait_for(&indicator, timeout).await.is_found() {
            info!("Using saved session");
            self.state = SessionState::Authenticated;
            Ok(true)
        } else {
            info!("Saved session was not accepted by the site");
            self.state = SessionState::Unauthenticated;
            Ok(false)
        }
    }

    async fn close(&mut self) {
        self.driver.close().await;
        self.started = false;
        self.state = SessionState::Terminated;
    }
}
