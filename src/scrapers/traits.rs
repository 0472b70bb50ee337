use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use super::types::{CookieRecord, ElementSnapshot, SessionState};
use crate::config::Credentials;
use crate::error::Result;
use crate::models::SearchCriteria;

/// Low-level browser primitives for a single open page.
///
/// Implementations own the browser handle; nothing else reaches the page.
/// Element lookups never wait: waiting and pacing are the session's job.
#[async_trait]
pub trait PageDriver: Send {
    /// Launch the browser if it is not running yet.
    async fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Load `url` and wait (up to `timeout`) for the navigation to finish.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait (up to `timeout`) for a navigation triggered by the last action.
    async fn wait_until_settled(&mut self, timeout: Duration) -> Result<()>;

    /// The first element matching `selector`, if any.
    async fn element(&mut self, selector: &str) -> Result<Option<ElementSnapshot>>;

    /// Visible text of the first element matching `selector`, if any.
    async fn element_text(&mut self, selector: &str) -> Result<Option<String>>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Replace the value of an input.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<()>;

    /// Choose an option of a `<select>` by value or label. `Ok(false)` when
    /// the element is not a select or has no such option.
    async fn select_option(&mut self, selector: &str, value: &str) -> Result<bool>;

    async fn press_key(&mut self, key: &str) -> Result<()>;

    /// Full rendered markup of the page.
    async fn content(&mut self) -> Result<String>;

    async fn cookies(&mut self) -> Result<Vec<CookieRecord>>;

    async fn set_cookies(&mut self, cookies: &[CookieRecord]) -> Result<()>;

    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    /// Release the browser. Safe to call more than once.
    async fn close(&mut self);
}

/// What the pipeline needs from a site session.
///
/// Common trait for all site sessions; this is the seam the acquisition
/// pipeline is written against.
#[async_trait]
pub trait Navigator: Send {
    /// Name of the site being driven
    fn site(&self) -> &str;

    fn state(&self) -> SessionState;

    /// Detail page URL for a lot number on this site.
    fn listing_url(&self, local_id: &str) -> String;

    async fn start(&mut self) -> Result<()>;

    /// `Ok(false)` when the site rejects the credentials.
    async fn login(&mut self, credentials: &Credentials) -> Result<bool>;

    /// `Ok(false)` when the form could not be submitted or did not settle.
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<bool>;

    async fn page_markup(&mut self) -> Result<String>;

    async fn has_next_page(&mut self) -> bool;

    async fn go_next_page(&mut self) -> bool;

    async fn go_to_listing(&mut self, url: &str) -> Result<String>;

    async fn save_session(&mut self) -> Result<()>;

    /// `Ok(true)` only if a snapshot existed and the site accepted it.
    async fn load_session(&mut self) -> Result<bool>;

    async fn close(&mut self);
}
