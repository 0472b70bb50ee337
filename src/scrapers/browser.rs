use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::{Cookie, CookieParam};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::PageDriver;
use super::types::{CookieRecord, ElementSnapshot};
use crate::error::{Result, ScoutError};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Flags that make automated Chrome look less like automated Chrome.
const CHROME_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
];

const CLEAR_VALUE_JS: &str = "function() { this.value = ''; }";

const SELECT_OPTION_JS: &str = r#"
function(wanted) {
    if (this.tagName !== 'SELECT') return false;
    const option = Array.from(this.options)
        .find(o => o.value === wanted || o.text.trim() === wanted);
    if (!option) return false;
    this.value = option.value;
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
}
"#;

/// headless_chrome calls block; keep them off the async scheduler.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(f)
}

/// Error text seen once the DevTools connection or the Chrome process is gone.
const LOST_BROWSER_MARKERS: &[&str] = &[
    "connection is closed",
    "connection closed",
    "target closed",
    "no target with given id",
    "browser process",
    "broken pipe",
];

/// A lost browser ends the session. Anything else is a page problem that a
/// retry or the next page may not have.
fn page_error(action: &str, err: anyhow::Error) -> ScoutError {
    let message = format!("{action}: {err:#}");
    let lowered = message.to_ascii_lowercase();
    if LOST_BROWSER_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        ScoutError::Session(message)
    } else {
        ScoutError::TransientPage(message)
    }
}

/// Page driver backed by a headless Chrome instance.
///
/// Needs a multi-threaded tokio runtime.
pub struct ChromeDriver {
    headless: bool,
    idle_timeout: Duration,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeDriver {
    /// Create a driver; Chrome is launched on [`PageDriver::open`].
    ///
    /// `idle_timeout` must exceed the longest wait the session performs,
    /// otherwise Chrome shuts itself down mid-run.
    pub fn new(headless: bool, idle_timeout: Duration) -> Self {
        Self {
            headless,
            idle_timeout,
            browser: None,
            tab: None,
        }
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| ScoutError::Session("browser is not open".to_string()))
    }

    fn launch(&self) -> Result<(Browser, Arc<Tab>)> {
        info!("Launching Chrome (headless: {})...", self.headless);

        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .window_size(Some((1920, 1080)))
            .idle_browser_timeout(self.idle_timeout)
            .args(CHROME_ARGS.iter().map(|arg| OsStr::new(*arg)).collect())
            .build()
            .map_err(|e| ScoutError::Session(format!("Failed to build launch options: {e}")))?;

        let browser = Browser::new(options)
            .map_err(|e| ScoutError::Session(format!("Failed to launch Chrome browser: {e:#}")))?;

        let tab = browser
            .new_tab()
            .map_err(|e| ScoutError::Session(format!("Failed to open tab: {e:#}")))?;

        tab.enable_stealth_mode()
            .map_err(|e| ScoutError::Session(format!("Failed to enable stealth mode: {e:#}")))?;
        tab.set_user_agent(USER_AGENT, Some("en-US,en"), None)
            .map_err(|e| ScoutError::Session(format!("Failed to set user agent: {e:#}")))?;

        Ok((browser, tab))
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn open(&mut self) -> Result<()> {
        if self.tab.is_some() {
            return Ok(());
        }

        let (browser, tab) = blocking(|| self.launch())?;
        self.browser = Some(browser);
        self.tab = Some(tab);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.tab.is_some()
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let tab = self.tab()?;
        debug!("Navigating to {}", url);

        blocking(|| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| page_error(&format!("navigate to {url}"), e))
        })
    }

    async fn wait_until_settled(&mut self, timeout: Duration) -> Result<()> {
        let tab = self.tab()?;

        blocking(|| {
            tab.set_default_timeout(timeout);
            tab.wait_until_navigated()
                .map(|_| ())
                .map_err(|e| page_error("wait for page to settle", e))
        })
    }

    async fn element(&mut self, selector: &str) -> Result<Option<ElementSnapshot>> {
        let tab = self.tab()?;

        blocking(|| {
            let element = match tab.find_element(selector) {
                Ok(element) => element,
                Err(_) => return Ok(None),
            };

            let flat = element
                .get_attributes()
                .map_err(|e| page_error(&format!("read attributes of {selector}"), e))?
                .unwrap_or_default();

            // CDP returns attributes as [name, value, name, value, ...]
            let pairs = flat
                .chunks(2)
                .filter_map(|pair| match pair {
                    [name, value] => Some((name.clone(), value.clone())),
                    _ => None,
                });

            Ok(Some(ElementSnapshot::from_pairs(pairs)))
        })
    }

    async fn element_text(&mut self, selector: &str) -> Result<Option<String>> {
        let tab = self.tab()?;

        blocking(|| match tab.find_element(selector) {
            Ok(element) => element
                .get_inner_text()
                .map(|text| Some(text.trim().to_string()))
                .map_err(|e| page_error(&format!("read text of {selector}"), e)),
            Err(_) => Ok(None),
        })
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let tab = self.tab()?;

        blocking(|| {
            tab.find_element(selector)
                .and_then(|element| element.click().map(|_| ()))
                .map_err(|e| page_error(&format!("click {selector}"), e))
        })
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<()> {
        let tab = self.tab()?;

        blocking(|| {
            let element = tab
                .find_element(selector)
                .map_err(|e| page_error(&format!("find {selector}"), e))?;
            element
                .call_js_fn(CLEAR_VALUE_JS, vec![], false)
                .map_err(|e| page_error(&format!("clear {selector}"), e))?;
            element
                .type_into(value)
                .map(|_| ())
                .map_err(|e| page_error(&format!("type into {selector}"), e))
        })
    }

    async fn select_option(&mut self, selector: &str, value: &str) -> Result<bool> {
        let tab = self.tab()?;

        blocking(|| {
            let element = tab
                .find_element(selector)
                .map_err(|e| page_error(&format!("find {selector}"), e))?;
            let result = element
                .call_js_fn(SELECT_OPTION_JS, vec![json!(value)], false)
                .map_err(|e| page_error(&format!("select option in {selector}"), e))?;

            Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
        })
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        let tab = self.tab()?;

        blocking(|| {
            tab.press_key(key)
                .map(|_| ())
                .map_err(|e| page_error(&format!("press {key}"), e))
        })
    }

    async fn content(&mut self) -> Result<String> {
        let tab = self.tab()?;
        blocking(|| tab.get_content().map_err(|e| page_error("read page content", e)))
    }

    async fn cookies(&mut self) -> Result<Vec<CookieRecord>> {
        let tab = self.tab()?;
        let cookies = blocking(|| tab.get_cookies().map_err(|e| page_error("read cookies", e)))?;

        cookies.iter().map(cookie_to_record).collect()
    }

    async fn set_cookies(&mut self, cookies: &[CookieRecord]) -> Result<()> {
        let tab = self.tab()?;
        let params = cookies
            .iter()
            .map(record_to_param)
            .collect::<Result<Vec<_>>>()?;

        blocking(|| tab.set_cookies(params).map_err(|e| page_error("install cookies", e)))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let tab = self.tab()?;

        let png = blocking(|| {
            tab.capture_screenshot(
                Page::CaptureScreenshotFormatOption::Png,
                None,
                None,
                true,
            )
            .map_err(|e| page_error("capture screenshot", e))
        })?;

        tokio::fs::write(path, png).await?;
        info!("Saved screenshot to {}", path.display());
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(tab) = self.tab.take() {
            if let Err(e) = blocking(|| tab.close(true)) {
                warn!("Failed to close tab cleanly: {e:#}");
            }
        }
        // Dropping the browser kills the Chrome process.
        if self.browser.take().is_some() {
            info!("Browser closed");
        }
    }
}

/// The CDP cookie types are generated code; go through JSON so field
/// additions across protocol versions do not matter.
fn cookie_to_record(cookie: &Cookie) -> Result<CookieRecord> {
    let value = serde_json::to_value(cookie)?;
    let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let flag = |key: &str| value.get(key).and_then(Value::as_bool).unwrap_or(false);
    let session = flag("session");

    Ok(CookieRecord {
        name: text("name"),
        value: text("value"),
        domain: text("domain"),
        path: text("path"),
        expires: if session {
            None
        } else {
            value.get("expires").and_then(Value::as_f64)
        },
        http_only: flag("httpOnly"),
        secure: flag("secure"),
        same_site: value
            .get("sameSite")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn record_to_param(record: &CookieRecord) -> Result<CookieParam> {
    let mut value = json!({
        "name": record.name,
        "value": record.value,
        "domain": record.domain,
        "path": record.path,
        "httpOnly": record.http_only,
        "secure": record.secure,
    });
    if let Some(expires) = record.expires {
        value["expires"] = json!(expires);
    }
    if let Some(same_site) = &record.same_site {
        value["sameSite"] = json!(same_site);
    }

    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_connection_is_a_session_error() {
        let err = anyhow::anyhow!(
            "Unable to make method calls because underlying connection is closed"
        );
        assert!(matches!(page_error("click a.next", err), ScoutError::Session(_)));

        let err = anyhow::anyhow!("Target closed").context("Method call error -32000");
        assert!(matches!(page_error("read page content", err), ScoutError::Session(_)));
    }

    #[test]
    fn page_problems_stay_transient() {
        let err = anyhow::anyhow!("Could not find element");
        match page_error("find #make", err) {
            ScoutError::TransientPage(message) => {
                assert_eq!(message, "find #make: Could not find element")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
