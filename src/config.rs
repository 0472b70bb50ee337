//! Process configuration.
//!
//! Secrets and connection strings come from the environment (`.env` is
//! honoured). Everything site-specific (URLs, locators, timeouts, pacing)
//! lives in a TOML site descriptor. Both are built once in `main` and passed
//! by reference into each component.

use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ScoutError};

const DEFAULT_AI_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_SESSION_DIR: &str = ".sessions";

/// Site descriptors shipped with the binary.
const BUILTIN_SITES: &[(&str, &str)] = &[("copart", include_str!("../sites/copart.toml"))];

/// Values read from the environment.
///
/// Nothing is required at load time; each command asks for what it needs
/// through the `require_*` methods before starting any work.
#[derive(Clone)]
pub struct Settings {
    database_url: Option<String>,
    anthropic_api_key: Option<String>,
    pub ai_model: String,
    pub model_timeout: Duration,
    pub session_dir: PathBuf,
}

impl Settings {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        Self {
            database_url: non_empty_var("DATABASE_URL"),
            anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
            ai_model: non_empty_var("AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            model_timeout: non_empty_var("AI_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(120)),
            session_dir: non_empty_var("SESSION_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_DIR)),
        }
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| missing(&["DATABASE_URL"]))
    }

    pub fn require_anthropic_api_key(&self) -> Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .ok_or_else(|| missing(&["ANTHROPIC_API_KEY"]))
    }

    /// Credentials for `site` from `<SITE>_USERNAME` / `<SITE>_PASSWORD`.
    pub fn require_credentials(&self, site: &str) -> Result<Credentials> {
        let prefix = site.to_ascii_uppercase().replace('-', "_");
        let user_var = format!("{prefix}_USERNAME");
        let pass_var = format!("{prefix}_PASSWORD");

        match (non_empty_var(&user_var), non_empty_var(&pass_var)) {
            (Some(username), Some(password)) => Ok(Credentials { username, password }),
            (None, None) => Err(missing(&[&user_var, &pass_var])),
            (None, _) => Err(missing(&[&user_var])),
            (_, None) => Err(missing(&[&pass_var])),
        }
    }

    /// Where the cookie snapshot for `site` is kept.
    pub fn session_file(&self, site: &str) -> PathBuf {
        self.session_dir.join(format!("{site}_cookies.json"))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "<set>"))
            .field("ai_model", &self.ai_model)
            .field("model_timeout", &self.model_timeout)
            .field("session_dir", &self.session_dir)
            .finish()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn missing(vars: &[&str]) -> ScoutError {
    ScoutError::Configuration(format!(
        "Missing required environment variables: {}",
        vars.join(", ")
    ))
}

/// Login credentials supplied by the caller.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Everything the navigation layer needs to know about one auction site.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteDescriptor {
    pub name: String,
    pub urls: SiteUrls,
    pub selectors: Selectors,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteUrls {
    pub login: String,
    pub search: String,
    /// Detail page URL with an `{id}` placeholder for the lot number
    pub listing: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Selectors {
    pub login: LoginSelectors,
    pub search: SearchSelectors,
    pub results: ResultSelectors,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginSelectors {
    pub username: String,
    pub password: String,
    pub submit: String,
    /// Present only once logged in
    pub success_indicator: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSelectors {
    pub make_input: String,
    pub make_dropdown: String,
    pub model_input: String,
    pub model_dropdown: String,
    pub year_from: String,
    pub year_to: String,
    #[serde(default)]
    pub max_miles_input: Option<String>,
    #[serde(default)]
    pub max_price_input: Option<String>,
    pub search_button: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultSelectors {
    pub pagination_next: String,
    /// Present once result rows have rendered. Page waits also require its
    /// text to change after a pagination click.
    #[serde(default)]
    pub ready: Option<String>,
}

/// Per-operation-class timeouts, in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    /// Waiting for a single element to appear
    pub element_ms: u64,
    /// Waiting for a navigation (or login outcome) to settle
    pub navigation_ms: u64,
    /// Waiting for a full results page to load
    pub page_load_ms: u64,
    /// Waiting for an autocomplete suggestion list
    pub autocomplete_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            element_ms: 10_000,
            navigation_ms: 30_000,
            page_load_ms: 60_000,
            autocomplete_ms: 5_000,
        }
    }
}

impl Timeouts {
    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn page_load(&self) -> Duration {
        Duration::from_millis(self.page_load_ms)
    }

    pub fn autocomplete(&self) -> Duration {
        Duration::from_millis(self.autocomplete_ms)
    }
}

/// Bounds of the random pause inserted between browser actions.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimit {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 5_000,
        }
    }
}

impl RateLimit {
    /// No pauses at all (tests).
    pub fn none() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Draw the next pause uniformly from `[min_delay_ms, max_delay_ms]`.
    pub fn next_delay(&self) -> Duration {
        Duration::from_millis(fastrand::u64(self.min_delay_ms..=self.max_delay_ms))
    }
}

impl SiteDescriptor {
    /// One of the descriptors compiled into the binary.
    pub fn builtin(name: &str) -> Result<Self> {
        let (_, source) = BUILTIN_SITES
            .iter()
            .find(|(site, _)| *site == name)
            .ok_or_else(|| {
                ScoutError::Configuration(format!(
                    "No built-in site descriptor named '{name}' (known: {})",
                    BUILTIN_SITES
                        .iter()
                        .map(|(site, _)| *site)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?;
        Self::from_toml(source)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ScoutError::Configuration(format!(
                "Cannot read site descriptor {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&source)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let descriptor: SiteDescriptor = toml::from_str(source)
            .map_err(|e| ScoutError::Configuration(format!("Invalid site descriptor: {e}")))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ScoutError::Configuration(
                "site descriptor has an empty name".to_string(),
            ));
        }
        if self.rate_limit.min_delay_ms > self.rate_limit.max_delay_ms {
            return Err(ScoutError::Configuration(format!(
                "{}: rate_limit.min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.name, self.rate_limit.min_delay_ms, self.rate_limit.max_delay_ms
            )));
        }
        if !self.urls.listing.contains("{id}") {
            return Err(ScoutError::Configuration(format!(
                "{}: urls.listing must contain an {{id}} placeholder",
                self.name
            )));
        }
        Ok(())
    }

    /// Detail page URL for a lot number.
    pub fn listing_url(&self, local_id: &str) -> String {
        self.urls.listing.replace("{id}", local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_copart_descriptor_parses() {
        let site = SiteDescriptor::builtin("copart").unwrap();
        assert_eq!(site.name, "copart");
        assert!(site.rate_limit.min_delay_ms <= site.rate_limit.max_delay_ms);
        assert_eq!(site.listing_url("42"), "https://www.copart.com/lot/42");
    }

    #[test]
    fn unknown_builtin_is_a_configuration_error() {
        assert!(matches!(
            SiteDescriptor::builtin("nowhere"),
            Err(ScoutError::Configuration(_))
        ));
    }

    #[test]
    fn inverted_rate_limit_is_rejected() {
        let source = include_str!("../sites/copart.toml").replace(
            "max_delay_ms = 5000",
            "max_delay_ms = 100",
        );
        assert!(SiteDescriptor::from_toml(&source).is_err());
    }

    #[test]
    fn delays_stay_within_bounds() {
        let limit = RateLimit {
            min_delay_ms: 20,
            max_delay_ms: 40,
        };
        for _ in 0..200 {
            let delay = limit.next_delay();
            assert!(delay >= Duration::from_millis(20));
            assert!(delay <= Duration::from_millis(40));
        }
        assert_eq!(RateLimit::none().next_delay(), Duration::ZERO);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("buyer@example.com", "hunter2");
        let shown = format!("{creds:?}");
        assert!(shown.contains("buyer@example.com"));
        assert!(!shown.contains("hunter2"));
    }
}
