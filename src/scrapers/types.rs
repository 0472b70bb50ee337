use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Where a navigation session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Searching,
    /// Looking at results page `page` (1-based)
    Browsing { page: u32 },
    Terminated,
    Failed,
}

impl SessionState {
    /// Logged in, whether or not a search is showing.
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            SessionState::Authenticated | SessionState::Searching | SessionState::Browsing { .. }
        )
    }

    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Searching => write!(f, "searching"),
            SessionState::Browsing { page } => write!(f, "browsing page {page}"),
            SessionState::Terminated => write!(f, "terminated"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of waiting for one of several locators to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The locator at this index matched first
    Found(usize),
    /// Checked once without waiting and nothing matched
    NotFound,
    /// Waited the full timeout and nothing matched
    TimedOut,
}

impl WaitOutcome {
    pub fn is_found(self) -> bool {
        matches!(self, WaitOutcome::Found(_))
    }
}

/// Attributes of an element at the moment it was queried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSnapshot {
    pub attributes: HashMap<String, String>,
}

impl ElementSnapshot {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            attributes: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Whether a control reads as disabled: a `disabled` attribute, an
    /// `aria-disabled="true"`, or a `disabled` class.
    pub fn is_disabled(&self) -> bool {
        let attribute = self
            .attr("disabled")
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        let aria = self
            .attr("aria-disabled")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let class = self
            .attr("class")
            .map(|c| c.contains("disabled"))
            .unwrap_or(false);

        attribute || aria || class
    }
}

/// One browser cookie as kept in a session snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the epoch; `None` for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_detection() {
        assert!(!ElementSnapshot::from_pairs([("class", "paginate_button next")]).is_disabled());
        let classed = ElementSnapshot::from_pairs([("class", "paginate_button next disabled")]);
        assert!(classed.is_disabled());
        assert!(ElementSnapshot::from_pairs([("disabled", "")]).is_disabled());
        assert!(!ElementSnapshot::from_pairs([("disabled", "false")]).is_disabled());
        assert!(ElementSnapshot::from_pairs([("aria-disabled", "true")]).is_disabled());
    }

    #[test]
    fn authenticated_states() {
        assert!(SessionState::Browsing { page: 3 }.is_authenticated());
        assert!(!SessionState::Authenticating.is_authenticated());
        assert!(SessionState::Failed.is_closed());
    }
}
