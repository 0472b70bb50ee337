//! Cutting oversized page markup down to what fits in one model request.

/// Picks the part of a page that goes into a prompt.
///
/// Implementations must return at most `budget` characters of `markup`.
pub trait MarkupWindow: Send + Sync {
    fn window<'a>(&self, markup: &'a str, budget: usize) -> &'a str;
}

/// Substrings that usually mark the start of the results area.
pub const CONTENT_MARKERS: &[&str] =
    &["<table", "<tbody", "results", "listings", "lot-", "vehicle"];

/// Characters kept in front of the first content marker.
pub const LEAD_IN_CHARS: usize = 1000;

/// Default window: jump to the first content marker, keep `budget`
/// characters, end on a complete closing tag.
#[derive(Debug, Clone)]
pub struct MarkerWindow {
    markers: Vec<String>,
    lead_in: usize,
}

impl Default for MarkerWindow {
    fn default() -> Self {
        Self {
            markers: CONTENT_MARKERS.iter().map(|m| m.to_string()).collect(),
            lead_in: LEAD_IN_CHARS,
        }
    }
}

impl MarkerWindow {
    pub fn with_markers<I, S>(markers: I, lead_in: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.into().to_ascii_lowercase())
                .collect(),
            lead_in,
        }
    }

    /// Byte offset of the earliest marker in the first half of the page.
    fn content_start(&self, markup: &str) -> Option<usize> {
        // ASCII lowercasing keeps byte offsets intact.
        let lowered = markup.to_ascii_lowercase();
        let half = markup.len() / 2;

        self.markers
            .iter()
            .filter_map(|marker| lowered.find(marker.as_str()))
            .filter(|idx| *idx < half)
            .min()
    }
}

impl MarkupWindow for MarkerWindow {
    fn window<'a>(&self, markup: &'a str, budget: usize) -> &'a str {
        if markup.chars().count() <= budget {
            return markup;
        }

        let start = match self.content_start(markup) {
            Some(idx) if self.lead_in > 0 => markup[..idx]
                .char_indices()
                .rev()
                .nth(self.lead_in - 1)
                .map(|(i, _)| i)
                .unwrap_or(0),
            Some(idx) => idx,
            None => 0,
        };

        let rest = &markup[start..];
        let end = rest
            .char_indices()
            .nth(budget)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());

        trim_to_closing_tag(&rest[..end])
    }
}

/// Cut `text` right after its last complete `</...>` tag. Text without any
/// complete closing tag is returned unchanged.
pub fn trim_to_closing_tag(text: &str) -> &str {
    let mut search_end = text.len();

    while let Some(open) = text[..search_end].rfind("</") {
        if let Some(close) = text[open..].find('>') {
            return &text[..open + close + 1];
        }
        search_end = open;
    }
    text
}
