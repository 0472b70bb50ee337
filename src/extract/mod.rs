//! Markup → records, via a generative model.

mod model;
mod parse;
mod prompts;
mod response;
mod window;

pub use model::{AnthropicModel, TextModel};
pub use parse::{detail_from_value, listing_from_value};
pub use response::strip_fences;
pub use window::{trim_to_closing_tag, MarkerWindow, MarkupWindow, CONTENT_MARKERS};

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SiteDescriptor;
use crate::error::{Result, ScoutError};
use crate::models::{DetailRecord, ListingRecord};

/// Character budgets for the markup sent with each prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionBudgets {
    pub listing_chars: usize,
    pub detail_chars: usize,
    pub listing_max_tokens: u32,
    pub detail_max_tokens: u32,
}

impl Default for ExtractionBudgets {
    fn default() -> Self {
        Self {
            listing_chars: 50_000,
            detail_chars: 40_000,
            listing_max_tokens: 4096,
            detail_max_tokens: 2048,
        }
    }
}

/// Turns page markup from one site into records.
pub struct Extractor {
    model: Arc<dyn TextModel>,
    site: SiteDescriptor,
    window: Box<dyn MarkupWindow>,
    budgets: ExtractionBudgets,
}

impl Extractor {
    /// Create a new extractor using the default [`MarkerWindow`].
    pub fn new(model: Arc<dyn TextModel>, site: SiteDescriptor) -> Self {
        Self {
            model,
            site,
            window: Box::new(MarkerWindow::default()),
            budgets: ExtractionBudgets::default(),
        }
    }

    pub fn with_window(mut self, window: Box<dyn MarkupWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn with_budgets(mut self, budgets: ExtractionBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// All listings on a results page. An empty page yields an empty vec;
    /// an unusable model answer is an [`ScoutError::Extraction`].
    pub async fn extract_listings(&self, markup: &str) -> Result<Vec<ListingRecord>> {
        let window = self.window.window(markup, self.budgets.listing_chars);
        if window.len() < markup.len() {
            debug!("Windowed page from {} to {} bytes", markup.len(), window.len());
        }

        let prompt = prompts::listing_prompt(window, &self.site.listing_url("12345678"));
        let answer = self
            .model
            .complete(&prompt, self.budgets.listing_max_tokens)
            .await?;
        let items = response::decode_array(&answer)?;

        let total = items.len();
        let listings: Vec<ListingRecord> = items
            .iter()
            .filter_map(|item| {
                let listing = parse::listing_from_value(item, &self.site);
                if listing.is_none() {
                    debug!("Skipping listing without id: {}", item);
                }
                listing
            })
            .map(|mut listing| {
                listing.sanitize();
                listing
            })
            .collect();

        if listings.len() < total {
            warn!("Dropped {} of {} listings without an id", total - listings.len(), total);
        }
        info!("Extracted {} listings", listings.len());
        Ok(listings)
    }

    /// Full details of one listing page.
    pub async fn extract_detail(
        &self,
        markup: &str,
        known_id: &str,
        known_url: Option<&str>,
    ) -> Result<DetailRecord> {
        let window = self.window.window(markup, self.budgets.detail_chars);
        let prompt = prompts::detail_prompt(window, known_id);
        let answer = self
            .model
            .complete(&prompt, self.budgets.detail_max_tokens)
            .await?;
        let value = response::decode_object(&answer)?;

        let mut detail = parse::detail_from_value(&value, &self.site, known_id, known_url)
            .ok_or_else(|| {
                ScoutError::Extraction(format!("no detail object for listing {known_id}"))
            })?;
        detail.listing.sanitize();
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a canned answer and remembers the prompts it was sent.
    struct CannedModel {
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextModel for CannedModel {
        async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.answer.clone())
        }
    }

    fn extractor(model: Arc<CannedModel>) -> Extractor {
        Extractor::new(model, SiteDescriptor::builtin("copart").unwrap())
    }

    #[tokio::test]
    async fn listings_are_validated_per_field() {
        let model = CannedModel::new(
            r#"```json
[
  {"id": "1001", "year": 2020, "make": "Honda", "model": "Accord", "current_bid": 8500},
  {"id": "1002", "year": 9999, "make": "Honda", "model": "Civic"},
  {"make": "Honda", "model": "Fit"}
]
```"#,
        );

        let listings = extractor(model).extract_listings("<table></table>").await.unwrap();

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].year, Some(2020));
        assert_eq!(listings[1].year, None);
        assert_eq!(listings[1].model.as_deref(), Some("Civic"));
        assert!(listings.iter().all(|l| l.source_site == "copart"));
    }

    #[tokio::test]
    async fn empty_page_is_not_an_error() {
        let listings = extractor(CannedModel::new("[]"))
            .extract_listings("<html></html>")
            .await
            .unwrap();
        assert!(listings.is_empty());
    }

    #[tokio::test]
    async fn undecodable_answer_is_an_extraction_error() {
        let result = extractor(CannedModel::new("I see no cars here."))
            .extract_listings("<html></html>")
            .await;
        assert!(matches!(result, Err(ScoutError::Extraction(_))));
    }

    #[tokio::test]
    async fn prompt_carries_windowed_markup() {
        let model = CannedModel::new("[]");
        let mut page = String::from("<table>");
        page.push_str(&"<tr><td>lot</td></tr>".repeat(5_000));
        page.push_str("</table>");

        extractor(model.clone())
            .with_budgets(ExtractionBudgets {
                listing_chars: 1_000,
                ..Default::default()
            })
            .extract_listings(&page)
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].len() < 5_000);
        assert!(prompts[0].contains("<table><tr><td>lot</td></tr>"));
    }

    /// Keeps what follows `<main>`.
    struct AfterMain;

    impl MarkupWindow for AfterMain {
        fn window<'a>(&self, markup: &'a str, budget: usize) -> &'a str {
            let rest = &markup[markup.find("<main>").unwrap_or(0)..];
            &rest[..rest.len().min(budget)]
        }
    }

    #[tokio::test]
    async fn custom_window_decides_what_the_model_sees() {
        let model = CannedModel::new("[]");
        let page = "<nav>MENU-ONLY</nav><main><table><tr><td>lot</td></tr></table></main>";

        extractor(model.clone())
            .with_window(Box::new(AfterMain))
            .extract_listings(page)
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("<main><table><tr><td>lot</td></tr></table></main>"));
        assert!(!prompts[0].contains("MENU-ONLY"));
    }

    #[tokio::test]
    async fn detail_uses_known_identity_when_missing() {
        let model = CannedModel::new(
            r#"{"vin": "1HGCV1F34LA000000", "year": 2020,
                "transmission": "CVT", "miles": "45,000"}"#,
        );

        let detail = extractor(model)
            .extract_detail("<div></div>", "555", Some("https://www.copart.com/lot/555"))
            .await
            .unwrap();

        assert_eq!(detail.listing.local_id, "555");
        assert_eq!(detail.listing.miles, Some(45_000));
        assert_eq!(detail.spec.transmission.as_deref(), Some("CVT"));
        assert!(detail.vin().is_some());
    }

    #[tokio::test]
    async fn detail_answer_must_be_an_object() {
        let result = extractor(CannedModel::new("[]"))
            .extract_detail("<div></div>", "555", None)
            .await;
        assert!(matches!(result, Err(ScoutError::Extraction(_))));
    }
}
