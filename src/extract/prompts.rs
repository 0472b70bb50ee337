//! Prompt text sent to the model.

const LISTING_FIELDS: &str = "\
- id: lot number or other unique identifier (REQUIRED, skip the listing without one)
- url: full URL of the listing detail page
- year: model year as an integer
- make: manufacturer (Honda, Toyota, Ford, ...)
- model: model name (Accord, Camry, F-150, ...)
- trim: trim level if shown (EX, LX, Sport, ...)
- miles: odometer reading as an integer
- current_bid: current bid as an integer, without currency symbols
- buy_now_price: buy-it-now price as an integer if offered
- condition: vehicle condition (Run and Drive, Enhanced, ...)
- damage_type: primary damage (Front End, Side, Rear, ...)
- secondary_damage: secondary damage if listed
- location: yard or city
- sale_date: auction date in ISO 8601 if shown
- thumbnail_url: URL of the thumbnail image";

const DETAIL_FIELDS: &str = "\
- vin: 17-character VIN
- engine: engine description
- transmission: Automatic, Manual, CVT, ...
- drive_type: FWD, RWD, AWD, 4WD
- fuel_type: Gasoline, Diesel, Electric, Hybrid, ...
- color: exterior color
- interior_color: interior color
- keys: whether keys are present (Yes, No, Unknown)
- airbags: airbag status
- seller: seller name or type
- title_type: Clean, Salvage, Rebuilt, ...
- images: array of full-size image URLs in page order
- description: any free-text description";

/// Prompt for a search-results page.
pub fn listing_prompt(markup: &str, example_url: &str) -> String {
    format!(
        r#"Extract every vehicle listing from this auction search results page.

HTML CONTENT:
{markup}

For each listing, extract these fields:
{LISTING_FIELDS}

OUTPUT FORMAT:
Return ONLY a JSON array, with no explanation and no markdown.
Use null for any field you cannot find.
If the page has no listings, return [].

EXAMPLE OUTPUT:
[
  {{
    "id": "12345678",
    "url": "{example_url}",
    "year": 2020,
    "make": "Honda",
    "model": "Accord",
    "trim": "Sport",
    "miles": 45000,
    "current_bid": 8500,
    "buy_now_price": null,
    "condition": "Run and Drive",
    "damage_type": "Front End",
    "secondary_damage": null,
    "location": "Nashville, TN",
    "sale_date": "2024-01-15T10:00:00",
    "thumbnail_url": "https://example.com/image.jpg"
  }}
]"#
    )
}

/// Prompt for a single listing detail page.
pub fn detail_prompt(markup: &str, known_id: &str) -> String {
    format!(
        r#"Extract the full vehicle details from this auction listing page.

HTML CONTENT:
{markup}

Return a single JSON object with the listing fields:
{LISTING_FIELDS}
(use "{known_id}" as the id if the page does not show one)

and the detail fields:
{DETAIL_FIELDS}

OUTPUT FORMAT:
Return ONLY a JSON object, with no explanation and no markdown.
Use null for any field you cannot find.

EXAMPLE:
{{
  "id": "{known_id}",
  "year": 2020,
  "make": "Honda",
  "model": "Accord",
  "vin": "1HGCV1F34LA000000",
  "miles": 45000,
  "engine": "1.5L I4 Turbo",
  "transmission": "CVT",
  "color": "Blue",
  "images": ["https://example.com/img1.jpg", "https://example.com/img2.jpg"]
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_prompt_embeds_markup_and_example() {
        let prompt = listing_prompt("<table>lot</table>", "https://auction.test/lot/12345678");
        assert!(prompt.contains("<table>lot</table>"));
        assert!(prompt.contains("\"url\": \"https://auction.test/lot/12345678\""));
        assert!(prompt.contains("- damage_type:"));
    }

    #[test]
    fn detail_prompt_names_fallback_id() {
        let prompt = detail_prompt("<div/>", "777");
        assert!(prompt.contains("use \"777\" as the id"));
        assert!(prompt.contains("- vin: 17-character VIN"));
    }
}
