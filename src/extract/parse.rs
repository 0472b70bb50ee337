//! Field-by-field conversion of model JSON into records.
//!
//! A bad field is dropped, never the record, except for a listing that has
//! no identifier at all.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::config::SiteDescriptor;
use crate::models::{
    normalize_amount, normalize_year, DetailRecord, ListingRecord, VehicleSpec, Vin,
};

type Object = Map<String, Value>;

/// Trimmed, non-empty text. Numbers are accepted too (lot numbers often
/// come back unquoted).
fn text(obj: &Object, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && !s.eq_ignore_ascii_case("null")).then(|| s.to_string())
        }
        Value::Number(n) => Some(number_text(n)),
        _ => None,
    }
}

/// `12345678.0` reads as `12345678`; other numbers as serde_json prints them.
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

/// Integers, also from strings like "$8,500" or "45,000 mi".
fn integer(obj: &Object, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn parse_number(raw: &str) -> Option<i64> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.round() as i64)
}

fn amount(obj: &Object, key: &str) -> Option<i64> {
    normalize_amount(integer(obj, key))
}

fn year(obj: &Object) -> Option<i32> {
    normalize_year(integer(obj, "year").and_then(|y| i32::try_from(y).ok()))
}

fn vin(obj: &Object) -> Option<Vin> {
    text(obj, "vin").and_then(|raw| Vin::parse(&raw))
}

/// RFC 3339, a naive ISO date-time (taken as UTC), or a bare date.
fn timestamp(obj: &Object, key: &str) -> Option<DateTime<Utc>> {
    let raw = text(obj, key)?;

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn images(obj: &Object) -> Vec<String> {
    match obj.get("images") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(url)) if !url.trim().is_empty() => vec![url.trim().to_string()],
        _ => Vec::new(),
    }
}

fn fill_listing(listing: &mut ListingRecord, obj: &Object) {
    listing.vin = vin(obj);
    listing.year = year(obj);
    listing.make = text(obj, "make");
    listing.model = text(obj, "model");
    listing.trim = text(obj, "trim");
    listing.miles = amount(obj, "miles");
    listing.current_bid = amount(obj, "current_bid");
    listing.buy_now_price = amount(obj, "buy_now_price");
    listing.condition = text(obj, "condition");
    listing.damage_type = text(obj, "damage_type");
    listing.secondary_damage = text(obj, "secondary_damage");
    listing.location = text(obj, "location");
    listing.sale_date = timestamp(obj, "sale_date");
    listing.thumbnail_url = text(obj, "thumbnail_url");
}

/// One element of a results-page answer. `None` when it has no id.
pub fn listing_from_value(value: &Value, site: &SiteDescriptor) -> Option<ListingRecord> {
    let obj = value.as_object()?;
    let id = text(obj, "id")?;

    let mut listing = ListingRecord::new(site.name.as_str(), id.as_str());
    fill_listing(&mut listing, obj);
    listing.url = Some(text(obj, "url").unwrap_or_else(|| site.listing_url(&id)));
    Some(listing)
}

/// A detail-page answer. Missing id and url fall back to what the caller
/// already knows about the listing.
pub fn detail_from_value(
    value: &Value,
    site: &SiteDescriptor,
    known_id: &str,
    known_url: Option<&str>,
) -> Option<DetailRecord> {
    let obj = value.as_object()?;
    let id = text(obj, "id").unwrap_or_else(|| known_id.to_string());

    let mut listing = ListingRecord::new(site.name.as_str(), id.as_str());
    fill_listing(&mut listing, obj);
    listing.url = text(obj, "url")
        .or_else(|| known_url.map(str::to_string))
        .or_else(|| Some(site.listing_url(&id)));

    let spec = VehicleSpec {
        engine: text(obj, "engine"),
        transmission: text(obj, "transmission"),
        drive_type: text(obj, "drive_type"),
        fuel_type: text(obj, "fuel_type"),
        color: text(obj, "color"),
        interior_color: text(obj, "interior_color"),
        keys: text(obj, "keys"),
        airbags: text(obj, "airbags"),
        seller: text(obj, "seller"),
        title_type: text(obj, "title_type"),
        images: images(obj),
        description: text(obj, "description"),
    };

    Some(DetailRecord { listing, spec })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn site() -> SiteDescriptor {
        SiteDescriptor::builtin("copart").unwrap()
    }

    #[test]
    fn invalid_fields_are_nulled_individually() {
        let value = json!({
            "id": "12345678",
            "year": 9999,
            "make": "Honda",
            "vin": "NOT-A-VIN",
            "miles": -5,
            "current_bid": "$8,500",
        });

        let listing = listing_from_value(&value, &site()).unwrap();

        assert_eq!(listing.year, None);
        assert_eq!(listing.vin, None);
        assert_eq!(listing.miles, None);
        assert_eq!(listing.make.as_deref(), Some("Honda"));
        assert_eq!(listing.current_bid, Some(8500));
    }

    #[test]
    fn listing_without_id_is_dropped() {
        assert!(listing_from_value(&json!({"make": "Honda"}), &site()).is_none());
        assert!(listing_from_value(&json!({"id": "  "}), &site()).is_none());
        assert!(listing_from_value(&json!("12345678"), &site()).is_none());
    }

    #[test]
    fn numeric_id_and_missing_url_are_filled_in() {
        let listing = listing_from_value(&json!({"id": 12345678}), &site()).unwrap();
        assert_eq!(listing.local_id, "12345678");
        assert_eq!(listing.url.as_deref(), Some("https://www.copart.com/lot/12345678"));
        assert_eq!(listing.source_site, "copart");
    }

    #[test]
    fn whole_float_id_has_no_fraction() {
        let listing = listing_from_value(&json!({"id": 12345678.0}), &site()).unwrap();
        assert_eq!(listing.local_id, "12345678");
        assert_eq!(listing.url.as_deref(), Some("https://www.copart.com/lot/12345678"));

        let odd = listing_from_value(&json!({"id": 1234.5}), &site()).unwrap();
        assert_eq!(odd.local_id, "1234.5");
    }

    #[test]
    fn sale_dates_in_common_shapes() {
        let naive = listing_from_value(
            &json!({"id": "1", "sale_date": "2024-01-15T10:00:00"}),
            &site(),
        )
        .unwrap()
        .sale_date
        .unwrap();
        assert_eq!((naive.year(), naive.month(), naive.day(), naive.hour()), (2024, 1, 15, 10));

        let zoned = listing_from_value(
            &json!({"id": "1", "sale_date": "2024-01-15T10:00:00-05:00"}),
            &site(),
        )
        .unwrap()
        .sale_date
        .unwrap();
        assert_eq!(zoned.hour(), 15);

        let date_only = listing_from_value(&json!({"id": "1", "sale_date": "2024-01-15"}), &site())
            .unwrap()
            .sale_date;
        assert!(date_only.is_some());

        let garbage = listing_from_value(&json!({"id": "1", "sale_date": "next Tuesday"}), &site())
            .unwrap()
            .sale_date;
        assert!(garbage.is_none());
    }

    #[test]
    fn detail_falls_back_to_known_identity() {
        let value = json!({
            "vin": "1hgcv1f34la000000",
            "engine": "1.5L I4 Turbo",
            "images": ["https://img.test/1.jpg", "", "https://img.test/2.jpg"],
        });

        let detail =
            detail_from_value(&value, &site(), "777", Some("https://www.copart.com/lot/777?x=1"))
                .unwrap();

        assert_eq!(detail.listing.local_id, "777");
        assert_eq!(detail.listing.url.as_deref(), Some("https://www.copart.com/lot/777?x=1"));
        assert_eq!(detail.vin().map(Vin::as_str), Some("1HGCV1F34LA000000"));
        assert_eq!(detail.spec.engine.as_deref(), Some("1.5L I4 Turbo"));
        assert_eq!(detail.spec.images, vec!["https://img.test/1.jpg", "https://img.test/2.jpg"]);
    }

    #[test]
    fn detail_prefers_page_identity() {
        let detail = detail_from_value(&json!({"id": "888"}), &site(), "777", None).unwrap();
        assert_eq!(detail.listing.local_id, "888");
        assert_eq!(detail.listing.url.as_deref(), Some("https://www.copart.com/lot/888"));
        assert!(detail.vin().is_none());
    }
}
