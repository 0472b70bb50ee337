use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Earliest model year accepted anywhere in the pipeline.
pub const MIN_YEAR: i32 = 1900;

/// Latest model year accepted right now (next year's models go on sale early).
pub fn max_year() -> i32 {
    Utc::now().year() + 1
}

pub fn is_valid_year(year: i32) -> bool {
    (MIN_YEAR..=max_year()).contains(&year)
}

/// Keeps a year only if it is plausible; anything else becomes unknown.
pub fn normalize_year(year: Option<i32>) -> Option<i32> {
    year.filter(|y| is_valid_year(*y))
}

/// Keeps a count/amount only if it is non-negative.
pub fn normalize_amount(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v >= 0)
}

/// Vehicle Identification Number.
///
/// Always 17 upper-case characters from `A-Z0-9` minus `I`, `O` and `Q`.
/// The only way to get one is [`Vin::parse`], so holding a `Vin` means the
/// value is valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Vin(String);

impl Vin {
    pub const LEN: usize = 17;

    /// Trim, upper-case and check a candidate VIN. Returns `None` when the
    /// value is not a VIN.
    pub fn parse(raw: &str) -> Option<Self> {
        let candidate = raw.trim().to_ascii_uppercase();

        if candidate.len() != Self::LEN {
            return None;
        }

        let allowed = candidate
            .chars()
            .all(|c| {
                c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q'))
            });

        allowed.then_some(Self(candidate))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Vin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Vin::parse(&value).ok_or_else(|| format!("invalid VIN: {value}"))
    }
}

impl From<Vin> for String {
    fn from(vin: Vin) -> Self {
        vin.0
    }
}
