use serde::{Deserialize, Serialize};

use super::validate::{is_valid_year, max_year, MIN_YEAR};
use crate::error::{Result, ScoutError};

/// What to type into the auction site's search form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Manufacturer, e.g. "Honda"
    pub make: String,
    pub model: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    /// Maximum odometer reading
    pub max_miles: Option<i64>,
    /// Maximum current bid
    pub max_price: Option<i64>,
}

impl SearchCriteria {
    pub fn new(make: impl Into<String>) -> Self {
        Self {
            make: make.into(),
            model: None,
            year_min: None,
            year_max: None,
            max_miles: None,
            max_price: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_years(mut self, year_min: Option<i32>, year_max: Option<i32>) -> Self {
        self.year_min = year_min;
        self.year_max = year_max;
        self
    }

    /// Check the criteria before anything touches the browser.
    ///
    /// Unlike listing records, criteria are rejected outright when a bound is
    /// out of range.
    pub fn validate(&self) -> Result<()> {
        if self.make.trim().is_empty() {
            return Err(ScoutError::Validation("make is required".to_string()));
        }

        for (name, year) in [("year_min", self.year_min), ("year_max", self.year_max)] {
            if let Some(year) = year {
                if !is_valid_year(year) {
                    return Err(ScoutError::Validation(format!(
                        "{name} must be between {MIN_YEAR} and {}, got {year}",
                        max_year()
                    )));
                }
            }
        }

        if let (Some(min), Some(max)) = (self.year_min, self.year_max) {
            if min > max {
                return Err(ScoutError::Validation(format!(
                    "year_min ({min}) is greater than year_max ({max})"
                )));
            }
        }

        for (name, value) in [("max_miles", self.max_miles), ("max_price", self.max_price)] {
            if let Some(value) = value {
                if value < 0 {
                    return Err(ScoutError::Validation(format!(
                        "{name} must be non-negative, got {value}"
                    )));
                }
            }
        }

        Ok(())
    }
}
