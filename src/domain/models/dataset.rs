//! Seed dataset domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the seed dataset.
///
/// Aliases accept the column names of the original beer catalogue export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(alias = "beer_name")]
    pub name: String,
    #[serde(alias = "beer_style")]
    pub category: String,
    /// Numeric measure with two decimal places
    #[serde(alias = "abv")]
    pub measure_a: f64,
    #[serde(alias = "ibu")]
    pub measure_b: i64,
    #[serde(alias = "brewery_name")]
    pub producer_name: String,
    #[serde(alias = "brewery_location")]
    pub producer_location: String,
}

impl DatasetRecord {
    /// Check field-level constraints the schema relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if self.category.trim().is_empty() {
            return Err("category cannot be empty".to_string());
        }
        if self.producer_name.trim().is_empty() {
            return Err("producer_name cannot be empty".to_string());
        }
        if !self.measure_a.is_finite() {
            return Err(format!("measure_a must be a finite number, got {}", self.measure_a));
        }
        let scaled = self.measure_a * 100.0;
        if (scaled.round() - scaled).abs() > 1e-6 {
            return Err(format!(
                "measure_a must have at most 2 decimal places, got {}",
                self.measure_a
            ));
        }
        Ok(())
    }

    /// `measure_a` normalized to two decimal places.
    pub fn measure_a_rounded(&self) -> f64 {
        (self.measure_a * 100.0).round() / 100.0
    }
}

/// A parsed record with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub line: u64,
    pub record: DatasetRecord,
}

/// A fully parsed dataset ready to load.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Version recorded in [`SeedState`]
    pub version: String,
    pub rows: Vec<DatasetRow>,
}

/// Seeding bookkeeping persisted inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedState {
    pub dataset_version: String,
    pub row_count: u64,
    pub seeded_at: DateTime<Utc>,
}

/// What a seeding run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Rows were loaded in this run
    Seeded { version: String, rows: u64 },
    /// The store already held this dataset version
    AlreadySeeded { version: String, rows: u64 },
}

impl SeedOutcome {
    pub fn rows(&self) -> u64 {
        match self {
            Self::Seeded { rows, .. } | Self::AlreadySeeded { rows, .. } => *rows,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Seeded { version, .. } | Self::AlreadySeeded { version, .. } => version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(measure_a: f64) -> DatasetRecord {
        DatasetRecord {
            name: "A".into(),
            category: "lager".into(),
            measure_a,
            measure_b: 20,
            producer_name: "X".into(),
            producer_location: "loc1".into(),
        }
    }

    #[test]
    fn test_validate_accepts_two_decimals() {
        assert!(record(5.0).validate().is_ok());
        assert!(record(4.55).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_three_decimals() {
        let err = record(4.555).validate().unwrap_err();
        assert!(err.contains("2 decimal places"));
    }

    #[test]
    fn test_validate_rejects_nan() {
        assert!(record(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_category() {
        let mut r = record(5.0);
        r.category = " ".into();
        assert!(r.validate().is_err());
    }
}
