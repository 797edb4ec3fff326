//! Idempotent data seeder.

use std::path::Path;
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord, Trim};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::domain::errors::SeedError;
use crate::domain::models::{Dataset, DatasetRecord, DatasetRow, SeedOutcome, SeedSpec};
use crate::domain::ports::{StoreConnector, StoreLocation};

/// Loads the seed dataset into the store exactly once per dataset version.
pub struct DataSeeder {
    connector: Arc<dyn StoreConnector>,
}

impl DataSeeder {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self { connector }
    }

    /// Parse and seed. The dataset is fully parsed before the store is touched.
    pub async fn run(
        &self,
        store_service: &str,
        seed: &SeedSpec,
        location: &StoreLocation,
    ) -> Result<SeedOutcome, SeedError> {
        let dataset = load_dataset(&seed.dataset, seed.version.as_deref()).await?;

        let store = self
            .connector
            .connect(location)
            .await
            .map_err(|e| SeedError::StoreUnavailable {
                service: store_service.to_string(),
                reason: e.to_string(),
            })?;

        let outcome = store.seed(&dataset).await?;
        match &outcome {
            SeedOutcome::Seeded { version, rows } => {
                info!(store = store_service, version = %version, rows, "dataset seeded");
            }
            SeedOutcome::AlreadySeeded { version, rows } => {
                info!(store = store_service, version = %version, rows, "dataset already seeded, skipping");
            }
        }
        Ok(outcome)
    }
}

/// Read and parse a dataset file.
///
/// `version` defaults to the SHA-256 of the file's bytes.
pub async fn load_dataset(path: &Path, version: Option<&str>) -> Result<Dataset, SeedError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| SeedError::Dataset {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let version = version.map_or_else(|| hex::encode(Sha256::digest(&bytes)), str::to_string);
    let rows = tokio::task::spawn_blocking(move || parse_dataset(&bytes))
        .await
        .map_err(|e| SeedError::Dataset {
            path: path.display().to_string(),
            reason: e.to_string(),
        })??;

    Ok(Dataset { version, rows })
}

/// Parse header-delimited CSV into validated rows.
pub fn parse_dataset(bytes: &[u8]) -> Result<Vec<DatasetRow>, SeedError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| SeedError::MalformedRecord {
            line: 1,
            record: String::new(),
            reason: format!("unreadable header: {e}"),
        })?
        .clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| SeedError::MalformedRecord {
            line: e.position().map_or(0, csv::Position::line),
            record: String::new(),
            reason: e.to_string(),
        })?;
        let line = record.position().map_or(0, csv::Position::line);

        let malformed = |reason: String| SeedError::MalformedRecord {
            line,
            record: raw(&record),
            reason,
        };

        let parsed: DatasetRecord = record
            .deserialize(Some(&headers))
            .map_err(|e| malformed(e.to_string()))?;
        parsed.validate().map_err(malformed)?;

        rows.push(DatasetRow { line, record: parsed });
    }

    Ok(rows)
}

fn raw(record: &StringRecord) -> String {
    record.iter().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_original_column_names() {
        let csv = "beer_name,beer_style,abv,ibu,brewery_name,brewery_location\n\
                   A,lager,5.0,20,X,loc1\n\
                   C,stout, 6.5 ,40,Y,loc2\n";

        let rows = parse_dataset(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[1].record.category, "stout");
        assert!((rows[1].record.measure_a - 6.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_names_malformed_line() {
        let csv = "name,category,measure_a,measure_b,producer_name,producer_location\n\
                   A,lager,5.0,20,X,loc1\n\
                   B,lager,strong,20,X,loc1\n";

        match parse_dataset(csv.as_bytes()).unwrap_err() {
            SeedError::MalformedRecord { line, record, .. } => {
                assert_eq!(line, 3);
                assert!(record.starts_with("B,lager,strong"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_three_decimals() {
        let csv = "name,category,measure_a,measure_b,producer_name,producer_location\n\
                   A,lager,5.123,20,X,loc1\n";
        assert!(matches!(
            parse_dataset(csv.as_bytes()),
            Err(SeedError::MalformedRecord { line: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_version_defaults_to_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(
            &path,
            "name,category,measure_a,measure_b,producer_name,producer_location\nA,lager,5.0,20,X,loc1\n",
        )
        .unwrap();

        let first = load_dataset(&path, None).await.unwrap();
        assert_eq!(first.version.len(), 64);
        assert_eq!(load_dataset(&path, None).await.unwrap().version, first.version);
        assert_eq!(load_dataset(&path, Some("v1")).await.unwrap().version, "v1");
    }

    #[tokio::test]
    async fn test_missing_dataset_file() {
        let err = load_dataset(Path::new("/nonexistent/data.csv"), None).await.unwrap_err();
        assert!(matches!(err, SeedError::Dataset { .. }));
    }
}
