//! Most productive producers.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;
use sqlx::SqlitePool;

use super::{round_to, ModuleError};

const LIMIT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerSummary {
    pub producer_name: String,
    pub producer_location: String,
    pub records: u64,
    /// Rounded to 2 decimals
    pub avg_measure_a: f64,
    /// Rounded to 1 decimal
    pub avg_measure_b: f64,
}

/// Top producers by record count; ties break by name then location.
pub async fn query(pool: &SqlitePool) -> Result<Vec<ProducerSummary>, ModuleError> {
    let rows: Vec<(String, String, i64, f64, f64)> = sqlx::query_as(
        r"SELECT producer_name, producer_location, COUNT(*) AS records,
                 AVG(measure_a) AS avg_measure_a, AVG(measure_b) AS avg_measure_b
          FROM records
          GROUP BY producer_name, producer_location
          ORDER BY records DESC, producer_name ASC, producer_location ASC
          LIMIT ?",
    )
    .bind(LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(producer_name, producer_location, records, avg_a, avg_b)| ProducerSummary {
            producer_name,
            producer_location,
            records: records.unsigned_abs(),
            avg_measure_a: round_to(avg_a, 2),
            avg_measure_b: round_to(avg_b, 1),
        })
        .collect())
}

pub fn render(producers: &[ProducerSummary]) -> Result<String, ModuleError> {
    let top = producers.first().ok_or(ModuleError::Empty)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Producer", "Location", "Records", "Avg measure_a", "Avg measure_b"]);
    for row in producers {
        table.add_row(vec![
            Cell::new(&row.producer_name),
            Cell::new(&row.producer_location),
            Cell::new(row.records).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", row.avg_measure_a)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", row.avg_measure_b)).set_alignment(CellAlignment::Right),
        ]);
    }

    Ok(format!(
        "TOP {LIMIT} PRODUCERS BY RECORD COUNT\n{table}\n\n\
         Most productive producer: {}\n  Location: {}\n  Records: {}\n  Avg measure_a: {:.2}\n  Avg measure_b: {:.1}\n",
        top.producer_name, top.producer_location, top.records, top.avg_measure_a, top.avg_measure_b
    ))
}

/// Query and render in one go.
pub async fn run(pool: &SqlitePool) -> Result<String, ModuleError> {
    render(&query(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{connect_store, test_support, ConnectPolicy};

    #[tokio::test]
    async fn test_ranked_by_record_count() {
        let dir = tempfile::tempdir().unwrap();
        let location = test_support::seeded(
            &dir,
            &[
                ("A", "lager", 5.0, 20, "X"),
                ("B", "lager", 4.0, 25, "X"),
                ("C", "stout", 6.5, 40, "Y"),
            ],
        )
        .await;
        let pool = connect_store(&location, ConnectPolicy::once()).await.unwrap();

        let producers = query(&pool).await.unwrap();
        assert_eq!(producers.len(), 2);
        assert_eq!(producers[0].producer_name, "X");
        assert_eq!(producers[0].records, 2);
        assert!((producers[0].avg_measure_a - 4.5).abs() < 1e-9);
        assert!((producers[0].avg_measure_b - 22.5).abs() < 1e-9);
        assert!(render(&producers).unwrap().contains("Most productive producer: X"));
    }

    #[tokio::test]
    async fn test_limited_to_ten() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..12).map(|i| format!("P{i:02}")).collect();
        let rows: Vec<(&str, &str, f64, i64, &str)> =
            names.iter().map(|n| ("beer", "lager", 5.0, 20, n.as_str())).collect();
        let location = test_support::seeded(&dir, &rows).await;
        let pool = connect_store(&location, ConnectPolicy::once()).await.unwrap();

        let producers = query(&pool).await.unwrap();
        assert_eq!(producers.len(), 10);
        assert_eq!(producers[0].producer_name, "P00");
    }
}
