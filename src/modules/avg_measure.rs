//! Average `measure_a` per category.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;
use sqlx::SqlitePool;

use super::{round_to, ModuleError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAverage {
    pub category: String,
    /// Rounded to 2 decimals
    pub avg_measure_a: f64,
    pub records: u64,
}

/// Categories by average `measure_a`, highest first; ties break by name.
pub async fn query(pool: &SqlitePool) -> Result<Vec<CategoryAverage>, ModuleError> {
    let rows: Vec<(String, f64, i64)> = sqlx::query_as(
        r"SELECT category, AVG(measure_a) AS avg_measure_a, COUNT(*) AS records
          FROM records
          GROUP BY category",
    )
    .fetch_all(pool)
    .await?;

    let mut averages: Vec<CategoryAverage> = rows
        .into_iter()
        .map(|(category, avg, records)| CategoryAverage {
            category,
            avg_measure_a: round_to(avg, 2),
            records: records.unsigned_abs(),
        })
        .collect();

    averages.sort_by(|a, b| {
        b.avg_measure_a
            .total_cmp(&a.avg_measure_a)
            .then_with(|| a.category.cmp(&b.category))
    });
    Ok(averages)
}

pub fn render(averages: &[CategoryAverage]) -> Result<String, ModuleError> {
    let top = averages.first().ok_or(ModuleError::Empty)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Category", "Avg measure_a", "Records"]);
    for row in averages {
        table.add_row(vec![
            Cell::new(&row.category),
            Cell::new(format!("{:.2}", row.avg_measure_a)).set_alignment(CellAlignment::Right),
            Cell::new(row.records).set_alignment(CellAlignment::Right),
        ]);
    }

    Ok(format!(
        "AVERAGE MEASURE_A BY CATEGORY\n{table}\n\nHighest category: {} at {:.2} (based on {} records)\n",
        top.category, top.avg_measure_a, top.records
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
    async fn test_lager_stout_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let location = test_support::seeded(
            &dir,
            &[
                ("A", "lager", 5.0, 20, "X"),
                ("B", "lager", 4.0, 18, "X"),
                ("C", "stout", 6.5, 40, "Y"),
            ],
        )
        .await;
        let pool = connect_store(&location, ConnectPolicy::once()).await.unwrap();

        let averages = query(&pool).await.unwrap();
        assert_eq!(
            averages,
            vec![
                CategoryAverage {
                    category: "stout".into(),
                    avg_measure_a: 6.5,
                    records: 1
                },
                CategoryAverage {
                    category: "lager".into(),
                    avg_measure_a: 4.5,
                    records: 2
                },
            ]
        );

        let output = render(&averages).unwrap();
        assert!(output.contains("Highest category: stout at 6.50"));
    }

    #[tokio::test]
    async fn test_average_rounded_to_two_places() {
        let dir = tempfile::tempdir().unwrap();
        let location = test_support::seeded(
            &dir,
            &[
                ("A", "ipa", 6.0, 60, "X"),
                ("B", "ipa", 6.0, 60, "X"),
                ("C", "ipa", 6.01, 60, "X"),
            ],
        )
        .await;
        let pool = connect_store(&location, ConnectPolicy::once()).await.unwrap();

        let averages = query(&pool).await.unwrap();
        assert!((averages[0].avg_measure_a - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_render_empty_store_fails() {
        assert!(matches!(render(&[]), Err(ModuleError::Empty)));
    }
}
