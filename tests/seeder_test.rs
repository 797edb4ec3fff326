//! Seeding idempotence against a real SQLite store on disk.

mod common;

use std::sync::Arc;

use common::{lager_rows, store_location, temp_dir, write_dataset};
use keel::adapters::sqlite::{SqliteSeedStore, SqliteStoreConnector};
use keel::domain::errors::SeedError;
use keel::domain::models::{SeedOutcome, SeedSpec};
use keel::domain::ports::SeedStore;
use keel::services::DataSeeder;

fn seeder() -> DataSeeder {
    DataSeeder::new(Arc::new(SqliteStoreConnector))
}

fn spec(dataset: std::path::PathBuf, version: Option<&str>) -> SeedSpec {
    SeedSpec {
        store: "database".to_string(),
        dataset,
        version: version.map(str::to_string),
    }
}

#[tokio::test]
async fn test_second_seed_is_a_no_op() {
    let dir = temp_dir();
    let dataset = write_dataset(dir.path(), "beers.csv", &lager_rows());
    let location = store_location(dir.path());

    let first = seeder().run("database", &spec(dataset.clone(), Some("1")), &location).await.unwrap();
    let second = seeder().run("database", &spec(dataset, Some("1")), &location).await.unwrap();

    assert_eq!(first, SeedOutcome::Seeded { version: "1".into(), rows: 3 });
    assert_eq!(second, SeedOutcome::AlreadySeeded { version: "1".into(), rows: 3 });

    let store = SqliteSeedStore::open(&location).await.unwrap();
    assert_eq!(store.row_count().await.unwrap(), 3);
    assert_eq!(
        store.records_by_category().await.unwrap(),
        vec![("lager".to_string(), 2), ("stout".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_new_version_replaces_rows() {
    let dir = temp_dir();
    let location = store_location(dir.path());
    let v1 = write_dataset(dir.path(), "v1.csv", &lager_rows());
    let v2 = write_dataset(dir.path(), "v2.csv", &["D,porter,5.5,30,Z,loc3"]);

    seeder().run("database", &spec(v1, Some("1")), &location).await.unwrap();
    let outcome = seeder().run("database", &spec(v2, Some("2")), &location).await.unwrap();

    assert_eq!(outcome, SeedOutcome::Seeded { version: "2".into(), rows: 1 });
    let store = SqliteSeedStore::open(&location).await.unwrap();
    assert_eq!(store.row_count().await.unwrap(), 1);
    assert_eq!(store.seed_state().await.unwrap().unwrap().dataset_version, "2");
}

#[tokio::test]
async fn test_default_version_is_content_hash() {
    let dir = temp_dir();
    let location = store_location(dir.path());
    let dataset = write_dataset(dir.path(), "beers.csv", &lager_rows());

    let first = seeder().run("database", &spec(dataset.clone(), None), &location).await.unwrap();
    let again = seeder().run("database", &spec(dataset.clone(), None), &location).await.unwrap();
    assert_eq!(first.version().len(), 64);
    assert!(matches!(again, SeedOutcome::AlreadySeeded { .. }));

    write_dataset(dir.path(), "beers.csv", &["D,porter,5.5,30,Z,loc3"]);
    let changed = seeder().run("database", &spec(dataset, None), &location).await.unwrap();
    assert!(matches!(changed, SeedOutcome::Seeded { rows: 1, .. }));
    assert_ne!(changed.version(), first.version());
}

#[tokio::test]
async fn test_malformed_dataset_leaves_store_untouched() {
    let dir = temp_dir();
    let location = store_location(dir.path());
    let good = write_dataset(dir.path(), "good.csv", &lager_rows());
    let bad = write_dataset(
        dir.path(),
        "bad.csv",
        &["A,lager,5.0,20,X,loc1", "B,stout,strong,40,Y,loc2"],
    );

    seeder().run("database", &spec(good, Some("1")), &location).await.unwrap();
    let err = seeder()
        .run("database", &spec(bad, Some("2")), &location)
        .await
        .unwrap_err();

    assert!(matches!(err, SeedError::MalformedRecord { line: 3, .. }));
    let store = SqliteSeedStore::open(&location).await.unwrap();
    assert_eq!(store.row_count().await.unwrap(), 3);
    assert_eq!(store.seed_state().await.unwrap().unwrap().dataset_version, "1");
}

#[tokio::test]
async fn test_missing_store_host_is_unavailable() {
    let dir = temp_dir();
    let dataset = write_dataset(dir.path(), "beers.csv", &lager_rows());
    let location = store_location(&dir.path().join("no-volume"));

    let err = seeder()
        .run("database", &spec(dataset, Some("1")), &location)
        .await
        .unwrap_err();
    assert!(matches!(err, SeedError::StoreUnavailable { ref service, .. } if service == "database"));
}
