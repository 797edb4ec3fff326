//! Build graph tests over real layer directories and the SQLite build cache.

mod common;

use std::path::Path;
use std::sync::Arc;

use keel::adapters::builder::LayerImageBuilder;
use keel::adapters::sqlite::{create_migrated_test_pool, SqliteBuildCache};
use keel::domain::models::{ImageRef, Manifest};
use keel::domain::ports::BuildCache;
use keel::services::{BuildGraphEngine, BuildStatus, ManifestLoader};

const IMAGES: &str = r"
external_images: ['python:3.11-slim']
images:
  - { name: base, tag: '1', context: ./base, parent: 'python:3.11-slim' }
  - { name: app, tag: '1', context: ./app, parent: 'base:1', steps: [[sh, -c, 'cat base.txt app.txt > combined.txt']] }
  - { name: tools, tag: '1', context: ./tools, parent: 'base:1' }
  - { name: solo, tag: '1', context: ./solo }
services: []
";

fn write(dir: &Path, file: &str, body: &str) {
    let path = dir.join(file);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn layout(dir: &Path) -> Manifest {
    write(dir, "base/base.txt", "base v1\n");
    write(dir, "app/app.txt", "app v1\n");
    write(dir, "tools/tools.txt", "tools v1\n");
    write(dir, "solo/solo.txt", "solo v1\n");
    ManifestLoader::new().parse(IMAGES, dir).unwrap()
}

async fn engine(dir: &Path) -> (BuildGraphEngine, Arc<SqliteBuildCache>) {
    let pool = create_migrated_test_pool().await.unwrap();
    let cache = Arc::new(SqliteBuildCache::new(pool));
    let builder = Arc::new(LayerImageBuilder::new(dir.join("state/layers")).unwrap());
    (BuildGraphEngine::new(builder, cache.clone(), 2), cache)
}

fn image(name: &str) -> ImageRef {
    ImageRef::new(name, "1")
}

fn status_of(report: &keel::services::BuildReport, name: &str) -> BuildStatus {
    report.result(&image(name)).unwrap().status.clone()
}

#[tokio::test]
async fn test_parents_build_before_children() {
    let tmp = common::temp_dir();
    let manifest = layout(tmp.path());
    let (engine, _) = engine(tmp.path()).await;

    let waves = engine.plan(&manifest).unwrap();
    assert_eq!(waves[0], vec![image("base"), image("solo")]);
    assert_eq!(waves[1], vec![image("app"), image("tools")]);

    let report = engine.build(&manifest, false).await.unwrap();
    assert!(report.is_success());
    let app_layer = report.result(&image("app")).unwrap().layer_dir.clone().unwrap();
    assert_eq!(
        std::fs::read_to_string(app_layer.join("combined.txt")).unwrap(),
        "base v1\napp v1\n"
    );
    assert_eq!(
        report.result(&ImageRef::new("python", "3.11-slim")).unwrap().status,
        BuildStatus::External
    );
}

#[tokio::test]
async fn test_unchanged_contexts_are_cached() {
    let tmp = common::temp_dir();
    let manifest = layout(tmp.path());
    let (engine, cache) = engine(tmp.path()).await;

    engine.build(&manifest, false).await.unwrap();
    let second = engine.build(&manifest, false).await.unwrap();

    assert!(second.rebuilt().is_empty());
    for name in ["base", "app", "tools", "solo"] {
        assert_eq!(status_of(&second, name), BuildStatus::Cached, "{name}");
    }
    assert_eq!(cache.tags().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_parent_change_rebuilds_descendants_only() {
    let tmp = common::temp_dir();
    let manifest = layout(tmp.path());
    let (engine, _) = engine(tmp.path()).await;

    let first = engine.build(&manifest, false).await.unwrap();
    write(tmp.path(), "base/base.txt", "base v2\n");
    let second = engine.build(&manifest, false).await.unwrap();

    let mut rebuilt: Vec<String> = second.rebuilt().iter().map(|r| r.name.clone()).collect();
    rebuilt.sort();
    assert_eq!(rebuilt, vec!["app", "base", "tools"]);
    assert_eq!(status_of(&second, "solo"), BuildStatus::Cached);
    assert_ne!(
        first.result(&image("app")).unwrap().fingerprint,
        second.result(&image("app")).unwrap().fingerprint
    );

    let app_layer = second.result(&image("app")).unwrap().layer_dir.clone().unwrap();
    assert_eq!(
        std::fs::read_to_string(app_layer.join("combined.txt")).unwrap(),
        "base v2\napp v1\n"
    );
}

#[tokio::test]
async fn test_reverted_context_reuses_old_layer() {
    let tmp = common::temp_dir();
    let manifest = layout(tmp.path());
    let (engine, _) = engine(tmp.path()).await;

    engine.build(&manifest, false).await.unwrap();
    write(tmp.path(), "solo/solo.txt", "solo v2\n");
    engine.build(&manifest, false).await.unwrap();
    write(tmp.path(), "solo/solo.txt", "solo v1\n");
    let third = engine.build(&manifest, false).await.unwrap();

    assert_eq!(status_of(&third, "solo"), BuildStatus::Reused);
}

#[tokio::test]
async fn test_force_rebuilds_everything() {
    let tmp = common::temp_dir();
    let manifest = layout(tmp.path());
    let (engine, _) = engine(tmp.path()).await;

    engine.build(&manifest, false).await.unwrap();
    let forced = engine.build(&manifest, true).await.unwrap();

    assert_eq!(forced.rebuilt().len(), 4);
}

#[tokio::test]
async fn test_failed_parent_skips_children_not_siblings() {
    let tmp = common::temp_dir();
    let manifest = layout(tmp.path());
    std::fs::remove_file(tmp.path().join("app/app.txt")).unwrap();
    let (engine, cache) = engine(tmp.path()).await;

    let report = engine.build(&manifest, false).await.unwrap();

    assert!(!report.is_success());
    assert!(matches!(status_of(&report, "app"), BuildStatus::Failed(_)));
    assert_eq!(status_of(&report, "tools"), BuildStatus::Built);
    assert_eq!(status_of(&report, "solo"), BuildStatus::Built);
    assert_eq!(report.errors().len(), 1);
    assert!(cache.tagged(&image("app")).await.unwrap().is_none());

    let broken_base = ManifestLoader::new()
        .parse(&IMAGES.replace("./base", "./missing"), tmp.path())
        .unwrap();
    let report = engine.build(&broken_base, false).await.unwrap();
    assert!(matches!(status_of(&report, "base"), BuildStatus::Failed(_)));
    assert!(matches!(status_of(&report, "app"), BuildStatus::Skipped { .. }));
    assert!(matches!(status_of(&report, "tools"), BuildStatus::Skipped { .. }));
    assert_eq!(status_of(&report, "solo"), BuildStatus::Cached);
}
