//! Model files to applied migrations, through the same calls the CLI makes.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

use docshift::migrate::{Migrator, Operation, UpOutcome, load_units};
use docshift::schema::diff_snapshots;
use docshift::store::{Database, Document, DocumentStore, MemoryStore};
use docshift::workspace::{GenerateOutcome, Workspace};

const WIDGET_V1: &str = r#"
const mongoose = require('mongoose');

const widgetSchema = new mongoose.Schema({
  name: { type: String, required: true },
  sku: { type: String, unique: true },
});

module.exports = mongoose.model('Widget', widgetSchema);
"#;

const WIDGET_V2: &str = r#"
const mongoose = require('mongoose');

const widgetSchema = new mongoose.Schema({
  name: { type: String, required: true },
  sku: { type: String, unique: true },
  price: Number,
});

module.exports = mongoose.model('Widget', widgetSchema);
"#;

fn write_model(ws: &Workspace, file: &str, text: &str) {
    fs::create_dir_all(ws.models_dir()).unwrap();
    fs::write(ws.models_dir().join(file), text).unwrap();
}

fn workspace(root: &Path) -> Workspace {
    Workspace::new(root.join("models"), root.join("migrations"))
}

fn generated(outcome: GenerateOutcome) -> docshift::migrate::MigrationUnit {
    match outcome {
        GenerateOutcome::Generated { unit, .. } => unit,
        GenerateOutcome::NoChanges => panic!("expected a generated unit"),
    }
}

#[tokio::test]
async fn test_widget_price_becomes_unit_002() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    let store = Arc::new(MemoryStore::new());
    let migrator = Migrator::new(Database::with_store(store.clone()), ws.migrations_dir());

    write_model(&ws, "widget.js", WIDGET_V1);
    let first = generated(ws.generate(None).unwrap());
    assert_eq!(first.version, "001");
    assert_eq!(first.name, "create_widget");
    migrator.up().await.unwrap();

    let mut widget = Document::new();
    widget.insert("_id".into(), json!("w1"));
    widget.insert("name".into(), json!("gear"));
    store.insert("widgets", widget).await.unwrap();

    write_model(&ws, "widget.js", WIDGET_V2);
    let second = generated(ws.generate(None).unwrap());
    assert_eq!(second.version, "002");
    assert_eq!(second.name, "add_price_to_widget");
    assert_eq!(
        second.up,
        vec![Operation::SetMissing {
            collection: "widgets".into(),
            field: "price".into(),
            value: json!(0),
        }]
    );
    assert!(second.down.is_some());

    let UpOutcome::Applied(applied) = migrator.up().await.unwrap() else {
        panic!("expected 002 to apply");
    };
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].version, "002");

    let stored = store.find_one("widgets", "w1").await.unwrap().unwrap();
    assert_eq!(stored["price"], json!(0));

    // models unchanged: nothing new to generate
    assert!(matches!(ws.generate(None).unwrap(), GenerateOutcome::NoChanges));
    let versions: Vec<String> = load_units(ws.migrations_dir())
        .unwrap()
        .into_iter()
        .map(|u| u.unit.version)
        .collect();
    assert_eq!(versions, vec!["001", "002"]);
}

#[tokio::test]
async fn test_status_after_fresh_snapshot_is_empty() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    write_model(&ws, "widget.js", WIDGET_V1);

    let (path, extraction) = ws.snapshot().unwrap();
    assert!(path.starts_with(ws.migrations_dir().join("snapshots")));
    assert_eq!(extraction.snapshot.len(), 1);

    let store = Arc::new(MemoryStore::new());
    let status = Migrator::new(Database::with_store(store), ws.migrations_dir())
        .status()
        .await
        .unwrap();
    assert!(status.is_empty());
    assert!(status.modified.is_empty());

    // the snapshot is now the baseline
    assert!(ws.diff().unwrap().diff.is_empty());
}

#[test]
fn test_diff_properties_on_extracted_models() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());

    write_model(&ws, "widget.js", WIDGET_V1);
    let v1 = ws.extract().unwrap().snapshot;
    write_model(&ws, "widget.js", WIDGET_V2);
    let v2 = ws.extract().unwrap().snapshot;

    assert!(diff_snapshots(&v2, Some(&v2)).is_empty());

    let forward = diff_snapshots(&v2, Some(&v1));
    let backward = diff_snapshots(&v1, Some(&v2));
    assert_eq!(forward.invert(), backward);
    assert_eq!(forward.describe().lines().count(), 1);
}

#[test]
fn test_unparseable_model_is_skipped_not_removed() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());

    write_model(&ws, "widget.js", WIDGET_V1);
    generated(ws.generate(None).unwrap());

    write_model(
        &ws,
        "widget.js",
        "const widgetSchema = new mongoose.Schema({ name: { type: String, ");
    let report = ws.diff().unwrap();
    assert_eq!(report.skipped.len(), 1);
    assert!(report.diff.removed.is_empty());
    assert!(report.current.contains("Widget"));
}

#[test]
fn test_versions_increment_by_one() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());

    let versions: Vec<String> = ["a", "b", "c"]
        .into_iter()
        .map(|name| ws.create(name).unwrap().0.version)
        .collect();
    assert_eq!(versions, vec!["001", "002", "003"]);

    write_model(&ws, "widget.js", WIDGET_V1);
    assert_eq!(generated(ws.generate(Some("widgets")).unwrap()).version, "004");
}

#[tokio::test]
async fn test_generate_then_apply_in_one_step() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    let store = Arc::new(MemoryStore::new());
    let migrator = Migrator::new(Database::with_store(store.clone()), ws.migrations_dir());

    write_model(&ws, "widget.js", WIDGET_V1);
    generated(ws.generate(None).unwrap());
    migrator.up().await.unwrap();

    let mut widget = Document::new();
    widget.insert("_id".into(), json!("w1"));
    store.insert("widgets", widget).await.unwrap();

    // what `docshift auto` does: generate, and apply only if a unit was written
    write_model(&ws, "widget.js", WIDGET_V2);
    let outcome = ws.generate(None).unwrap();
    assert!(matches!(outcome, GenerateOutcome::Generated { .. }));
    let UpOutcome::Applied(applied) = migrator.up().await.unwrap() else {
        panic!("expected the new unit to apply");
    };
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].name, "add_price_to_widget");
    let stored = store.find_one("widgets", "w1").await.unwrap().unwrap();
    assert_eq!(stored["price"], json!(0));

    // second run: nothing generated, nothing applied
    assert!(matches!(ws.generate(None).unwrap(), GenerateOutcome::NoChanges));
    assert_eq!(migrator.up().await.unwrap(), UpOutcome::NothingPending);
}

#[tokio::test]
async fn test_clock_default_on_number_field_is_backfilled_as_millis() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path());
    let store = Arc::new(MemoryStore::new());
    let migrator = Migrator::new(Database::with_store(store.clone()), ws.migrations_dir());

    write_model(&ws, "widget.js", WIDGET_V1);
    generated(ws.generate(None).unwrap());
    let mut widget = Document::new();
    widget.insert("_id".into(), json!("w1"));
    store.insert("widgets", widget).await.unwrap();

    write_model(
        &ws,
        "widget.js",
        &WIDGET_V1.replace(
            "sku: { type: String, unique: true },",
            "sku: { type: String, unique: true },\n  seenAt: { type: Number, default: Date.now },",
        ),
    );
    generated(ws.generate(None).unwrap());
    migrator.up().await.unwrap();

    let stored = store.find_one("widgets", "w1").await.unwrap().unwrap();
    assert!(stored["seenAt"].is_i64(), "seenAt = {}", stored["seenAt"]);
}
